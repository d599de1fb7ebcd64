//! 保留表格结构的HTML翻译
//!
//! 表格之外的内容按纯文本翻译；表格内每个 `<th>`/`<td>` 单元格独立翻译，
//! 译文替换回原单元格，其余标记逐字节保留。

use std::sync::{Arc, OnceLock};

use regex::{Captures, Regex};
use tracing::{debug, instrument, warn};

use crate::chunker::normalize_whitespace;
use crate::error::Result;
use crate::translator::TranslationClient;
use crate::types::{TranslationOrigin, TranslationResult};

fn table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)<table\b[^>]*>.*?</table>").expect("valid table regex"))
}

fn cell_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // 不匹配 <thead>/<tbody>
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)(<t[hd](?:\s[^>]*)?>)(.*?)(</t[hd]\s*>)").expect("valid cell regex")
    })
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag regex"))
}

/// 去掉标签、解码常见实体并折叠空白
pub fn strip_tags(html: &str) -> String {
    let without_tags = tag_pattern().replace_all(html, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    normalize_whitespace(&decoded)
}

/// 转义插入到标记中的文本
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn contains_table(html: &str) -> bool {
    table_pattern().is_match(html)
}

enum Segment<'a> {
    Table(&'a str),
    Text(&'a str),
}

fn segments(html: &str) -> Vec<Segment<'_>> {
    let mut parts = Vec::new();
    let mut last = 0;
    for m in table_pattern().find_iter(html) {
        if m.start() > last {
            parts.push(Segment::Text(&html[last..m.start()]));
        }
        parts.push(Segment::Table(m.as_str()));
        last = m.end();
    }
    if last < html.len() {
        parts.push(Segment::Text(&html[last..]));
    }
    parts
}

/// 保留表格结构的HTML翻译器
#[derive(Clone)]
pub struct TableAwareHtmlTranslator {
    client: Arc<TranslationClient>,
}

impl TableAwareHtmlTranslator {
    pub fn new(client: Arc<TranslationClient>) -> Self {
        Self { client }
    }

    /// 翻译HTML
    ///
    /// 没有表格时返回翻译后的纯文本，出错时返回原始HTML；有表格时返回重组后的HTML，
    /// 单个单元格或文本段失败只保留该处原内容。
    #[instrument(skip(self, html), fields(bytes = html.len()))]
    pub async fn translate(&self, html: &str, source_lang: &str, target_lang: &str) -> String {
        if contains_table(html) {
            return self.translate_with_tables(html, source_lang, target_lang).await;
        }

        match self.translate_plain(html, source_lang, target_lang).await {
            Ok(translated) => translated,
            Err(e) => {
                warn!(error = %e, "HTML翻译失败，返回原始HTML");
                html.to_string()
            }
        }
    }

    async fn translate_plain(&self, html: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let plain = strip_tags(html);
        let result = self.client.translate(&plain, source_lang, target_lang).await?;
        if result.origin == TranslationOrigin::Skipped {
            return Ok(plain);
        }
        Ok(result.translated_text)
    }

    async fn translate_with_tables(
        &self,
        html: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> String {
        let mut output = String::with_capacity(html.len());

        for segment in segments(html) {
            match segment {
                Segment::Table(table) => {
                    output.push_str(&self.translate_table(table, source_lang, target_lang).await);
                }
                Segment::Text(text) => {
                    let plain = strip_tags(text);
                    if plain.is_empty() {
                        output.push_str(text);
                        continue;
                    }
                    let outcome = self.client.translate(&plain, source_lang, target_lang).await;
                    match settle(outcome, &plain) {
                        Some(result) if result.origin != TranslationOrigin::Skipped => {
                            output.push_str(&escape_html(&result.translated_text));
                        }
                        _ => output.push_str(text),
                    }
                }
            }
        }

        output
    }

    /// 逐个翻译单元格，全部完成后再重组
    async fn translate_table(&self, table: &str, source_lang: &str, target_lang: &str) -> String {
        let mut translations: Vec<Option<String>> = Vec::new();

        for caps in cell_pattern().captures_iter(table) {
            let plain = strip_tags(&caps[2]);
            if plain.is_empty() {
                translations.push(None);
                continue;
            }

            let outcome = self.client.translate(&plain, source_lang, target_lang).await;
            match settle(outcome, &plain) {
                Some(result) if result.is_translated() => {
                    translations.push(Some(escape_html(&result.translated_text)));
                }
                _ => {
                    debug!(cell = %plain, "单元格未翻译，保留原内容");
                    translations.push(None);
                }
            }
        }

        let mut index = 0;
        let rebuilt = cell_pattern().replace_all(table, |caps: &Captures| {
            let replacement = translations.get(index).cloned().flatten();
            index += 1;
            match replacement {
                Some(text) => format!("{}{}{}", &caps[1], text, &caps[3]),
                None => caps[0].to_string(),
            }
        });

        rebuilt.into_owned()
    }
}

/// 单个单元格或文本段的翻译失败不影响其余内容
fn settle(outcome: Result<TranslationResult>, plain: &str) -> Option<TranslationResult> {
    match outcome {
        Ok(result) => Some(result),
        Err(e) => {
            warn!(error = %e, text = %plain, "片段翻译失败，保留原内容");
            None
        }
    }
}
