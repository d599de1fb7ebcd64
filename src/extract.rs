//! 纯文本/HTML 文件提取器
//!
//! PDF、Word 等二进制格式需要外部提取器；这里只处理已经转成文本或 HTML 的文件。
//! 文本中的换页符（`\x0c`，pdftotext 的输出格式）被视为分页。

use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Result, TranslationError};
use crate::html::strip_tags;
use crate::pipeline::{DocumentExtractor, DocumentKind, EmbeddedImage, ExtractedDocument, ExtractedText};

const PAGE_BREAK: char = '\u{0c}';

fn block_end_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</(?:p|div|tr|li|h[1-6]|table)\s*>").expect("valid block regex")
    })
}

fn image_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// 读取目录中的图像文件，按文件名排序
pub async fn load_images(dir: impl AsRef<Path>) -> Result<Vec<EmbeddedImage>> {
    let mut entries = tokio::fs::read_dir(dir.as_ref()).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if image_content_type(&path).is_some() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(content_type) = image_content_type(&path) else {
            continue;
        };
        let data = tokio::fs::read(&path).await?;
        let alt = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        images.push(EmbeddedImage::new(data, content_type, alt));
    }
    debug!(count = images.len(), "已加载图像");
    Ok(images)
}

/// HTML 转为按行分隔的纯文本
fn html_to_text(html: &str) -> String {
    block_end_pattern()
        .replace_all(html, "\n")
        .split('\n')
        .map(strip_tags)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn looks_like_html(text: &str) -> bool {
    let head = text.trim_start();
    head.starts_with('<') && (head.contains("</") || head.contains("/>"))
}

/// 文本文件提取器
#[derive(Debug, Clone, Default)]
pub struct PlainFileExtractor {
    images: Vec<EmbeddedImage>,
}

impl PlainFileExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 附加随文档一起翻译的图像
    pub fn with_images(mut self, images: Vec<EmbeddedImage>) -> Self {
        self.images = images;
        self
    }
}

#[async_trait]
impl DocumentExtractor for PlainFileExtractor {
    async fn extract(&self, data: &[u8], kind: DocumentKind) -> Result<ExtractedDocument> {
        let content = std::str::from_utf8(data).map_err(|_| {
            TranslationError::Extraction(format!("{:?} input is not UTF-8 text, convert it to text first", kind))
        })?;

        if looks_like_html(content) {
            return Ok(ExtractedDocument {
                kind,
                text: ExtractedText::Raw(html_to_text(content)),
                html: Some(content.to_string()),
                images: self.images.clone(),
            });
        }

        let text = if content.contains(PAGE_BREAK) {
            ExtractedText::Pages(content.split(PAGE_BREAK).map(str::to_string).collect())
        } else {
            ExtractedText::Raw(content.to_string())
        };
        if content.trim().is_empty() {
            warn!("输入文件为空");
        }

        Ok(ExtractedDocument {
            kind,
            text,
            html: None,
            images: self.images.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn form_feeds_become_pages() {
        let doc = PlainFileExtractor::new()
            .extract(b"page one\x0cpage two", DocumentKind::Pdf)
            .await
            .unwrap();
        assert_eq!(
            doc.text,
            ExtractedText::Pages(vec!["page one".to_string(), "page two".to_string()])
        );
        assert!(doc.html.is_none());
    }

    #[tokio::test]
    async fn html_keeps_markup_and_line_structure() {
        let html = "<p>Hello &amp; welcome</p><table><tr><td>a</td><td>b</td></tr></table>";
        let doc = PlainFileExtractor::new().extract(html.as_bytes(), DocumentKind::Word).await.unwrap();
        assert_eq!(doc.html.as_deref(), Some(html));
        assert_eq!(doc.text, ExtractedText::Raw("Hello & welcome\na b".to_string()));
    }

    #[tokio::test]
    async fn binary_input_is_an_extraction_error() {
        let err = PlainFileExtractor::new()
            .extract(&[0xff, 0xfe, 0x00], DocumentKind::Pdf)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslationError::Extraction(_)));
    }

    #[tokio::test]
    async fn images_are_loaded_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), [2u8]).unwrap();
        std::fs::write(dir.path().join("a.JPG"), [1u8]).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let images = load_images(dir.path()).await.unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].alt_text, "a.JPG");
        assert_eq!(images[0].content_type, "image/jpeg");
        assert_eq!(images[1].data, vec![2]);
    }
}
