//! 文本分块
//!
//! [`ChunkSplitter`] 把提取出的页面或长文本按字符预算分组，只在页面/段落边界切分；
//! [`ChunkOptimizer`] 合并被切断在句子中间的相邻块；[`split_oversized`] 把超过
//! 单次请求上限的文本按句子边界重新切分。

use std::collections::VecDeque;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::config::ChunkingConfig;

fn sentence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // 末尾没有标点的残句也作为一个句子保留
    PATTERN.get_or_init(|| Regex::new(r"[^.!?]+(?:[.!?]+|$)").expect("valid sentence regex"))
}

/// 把所有连续空白折叠为单个空格
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 文本分块器
#[derive(Debug, Clone)]
pub struct ChunkSplitter {
    config: ChunkingConfig,
}

impl ChunkSplitter {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// 按页分组
    ///
    /// 每块最多 `pages_per_chunk` 页且不超过 `page_chunk_chars` 个字符；
    /// 单页超出预算时独立成块。空白页被跳过。
    pub fn split_pages<S: AsRef<str>>(&self, pages: &[S]) -> Vec<String> {
        let max_pages = self.config.pages_per_chunk.max(1);
        let budget = self.config.page_chunk_chars;
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut pages_in_current = 0;

        for page in pages {
            let page = page.as_ref().trim();
            if page.is_empty() {
                continue;
            }

            let potential = if current.is_empty() {
                page.chars().count()
            } else {
                current.chars().count() + 2 + page.chars().count()
            };

            if !current.is_empty() && (pages_in_current >= max_pages || potential > budget) {
                chunks.push(std::mem::take(&mut current));
                pages_in_current = 0;
            }

            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(page);
            pages_in_current += 1;
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        debug!(pages = pages.len(), chunks = chunks.len(), "按页分块完成");
        chunks
    }

    /// 按段落分组
    ///
    /// 以换行切分段落，段落累积到 `text_chunk_chars` 为止。
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let budget = self.config.text_chunk_chars;
        let mut chunks = Vec::new();
        let mut current = String::new();

        for paragraph in text.split('\n').map(str::trim).filter(|p| !p.is_empty()) {
            let potential = current.chars().count() + paragraph.chars().count();
            if !current.is_empty() && potential > budget {
                chunks.push(std::mem::take(&mut current));
            }

            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        debug!(chunks = chunks.len(), "按段落分块完成");
        chunks
    }
}

impl Default for ChunkSplitter {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

/// 句子边界修复
pub struct ChunkOptimizer;

impl ChunkOptimizer {
    /// 前一块不以 `.`/`!`/`?` 结尾且后一块以小写字母开头时，视为句子被切断并合并。
    ///
    /// 单次从左到右的贪心扫描，合并后的块继续与下一块比较。空块被丢弃。
    pub fn optimize<S: AsRef<str>>(chunks: &[S]) -> Vec<String> {
        let mut result: Vec<String> = Vec::with_capacity(chunks.len());
        let mut current: Option<String> = None;

        for chunk in chunks {
            let chunk = chunk.as_ref();
            if chunk.trim().is_empty() {
                continue;
            }

            current = Some(match current.take() {
                Some(mut acc) if Self::is_continuation(&acc, chunk) => {
                    acc.push(' ');
                    acc.push_str(chunk);
                    acc
                }
                Some(acc) => {
                    result.push(acc);
                    chunk.to_string()
                }
                None => chunk.to_string(),
            });
        }

        if let Some(last) = current {
            result.push(last);
        }
        result
    }

    fn is_continuation(previous: &str, next: &str) -> bool {
        let ends_sentence = previous
            .trim_end()
            .chars()
            .last()
            .map(|c| matches!(c, '.' | '!' | '?'))
            .unwrap_or(false);
        let starts_lowercase = next
            .trim_start()
            .chars()
            .next()
            .map(|c| c.is_alphabetic() && c.is_lowercase())
            .unwrap_or(false);
        !ends_sentence && starts_lowercase
    }
}

/// 把超过 `limit` 个字符的文本切分成不超过上限的片段
///
/// 先按句子（`[^.!?]+[.!?]+`）分组，不丢弃任何字符；单个句子仍超长时，在上限之前最后一个
/// 空白处硬切，没有空白则直接按字符切。使用显式工作队列，不递归。
pub fn split_oversized(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut pieces = Vec::new();
    let mut queue: VecDeque<String> = VecDeque::from([text.to_string()]);

    while let Some(owned) = queue.pop_front() {
        // 句间的前导空白不计入上限
        let item = owned.trim_start();
        if item.is_empty() {
            continue;
        }
        if item.chars().count() <= limit {
            pieces.push(item.to_string());
            continue;
        }

        let sentences = sentence_spans(item);

        if sentences.len() > 1 {
            // 句子分组后回到队列，单个超长句子会在下一轮被硬切
            let mut group = String::new();
            let mut groups = Vec::new();
            for sentence in sentences {
                if !group.is_empty() && group.chars().count() + sentence.chars().count() > limit {
                    groups.push(std::mem::take(&mut group));
                }
                group.push_str(sentence);
            }
            if !group.is_empty() {
                groups.push(group);
            }
            for g in groups.into_iter().rev() {
                queue.push_front(g);
            }
        } else {
            let (head, tail) = hard_split(item, limit);
            queue.push_front(tail);
            pieces.push(head);
        }
    }

    pieces
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// 按匹配边界切出句子，各片段拼接后与原文完全一致
///
/// 句首的孤立标点（如 "..."）并入随后的句子；整段只有标点时原样返回。
fn sentence_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut start = 0;
    for m in sentence_pattern().find_iter(text) {
        if m.end() > start {
            spans.push(&text[start..m.end()]);
            start = m.end();
        }
    }
    if start < text.len() {
        spans.push(&text[start..]);
    }
    spans
}

fn hard_split(text: &str, limit: usize) -> (String, String) {
    let boundary = |n: usize| {
        text.char_indices()
            .nth(n)
            .map(|(i, _)| i)
            .unwrap_or(text.len())
    };
    let cut = boundary(limit);
    // 紧跟在上限之后的空白同样可以作为切点
    let window = &text[..boundary(limit + 1)];
    let at = match window.rfind(char::is_whitespace) {
        Some(i) if i > 0 => i,
        _ => cut,
    };
    (text[..at].to_string(), text[at..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_grouped_three_at_a_time() {
        let splitter = ChunkSplitter::default();
        let pages = ["one.", "two.", "three.", "four.", "five."];
        let chunks = splitter.split_pages(&pages);
        assert_eq!(chunks, vec!["one.\n\ntwo.\n\nthree.", "four.\n\nfive."]);
    }

    #[test]
    fn page_budget_starts_new_chunk() {
        let splitter = ChunkSplitter::new(ChunkingConfig {
            pages_per_chunk: 3,
            page_chunk_chars: 10,
            text_chunk_chars: 2000,
        });
        let pages = ["aaaaaa", "bbbbbb", "cccccccccccccccc"];
        let chunks = splitter.split_pages(&pages);
        assert_eq!(chunks, vec!["aaaaaa", "bbbbbb", "cccccccccccccccc"]);
    }

    #[test]
    fn paragraphs_are_grouped_by_budget() {
        let splitter = ChunkSplitter::new(ChunkingConfig {
            pages_per_chunk: 3,
            page_chunk_chars: 4000,
            text_chunk_chars: 12,
        });
        let chunks = splitter.split_text("first one\nsecond\n\nthird part\n");
        assert_eq!(chunks, vec!["first one", "second", "third part"]);
    }

    #[test]
    fn oversized_first_paragraph_does_not_emit_empty_chunk() {
        let splitter = ChunkSplitter::new(ChunkingConfig {
            pages_per_chunk: 3,
            page_chunk_chars: 4000,
            text_chunk_chars: 4,
        });
        let chunks = splitter.split_text("a very long paragraph\nok");
        assert_eq!(chunks, vec!["a very long paragraph", "ok"]);
    }

    #[test]
    fn split_sentence_is_merged() {
        let merged = ChunkOptimizer::optimize(&["Hello world. This is", "a test."]);
        assert_eq!(merged, vec!["Hello world. This is a test."]);
    }

    #[test]
    fn finished_sentence_is_not_merged() {
        let chunks = ChunkOptimizer::optimize(&["It ended.", "another start", "Capital start"]);
        assert_eq!(chunks, vec!["It ended.", "another start", "Capital start"]);
    }

    #[test]
    fn merges_chain_across_several_chunks() {
        let chunks = ChunkOptimizer::optimize(&["one", "two", "three.", "four"]);
        assert_eq!(chunks, vec!["one two three.", "four"]);
    }

    #[test]
    fn empty_chunks_are_dropped() {
        let chunks = ChunkOptimizer::optimize(&["", "  ", "Alpha.", "\n"]);
        assert_eq!(chunks, vec!["Alpha."]);
    }

    #[test]
    fn optimizer_is_idempotent() {
        let input = ["The cat", "sat on", "the mat. The", "Dog ran", "away", "", "fast!"];
        let once = ChunkOptimizer::optimize(&input);
        let twice = ChunkOptimizer::optimize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn identity_reassembly_keeps_every_character() {
        let text = "Intro paragraph without end\ncontinues here. Next one!\n\n\
                    Third paragraph is longer than the budget allows\nand goes on.\nFinal?";
        let splitter = ChunkSplitter::new(ChunkingConfig {
            pages_per_chunk: 3,
            page_chunk_chars: 4000,
            text_chunk_chars: 30,
        });
        let chunks = ChunkOptimizer::optimize(&splitter.split_text(text));
        let rejoined = chunks.join("\n\n");
        assert_eq!(normalize_whitespace(&rejoined), normalize_whitespace(text));
    }

    #[test]
    fn oversized_text_splits_on_sentences() {
        let text = "First sentence here. Second sentence here. Third one.";
        let pieces = split_oversized(text, 25);
        assert_eq!(
            pieces,
            vec!["First sentence here.", "Second sentence here.", "Third one."]
        );
        assert!(pieces.iter().all(|p| p.chars().count() <= 25));
    }

    #[test]
    fn unterminated_tail_is_kept() {
        let pieces = split_oversized("Done here. and a dangling tail without stop", 20);
        assert_eq!(normalize_whitespace(&pieces.join(" ")), "Done here. and a dangling tail without stop");
        assert!(pieces.iter().all(|p| p.chars().count() <= 20));
    }

    #[test]
    fn single_giant_sentence_is_hard_split() {
        let word = "abcdefghij";
        let text = vec![word; 50].join(" ");
        let pieces = split_oversized(&text, 35);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| p.chars().count() <= 35));
        assert_eq!(pieces.join(" "), text);
    }

    #[test]
    fn leading_punctuation_is_kept() {
        let text = "...and so it went on. Then the rain came down.";
        let pieces = split_oversized(text, 25);
        assert_eq!(pieces, vec!["...and so it went on.", "Then the rain came down."]);
    }

    #[test]
    fn sentence_spans_cover_the_whole_text() {
        for text in ["...and on. Then?! more", "!!!???...", "plain tail", "?! a. b"] {
            assert_eq!(sentence_spans(text).concat(), text);
        }
        assert!(sentence_spans("").is_empty());
    }

    #[test]
    fn oversized_split_never_drops_characters() {
        let long_multibyte = "漢字".repeat(40);
        let inputs = [
            "...and so it went on. Then the rain came down.",
            "?! Who knows. Nobody does!!! And then a tail without a stop",
            "!!!???...!!!???...!!!???...!!!???...",
            "Short. ... ... ... Another sentence that keeps going and going",
            long_multibyte.as_str(),
            "ğğğğğğğğğğğğ. çççççççççç! şşşşşşşşşş",
            "   \n\t leading whitespace... then words.  Trailing   ",
        ];
        let visible = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        for input in inputs {
            let longest_word = input.split_whitespace().map(|w| w.chars().count()).max().unwrap_or(0);
            for limit in [1, 3, 7, 12, 25, 60] {
                let pieces = split_oversized(input, limit);
                assert_eq!(visible(&pieces.concat()), visible(input), "limit {} for {:?}", limit, input);
                // 没有单词被迫截断时，空白归一化后可以逐字还原
                if longest_word <= limit {
                    assert_eq!(
                        normalize_whitespace(&pieces.join(" ")),
                        normalize_whitespace(input),
                        "limit {} for {:?}",
                        limit,
                        input
                    );
                }
                assert!(
                    pieces.iter().all(|p| p.chars().count() <= limit),
                    "limit {} exceeded for {:?}: {:?}",
                    limit,
                    input,
                    pieces
                );
            }
        }
    }

    #[test]
    fn text_without_whitespace_is_cut_on_char_boundary() {
        let text = "ğ".repeat(10);
        let pieces = split_oversized(&text, 4);
        assert_eq!(pieces, vec!["ğğğğ", "ğğğğ", "ğğ"]);
    }
}
