//! 图像版面分类
//!
//! 根据 OCR 单词的几何分布判断图像是普通文本、表格还是图表，决定译文的回绘方式。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::RecognizedWord;

/// 版面类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    Plain,
    Table,
    Chart,
}

/// 分类阈值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutThresholds {
    /// 判定为表格所需的单元格尺寸单词数
    pub table_min_cells: usize,
    pub cell_min_width: f32,
    pub cell_max_width: f32,
    pub cell_min_height: f32,
    pub cell_max_height: f32,
    /// 对齐分桶的像素宽度
    pub alignment_bucket: f32,
    /// 同一列或同一行至少要有的单词数
    pub alignment_min_words: usize,
    pub chart_min_words: usize,
    /// 超过该像素距离的间隔计为图表间隔
    pub chart_gap: f32,
    pub chart_min_gaps: usize,
}

impl Default for LayoutThresholds {
    fn default() -> Self {
        Self {
            table_min_cells: 8,
            cell_min_width: 10.0,
            cell_max_width: 200.0,
            cell_min_height: 10.0,
            cell_max_height: 100.0,
            alignment_bucket: 5.0,
            alignment_min_words: 3,
            chart_min_words: 5,
            chart_gap: 20.0,
            chart_min_gaps: 2,
        }
    }
}

/// 版面分类器
#[derive(Debug, Clone, Default)]
pub struct LayoutClassifier {
    thresholds: LayoutThresholds,
}

impl LayoutClassifier {
    pub fn new(thresholds: LayoutThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &LayoutThresholds {
        &self.thresholds
    }

    /// 先判断表格，再判断图表，否则为普通文本
    pub fn classify(&self, words: &[RecognizedWord]) -> LayoutKind {
        let words: Vec<&RecognizedWord> = words.iter().filter(|w| !w.bbox.is_degenerate()).collect();
        if self.is_table(&words) {
            LayoutKind::Table
        } else if self.is_chart(&words) {
            LayoutKind::Chart
        } else {
            LayoutKind::Plain
        }
    }

    fn is_table(&self, words: &[&RecognizedWord]) -> bool {
        let t = &self.thresholds;
        let cells = words
            .iter()
            .filter(|w| {
                let (width, height) = (w.bbox.width(), w.bbox.height());
                width > t.cell_min_width
                    && width < t.cell_max_width
                    && height > t.cell_min_height
                    && height < t.cell_max_height
            })
            .count();
        if cells < t.table_min_cells {
            return false;
        }

        let columns = self.max_bucket(words.iter().map(|w| w.bbox.x0));
        let rows = self.max_bucket(words.iter().map(|w| w.bbox.y0));
        columns >= t.alignment_min_words && rows >= t.alignment_min_words
    }

    fn max_bucket(&self, positions: impl Iterator<Item = f32>) -> usize {
        let bucket = self.thresholds.alignment_bucket.max(1.0);
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for position in positions {
            *counts.entry((position / bucket).round() as i64).or_default() += 1;
        }
        counts.values().copied().max().unwrap_or(0)
    }

    fn is_chart(&self, words: &[&RecognizedWord]) -> bool {
        let t = &self.thresholds;
        if words.len() < t.chart_min_words {
            return false;
        }

        let mut by_x: Vec<_> = words.iter().map(|w| (w.bbox.x0, w.bbox.x1)).collect();
        by_x.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut by_y: Vec<_> = words.iter().map(|w| (w.bbox.y0, w.bbox.y1)).collect();
        by_y.sort_by(|a, b| a.0.total_cmp(&b.0));

        let large_gaps = |spans: &[(f32, f32)]| {
            spans
                .windows(2)
                .filter(|pair| pair[1].0 - pair[0].1 > t.chart_gap)
                .count()
        };

        large_gaps(&by_x) >= t.chart_min_gaps || large_gaps(&by_y) >= t.chart_min_gaps
    }
}
