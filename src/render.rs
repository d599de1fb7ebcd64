//! 译文回绘
//!
//! 渲染分两步：[`plan`] 根据版面类型计算需要擦除的矩形和每段文字的位置，
//! [`ImageRenderer`] 再把计划绘制到图像上并编码为 PNG。
//! 计划阶段只依赖 [`TextMeasure`]，不需要真实字体。

use std::io::Cursor;
use std::path::{Path, PathBuf};

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::RenderConfig;
use crate::layout::LayoutKind;
use crate::types::{BoundingBox, RecognizedWord};

const PLAIN_FONT_SIZE: f32 = 14.0;
const PLAIN_MARGIN: f32 = 20.0;
const PLAIN_FIRST_BASELINE: f32 = 30.0;
const PLAIN_LINE_HEIGHT: f32 = 20.0;
const LABEL_FONT_SIZE: f32 = 12.0;
const TITLE_FONT_SIZE: f32 = 14.0;
const TITLE_BASELINE: f32 = 20.0;
const ROW_TOLERANCE: f32 = 15.0;
/// 基线位于单词框高度的 70% 处
const BASELINE_RATIO: f32 = 0.7;

const REGULAR_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

const BOLD_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// 渲染错误
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("No font available for rendering")]
    FontUnavailable,

    #[error("Invalid font {path}: {message}")]
    InvalidFont { path: PathBuf, message: String },

    #[error("Degenerate bounding box for word {0:?}")]
    DegenerateBox(String),

    #[error("Image encode failed: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 文本宽度测量
pub trait TextMeasure {
    fn text_width(&self, text: &str, size: f32, bold: bool) -> f32;
}

/// 按每字符半个字号估算宽度
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproximateMeasure;

impl TextMeasure for ApproximateMeasure {
    fn text_width(&self, text: &str, size: f32, _bold: bool) -> f32 {
        text.chars().count() as f32 * size * 0.5
    }
}

/// 一段待绘制的文字
#[derive(Debug, Clone, PartialEq)]
pub struct TextPlacement {
    pub x: f32,
    pub baseline: f32,
    pub text: String,
    pub size: f32,
    pub bold: bool,
}

impl TextPlacement {
    fn regular(x: f32, baseline: f32, text: impl Into<String>, size: f32) -> Self {
        Self {
            x,
            baseline,
            text: text.into(),
            size,
            bold: false,
        }
    }
}

/// 渲染计划
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    /// 实际采用的版面（表格/图表失败时降级为普通文本）
    pub layout: LayoutKind,
    pub erase: Vec<BoundingBox>,
    pub placements: Vec<TextPlacement>,
}

/// 普通文本：左边距 20，首行基线 30，行高 20，按单词贪心换行
pub fn plan_plain(translated: &str, image_width: f32, measure: &dyn TextMeasure) -> Vec<TextPlacement> {
    let max_width = image_width - 2.0 * PLAIN_MARGIN;
    let mut placements = Vec::new();
    let mut baseline = PLAIN_FIRST_BASELINE;

    for line in translated.split('\n') {
        if measure.text_width(line, PLAIN_FONT_SIZE, false) <= max_width {
            if !line.trim().is_empty() {
                placements.push(TextPlacement::regular(PLAIN_MARGIN, baseline, line, PLAIN_FONT_SIZE));
            }
            baseline += PLAIN_LINE_HEIGHT;
            continue;
        }

        let mut current = String::new();
        for word in line.split(' ') {
            let candidate = format!("{}{} ", current, word);
            if !current.is_empty() && measure.text_width(&candidate, PLAIN_FONT_SIZE, false) > max_width {
                placements.push(TextPlacement::regular(
                    PLAIN_MARGIN,
                    baseline,
                    current.trim_end(),
                    PLAIN_FONT_SIZE,
                ));
                baseline += PLAIN_LINE_HEIGHT;
                current = format!("{} ", word);
            } else {
                current = candidate;
            }
        }
        if !current.trim().is_empty() {
            placements.push(TextPlacement::regular(
                PLAIN_MARGIN,
                baseline,
                current.trim_end(),
                PLAIN_FONT_SIZE,
            ));
        }
        baseline += PLAIN_LINE_HEIGHT;
    }

    placements
}

fn ensure_boxes(words: &[RecognizedWord]) -> Result<(), RenderError> {
    match words.iter().find(|w| w.bbox.is_degenerate()) {
        Some(word) => Err(RenderError::DegenerateBox(word.text.clone())),
        None => Ok(()),
    }
}

fn label_baseline(bbox: &BoundingBox) -> f32 {
    bbox.y0 + bbox.height() * BASELINE_RATIO
}

/// 表格：按 y0 分行，译文逐行分配给各单词位置，行数不足时使用原词
pub fn plan_table(words: &[RecognizedWord], translated: &str) -> Result<Vec<TextPlacement>, RenderError> {
    ensure_boxes(words)?;

    let mut sorted: Vec<&RecognizedWord> = words.iter().collect();
    sorted.sort_by(|a, b| a.bbox.y0.total_cmp(&b.bbox.y0));

    let mut rows: Vec<Vec<&RecognizedWord>> = Vec::new();
    let mut row_y = sorted.first().map(|w| w.bbox.y0).unwrap_or(0.0);
    for word in sorted {
        match rows.last_mut() {
            Some(row) if (word.bbox.y0 - row_y).abs() <= ROW_TOLERANCE => row.push(word),
            _ => {
                row_y = word.bbox.y0;
                rows.push(vec![word]);
            }
        }
    }

    let mut lines = translated.split('\n');
    let mut placements = Vec::with_capacity(words.len());
    for mut row in rows {
        row.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
        for word in row {
            let text = lines
                .next()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .unwrap_or(word.text.as_str());
            placements.push(TextPlacement::regular(
                word.bbox.x0,
                label_baseline(&word.bbox),
                text,
                LABEL_FONT_SIZE,
            ));
        }
    }

    Ok(placements)
}

/// 图表：首行译文作为加粗标题居中；其余行依次放在原标签位置
pub fn plan_chart(
    words: &[RecognizedWord],
    translated: &str,
    image_width: f32,
    measure: &dyn TextMeasure,
) -> Result<Vec<TextPlacement>, RenderError> {
    ensure_boxes(words)?;

    let mut lines = translated.split('\n');
    let title = lines.next().map(str::trim).unwrap_or("");

    let mut placements = Vec::with_capacity(words.len() + 1);
    for word in words {
        let text = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .unwrap_or(word.text.as_str());
        placements.push(TextPlacement::regular(
            word.bbox.x0,
            label_baseline(&word.bbox),
            text,
            LABEL_FONT_SIZE,
        ));
    }

    if !words.is_empty() && !title.is_empty() {
        let title_width = measure.text_width(title, TITLE_FONT_SIZE, true);
        placements.push(TextPlacement {
            x: image_width / 2.0 - title_width / 2.0,
            baseline: TITLE_BASELINE,
            text: title.to_string(),
            size: TITLE_FONT_SIZE,
            bold: true,
        });
    }

    Ok(placements)
}

/// 计算渲染计划，表格/图表策略失败时降级为普通文本
pub fn plan(
    layout: LayoutKind,
    words: &[RecognizedWord],
    translated: &str,
    image_width: f32,
    measure: &dyn TextMeasure,
) -> RenderPlan {
    let erase = words
        .iter()
        .filter(|w| !w.bbox.is_degenerate())
        .map(|w| w.bbox)
        .collect();

    let strategy = match layout {
        LayoutKind::Plain => Ok(plan_plain(translated, image_width, measure)),
        LayoutKind::Table => plan_table(words, translated),
        LayoutKind::Chart => plan_chart(words, translated, image_width, measure),
    };

    let (layout, placements) = match strategy {
        Ok(placements) => (layout, placements),
        Err(e) => {
            warn!(?layout, error = %e, "版面渲染失败，改用普通文本");
            (LayoutKind::Plain, plan_plain(translated, image_width, measure))
        }
    };

    RenderPlan {
        layout,
        erase,
        placements,
    }
}

/// 常规字体和可选的粗体
pub struct FontSet {
    regular: FontVec,
    bold: Option<FontVec>,
}

fn load_font(path: &Path) -> Result<FontVec, RenderError> {
    let bytes = std::fs::read(path)?;
    FontVec::try_from_vec(bytes).map_err(|e| RenderError::InvalidFont {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn first_existing(candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

impl FontSet {
    /// 使用配置的字体，未配置时在常见系统路径中查找
    pub fn load(config: &RenderConfig) -> Result<Self, RenderError> {
        let regular_path = config
            .font_path
            .clone()
            .or_else(|| first_existing(REGULAR_FONT_CANDIDATES))
            .ok_or(RenderError::FontUnavailable)?;
        let regular = load_font(&regular_path)?;

        let bold = match config
            .bold_font_path
            .clone()
            .or_else(|| first_existing(BOLD_FONT_CANDIDATES))
        {
            Some(path) => match load_font(&path) {
                Ok(font) => Some(font),
                Err(e) => {
                    warn!(error = %e, "粗体字体加载失败，使用常规字体");
                    None
                }
            },
            None => None,
        };

        debug!(path = %regular_path.display(), bold = bold.is_some(), "字体已加载");
        Ok(Self { regular, bold })
    }

    fn font(&self, bold: bool) -> &FontVec {
        if bold {
            self.bold.as_ref().unwrap_or(&self.regular)
        } else {
            &self.regular
        }
    }
}

impl TextMeasure for FontSet {
    fn text_width(&self, text: &str, size: f32, bold: bool) -> f32 {
        let font = self.font(bold).as_scaled(PxScale::from(size));
        let mut width = 0.0;
        let mut previous = None;
        for c in text.chars() {
            let glyph = font.glyph_id(c);
            if let Some(prev) = previous {
                width += font.kern(prev, glyph);
            }
            width += font.h_advance(glyph);
            previous = Some(glyph);
        }
        width
    }
}

/// 把译文绘制回图像
pub struct ImageRenderer {
    fonts: Option<FontSet>,
}

impl ImageRenderer {
    /// 字体加载失败不会报错，渲染时返回 [`RenderError::FontUnavailable`]
    pub fn new(config: &RenderConfig) -> Self {
        let fonts = match FontSet::load(config) {
            Ok(fonts) => Some(fonts),
            Err(e) => {
                warn!(error = %e, "未找到可用字体，图像回绘将被跳过");
                None
            }
        };
        Self { fonts }
    }

    pub fn with_fonts(fonts: FontSet) -> Self {
        Self { fonts: Some(fonts) }
    }

    pub fn without_fonts() -> Self {
        Self { fonts: None }
    }

    pub fn can_render(&self) -> bool {
        self.fonts.is_some()
    }

    /// 渲染并返回 PNG 数据和实际采用的版面
    #[instrument(skip_all, fields(layout = ?layout, words = words.len()))]
    pub fn render(
        &self,
        image_data: &[u8],
        words: &[RecognizedWord],
        translated: &str,
        layout: LayoutKind,
    ) -> Result<(Vec<u8>, LayoutKind), RenderError> {
        let fonts = self.fonts.as_ref().ok_or(RenderError::FontUnavailable)?;

        let image = image::load_from_memory(image_data)
            .map_err(|e| RenderError::Decode(e.to_string()))?;
        let mut canvas = image.to_rgba8();

        let plan = plan(layout, words, translated, canvas.width() as f32, fonts);
        paint(&mut canvas, &plan, fonts);

        let mut png = Vec::new();
        DynamicImage::ImageRgba8(canvas)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| RenderError::Encode(e.to_string()))?;

        debug!(bytes = png.len(), "图像回绘完成");
        Ok((png, plan.layout))
    }
}

fn paint(canvas: &mut RgbaImage, plan: &RenderPlan, fonts: &FontSet) {
    let (width, height) = (canvas.width() as f32, canvas.height() as f32);
    let white = Rgba([255, 255, 255, 255]);
    let black = Rgba([0, 0, 0, 255]);

    for bbox in &plan.erase {
        let x0 = bbox.x0.clamp(0.0, width);
        let y0 = bbox.y0.clamp(0.0, height);
        let x1 = bbox.x1.clamp(0.0, width);
        let y1 = bbox.y1.clamp(0.0, height);
        let (w, h) = ((x1 - x0).round() as u32, (y1 - y0).round() as u32);
        if w == 0 || h == 0 {
            continue;
        }
        draw_filled_rect_mut(canvas, Rect::at(x0 as i32, y0 as i32).of_size(w, h), white);
    }

    for placement in &plan.placements {
        let font = fonts.font(placement.bold);
        let scale = PxScale::from(placement.size);
        // imageproc 以文字顶部定位
        let top = placement.baseline - font.as_scaled(scale).ascent();
        draw_text_mut(
            canvas,
            black,
            placement.x.round() as i32,
            top.round() as i32,
            scale,
            font,
            &placement.text,
        );
    }
}

/// PNG 数据转为 `data:` URL
pub fn to_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64_STANDARD.encode(png))
}
