//! 文档翻译流水线
//!
//! 提取 → 分块/HTML翻译 → 图像翻译 → 结果组装。进度通过无界通道逐条发送，
//! 每个挂起点（块、图像、HTML、停顿）都会检查取消令牌。
//!
//! 单个块或单张图像失败只影响自身，只有提取失败会终止整个流程。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::GenericImageView;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::chunker::{ChunkOptimizer, ChunkSplitter};
use crate::config::{DocumentTranslatorConfig, LimitsConfig, PipelineConfig};
use crate::error::{Result, TranslationError};
use crate::html::TableAwareHtmlTranslator;
use crate::image_translator::ImageTranslator;
use crate::layout::{LayoutClassifier, LayoutKind};
use crate::ocr::OcrEngine;
use crate::render::{to_data_url, ImageRenderer};
use crate::translator::TranslationClient;
use crate::types::{Chunk, ChunkStatus, ProgressEvent, Stage, TranslationOrigin};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_PPTX: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_PPT: &str = "application/vnd.ms-powerpoint";

/// 支持上传的文件类型
pub const SUPPORTED_MIME_TYPES: &[&str] = &[MIME_PDF, MIME_DOCX, MIME_DOC, MIME_PPTX, MIME_PPT];

/// 跳过的图像的说明
pub const IMAGE_NOT_ELIGIBLE: &str = "image skipped: too small or blank";

/// 文档类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    Word,
    Presentation,
    Text,
}

impl DocumentKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            MIME_PDF => Some(DocumentKind::Pdf),
            MIME_DOCX | MIME_DOC => Some(DocumentKind::Word),
            MIME_PPTX | MIME_PPT => Some(DocumentKind::Presentation),
            "text/plain" | "text/html" => Some(DocumentKind::Text),
            _ => None,
        }
    }
}

/// 用户套餐，决定上传大小上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Premium,
}

/// 校验上传文件的类型和大小
pub fn validate_upload(mime: &str, size: u64, tier: PlanTier, limits: &LimitsConfig) -> Result<DocumentKind> {
    if !SUPPORTED_MIME_TYPES.contains(&mime.trim().to_ascii_lowercase().as_str()) {
        return Err(TranslationError::Validation(format!("unsupported file type: {}", mime)));
    }

    let max = match tier {
        PlanTier::Free => limits.free_max_bytes,
        PlanTier::Premium => limits.premium_max_bytes,
    };
    if size > max {
        return Err(TranslationError::Validation(format!(
            "file is {} bytes, the limit for this plan is {} bytes",
            size, max
        )));
    }

    DocumentKind::from_mime(mime)
        .ok_or_else(|| TranslationError::Validation(format!("unsupported file type: {}", mime)))
}

/// 文档中的嵌入图像
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedImage {
    pub data: Vec<u8>,
    pub content_type: String,
    pub alt_text: String,
}

impl EmbeddedImage {
    pub fn new(data: Vec<u8>, content_type: impl Into<String>, alt_text: impl Into<String>) -> Self {
        Self {
            data,
            content_type: content_type.into(),
            alt_text: alt_text.into(),
        }
    }

    /// 解析 `data:<type>;base64,<payload>`
    pub fn from_data_url(url: &str, alt_text: impl Into<String>) -> Result<Self> {
        let (header, payload) = url
            .split_once(',')
            .ok_or_else(|| TranslationError::Validation("data URL has no payload".to_string()))?;
        let content_type = header
            .strip_prefix("data:")
            .and_then(|rest| rest.strip_suffix(";base64"))
            .ok_or_else(|| TranslationError::Validation(format!("unsupported data URL header: {}", header)))?;
        let data = BASE64_STANDARD
            .decode(payload.trim())
            .map_err(|e| TranslationError::Validation(format!("invalid base64 payload: {}", e)))?;

        Ok(Self::new(data, content_type, alt_text))
    }
}

/// 提取出的正文
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedText {
    /// 按页提取（PDF）
    Pages(Vec<String>),
    /// 整段原始文本（Word、演示文稿、纯文本）
    Raw(String),
}

/// 外部提取器的输出
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub kind: DocumentKind,
    pub text: ExtractedText,
    /// Word 文档转换出的 HTML，用于保留表格
    pub html: Option<String>,
    pub images: Vec<EmbeddedImage>,
}

impl ExtractedDocument {
    pub fn page_count(&self) -> usize {
        match &self.text {
            ExtractedText::Pages(pages) => pages.len(),
            // 约 20 段为一页
            ExtractedText::Raw(text) => {
                let paragraphs = text.lines().filter(|l| !l.trim().is_empty()).count();
                paragraphs.div_ceil(20)
            }
        }
    }
}

/// 文档内容提取器
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, data: &[u8], kind: DocumentKind) -> Result<ExtractedDocument>;
}

/// 回绘后的图像
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImage {
    /// PNG 数据
    pub data: Vec<u8>,
    pub content_type: String,
    pub layout: LayoutKind,
}

/// 单张图像的处理结果；`rendered` 为空时使用原图
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedImage {
    pub original: EmbeddedImage,
    pub original_text: String,
    pub translated_text: String,
    pub rendered: Option<RenderedImage>,
    pub error: Option<String>,
}

impl TranslatedImage {
    fn untouched(original: &EmbeddedImage, error: Option<String>) -> Self {
        Self {
            original: original.clone(),
            original_text: String::new(),
            translated_text: String::new(),
            rendered: None,
            error,
        }
    }

    /// 回绘后的图像，没有时为原图
    pub fn data_url(&self) -> String {
        match &self.rendered {
            Some(rendered) => to_data_url(&rendered.data),
            None => format!(
                "data:{};base64,{}",
                self.original.content_type,
                BASE64_STANDARD.encode(&self.original.data)
            ),
        }
    }
}

/// 流水线输出
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentTranslation {
    /// 各块译文以空行连接
    pub text: String,
    pub html: Option<String>,
    pub is_html: bool,
    pub chunks: Vec<Chunk>,
    pub images: Vec<TranslatedImage>,
}

/// 判断图像是否值得识别：尺寸足够，且存在非白色、非透明的像素（每 5 个像素取样一次）
pub fn is_image_worth_processing(data: &[u8], min_width: u32, min_height: u32) -> bool {
    let Ok(image) = image::load_from_memory(data) else {
        return false;
    };
    let (width, height) = image.dimensions();
    if width < min_width || height < min_height {
        return false;
    }

    image
        .to_rgba8()
        .pixels()
        .step_by(5)
        .any(|p| (p[0] < 240 || p[1] < 240 || p[2] < 240) && p[3] > 10)
}

fn emit(events: &UnboundedSender<ProgressEvent>, event: ProgressEvent) {
    if events.send(event).is_err() {
        debug!("进度接收端已关闭");
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        100
    } else {
        ((done as f64 / total as f64) * 100.0).round() as u8
    }
}

async fn cancellable<F: Future>(cancel: &CancellationToken, future: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TranslationError::Cancelled),
        output = future => Ok(output),
    }
}

/// 文档翻译流水线
pub struct DocumentPipeline {
    extractor: Arc<dyn DocumentExtractor>,
    client: Arc<TranslationClient>,
    html_translator: TableAwareHtmlTranslator,
    image_translator: Option<ImageTranslator>,
    renderer: Arc<ImageRenderer>,
    classifier: LayoutClassifier,
    splitter: ChunkSplitter,
    config: PipelineConfig,
    min_image_size: (u32, u32),
}

impl DocumentPipeline {
    /// 创建不处理图像的流水线，图像翻译通过 [`with_images`](Self::with_images) 开启
    pub fn new(
        extractor: Arc<dyn DocumentExtractor>,
        client: Arc<TranslationClient>,
        config: &DocumentTranslatorConfig,
    ) -> Self {
        Self {
            extractor,
            html_translator: TableAwareHtmlTranslator::new(client.clone()),
            client,
            image_translator: None,
            renderer: Arc::new(ImageRenderer::without_fonts()),
            classifier: LayoutClassifier::new(config.layout.clone()),
            splitter: ChunkSplitter::new(config.chunking.clone()),
            config: config.pipeline.clone(),
            min_image_size: (config.ocr.min_width, config.ocr.min_height),
        }
    }

    pub fn with_images(mut self, ocr: OcrEngine, renderer: ImageRenderer) -> Self {
        self.image_translator = Some(ImageTranslator::new(ocr, self.client.clone()));
        self.renderer = Arc::new(renderer);
        self
    }

    /// 运行完整流程
    ///
    /// 提取失败时先发送 `error` 事件再返回错误；取消时返回 [`TranslationError::Cancelled`]。
    #[instrument(skip_all, fields(bytes = data.len(), kind = ?kind, source = source_lang, target = target_lang))]
    pub async fn run(
        &self,
        data: &[u8],
        kind: DocumentKind,
        source_lang: &str,
        target_lang: &str,
        events: &UnboundedSender<ProgressEvent>,
        cancel: &CancellationToken,
    ) -> Result<DocumentTranslation> {
        emit(events, ProgressEvent::new(Stage::Starting, 0));

        let outcome = self
            .run_stages(data, kind, source_lang, target_lang, events, cancel)
            .await;

        match &outcome {
            Ok(translation) => {
                info!(chunks = translation.chunks.len(), images = translation.images.len(), "文档翻译完成");
                emit(
                    events,
                    ProgressEvent::new(Stage::Complete, 100).with_message(format!(
                        "{} chunks, {} images",
                        translation.chunks.len(),
                        translation.images.len()
                    )),
                );
            }
            Err(e) => {
                error!(error = %e, "文档翻译失败");
                emit(events, ProgressEvent::new(Stage::Error, 100).with_error(e.to_string()));
            }
        }
        outcome
    }

    async fn run_stages(
        &self,
        data: &[u8],
        kind: DocumentKind,
        source_lang: &str,
        target_lang: &str,
        events: &UnboundedSender<ProgressEvent>,
        cancel: &CancellationToken,
    ) -> Result<DocumentTranslation> {
        let document = match cancellable(cancel, self.extractor.extract(data, kind)).await? {
            Ok(document) => document,
            Err(e @ TranslationError::Extraction(_)) => return Err(e),
            Err(e) => return Err(TranslationError::Extraction(e.to_string())),
        };
        emit(
            events,
            ProgressEvent::new(Stage::Extraction, 100)
                .with_message(format!("{} pages", document.page_count())),
        );

        let mut raw_chunks = match &document.text {
            ExtractedText::Pages(pages) => self.splitter.split_pages(pages),
            ExtractedText::Raw(text) => self.splitter.split_text(text),
        };

        let images = self
            .translate_images(&document.images, source_lang, target_lang, events, cancel)
            .await?;

        if raw_chunks.is_empty() {
            warn!("文档中没有可翻译的文本");
            emit(
                events,
                ProgressEvent::new(Stage::Warning, 100).with_message("no text could be extracted from the document"),
            );
            raw_chunks.push(self.config.empty_document_placeholder.clone());
        }

        let optimized = ChunkOptimizer::optimize(&raw_chunks);
        debug!(before = raw_chunks.len(), after = optimized.len(), "块优化完成");

        let html = match &document.html {
            Some(html) if !html.trim().is_empty() => {
                emit(
                    events,
                    ProgressEvent::new(Stage::HtmlTranslation, 0).with_message("translating HTML content and tables"),
                );
                let translated = cancellable(
                    cancel,
                    self.html_translator.translate(html, source_lang, target_lang),
                )
                .await?;
                emit(events, ProgressEvent::new(Stage::HtmlTranslation, 100));
                Some(translated)
            }
            _ => None,
        };

        let total = optimized.len();
        let mut chunks: Vec<Chunk> = optimized
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk::new(index, text))
            .collect();

        for i in 0..total {
            emit(
                events,
                ProgressEvent::new(Stage::Translation, percent(i, total)).with_chunk(i + 1, total),
            );
            self.translate_chunk(&mut chunks[i], source_lang, target_lang, cancel)
                .await?;

            let every = self.config.pause_every_chunks;
            if every > 0 && i % every == every - 1 && i + 1 < total {
                cancellable(cancel, sleep(Duration::from_millis(self.config.pause_ms))).await?;
            }
        }

        let text = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(DocumentTranslation {
            text,
            is_html: html.is_some(),
            html,
            chunks,
            images,
        })
    }

    /// 带重试地翻译单个块，最终失败时保留带标记的原文
    async fn translate_chunk(
        &self,
        chunk: &mut Chunk,
        source_lang: &str,
        target_lang: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let attempts = self.config.chunk_attempts.max(1);

        for attempt in 1..=attempts {
            let outcome = cancellable(cancel, self.client.translate(&chunk.text, source_lang, target_lang)).await?;
            match outcome {
                Ok(result) if result.origin == TranslationOrigin::Skipped => {
                    chunk.status = ChunkStatus::Translated;
                    return Ok(());
                }
                Ok(result) if result.origin != TranslationOrigin::Untranslated => {
                    chunk.text = result.translated_text;
                    chunk.status = ChunkStatus::Translated;
                    return Ok(());
                }
                Ok(_) => warn!(chunk = chunk.index, attempt, "块未能翻译"),
                Err(e) => warn!(chunk = chunk.index, attempt, error = %e, "块翻译出错"),
            }

            if attempt < attempts {
                let delay = Duration::from_millis(self.config.chunk_retry_delay_ms * attempt as u64);
                cancellable(cancel, sleep(delay)).await?;
            }
        }

        chunk.text = format!("[translation failed] {}", chunk.text);
        chunk.status = ChunkStatus::Failed;
        Ok(())
    }

    async fn translate_images(
        &self,
        images: &[EmbeddedImage],
        source_lang: &str,
        target_lang: &str,
        events: &UnboundedSender<ProgressEvent>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TranslatedImage>> {
        emit(events, ProgressEvent::new(Stage::Images, 0).with_message("collecting images"));
        emit(
            events,
            ProgressEvent::new(Stage::Images, 100).with_message(format!("{} images found", images.len())),
        );

        let translator = match &self.image_translator {
            Some(translator) if self.config.translate_images => translator,
            _ => {
                return Ok(images
                    .iter()
                    .map(|image| TranslatedImage::untouched(image, None))
                    .collect())
            }
        };
        if images.is_empty() {
            return Ok(Vec::new());
        }

        emit(events, ProgressEvent::new(Stage::ImageTranslation, 0));
        let total = images.len();
        let mut translated = Vec::with_capacity(total);
        for (i, image) in images.iter().enumerate() {
            emit(
                events,
                ProgressEvent::new(Stage::ImageTranslation, percent(i, total)).with_image(i + 1, total),
            );
            let result = cancellable(
                cancel,
                self.translate_image(translator, image, source_lang, target_lang),
            )
            .await?;
            translated.push(result);
        }
        emit(events, ProgressEvent::new(Stage::ImageTranslation, 100));

        Ok(translated)
    }

    async fn translate_image(
        &self,
        translator: &ImageTranslator,
        image: &EmbeddedImage,
        source_lang: &str,
        target_lang: &str,
    ) -> TranslatedImage {
        let (min_width, min_height) = self.min_image_size;
        if !is_image_worth_processing(&image.data, min_width, min_height) {
            debug!(alt = %image.alt_text, "跳过图像");
            return TranslatedImage::untouched(image, Some(IMAGE_NOT_ELIGIBLE.to_string()));
        }

        let result = translator.translate(&image.data, source_lang, target_lang).await;
        if !result.is_renderable() {
            return TranslatedImage {
                original: image.clone(),
                original_text: result.original_text,
                translated_text: result.translated_text,
                rendered: None,
                error: result.error,
            };
        }

        let layout = self.classifier.classify(&result.words);
        let renderer = self.renderer.clone();
        let data = image.data.clone();
        let words = result.words.clone();
        let text = result.translated_text.clone();
        let rendered = tokio::task::spawn_blocking(move || renderer.render(&data, &words, &text, layout))
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));

        match rendered {
            Ok((png, layout)) => TranslatedImage {
                original: image.clone(),
                original_text: result.original_text,
                translated_text: result.translated_text,
                rendered: Some(RenderedImage {
                    data: png,
                    content_type: "image/png".to_string(),
                    layout,
                }),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "图像回绘失败，保留原图");
                TranslatedImage {
                    original: image.clone(),
                    original_text: result.original_text,
                    translated_text: result.translated_text,
                    rendered: None,
                    error: Some(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::tests::png;

    #[test]
    fn mime_types_map_to_kinds() {
        assert_eq!(DocumentKind::from_mime(MIME_PDF), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_mime(MIME_DOC), Some(DocumentKind::Word));
        assert_eq!(DocumentKind::from_mime(MIME_PPTX), Some(DocumentKind::Presentation));
        assert_eq!(DocumentKind::from_mime("image/png"), None);
    }

    #[test]
    fn upload_limits_depend_on_plan() {
        let limits = LimitsConfig::default();
        assert_eq!(
            validate_upload(MIME_PDF, 5_000_000, PlanTier::Free, &limits).unwrap(),
            DocumentKind::Pdf
        );
        assert!(matches!(
            validate_upload(MIME_PDF, 20_000_000, PlanTier::Free, &limits),
            Err(TranslationError::Validation(_))
        ));
        assert!(validate_upload(MIME_DOCX, 20_000_000, PlanTier::Premium, &limits).is_ok());
        assert!(validate_upload("text/plain", 10, PlanTier::Premium, &limits).is_err());
    }

    #[test]
    fn data_url_is_decoded() {
        let image = EmbeddedImage::from_data_url("data:image/png;base64,YWJj", "logo").unwrap();
        assert_eq!(image.data, b"abc");
        assert_eq!(image.content_type, "image/png");
        assert_eq!(image.alt_text, "logo");
        assert!(EmbeddedImage::from_data_url("data:image/png,abc", "").is_err());
    }

    #[test]
    fn blank_and_tiny_images_are_not_worth_processing() {
        let blank = {
            let img = image::RgbaImage::from_pixel(100, 100, image::Rgba([255, 255, 255, 255]));
            let mut bytes = Vec::new();
            image::DynamicImage::ImageRgba8(img)
                .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
                .unwrap();
            bytes
        };
        assert!(!is_image_worth_processing(&blank, 50, 50));
        assert!(!is_image_worth_processing(&png(30, 30), 50, 50));
        assert!(is_image_worth_processing(&png(100, 100), 50, 50));
        assert!(!is_image_worth_processing(b"nope", 50, 50));
    }

    #[test]
    fn page_count_is_estimated_for_raw_text() {
        let doc = ExtractedDocument {
            kind: DocumentKind::Word,
            text: ExtractedText::Raw((0..41).map(|i| format!("p{}\n", i)).collect()),
            html: None,
            images: Vec::new(),
        };
        assert_eq!(doc.page_count(), 3);
    }
}
