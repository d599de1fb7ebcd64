//! # Document Translator
//!
//! 文档翻译库：把 PDF、Word、演示文稿中提取出的文本、表格和嵌入图像翻译成目标语言。
//!
//! ## 主要特性
//!
//! - **分块翻译**: 按页或段落分块，合并被截断的句子，超长块按句子重新切分
//! - **容错客户端**: 主/备翻译服务、指数退避重试、离线词典兜底
//! - **速率限制与缓存**: 固定窗口限流，带 TTL 和容量上限的内存缓存
//! - **表格保留**: HTML 中的表格逐单元格翻译，结构不变
//! - **图像翻译**: OCR 识别文字，按版面（普通文本、表格、图表）回绘译文
//! - **进度与取消**: 通过通道推送进度事件，任意挂起点可取消
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use document_translator::{DocumentTranslatorConfig, TranslationClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DocumentTranslatorConfig::load_from_default_locations();
//!     let client = TranslationClient::from_config(&config);
//!
//!     let result = client.translate("Hello world", "en", "tr").await?;
//!     println!("{} ({:?})", result.translated_text, result.origin);
//!     Ok(())
//! }
//! ```
//!
//! ## 速率限制
//!
//! ```rust
//! use document_translator::{RateLimitConfig, RateLimiter};
//!
//! # tokio_test::block_on(async {
//! let limiter = RateLimiter::new(RateLimitConfig::default());
//! limiter.acquire().await.unwrap();
//! assert_eq!(limiter.request_count().await, 1);
//! # });
//! ```
//!
//! ## 配置文件支持
//!
//! ```toml
//! [translation]
//! source_lang = "auto"
//! target_lang = "tr"
//!
//! [primary]
//! model = "mistral-large-latest"
//!
//! [secondary]
//! enabled = true
//! api_url = "http://localhost:1188/translate"
//! flavor = "deeplx"
//!
//! [rate_limit]
//! max_requests_per_window = 30
//! window_secs = 60
//! ```

pub mod cache;
pub mod chunker;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod extract;
pub mod html;
pub mod image_translator;
pub mod lang;
pub mod layout;
pub mod ocr;
pub mod output;
pub mod pipeline;
pub mod providers;
pub mod render;
pub mod translator;
pub mod types;

pub use cache::{CacheStats, TranslationCache};
pub use chunker::{ChunkOptimizer, ChunkSplitter};
pub use config::{
    CacheConfig, ChatProviderConfig, ChunkingConfig, DocumentTranslatorConfig, LimitsConfig, OcrConfig,
    PipelineConfig, RateLimitConfig, RenderConfig, RestFlavor, RestProviderConfig,
};
pub use error::{Result, RetryClass, TranslationError};
pub use extract::PlainFileExtractor;
pub use html::TableAwareHtmlTranslator;
pub use image_translator::{ImageTranslationResult, ImageTranslator};
pub use layout::{LayoutClassifier, LayoutKind, LayoutThresholds};
pub use ocr::{OcrBackend, OcrEngine, OcrError, TesseractBackend};
pub use output::{export, export_images, ExportedFile, OutputFormat};
pub use pipeline::{
    validate_upload, DocumentExtractor, DocumentKind, DocumentPipeline, DocumentTranslation, EmbeddedImage,
    ExtractedDocument, ExtractedText, PlanTier, RenderedImage, TranslatedImage,
};
pub use providers::{ChatCompletionProvider, RestTranslateProvider, TranslationProvider};
pub use render::{ImageRenderer, RenderError};
pub use translator::{retry_with_backoff, RateLimiter, TranslationClient};
pub use types::{
    BoundingBox, Chunk, ChunkStatus, ProgressEvent, RecognizedWord, RetryConfig, Stage, TranslationConfig,
    TranslationOrigin, TranslationResult,
};
