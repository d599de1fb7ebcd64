//! 类型定义模块
//!
//! 定义翻译库中使用的数据结构、API 报文和配置类型。

use serde::{Deserialize, Serialize};

/// 翻译配置
///
/// 控制翻译客户端的基础行为：语言设置、短文本阈值、单次请求上限等。
///
/// # 字段说明
///
/// * `enabled` - 是否启用翻译功能，关闭时原文直接返回
/// * `source_lang` - 源语言代码，"auto"表示自动检测
/// * `target_lang` - 目标语言代码
/// * `min_chars` - 低于该字符数的文本不发起请求
/// * `max_request_chars` - 单次请求的最大文本长度，超出时按句子重新切分
/// * `request_timeout_secs` - 单个HTTP请求的超时时间
/// * `subchunk_pause_ms` - 超长文本切分后，子块之间的停顿
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// 是否启用翻译功能
    pub enabled: bool,
    /// 源语言代码，"auto"表示自动检测
    pub source_lang: String,
    /// 目标语言代码
    pub target_lang: String,
    /// 最少字符数
    pub min_chars: usize,
    /// 单次请求的最大文本长度
    pub max_request_chars: usize,
    /// 请求超时（秒）
    pub request_timeout_secs: u64,
    /// 子块间停顿（毫秒）
    pub subchunk_pause_ms: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source_lang: "auto".to_string(),
            target_lang: "en".to_string(),
            min_chars: 3,
            max_request_chars: 4000,
            request_timeout_secs: 10,
            subchunk_pause_ms: 500,
        }
    }
}

/// 重试配置
///
/// 429/5xx 的等待时间为 `initial_delay_ms * backoff_multiplier^(attempt-1)`，
/// 连接错误固定等待 `initial_delay_ms`。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 每个翻译服务的最大尝试次数（含首次）
    pub max_attempts: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 8000,
            backoff_multiplier: 2.0,
        }
    }
}

/// 翻译结果的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationOrigin {
    Cache,
    Primary,
    Secondary,
    Dictionary,
    /// 所有服务均失败且没有可用词典，返回带标记的原文
    Untranslated,
    /// 空文本或过短文本，未发起请求
    Skipped,
}

/// 单次翻译的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub translated_text: String,
    pub source_language: String,
    pub target_language: String,
    pub origin: TranslationOrigin,
}

impl TranslationResult {
    pub fn new(
        translated_text: impl Into<String>,
        source_language: &str,
        target_language: &str,
        origin: TranslationOrigin,
    ) -> Self {
        Self {
            translated_text: translated_text.into(),
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            origin,
        }
    }

    /// 结果是否真正经过了翻译（含缓存和离线词典）
    pub fn is_translated(&self) -> bool {
        !matches!(
            self.origin,
            TranslationOrigin::Untranslated | TranslationOrigin::Skipped
        )
    }
}

/// 文本块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Translated,
    Failed,
}

/// 文本块
///
/// 由分块器创建，翻译后原地更新 `text`。失败的块不会被删除，
/// 而是降级为带标记的原文，以保证输出的顺序和数量不变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub status: ChunkStatus,
}

impl Chunk {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            status: ChunkStatus::Pending,
        }
    }
}

/// 文字在图像中的像素矩形
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.x0.is_finite() && self.y0.is_finite() && self.x1.is_finite() && self.y1.is_finite())
            || self.width() <= 0.0
            || self.height() <= 0.0
    }
}

/// OCR识别出的单词
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedWord {
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// 处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Starting,
    Extraction,
    Images,
    ImageTranslation,
    HtmlTranslation,
    Translation,
    Complete,
    Warning,
    Error,
}

/// 进度事件
///
/// 由流水线发出，不做存储。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_chunk: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_image: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_images: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn new(stage: Stage, progress: u8) -> Self {
        Self {
            stage,
            progress: progress.min(100),
            message: None,
            current_chunk: None,
            total_chunks: None,
            current_image: None,
            total_images: None,
            error: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_chunk(mut self, current: usize, total: usize) -> Self {
        self.current_chunk = Some(current);
        self.total_chunks = Some(total);
        self
    }

    pub fn with_image(mut self, current: usize, total: usize) -> Self {
        self.current_image = Some(current);
        self.total_images = Some(total);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// 对话补全接口中的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// 对话补全请求（主翻译服务）
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeepLXRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DpTransRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
}

/// 通用翻译接口请求
#[derive(Debug, Serialize, Deserialize)]
pub struct GenericTranslateRequest {
    pub text: String,
    pub source_language: String,
    pub target_language: String,
}

#[derive(Debug, Deserialize)]
pub struct DeepLXResponse {
    pub code: i32,
    pub data: String,
}
