//! 配置管理模块
//!
//! 提供TOML配置文件的读取、写入和自动发现功能，以及环境变量覆盖。

use crate::error::{Result, TranslationError};
use crate::layout::LayoutThresholds;
use crate::types::{RetryConfig, TranslationConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 主翻译服务的 API 密钥环境变量
pub const PRIMARY_API_KEY_ENV: &str = "DOC_TRANSLATOR_PRIMARY_API_KEY";
/// 备用翻译服务的 API 密钥环境变量
pub const SECONDARY_API_KEY_ENV: &str = "DOC_TRANSLATOR_SECONDARY_API_KEY";

/// 主翻译服务（对话补全接口）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatProviderConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// 为空时视为未配置
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    /// `max_tokens` 的下限，实际值随文本长度增长
    pub min_max_tokens: u32,
}

impl Default for ChatProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.mistral.ai/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "mistral-large-latest".to_string(),
            temperature: 0.2,
            min_max_tokens: 1024,
        }
    }
}

/// 备用翻译接口的报文格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestFlavor {
    DeepLx,
    DpTrans,
    Generic,
}

/// 备用翻译服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestProviderConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key: Option<String>,
    pub flavor: RestFlavor,
}

impl Default for RestProviderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: "http://localhost:1188/translate".to_string(),
            api_key: None,
            flavor: RestFlavor::DeepLx,
        }
    }
}

/// 速率限制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests_per_window: u32,
    pub window_secs: u64,
    pub throttle_delay_ms: u64,
    /// 限流等待结束后归还的请求额度
    pub grace: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests_per_window: 30,
            window_secs: 60,
            throttle_delay_ms: 2000,
            grace: 5,
        }
    }
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 24 * 60 * 60,
            capacity: 100,
        }
    }
}

/// 分块配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// 每块最多包含的页数
    pub pages_per_chunk: usize,
    /// 按页分组时每块的字符预算
    pub page_chunk_chars: usize,
    /// 按段落分组时每块的字符预算
    pub text_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            pages_per_chunk: 3,
            page_chunk_chars: 4000,
            text_chunk_chars: 2000,
        }
    }
}

/// OCR配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub binary: String,
    pub min_width: u32,
    pub min_height: u32,
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            min_width: 50,
            min_height: 50,
            timeout_secs: 60,
        }
    }
}

/// 渲染配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// TrueType/OpenType 字体路径，未设置时在常见系统路径中查找
    pub font_path: Option<PathBuf>,
    pub bold_font_path: Option<PathBuf>,
}

/// 流水线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 每翻译多少块后强制停顿
    pub pause_every_chunks: usize,
    pub pause_ms: u64,
    pub chunk_attempts: usize,
    pub chunk_retry_delay_ms: u64,
    pub translate_images: bool,
    /// 提取不到任何文本时使用的占位内容
    pub empty_document_placeholder: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pause_every_chunks: 5,
            pause_ms: 1000,
            chunk_attempts: 3,
            chunk_retry_delay_ms: 1000,
            translate_images: true,
            empty_document_placeholder:
                "No text could be extracted from the document. Make sure it is not protected."
                    .to_string(),
        }
    }
}

/// 上传文件大小限制（字节）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub free_max_bytes: u64,
    pub premium_max_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            free_max_bytes: 10_000_000,
            premium_max_bytes: 100_000_000,
        }
    }
}

/// 翻译库配置结构
///
/// 包含所有翻译相关的配置选项，支持从TOML文件加载和保存。
///
/// # 示例
///
/// ```rust,no_run
/// use document_translator::DocumentTranslatorConfig;
///
/// // 从默认位置加载配置
/// let config = DocumentTranslatorConfig::load_from_default_locations();
///
/// // 从指定文件加载配置
/// let config = DocumentTranslatorConfig::from_file("config.toml").unwrap();
///
/// // 保存配置到文件
/// config.save_to_file("output.toml").unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentTranslatorConfig {
    /// 翻译配置
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub primary: ChatProviderConfig,
    #[serde(default)]
    pub secondary: RestProviderConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub layout: LayoutThresholds,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl DocumentTranslatorConfig {
    /// Load configuration from TOML file
    ///
    /// 文件读取失败返回 `Io`，内容无法解析返回 `Config`。
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| TranslationError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| TranslationError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from multiple possible locations
    pub fn load_from_default_locations() -> Self {
        let possible_paths = [
            "translation-config.toml",
            "config.toml",
            ".translation-config.toml",
        ];

        for path in &possible_paths {
            if Path::new(path).exists() {
                match Self::from_file(path) {
                    Ok(config) => {
                        info!("Loaded configuration from: {}", path);
                        return config.with_env_overrides();
                    }
                    Err(e) => {
                        warn!("Failed to load config from {}: {}", path, e);
                    }
                }
            }
        }

        info!("No configuration file found, using defaults");
        Self::default().with_env_overrides()
    }

    /// Override API keys from the environment
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(PRIMARY_API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.primary.api_key = key.trim().to_string();
            }
        }
        if let Ok(key) = std::env::var(SECONDARY_API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.secondary.api_key = Some(key.trim().to_string());
            }
        }
        self
    }

    /// Generate example configuration file
    pub fn generate_example_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let example_config = Self::default();
        example_config.save_to_file(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: DocumentTranslatorConfig = toml::from_str(
            r#"
            [translation]
            target_lang = "tr"

            [rate_limit]
            max_requests_per_window = 20
            throttle_delay_ms = 3000

            [secondary]
            enabled = true
            flavor = "generic"
            "#,
        )
        .unwrap();

        assert_eq!(config.translation.target_lang, "tr");
        assert_eq!(config.translation.max_request_chars, 4000);
        assert_eq!(config.rate_limit.max_requests_per_window, 20);
        assert_eq!(config.rate_limit.grace, 5);
        assert_eq!(config.secondary.flavor, RestFlavor::Generic);
        assert_eq!(config.cache.capacity, 100);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn example_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("translation-config.toml");
        DocumentTranslatorConfig::generate_example_config(&path).unwrap();

        let loaded = DocumentTranslatorConfig::from_file(&path).unwrap();
        assert_eq!(loaded.primary.model, "mistral-large-latest");
        assert_eq!(loaded.chunking.pages_per_chunk, 3);
        assert_eq!(loaded.layout.table_min_cells, 8);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[translation\ntarget_lang = ").unwrap();

        match DocumentTranslatorConfig::from_file(&path) {
            Err(TranslationError::Config(message)) => assert!(message.contains("broken.toml")),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = DocumentTranslatorConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(TranslationError::Io(_))));
    }
}
