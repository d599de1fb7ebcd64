//! 错误处理模块
//!
//! 定义翻译库中使用的错误类型和错误处理机制。

use thiserror::Error;

/// 翻译错误类型
///
/// 包含文档翻译过程中可能出现的各种错误情况。
///
/// # 变体说明
///
/// * `Network` - 连接失败或请求超时，按固定间隔重试
/// * `RateLimited` - 服务端返回 429，按指数退避重试
/// * `ApiError` - 非 2xx 的 API 响应，包含状态码和消息
/// * `Provider` - 响应格式错误或为空，不重试，直接降级
/// * `Extraction` - 无法从文档中提取任何内容（致命）
/// * `Config` - 配置文件无法解析或序列化
///
/// OCR 与渲染错误（[`crate::ocr::OcrError`]、[`crate::render::RenderError`]）不会中断
/// 文档翻译，只记录在对应图像的结果上，因此不在这里出现。
#[derive(Debug, Error)]
pub enum TranslationError {
    /// 网络错误（连接失败、超时）
    #[error("Network error: {0}")]
    Network(String),

    /// 速率限制错误
    #[error("Rate limit error: {0}")]
    RateLimited(String),

    /// API响应错误
    #[error("API error {code}: {message}")]
    ApiError {
        /// 错误代码
        code: i32,
        /// 错误消息
        message: String,
    },

    /// 翻译服务返回了无法使用的内容
    #[error("Provider error: {0}")]
    Provider(String),

    /// 文档提取失败
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),

    /// 输入文件校验失败（类型不支持、超出大小限制等）
    #[error("Validation error: {0}")]
    Validation(String),

    /// 输出文档生成失败
    #[error("Export error: {0}")]
    Export(String),

    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 操作被取消
    #[error("operation cancelled")]
    Cancelled,
}

/// 重试策略分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// 429 / 5xx：指数退避
    Backoff,
    /// 连接错误：固定间隔
    Flat,
    /// 不重试
    Never,
}

impl TranslationError {
    /// 判断错误应采用的重试策略
    pub fn retry_class(&self) -> RetryClass {
        match self {
            TranslationError::RateLimited(_) => RetryClass::Backoff,
            TranslationError::ApiError { code, .. } if *code == 429 || *code >= 500 => {
                RetryClass::Backoff
            }
            TranslationError::Network(_) => RetryClass::Flat,
            _ => RetryClass::Never,
        }
    }

    /// 检查错误是否可重试
    pub fn is_retryable(&self) -> bool {
        self.retry_class() != RetryClass::Never
    }
}

/// 翻译结果类型别名
///
/// 简化返回类型，使用 `TranslationError` 作为错误类型。
///
/// # 示例
///
/// ```rust
/// use document_translator::{Result, TranslationError};
///
/// fn example_function() -> Result<String> {
///     Ok("Success".to_string())
/// }
/// ```
pub type Result<T> = std::result::Result<T, TranslationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_back_off() {
        let err = TranslationError::ApiError { code: 503, message: "unavailable".into() };
        assert_eq!(err.retry_class(), RetryClass::Backoff);
        let err = TranslationError::ApiError { code: 429, message: "slow down".into() };
        assert_eq!(err.retry_class(), RetryClass::Backoff);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let err = TranslationError::ApiError { code: 401, message: "unauthorized".into() };
        assert!(!err.is_retryable());
        assert!(!TranslationError::Provider("empty choices".into()).is_retryable());
    }

    #[test]
    fn network_errors_retry_flat() {
        assert_eq!(
            TranslationError::Network("connection refused".into()).retry_class(),
            RetryClass::Flat
        );
    }

    #[test]
    fn config_and_io_errors_are_not_retried() {
        assert!(!TranslationError::Config("bad toml".into()).is_retryable());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(!TranslationError::from(io).is_retryable());
    }
}
