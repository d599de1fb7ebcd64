//! 翻译客户端核心模块
//!
//! 提供带缓存、速率限制、重试退避和多级降级的翻译客户端。
//! 降级顺序：缓存 → 主服务 → 备用服务 → 离线词典 → 带标记的原文。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, TranslationCache};
use crate::chunker::split_oversized;
use crate::config::{DocumentTranslatorConfig, RateLimitConfig};
use crate::dictionary::{untranslated_marker, OfflineDictionary};
use crate::error::{Result, RetryClass};
use crate::providers::{ChatCompletionProvider, RestTranslateProvider, TranslationProvider};
use crate::types::{RetryConfig, TranslationConfig, TranslationOrigin, TranslationResult};

#[derive(Debug)]
struct RateLimiterState {
    window_start: Instant,
    request_count: u32,
}

/// 速率限制器
///
/// 在固定时间窗口内统计请求次数。达到上限后，调用方被延迟 `throttle_delay_ms`，
/// 随后计数减去 `grace` 并放行（软限流）。每一次发出的请求尝试都会计数。
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<RateLimiterState>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// 创建新的速率限制器
    ///
    /// # 示例
    ///
    /// ```rust
    /// use document_translator::{RateLimitConfig, RateLimiter};
    ///
    /// let limiter = RateLimiter::new(RateLimitConfig::default()); // 每分钟30个请求
    /// ```
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(RateLimiterState {
                window_start: Instant::now(),
                request_count: 0,
            })),
            config,
        }
    }

    /// 获取请求许可
    ///
    /// 在发起API请求前调用此方法。等待期间持有锁，其他调用方排在后面。
    pub async fn acquire(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let window = Duration::from_secs(self.config.window_secs);
        if state.window_start.elapsed() > window {
            state.window_start = Instant::now();
            state.request_count = 0;
        }

        if state.request_count >= self.config.max_requests_per_window {
            warn!(
                count = state.request_count,
                delay_ms = self.config.throttle_delay_ms,
                "请求过于频繁，限流等待"
            );
            sleep(Duration::from_millis(self.config.throttle_delay_ms)).await;
            state.request_count = state.request_count.saturating_sub(self.config.grace);
        }

        state.request_count += 1;
        Ok(())
    }

    /// 当前窗口内的请求计数
    pub async fn request_count(&self) -> u32 {
        self.state.lock().await.request_count
    }
}

/// 计算第 `attempt` 次失败后的等待时间（`attempt` 从 1 开始）
pub fn backoff_delay(config: &RetryConfig, class: RetryClass, attempt: usize) -> Duration {
    match class {
        RetryClass::Backoff => {
            let exponent = attempt.saturating_sub(1).min(31) as i32;
            let delay = config.initial_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
            Duration::from_millis((delay as u64).min(config.max_delay_ms))
        }
        RetryClass::Flat => Duration::from_millis(config.initial_delay_ms),
        RetryClass::Never => Duration::ZERO,
    }
}

/// 带指数退避的重试机制
///
/// 每次尝试前获取速率限制许可。429/5xx 按指数退避，连接错误按固定间隔，
/// 其他错误立即返回。
///
/// # 参数
///
/// * `operation` - 要执行的异步操作
/// * `config` - 重试配置
/// * `rate_limiter` - 速率限制器
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    config: &RetryConfig,
    rate_limiter: &RateLimiter,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        rate_limiter.acquire().await?;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let class = e.retry_class();
                if class == RetryClass::Never || attempt >= max_attempts {
                    return Err(e);
                }
                let delay = backoff_delay(config, class, attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "请求失败，稍后重试");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn language_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z]{2}$").expect("valid language code regex"))
}

/// 不依赖网络的语言猜测：含土耳其语特有字母视为 `tr`，否则 `en`
pub fn heuristic_language(text: &str) -> &'static str {
    const TURKISH: &[char] = &['ç', 'ğ', 'ı', 'ö', 'ş', 'ü', 'Ç', 'Ğ', 'İ', 'Ö', 'Ş', 'Ü'];
    if text.chars().any(|c| TURKISH.contains(&c)) {
        "tr"
    } else {
        "en"
    }
}

fn origin_rank(origin: TranslationOrigin) -> u8 {
    match origin {
        TranslationOrigin::Untranslated => 5,
        TranslationOrigin::Dictionary => 4,
        TranslationOrigin::Secondary => 3,
        TranslationOrigin::Primary => 2,
        TranslationOrigin::Cache => 1,
        TranslationOrigin::Skipped => 0,
    }
}

/// 翻译客户端
///
/// 持有缓存和速率限制器，由流水线共享使用。
///
/// # 示例
///
/// ```rust,no_run
/// use document_translator::{DocumentTranslatorConfig, TranslationClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DocumentTranslatorConfig::load_from_default_locations();
///     let client = TranslationClient::from_config(&config);
///
///     let result = client.translate("Hello, world!", "en", "tr").await?;
///     println!("Translation: {}", result.translated_text);
///
///     Ok(())
/// }
/// ```
pub struct TranslationClient {
    config: TranslationConfig,
    retry: RetryConfig,
    primary: Option<Arc<dyn TranslationProvider>>,
    secondary: Option<Arc<dyn TranslationProvider>>,
    dictionary: OfflineDictionary,
    cache: Option<Mutex<TranslationCache>>,
    rate_limiter: RateLimiter,
    detected: Mutex<HashMap<String, String>>,
}

impl TranslationClient {
    /// 创建不带任何远程服务的客户端，服务通过 [`with_primary`](Self::with_primary)
    /// 和 [`with_secondary`](Self::with_secondary) 注入
    pub fn new(config: &DocumentTranslatorConfig) -> Self {
        let cache = config.cache.enabled.then(|| {
            Mutex::new(TranslationCache::new(
                Duration::from_secs(config.cache.ttl_secs),
                config.cache.capacity,
            ))
        });

        Self {
            config: config.translation.clone(),
            retry: config.retry.clone(),
            primary: None,
            secondary: None,
            dictionary: OfflineDictionary::builtin(),
            cache,
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            detected: Mutex::new(HashMap::new()),
        }
    }

    /// 按配置创建HTTP客户端和翻译服务
    pub fn from_config(config: &DocumentTranslatorConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.translation.request_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(5)
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(concat!("document-translator/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to create configured HTTP client: {}, using default", e);
                Client::new()
            });

        let mut translator = Self::new(config);

        if config.primary.enabled && !config.primary.api_key.trim().is_empty() {
            translator = translator.with_primary(Arc::new(ChatCompletionProvider::new(
                client.clone(),
                config.primary.clone(),
            )));
        } else {
            info!("主翻译服务未配置API密钥，已跳过");
        }

        if config.secondary.enabled {
            translator = translator.with_secondary(Arc::new(RestTranslateProvider::new(
                client,
                config.secondary.clone(),
            )));
        }

        translator
    }

    pub fn with_primary(mut self, provider: Arc<dyn TranslationProvider>) -> Self {
        self.primary = Some(provider);
        self
    }

    pub fn with_secondary(mut self, provider: Arc<dyn TranslationProvider>) -> Self {
        self.secondary = Some(provider);
        self
    }

    pub fn config(&self) -> &TranslationConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// 缓存统计，缓存关闭时返回 `None`
    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.lock().await.stats().clone()),
            None => None,
        }
    }

    pub async fn cache_len(&self) -> usize {
        match &self.cache {
            Some(cache) => cache.lock().await.len(),
            None => 0,
        }
    }

    /// 翻译文本
    ///
    /// 空文本和过短文本直接返回空结果；超过单次请求上限的文本按句子切分后逐段翻译，
    /// 段间停顿 `subchunk_pause_ms`，结果以空格连接。
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<TranslationResult> {
        if !self.config.enabled {
            return Ok(TranslationResult::new(
                text,
                source_lang,
                target_lang,
                TranslationOrigin::Skipped,
            ));
        }

        if text.trim().chars().count() < self.config.min_chars {
            debug!("文本过短，跳过翻译");
            return Ok(TranslationResult::new(
                "",
                source_lang,
                target_lang,
                TranslationOrigin::Skipped,
            ));
        }

        if text.chars().count() <= self.config.max_request_chars {
            return self.translate_unit(text, source_lang, target_lang).await;
        }

        let pieces = split_oversized(text, self.config.max_request_chars);
        info!(pieces = pieces.len(), "文本超过单次请求上限，按句子切分");

        let mut translated = Vec::with_capacity(pieces.len());
        let mut origin = TranslationOrigin::Skipped;
        for (i, piece) in pieces.iter().enumerate() {
            if i > 0 {
                sleep(Duration::from_millis(self.config.subchunk_pause_ms)).await;
            }
            let result = self.translate_unit(piece, source_lang, target_lang).await?;
            if origin_rank(result.origin) > origin_rank(origin) {
                origin = result.origin;
            }
            translated.push(result.translated_text);
        }

        Ok(TranslationResult::new(
            translated.join(" "),
            source_lang,
            target_lang,
            origin,
        ))
    }

    async fn translate_unit(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<TranslationResult> {
        if let Some(cache) = &self.cache {
            if let Some(mut hit) = cache.lock().await.get(text, source_lang, target_lang) {
                debug!("命中翻译缓存");
                hit.origin = TranslationOrigin::Cache;
                return Ok(hit);
            }
        }

        let chain = [
            (self.primary.as_deref(), TranslationOrigin::Primary),
            (self.secondary.as_deref(), TranslationOrigin::Secondary),
        ];
        for (provider, origin) in chain {
            let Some(provider) = provider else {
                continue;
            };

            let attempt = retry_with_backoff(
                move || provider.translate(text, source_lang, target_lang),
                &self.retry,
                &self.rate_limiter,
            )
            .await;

            match attempt {
                Ok(translated) => {
                    let result = TranslationResult::new(translated, source_lang, target_lang, origin);
                    self.store(text, source_lang, target_lang, &result).await;
                    return Ok(result);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "翻译服务失败，尝试下一级");
                }
            }
        }

        let dictionary_source = if source_lang == "auto" {
            heuristic_language(text)
        } else {
            source_lang
        };
        if let Some(translated) = self.dictionary.translate(text, dictionary_source, target_lang) {
            info!(source = dictionary_source, target = target_lang, "使用离线词典翻译");
            let result = TranslationResult::new(
                translated,
                source_lang,
                target_lang,
                TranslationOrigin::Dictionary,
            );
            self.store(text, source_lang, target_lang, &result).await;
            return Ok(result);
        }

        warn!(target = target_lang, "所有翻译方式均失败，返回原文");
        Ok(TranslationResult::new(
            untranslated_marker(text, target_lang),
            source_lang,
            target_lang,
            TranslationOrigin::Untranslated,
        ))
    }

    async fn store(&self, text: &str, source_lang: &str, target_lang: &str, result: &TranslationResult) {
        if let Some(cache) = &self.cache {
            cache
                .lock()
                .await
                .insert(text, source_lang, target_lang, result.clone());
        }
    }

    /// 按顺序批量翻译
    pub async fn translate_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<TranslationResult>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.translate(text.as_ref(), source_lang, target_lang).await?);
        }
        Ok(results)
    }

    /// 识别文本语言，返回两位语言代码
    ///
    /// 优先询问主服务，回答不是两位小写字母时改用字符特征猜测。结果按文本缓存。
    pub async fn detect_language(&self, text: &str) -> Result<String> {
        if text.trim().chars().count() < self.config.min_chars {
            return Ok("en".to_string());
        }

        if let Some(code) = self.detected.lock().await.get(text) {
            return Ok(code.clone());
        }

        let mut detected = None;
        if let Some(primary) = &self.primary {
            self.rate_limiter.acquire().await?;
            match primary.detect_language(text).await {
                Ok(Some(answer)) => {
                    let code = answer.trim().to_lowercase();
                    if language_code_pattern().is_match(&code) {
                        detected = Some(code);
                    } else {
                        debug!(answer = %answer, "语言识别结果无效，改用字符特征");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "语言识别请求失败"),
            }
        }

        let code = detected.unwrap_or_else(|| heuristic_language(text).to_string());
        self.detected
            .lock()
            .await
            .insert(text.to_string(), code.clone());
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TranslationError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        name: &'static str,
        script: std::sync::Mutex<VecDeque<Result<String>>>,
        detection: Option<String>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, script: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: std::sync::Mutex::new(script.into()),
                detection: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn detecting(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                name: "detector",
                script: std::sync::Mutex::new(VecDeque::new()),
                detection: Some(answer.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranslationProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn translate(&self, text: &str, _source_lang: &str, target_lang: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(format!("{}:{}", target_lang, text)))
        }

        async fn detect_language(&self, _text: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.detection.clone())
        }
    }

    fn unavailable() -> Result<String> {
        Err(TranslationError::ApiError {
            code: 503,
            message: "unavailable".to_string(),
        })
    }

    #[tokio::test]
    async fn second_identical_call_is_served_from_cache() {
        let primary = ScriptedProvider::new("primary", vec![]);
        let client = TranslationClient::new(&DocumentTranslatorConfig::default())
            .with_primary(primary.clone());

        let first = client.translate("Hello there", "en", "tr").await.unwrap();
        let second = client.translate("Hello there", "en", "tr").await.unwrap();

        assert_eq!(first.origin, TranslationOrigin::Primary);
        assert_eq!(second.origin, TranslationOrigin::Cache);
        assert_eq!(second.translated_text, "tr:Hello there");
        assert_eq!(primary.calls(), 1);
        assert_eq!(client.rate_limiter().request_count().await, 1);
    }

    #[tokio::test]
    async fn short_text_is_skipped_without_requests() {
        let primary = ScriptedProvider::new("primary", vec![]);
        let client = TranslationClient::new(&DocumentTranslatorConfig::default())
            .with_primary(primary.clone());

        let result = client.translate("  ab ", "en", "tr").await.unwrap();
        assert_eq!(result.origin, TranslationOrigin::Skipped);
        assert_eq!(result.translated_text, "");
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_primary_falls_back_to_secondary() {
        let primary = ScriptedProvider::new("primary", vec![unavailable(), unavailable(), unavailable()]);
        let secondary = ScriptedProvider::new("secondary", vec![Ok("Merhaba dünya".to_string())]);
        let client = TranslationClient::new(&DocumentTranslatorConfig::default())
            .with_primary(primary.clone())
            .with_secondary(secondary.clone());

        let started = Instant::now();
        let result = client.translate("Hello world", "en", "tr").await.unwrap();

        assert_eq!(result.translated_text, "Merhaba dünya");
        assert_eq!(result.origin, TranslationOrigin::Secondary);
        assert_eq!(primary.calls(), 3);
        assert_eq!(secondary.calls(), 1);
        assert_eq!(client.rate_limiter().request_count().await, 4);
        assert_eq!(client.cache_len().await, 1);
        // 1s + 2s 退避
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let primary = ScriptedProvider::new(
            "primary",
            vec![Err(TranslationError::ApiError {
                code: 401,
                message: "unauthorized".to_string(),
            })],
        );
        let secondary = ScriptedProvider::new("secondary", vec![]);
        let client = TranslationClient::new(&DocumentTranslatorConfig::default())
            .with_primary(primary.clone())
            .with_secondary(secondary.clone());

        let result = client.translate("Hello world", "en", "tr").await.unwrap();
        assert_eq!(result.origin, TranslationOrigin::Secondary);
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn dictionary_is_used_without_providers() {
        let client = TranslationClient::new(&DocumentTranslatorConfig::default());

        let result = client.translate("Hello world", "en", "tr").await.unwrap();
        assert_eq!(result.origin, TranslationOrigin::Dictionary);
        assert_eq!(result.translated_text, "merhaba dünya");
        assert_eq!(client.cache_len().await, 1);
    }

    #[tokio::test]
    async fn untranslated_marker_is_not_cached() {
        let client = TranslationClient::new(&DocumentTranslatorConfig::default());

        let result = client.translate("Guten Morgen", "de", "fr").await.unwrap();
        assert_eq!(result.origin, TranslationOrigin::Untranslated);
        assert_eq!(result.translated_text, "[fr translation unavailable] Guten Morgen");
        assert!(!result.is_translated());
        assert_eq!(client.cache_len().await, 0);
    }

    #[tokio::test]
    async fn oversized_text_is_translated_piece_by_piece() {
        let mut config = DocumentTranslatorConfig::default();
        config.translation.max_request_chars = 25;
        config.translation.subchunk_pause_ms = 0;
        let primary = ScriptedProvider::new("primary", vec![]);
        let client = TranslationClient::new(&config).with_primary(primary.clone());

        let result = client
            .translate("First sentence here. Second sentence here. Third one.", "en", "de")
            .await
            .unwrap();

        assert_eq!(primary.calls(), 3);
        assert_eq!(
            result.translated_text,
            "de:First sentence here. de:Second sentence here. de:Third one."
        );
        assert_eq!(result.origin, TranslationOrigin::Primary);
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_delays_after_window_is_full() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: true,
            max_requests_per_window: 2,
            window_secs: 60,
            throttle_delay_ms: 2000,
            grace: 5,
        });

        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
        let before = Instant::now();
        limiter.acquire().await.unwrap();

        assert!(before.elapsed() >= Duration::from_millis(2000));
        assert_eq!(limiter.request_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_window_resets() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        for _ in 0..10 {
            limiter.acquire().await.unwrap();
        }
        assert_eq!(limiter.request_count().await, 10);

        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.acquire().await.unwrap();
        assert_eq!(limiter.request_count().await, 1);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let config = RetryConfig::default();
        assert_eq!(backoff_delay(&config, RetryClass::Backoff, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, RetryClass::Backoff, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&config, RetryClass::Backoff, 10), Duration::from_millis(8000));
        assert_eq!(backoff_delay(&config, RetryClass::Flat, 5), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn detection_validates_and_memoizes() {
        let primary = ScriptedProvider::detecting("Turkish");
        let client = TranslationClient::new(&DocumentTranslatorConfig::default())
            .with_primary(primary.clone());

        assert_eq!(client.detect_language("Günaydın dünya").await.unwrap(), "tr");
        assert_eq!(client.detect_language("Günaydın dünya").await.unwrap(), "tr");
        assert_eq!(primary.calls(), 1);
        assert_eq!(client.detect_language("ok").await.unwrap(), "en");
    }

    #[tokio::test]
    async fn detection_accepts_two_letter_answer() {
        let primary = ScriptedProvider::detecting(" DE \n");
        let client = TranslationClient::new(&DocumentTranslatorConfig::default())
            .with_primary(primary);

        assert_eq!(client.detect_language("Guten Morgen").await.unwrap(), "de");
    }

    #[tokio::test]
    async fn batch_keeps_order() {
        let client = TranslationClient::new(&DocumentTranslatorConfig::default())
            .with_primary(ScriptedProvider::new("primary", vec![]));

        let results = client
            .translate_batch(&["one two", "three four"], "en", "fr")
            .await
            .unwrap();
        let texts: Vec<_> = results.into_iter().map(|r| r.translated_text).collect();
        assert_eq!(texts, vec!["fr:one two", "fr:three four"]);
    }
}
