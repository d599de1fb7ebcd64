//! 图像翻译：OCR 识别 + 文本翻译

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::ocr::OcrEngine;
use crate::translator::TranslationClient;
use crate::types::RecognizedWord;

/// 图像中没有识别到文字时的说明
pub const NO_TEXT_FOUND: &str = "no text found to translate";

/// 单张图像的翻译结果
///
/// `words` 始终是原文的单词框；出错时 `translated_text` 为空，原因写在 `error` 中。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTranslationResult {
    pub original_text: String,
    pub translated_text: String,
    pub words: Vec<RecognizedWord>,
    pub confidence: f32,
    #[serde(skip)]
    pub image_data: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageTranslationResult {
    fn failed(image_data: &[u8], error: impl Into<String>) -> Self {
        Self {
            original_text: String::new(),
            translated_text: String::new(),
            words: Vec::new(),
            confidence: 0.0,
            image_data: image_data.to_vec(),
            error: Some(error.into()),
        }
    }

    /// 是否有可回绘的译文
    pub fn is_renderable(&self) -> bool {
        self.error.is_none() && !self.translated_text.trim().is_empty()
    }
}

/// 图像翻译器
#[derive(Clone)]
pub struct ImageTranslator {
    ocr: OcrEngine,
    client: Arc<TranslationClient>,
}

impl ImageTranslator {
    pub fn new(ocr: OcrEngine, client: Arc<TranslationClient>) -> Self {
        Self { ocr, client }
    }

    /// 识别并翻译图像中的文字，错误不会中断调用方
    #[instrument(skip(self, image_data), fields(bytes = image_data.len()))]
    pub async fn translate(
        &self,
        image_data: &[u8],
        source_lang: &str,
        target_lang: &str,
    ) -> ImageTranslationResult {
        let recognition = match self.ocr.recognize(image_data, source_lang).await {
            Ok(recognition) => recognition,
            Err(e) => {
                warn!(error = %e, "OCR失败");
                return ImageTranslationResult::failed(image_data, e.to_string());
            }
        };

        if let Some(notice) = recognition.notice.as_deref() {
            return ImageTranslationResult::failed(image_data, notice);
        }
        if !recognition.has_text() {
            return ImageTranslationResult::failed(image_data, NO_TEXT_FOUND);
        }

        info!(chars = recognition.text.chars().count(), "识别到文字，开始翻译");
        match self.client.translate(&recognition.text, source_lang, target_lang).await {
            Ok(result) => ImageTranslationResult {
                original_text: recognition.text,
                translated_text: result.translated_text,
                words: recognition.words,
                confidence: recognition.confidence,
                image_data: image_data.to_vec(),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "图像文字翻译失败");
                ImageTranslationResult {
                    original_text: recognition.text,
                    translated_text: String::new(),
                    words: recognition.words,
                    confidence: recognition.confidence,
                    image_data: image_data.to_vec(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
