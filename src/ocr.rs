//! OCR引擎
//!
//! [`OcrEngine`] 负责解码、尺寸检查、语言映射和超时；具体识别由 [`OcrBackend`]
//! 完成。默认后端 [`TesseractBackend`] 每次调用创建独立的临时目录和
//! `tesseract` 进程，并解析其 TSV 输出得到逐词边界框。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageFormat};
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::config::OcrConfig;
use crate::lang::ocr_language;
use crate::types::{BoundingBox, RecognizedWord};

/// 图像过小时的说明
pub const IMAGE_TOO_SMALL: &str = "image too small";

/// OCR后端错误
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("OCR timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 后端输出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    pub words: Vec<RecognizedWord>,
    /// 0 - 100
    pub confidence: f32,
}

/// OCR后端
#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;

    /// 后端依赖（可执行文件等）是否已安装
    fn is_available(&self) -> bool {
        true
    }

    /// `language` 为 tesseract 语言包名称，如 `eng`、`chi_sim`
    async fn recognize(&self, image: &DynamicImage, language: &str) -> Result<OcrOutput, OcrError>;
}

/// 解析 `tesseract ... tsv` 的输出
///
/// 只保留第 5 级（单词）且置信度不为负的行；同一行的单词以空格连接，
/// 各行以换行连接。置信度取单词置信度的平均值。
pub fn parse_tsv(tsv: &str) -> OcrOutput {
    let mut words = Vec::new();
    let mut lines: Vec<((u32, u32, u32, u32), Vec<String>)> = Vec::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }

        let text = cols[11..].join("\t");
        let text = text.trim();
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let num = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        let (left, top, width, height) = (num(6) as f32, num(7) as f32, num(8) as f32, num(9) as f32);
        let line_key = (num(1), num(2), num(3), num(4));

        match lines.last_mut() {
            Some((key, line)) if *key == line_key => line.push(text.to_string()),
            _ => lines.push((line_key, vec![text.to_string()])),
        }

        words.push(RecognizedWord {
            text: text.to_string(),
            bbox: BoundingBox::new(left, top, left + width, top + height),
            confidence: conf,
        });
    }

    let confidence = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32
    };

    OcrOutput {
        text: lines
            .into_iter()
            .map(|(_, line)| line.join(" "))
            .collect::<Vec<_>>()
            .join("\n"),
        words,
        confidence,
    }
}

/// 调用 `tesseract` 命令行的OCR后端
pub struct TesseractBackend {
    binary: String,
}

impl TesseractBackend {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run_tesseract(&self, image_path: &Path, language: &str) -> Result<String, OcrError> {
        let output = Command::new(&self.binary)
            .arg(image_path)
            .arg("stdout")
            .args(["-l", language, "tsv"])
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(OcrError::OcrFailed(format!("tesseract failed: {}", stderr.trim())))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OcrError::BackendNotAvailable(
                format!("{} not found (install tesseract-ocr)", self.binary),
            )),
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

#[async_trait]
impl OcrBackend for TesseractBackend {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    async fn recognize(&self, image: &DynamicImage, language: &str) -> Result<OcrOutput, OcrError> {
        // 临时目录随作用域结束删除，进程在 future 被丢弃时终止
        let workspace = TempDir::new()?;
        let image_path = workspace.path().join("input.png");
        image
            .save_with_format(&image_path, ImageFormat::Png)
            .map_err(|e| OcrError::ImageError(e.to_string()))?;

        let tsv = self.run_tesseract(&image_path, language).await?;
        Ok(parse_tsv(&tsv))
    }
}

/// 一次识别的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub words: Vec<RecognizedWord>,
    pub confidence: f32,
    /// 未执行识别的原因（例如图像过小）
    pub notice: Option<String>,
}

impl Recognition {
    pub fn too_small() -> Self {
        Self {
            notice: Some(IMAGE_TOO_SMALL.to_string()),
            ..Self::default()
        }
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// OCR引擎
#[derive(Clone)]
pub struct OcrEngine {
    backend: Arc<dyn OcrBackend>,
    config: OcrConfig,
}

impl OcrEngine {
    pub fn new(backend: Arc<dyn OcrBackend>, config: OcrConfig) -> Self {
        Self { backend, config }
    }

    /// 使用配置中的 tesseract 可执行文件
    pub fn tesseract(config: OcrConfig) -> Self {
        let backend = Arc::new(TesseractBackend::new(config.binary.clone()));
        Self::new(backend, config)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    /// 识别图像中的文字
    ///
    /// 图像无法解码时返回错误；小于最小尺寸时返回带说明的空结果，不调用后端。
    #[instrument(skip(self, image_data), fields(bytes = image_data.len(), backend = self.backend.name()))]
    pub async fn recognize(&self, image_data: &[u8], language: &str) -> Result<Recognition, OcrError> {
        let image = image::load_from_memory(image_data)
            .map_err(|e| OcrError::ImageError(format!("cannot decode image: {}", e)))?;

        let (width, height) = image.dimensions();
        if width < self.config.min_width || height < self.config.min_height {
            debug!(width, height, "图像过小，跳过OCR");
            return Ok(Recognition::too_small());
        }

        let language = ocr_language(language);
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = tokio::time::timeout(timeout, self.backend.recognize(&image, language))
            .await
            .map_err(|_| OcrError::Timeout(timeout))??;

        debug!(words = output.words.len(), confidence = output.confidence, "OCR完成");
        Ok(Recognition {
            text: output.text.trim().to_string(),
            words: output.words,
            confidence: output.confidence,
            notice: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let mut img = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 255, 255, 255]));
        for x in 0..width.min(10) {
            img.put_pixel(x, 0, image::Rgba([0, 0, 0, 255]));
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    struct RecordingBackend {
        calls: AtomicUsize,
        language: Mutex<Option<String>>,
        delay: Option<Duration>,
    }

    impl RecordingBackend {
        fn new(delay: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                language: Mutex::new(None),
                delay,
            })
        }
    }

    #[async_trait]
    impl OcrBackend for RecordingBackend {
        fn name(&self) -> &str {
            "recording"
        }

        async fn recognize(&self, _image: &DynamicImage, language: &str) -> Result<OcrOutput, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.language.lock().unwrap() = Some(language.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(OcrOutput {
                text: " Merhaba\n".to_string(),
                words: vec![RecognizedWord {
                    text: "Merhaba".to_string(),
                    bbox: BoundingBox::new(1.0, 1.0, 40.0, 12.0),
                    confidence: 91.0,
                }],
                confidence: 91.0,
            })
        }
    }

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
        1\t1\t0\t0\t0\t0\t0\t0\t200\t100\t-1\t\n\
        4\t1\t1\t1\t1\t0\t10\t10\t120\t20\t-1\t\n\
        5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t96.5\tHello\n\
        5\t1\t1\t1\t1\t2\t70\t10\t60\t20\t90.5\tworld\n\
        5\t1\t1\t1\t2\t1\t10\t40\t30\t20\t-1\t \n\
        5\t1\t1\t1\t2\t2\t45\t40\t40\t20\t80\tagain\n";

    #[test]
    fn tsv_words_and_lines_are_parsed() {
        let out = parse_tsv(TSV);
        assert_eq!(out.text, "Hello world\nagain");
        assert_eq!(out.words.len(), 3);
        assert_eq!(out.words[1].bbox, BoundingBox::new(70.0, 10.0, 130.0, 30.0));
        assert!((out.confidence - 89.0).abs() < 0.01);
    }

    #[test]
    fn empty_tsv_has_no_text() {
        let out = parse_tsv("level\tpage_num\n");
        assert!(out.text.is_empty());
        assert_eq!(out.confidence, 0.0);
    }

    #[tokio::test]
    async fn small_image_never_reaches_backend() {
        let backend = RecordingBackend::new(None);
        let engine = OcrEngine::new(backend.clone(), OcrConfig::default());

        let result = engine.recognize(&png(30, 30), "en").await.unwrap();
        assert_eq!(result.notice.as_deref(), Some(IMAGE_TOO_SMALL));
        assert!(!result.has_text());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn language_is_mapped_and_text_trimmed() {
        let backend = RecordingBackend::new(None);
        let engine = OcrEngine::new(backend.clone(), OcrConfig::default());

        let result = engine.recognize(&png(80, 60), "tr").await.unwrap();
        assert_eq!(result.text, "Merhaba");
        assert_eq!(backend.language.lock().unwrap().as_deref(), Some("tur"));
    }

    #[tokio::test]
    async fn undecodable_bytes_are_an_image_error() {
        let engine = OcrEngine::new(RecordingBackend::new(None), OcrConfig::default());
        let err = engine.recognize(b"not an image", "en").await.unwrap_err();
        assert!(matches!(err, OcrError::ImageError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let backend = RecordingBackend::new(Some(Duration::from_secs(120)));
        let engine = OcrEngine::new(backend, OcrConfig::default());
        let err = engine.recognize(&png(80, 60), "en").await.unwrap_err();
        assert!(matches!(err, OcrError::Timeout(_)));
    }
}
