//! doc-translate：翻译已转为文本/HTML 的文档及其图像

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use document_translator::extract::load_images;
use document_translator::{
    export, export_images, DocumentKind, DocumentPipeline, DocumentTranslatorConfig, ImageRenderer, OcrEngine,
    OutputFormat, PlainFileExtractor, ProgressEvent, Stage, TranslationClient,
};

#[derive(Debug, Parser)]
#[command(name = "doc-translate", version, about = "Translate documents, tables and embedded images")]
struct Cli {
    /// 输入文件（纯文本、带换页符的文本或 HTML）
    input: PathBuf,

    /// 源语言，默认取配置文件中的值
    #[arg(short, long)]
    source: Option<String>,

    /// 目标语言
    #[arg(short, long)]
    target: Option<String>,

    /// txt, html, presentation, docx, pdf
    #[arg(short, long, default_value = "txt")]
    format: String,

    /// 随文档翻译的图像目录
    #[arg(long)]
    images: Option<PathBuf>,

    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    #[arg(short, long, env = "DOC_TRANSLATOR_CONFIG")]
    config: Option<PathBuf>,

    /// 不做 OCR，图像原样导出
    #[arg(long)]
    no_ocr: bool,

    /// 写出默认配置后退出
    #[arg(long)]
    write_example_config: bool,
}

fn print_event(event: &ProgressEvent) {
    let mut line = format!("[{:>3}%] {:?}", event.progress, event.stage);
    if let (Some(current), Some(total)) = (event.current_chunk, event.total_chunks) {
        line.push_str(&format!(" chunk {}/{}", current, total));
    }
    if let (Some(current), Some(total)) = (event.current_image, event.total_images) {
        line.push_str(&format!(" image {}/{}", current, total));
    }
    if let Some(message) = &event.message {
        line.push_str(&format!(" - {}", message));
    }
    if let Some(error) = &event.error {
        line.push_str(&format!(" ! {}", error));
    }
    eprintln!("{}", line);
}

/// 等待进度输出任务结束；任务 panic 只记录，不影响导出
async fn await_printer(printer: JoinHandle<()>) -> bool {
    match printer.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "进度输出任务异常结束");
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.write_example_config {
        let path = cli.config.unwrap_or_else(|| PathBuf::from("translation-config.toml"));
        DocumentTranslatorConfig::generate_example_config(&path)?;
        info!(path = %path.display(), "已写出默认配置");
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => DocumentTranslatorConfig::from_file(path)?.with_env_overrides(),
        None => DocumentTranslatorConfig::load_from_default_locations(),
    };
    let format: OutputFormat = cli.format.parse()?;
    let source = cli.source.unwrap_or_else(|| config.translation.source_lang.clone());
    let target = cli.target.unwrap_or_else(|| config.translation.target_lang.clone());

    let images = match &cli.images {
        Some(dir) => load_images(dir).await?,
        None => Vec::new(),
    };
    let extractor = Arc::new(PlainFileExtractor::new().with_images(images));
    let client = Arc::new(TranslationClient::from_config(&config));

    let mut pipeline = DocumentPipeline::new(extractor, client, &config);
    if !cli.no_ocr {
        let ocr = OcrEngine::tesseract(config.ocr.clone());
        if ocr.is_available() {
            info!(backend = ocr.backend_name(), "图像翻译已启用");
            pipeline = pipeline.with_images(ocr, ImageRenderer::new(&config.render));
        } else {
            warn!(binary = %config.ocr.binary, "未找到 OCR 程序，图像将原样导出");
        }
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消");
            ctrl_c.cancel();
        }
    });

    let (events, mut receiver) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            print_event(&event);
            if event.stage == Stage::Complete || event.stage == Stage::Error {
                break;
            }
        }
    });

    let data = tokio::fs::read(&cli.input).await?;
    let outcome = pipeline
        .run(&data, DocumentKind::Text, &source, &target, &events, &cancel)
        .await;
    drop(events);
    await_printer(printer).await;
    let translation = outcome?;

    let file_name = cli
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let exported = export(&translation, &file_name, &target, format)?;
    let path = exported.save_to(&cli.output).await?;
    println!("{}", path.display());

    for image in export_images(&translation, &file_name, &target) {
        let path = image.save_to(&cli.output).await?;
        println!("{}", path.display());
    }

    Ok(())
}
