//! 译文导出
//!
//! 把 [`DocumentTranslation`] 写成 `.txt`、`.html`、HTML 演示稿、`.docx` 或 `.pdf`。

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::ImageFormat;
use printpdf::{BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Point, Pt, TextItem};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Result, TranslationError};
use crate::html::escape_html;
use crate::pipeline::DocumentTranslation;

/// 每张幻灯片的段落数
pub const PARAGRAPHS_PER_SLIDE: usize = 5;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const PDF_MARGIN_MM: f32 = 20.0;
const PDF_FONT_SIZE_PT: f32 = 11.0;
const PDF_LINE_STEP_MM: f32 = 7.0;
const PDF_LAST_LINE_MM: f32 = 280.0;

/// 导出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Txt,
    Html,
    Presentation,
    Docx,
    Pdf,
}

impl FromStr for OutputFormat {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(OutputFormat::Txt),
            "html" => Ok(OutputFormat::Html),
            "presentation" | "pptx" | "slides" => Ok(OutputFormat::Presentation),
            "docx" | "word" => Ok(OutputFormat::Docx),
            "pdf" => Ok(OutputFormat::Pdf),
            other => Err(TranslationError::Export(format!("unknown output format: {}", other))),
        }
    }
}

/// 导出的文件
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub data: Vec<u8>,
}

impl ExportedFile {
    /// 写入目录，返回完整路径
    pub async fn save_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.file_name);
        tokio::fs::write(&path, &self.data).await?;
        info!(path = %path.display(), bytes = self.data.len(), "译文已保存");
        Ok(path)
    }
}

/// 原文件名第一个点之前的部分
fn base_name(original_file_name: &str) -> &str {
    let name = Path::new(original_file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(original_file_name);
    name.split('.').next().unwrap_or(name)
}

/// `<base>_<lang>.<ext>`，演示稿为 `<base>_<lang>_presentation.html`
pub fn output_file_name(original_file_name: &str, target_lang: &str, format: OutputFormat, is_html: bool) -> String {
    let base = format!("{}_{}", base_name(original_file_name), target_lang);
    match format {
        OutputFormat::Txt | OutputFormat::Html if is_html => format!("{}.html", base),
        OutputFormat::Txt => format!("{}.txt", base),
        OutputFormat::Html => format!("{}.html", base),
        OutputFormat::Presentation => format!("{}_presentation.html", base),
        OutputFormat::Docx => format!("{}.docx", base),
        OutputFormat::Pdf => format!("{}.pdf", base),
    }
}

/// 按格式导出译文
///
/// 带有 HTML 的结果在 txt/html 格式下保存 HTML 内容，其余格式使用纯文本译文。
#[instrument(skip(translation), fields(chunks = translation.chunks.len()))]
pub fn export(
    translation: &DocumentTranslation,
    original_file_name: &str,
    target_lang: &str,
    format: OutputFormat,
) -> Result<ExportedFile> {
    let file_name = output_file_name(original_file_name, target_lang, format, translation.is_html);

    let (content_type, data) = match (format, translation.html.as_deref()) {
        (OutputFormat::Txt | OutputFormat::Html, Some(html)) if translation.is_html => {
            ("text/html; charset=utf-8", html.as_bytes().to_vec())
        }
        (OutputFormat::Txt, _) => ("text/plain; charset=utf-8", translation.text.as_bytes().to_vec()),
        (OutputFormat::Html, _) => ("text/html; charset=utf-8", html_document(&translation.text).into_bytes()),
        (OutputFormat::Presentation, _) => (
            "text/html; charset=utf-8",
            html_presentation(&translation.text).into_bytes(),
        ),
        (OutputFormat::Docx, _) => (
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            docx_document(&translation.text)?,
        ),
        (OutputFormat::Pdf, _) => ("application/pdf", pdf_document(&translation.text)),
    };

    debug!(file = %file_name, bytes = data.len(), "导出完成");
    Ok(ExportedFile {
        file_name,
        content_type,
        data,
    })
}

/// 导出图像：回绘成功的为 `<base>_image_<n>_<lang>.png`，否则按原图格式导出
/// `<base>_image_<n>_original.<ext>`
pub fn export_images(translation: &DocumentTranslation, original_file_name: &str, target_lang: &str) -> Vec<ExportedFile> {
    let base = base_name(original_file_name);
    translation
        .images
        .iter()
        .enumerate()
        .map(|(i, image)| match &image.rendered {
            Some(rendered) => ExportedFile {
                file_name: format!("{}_image_{}_{}.png", base, i + 1, target_lang),
                content_type: "image/png",
                data: rendered.data.clone(),
            },
            None => {
                let (extension, content_type) = original_file_type(&image.original.content_type, &image.original.data);
                ExportedFile {
                    file_name: format!("{}_image_{}_original.{}", base, i + 1, extension),
                    content_type,
                    data: image.original.data.clone(),
                }
            }
        })
        .collect()
}

/// 原图的扩展名和 MIME 类型：优先取声明的类型，其次按文件头识别
fn original_file_type(content_type: &str, data: &[u8]) -> (&'static str, &'static str) {
    let format = ImageFormat::from_mime_type(content_type).or_else(|| image::guess_format(data).ok());
    match format {
        Some(format) => (
            format.extensions_str().first().copied().unwrap_or("bin"),
            format.to_mime_type(),
        ),
        None => ("bin", "application/octet-stream"),
    }
}

fn html_document(text: &str) -> String {
    let body: String = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("<p>{}</p>\n", escape_html(line)))
        .collect();

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n<title>Translation</title>\n</head>\n<body>\n{}</body>\n</html>\n",
        body
    )
}

/// 每 5 段一张幻灯片，打印时分页
pub fn html_presentation(text: &str) -> String {
    let paragraphs: Vec<String> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(escape_html)
        .collect();

    let slides: Vec<String> = paragraphs
        .chunks(PARAGRAPHS_PER_SLIDE)
        .map(|slide| {
            format!(
                "<div class=\"slide\" style=\"page-break-after: always; padding: 40px; font-size: 18px;\">\n{}\n</div>",
                slide.join("<br><br>")
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<title>Translation Presentation</title>
<style>
body {{ font-family: Arial, sans-serif; margin: 0; padding: 0; }}
.slide {{ height: 90vh; position: relative; margin-bottom: 20px; border: 1px solid #ddd; border-radius: 5px; background-color: white; }}
@media print {{
  .slide {{ page-break-after: always; height: 100vh; border: none; }}
}}
</style>
</head>
<body>
{}
</body>
</html>
"#,
        slides.join("\n")
    )
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

fn document_xml(text: &str) -> String {
    let paragraphs: String = text
        .split('\n')
        .map(|line| {
            format!(
                "<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
                escape_html(line)
            )
        })
        .collect();

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        paragraphs
    )
}

/// 最小的 WordprocessingML 包，每行一个段落
pub fn docx_document(text: &str) -> Result<Vec<u8>> {
    let zip_err = |e: zip::result::ZipError| TranslationError::Export(format!("failed to build docx: {}", e));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in [
        ("[Content_Types].xml", CONTENT_TYPES_XML.to_string()),
        ("_rels/.rels", ROOT_RELS_XML.to_string()),
        ("word/document.xml", document_xml(text)),
    ] {
        writer.start_file(name, options).map_err(zip_err)?;
        writer.write_all(content.as_bytes())?;
    }

    let cursor = writer.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}

/// 按字符数折行，过长的单词单独成行
fn wrap_line(line: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in line.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    lines.push(current);
    lines
}

/// A4、20 mm 页边距、11 pt Helvetica，行距 7 mm
pub fn pdf_document(text: &str) -> Vec<u8> {
    // Helvetica 平均字宽约为 0.5 倍字号
    let usable_width_mm = PAGE_WIDTH_MM - 2.0 * PDF_MARGIN_MM;
    let char_width_mm = 0.5 * PDF_FONT_SIZE_PT * 0.3528;
    let max_chars = (usable_width_mm / char_width_mm) as usize;

    let lines: Vec<String> = text.split('\n').flat_map(|line| wrap_line(line, max_chars)).collect();

    let mut pages: Vec<PdfPage> = Vec::new();
    let mut ops: Vec<Op> = Vec::new();
    let mut y = PDF_MARGIN_MM;

    for line in lines {
        if y > PDF_LAST_LINE_MM {
            pages.push(PdfPage::new(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), std::mem::take(&mut ops)));
            y = PDF_MARGIN_MM;
        }

        if !line.is_empty() {
            ops.push(Op::StartTextSection);
            ops.push(Op::SetTextCursor {
                pos: Point {
                    x: Mm(PDF_MARGIN_MM).into_pt(),
                    y: Mm(PAGE_HEIGHT_MM - y).into_pt(),
                },
            });
            ops.push(Op::SetFontSizeBuiltinFont {
                size: Pt(PDF_FONT_SIZE_PT),
                font: BuiltinFont::Helvetica,
            });
            ops.push(Op::WriteTextBuiltinFont {
                items: vec![TextItem::Text(line)],
                font: BuiltinFont::Helvetica,
            });
            ops.push(Op::EndTextSection);
        }
        y += PDF_LINE_STEP_MM;
    }
    pages.push(PdfPage::new(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), ops));

    let mut doc = PdfDocument::new("Translation");
    doc.with_pages(pages);
    debug!(pages = doc.pages.len(), "PDF排版完成");

    let mut warnings: Vec<PdfWarnMsg> = Vec::new();
    doc.save(&PdfSaveOptions::default(), &mut warnings)
}
