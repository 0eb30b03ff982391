use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::{DynamicImage, ImageFormat};
use regex::Regex;

use crate::error::AppError;
use crate::models::file_record::{FileContent, FileRecord, ImageRef};
use crate::services::spreadsheet_service;

const MAX_TEXT_CHARS: usize = 200_000;
const MAX_IMAGE_DIMENSION: u32 = 1024;

const PLAIN_TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "log", "json", "yaml", "yml", "toml", "ini", "cfg", "xml",
    "html", "htm", "py", "rs", "js", "ts", "go", "java", "c", "h", "cpp", "hpp", "sh", "sql",
    "r", "rb",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    PlainText,
    Pdf,
    Word,
    Slides,
    Spreadsheet,
    Kml,
    Image,
}

/// Maps a path to the extractor that handles it. `None` means the file is
/// not something this tool organizes and is skipped without an error.
pub fn detect_kind(path: &Path) -> Option<FileKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(FileKind::Pdf),
        "docx" => Some(FileKind::Word),
        "pptx" => Some(FileKind::Slides),
        "kml" => Some(FileKind::Kml),
        "jpg" | "jpeg" | "png" => Some(FileKind::Image),
        _ if spreadsheet_service::is_spreadsheet_candidate(path) => Some(FileKind::Spreadsheet),
        _ if PLAIN_TEXT_EXTENSIONS.contains(&ext.as_str()) => Some(FileKind::PlainText),
        _ => None,
    }
}

/// Never fails: any problem reading the file becomes [`FileContent::Failed`].
pub fn extract(source_path: String, absolute_path: &Path, kind: FileKind) -> FileRecord {
    let file_name = absolute_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| source_path.clone());

    let content = match extract_content(absolute_path, kind) {
        Ok(content) => content,
        Err(err) => {
            tracing::warn!(file = %source_path, error = %err, "extraction failed");
            FileContent::Failed(err.to_string())
        }
    };

    FileRecord {
        source_path,
        absolute_path: absolute_path.to_path_buf(),
        file_name,
        content,
    }
}

fn extract_content(path: &Path, kind: FileKind) -> Result<FileContent, AppError> {
    let text = match kind {
        FileKind::Image => return prepare_image(path).map(FileContent::Image),
        FileKind::PlainText => read_plain_text(path)?,
        FileKind::Pdf => extract_pdf(path)?,
        FileKind::Word => extract_docx(path)?,
        FileKind::Slides => extract_slides(path)?,
        FileKind::Spreadsheet => spreadsheet_service::extract_text(path)?,
        FileKind::Kml => extract_kml(path)?,
    };

    let text = clean_text(&text);
    if text.is_empty() {
        return Err(AppError::Extraction("no extractable text".to_string()));
    }
    tracing::debug!(file = %path.display(), chars = text.len(), "extracted text");
    Ok(FileContent::Text(truncate_chars(&text, MAX_TEXT_CHARS)))
}

fn read_plain_text(path: &Path) -> Result<String, AppError> {
    let bytes = std::fs::read(path)?;
    String::from_utf8(bytes)
        .map_err(|_| AppError::Extraction("file is not valid UTF-8 text".to_string()))
}

fn extract_pdf(path: &Path) -> Result<String, AppError> {
    let bytes = std::fs::read(path)?;
    // pdf-extract panics on some malformed fonts.
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(&bytes)
    })) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(AppError::Extraction(format!("PDF extraction failed: {e}"))),
        Err(_) => Err(AppError::Extraction(
            "PDF extraction panicked on a malformed document".to_string(),
        )),
    }
}

fn extract_docx(path: &Path) -> Result<String, AppError> {
    let bytes = std::fs::read(path)?;
    let doc = docx_rs::read_docx(&bytes)
        .map_err(|e| AppError::Extraction(format!("Word document unreadable: {e}")))?;

    let mut out = String::new();
    for child in &doc.document.children {
        match child {
            docx_rs::DocumentChild::Paragraph(para) => {
                push_paragraph(para, &mut out);
                out.push('\n');
            }
            docx_rs::DocumentChild::Table(table) => {
                for row in &table.rows {
                    let docx_rs::TableChild::TableRow(tr) = row;
                    for cell in &tr.cells {
                        let docx_rs::TableRowChild::TableCell(tc) = cell;
                        for content in &tc.children {
                            if let docx_rs::TableCellContent::Paragraph(para) = content {
                                push_paragraph(para, &mut out);
                                out.push_str(" | ");
                            }
                        }
                    }
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

fn push_paragraph(para: &docx_rs::Paragraph, out: &mut String) {
    for child in &para.children {
        match child {
            docx_rs::ParagraphChild::Run(run) => push_run(run, out),
            docx_rs::ParagraphChild::Hyperlink(link) => {
                for inner in &link.children {
                    if let docx_rs::ParagraphChild::Run(run) = inner {
                        push_run(run, out);
                    }
                }
            }
            _ => {}
        }
    }
}

fn push_run(run: &docx_rs::Run, out: &mut String) {
    for child in &run.children {
        if let docx_rs::RunChild::Text(text) = child {
            out.push_str(&text.text);
        }
    }
}

struct KmlPatterns {
    placemark: Regex,
    name: Regex,
    description: Regex,
    coordinates: Regex,
}

fn kml_patterns() -> Result<&'static KmlPatterns, AppError> {
    static PATTERNS: OnceLock<Result<KmlPatterns, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Ok(KmlPatterns {
                placemark: Regex::new(r"(?s)<(?:\w+:)?Placemark\b[^>]*>(.*?)</(?:\w+:)?Placemark>")?,
                name: Regex::new(r"(?s)<(?:\w+:)?name\b[^>]*>(.*?)</(?:\w+:)?name>")?,
                description: Regex::new(
                    r"(?s)<(?:\w+:)?description\b[^>]*>(.*?)</(?:\w+:)?description>",
                )?,
                coordinates: Regex::new(
                    r"(?s)<(?:\w+:)?coordinates\b[^>]*>(.*?)</(?:\w+:)?coordinates>",
                )?,
            })
        })
        .as_ref()
        .map_err(|e| AppError::Extraction(format!("KML pattern: {e}")))
}

fn strip_cdata(value: &str) -> &str {
    let trimmed = value.trim();
    trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
        .unwrap_or(trimmed)
        .trim()
}

fn extract_kml(path: &Path) -> Result<String, AppError> {
    let raw = read_plain_text(path)?;
    if !raw.contains("<kml") {
        return Err(AppError::Extraction("not a KML document".to_string()));
    }
    let patterns = kml_patterns()?;

    let mut out = String::new();
    for block in patterns.placemark.captures_iter(&raw) {
        let body = &block[1];
        if let Some(found) = patterns.name.captures(body) {
            out.push_str(&format!("Name: {}\n", strip_cdata(&found[1])));
        }
        if let Some(found) = patterns.description.captures(body) {
            out.push_str(&format!("Description: {}\n", strip_cdata(&found[1])));
        }
        if let Some(found) = patterns.coordinates.captures(body) {
            out.push_str(&format!("Coordinates: {}\n", found[1].trim()));
        }
        out.push('\n');
    }
    Ok(out)
}

struct SlidePatterns {
    paragraph: Regex,
    run: Regex,
}

fn slide_patterns() -> Result<&'static SlidePatterns, AppError> {
    static PATTERNS: OnceLock<Result<SlidePatterns, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Ok(SlidePatterns {
                paragraph: Regex::new(r"(?s)<a:p(?:\s[^>/]*)?>(.*?)</a:p>")?,
                run: Regex::new(r"(?s)<a:t(?:\s[^>]*)?>(.*?)</a:t>")?,
            })
        })
        .as_ref()
        .map_err(|e| AppError::Extraction(format!("slide pattern: {e}")))
}

fn slide_number(entry: &str) -> Option<u32> {
    entry
        .strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Text runs of every slide in slide order, one line per paragraph.
fn extract_slides(path: &Path) -> Result<String, AppError> {
    let unreadable = |e: zip::result::ZipError| {
        AppError::Extraction(format!("PowerPoint file unreadable: {e}"))
    };
    let mut archive = zip::ZipArchive::new(std::fs::File::open(path)?).map_err(unreadable)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| slide_number(name).map(|number| (number, name.to_string())))
        .collect();
    if slides.is_empty() {
        return Err(AppError::Extraction("presentation has no slides".to_string()));
    }
    slides.sort();

    let patterns = slide_patterns()?;
    let mut out = String::new();
    for (_, name) in slides {
        let mut xml = String::new();
        archive
            .by_name(&name)
            .map_err(unreadable)?
            .read_to_string(&mut xml)?;
        for paragraph in patterns.paragraph.captures_iter(&xml) {
            let runs: Vec<String> = patterns
                .run
                .captures_iter(&paragraph[1])
                .map(|run| unescape_xml(&run[1]))
                .collect();
            out.push_str(&runs.join(" "));
            out.push('\n');
        }
    }
    Ok(out)
}

/// Decodes the image (rejecting corrupt files), downsizes it, and re-encodes
/// it as base64 JPEG for the captioning model.
fn prepare_image(path: &Path) -> Result<ImageRef, AppError> {
    let img = image::open(path)
        .map_err(|e| AppError::Extraction(format!("image unreadable: {e}")))?;
    let img = resize_if_needed(img);

    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
        .map_err(|e| AppError::Extraction(format!("image re-encode failed: {e}")))?;

    Ok(ImageRef {
        base64_jpeg: BASE64.encode(&buffer),
    })
}

fn resize_if_needed(img: DynamicImage) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    if width <= MAX_IMAGE_DIMENSION && height <= MAX_IMAGE_DIMENSION {
        return img;
    }
    img.resize(
        MAX_IMAGE_DIMENSION,
        MAX_IMAGE_DIMENSION,
        image::imageops::FilterType::Triangle,
    )
}

fn clean_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// First `max_chars` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
