use std::path::Path;

use calamine::{open_workbook_auto, Reader};

use crate::error::AppError;

const SPREADSHEET_EXTENSIONS: &[&str] = &["xls", "xlsx", "xlsm", "xlsb", "ods", "csv"];
const MAX_SHEETS: usize = 10;
const MAX_ROWS_PER_SHEET: usize = 200;
const MAX_COLS_PER_ROW: usize = 50;
const MAX_CHARS_PER_FILE: usize = 200_000;

/// Text rendering of a spreadsheet, bounded in sheets, rows, columns, and bytes.
struct BoundedText {
    out: String,
    truncated: bool,
}

impl BoundedText {
    fn new() -> Self {
        Self {
            out: String::new(),
            truncated: false,
        }
    }

    fn push_line(&mut self, line: &str) -> bool {
        if self.out.len() + line.len() + 1 > MAX_CHARS_PER_FILE {
            self.truncated = true;
            return false;
        }
        self.out.push_str(line);
        self.out.push('\n');
        true
    }

    fn finish(mut self) -> String {
        if self.truncated && self.out.len() + "[TRUNCATED]".len() < MAX_CHARS_PER_FILE {
            self.out.push_str("[TRUNCATED]\n");
        }
        self.out
    }
}

fn normalized_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn row_line(label: &str, cells: impl Iterator<Item = String>, text: &mut BoundedText) -> bool {
    let mut values = Vec::new();
    for (col_idx, cell) in cells.enumerate() {
        if col_idx >= MAX_COLS_PER_ROW {
            text.truncated = true;
            break;
        }
        let value = cell.trim().to_string();
        if !value.is_empty() {
            values.push(value);
        }
    }
    if values.is_empty() {
        return true;
    }
    text.push_line(&format!("{label}: {}", values.join(" | ")))
}

fn extract_csv_text(path: &Path) -> Result<String, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| AppError::Extraction(format!("csv open failed: {e}")))?;

    let mut text = BoundedText::new();
    text.push_line("sheet:csv");

    if let Ok(headers) = reader.headers() {
        let headers = headers.clone();
        if !row_line("header", headers.iter().map(str::to_string), &mut text) {
            return Ok(text.finish());
        }
    }

    for (idx, record) in reader.records().enumerate() {
        if idx >= MAX_ROWS_PER_SHEET {
            text.truncated = true;
            break;
        }
        let record =
            record.map_err(|e| AppError::Extraction(format!("csv read failed: {e}")))?;
        if !row_line(
            &format!("r{}", idx + 1),
            record.iter().map(str::to_string),
            &mut text,
        ) {
            break;
        }
    }

    Ok(text.finish())
}

fn extract_workbook_text(path: &Path) -> Result<String, AppError> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| AppError::Extraction(format!("spreadsheet open failed: {e}")))?;
    let sheet_names = workbook.sheet_names().to_owned();

    let mut text = BoundedText::new();
    'sheets: for (sheet_idx, sheet_name) in sheet_names.iter().enumerate() {
        if sheet_idx >= MAX_SHEETS {
            text.truncated = true;
            break;
        }
        let Ok(range) = workbook.worksheet_range(sheet_name) else {
            continue;
        };
        if !text.push_line(&format!("sheet:{sheet_name}")) {
            break;
        }
        for (row_idx, row) in range.rows().enumerate() {
            if row_idx >= MAX_ROWS_PER_SHEET {
                text.truncated = true;
                break;
            }
            let label = format!("r{}", row_idx + 1);
            if !row_line(&label, row.iter().map(|cell| cell.to_string()), &mut text) {
                break 'sheets;
            }
        }
    }

    Ok(text.finish())
}

pub fn is_spreadsheet_candidate(path: &Path) -> bool {
    normalized_extension(path)
        .as_deref()
        .is_some_and(|ext| SPREADSHEET_EXTENSIONS.contains(&ext))
}

pub fn extract_text(path: &Path) -> Result<String, AppError> {
    let text = match normalized_extension(path).as_deref() {
        Some("csv") => extract_csv_text(path)?,
        Some(_) if is_spreadsheet_candidate(path) => extract_workbook_text(path)?,
        _ => {
            return Err(AppError::Extraction(format!(
                "not a spreadsheet: {}",
                path.display()
            )))
        }
    };
    Ok(text)
}
