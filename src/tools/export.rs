use std::path::{Path, PathBuf};

use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::core::error::ApiError;

pub type Row = Map<String, Value>;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error while exporting: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid export filename: {0}")]
    InvalidFilename(String),
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::InvalidFilename(_) => ApiError::validation("options.filename", err.to_string()),
            other => ApiError::internal(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json; charset=utf-8",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportOptions {
    /// Explicit column order. When absent, the first row's keys are used.
    pub columns: Option<Vec<String>>,
    pub delimiter: char,
    pub include_header: bool,
    /// When set (or when `directory` is set) the content is also written to disk.
    pub filename: Option<String>,
    pub directory: Option<PathBuf>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            columns: None,
            delimiter: ',',
            include_header: true,
            filename: None,
            directory: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub content: String,
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub path: PathBuf,
    pub rows_written: usize,
    pub columns: Vec<String>,
}

/// Textual form of a cell. Strings are taken verbatim, `null` is empty, and
/// nested arrays/objects are written as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Quotes a field when it contains the delimiter, a quote, CR or LF; inner
/// quotes are doubled.
pub fn escape_field(field: &str, delimiter: char) -> String {
    let needs_quotes = field.contains(delimiter)
        || field.contains('"')
        || field.contains('\n')
        || field.contains('\r');
    if needs_quotes {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn infer_columns(first: &Row) -> Vec<String> {
    first.keys().cloned().collect()
}

fn csv_line<'a>(cells: impl Iterator<Item = &'a str>, delimiter: char) -> String {
    let mut line = cells
        .map(|c| escape_field(c, delimiter))
        .collect::<Vec<_>>()
        .join(&delimiter.to_string());
    line.push('\n');
    line
}

fn row_line(row: &Row, columns: &[String], delimiter: char) -> String {
    let cells: Vec<String> = columns
        .iter()
        .map(|c| row.get(c).map(stringify).unwrap_or_default())
        .collect();
    csv_line(cells.iter().map(String::as_str), delimiter)
}

/// Renders rows as CSV. Empty input yields an empty string.
pub fn to_csv(rows: &[Row], options: &ExportOptions) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let columns = options
        .columns
        .clone()
        .unwrap_or_else(|| infer_columns(first));

    let mut out = String::new();
    if options.include_header {
        out.push_str(&csv_line(columns.iter().map(String::as_str), options.delimiter));
    }
    for row in rows {
        out.push_str(&row_line(row, &columns, options.delimiter));
    }
    out
}

/// Renders rows as pretty JSON, projected onto `columns` when given.
/// Empty input yields an empty string.
pub fn to_json(rows: &[Row], options: &ExportOptions) -> Result<String, ExportError> {
    if rows.is_empty() {
        return Ok(String::new());
    }
    let projected: Vec<Value> = match &options.columns {
        Some(columns) => rows
            .iter()
            .map(|row| {
                let mut out = Row::new();
                for c in columns {
                    out.insert(c.clone(), row.get(c).cloned().unwrap_or(Value::Null));
                }
                Value::Object(out)
            })
            .collect(),
        None => rows.iter().cloned().map(Value::Object).collect(),
    };
    Ok(serde_json::to_string_pretty(&projected)?)
}

/// Filename with the format's extension, rejecting path separators.
fn output_path(format: ExportFormat, options: &ExportOptions) -> Result<Option<PathBuf>, ExportError> {
    if options.filename.is_none() && options.directory.is_none() {
        return Ok(None);
    }
    let name = match &options.filename {
        Some(name) => {
            if name.contains(['/', '\\']) || name.contains("..") || name.trim().is_empty() {
                return Err(ExportError::InvalidFilename(name.clone()));
            }
            if Path::new(name).extension().is_some() {
                name.clone()
            } else {
                format!("{name}.{}", format.extension())
            }
        }
        None => default_filename(format),
    };
    let dir = options.directory.clone().unwrap_or_else(|| PathBuf::from("."));
    Ok(Some(dir.join(name)))
}

pub fn default_filename(format: ExportFormat) -> String {
    format!(
        "export-{}.{}",
        chrono::Utc::now().format("%Y%m%d-%H%M%S"),
        format.extension()
    )
}

/// Renders `rows` and, when a filename or directory is given, writes the
/// content to disk as well.
pub async fn export(
    rows: &[Row],
    format: ExportFormat,
    options: &ExportOptions,
) -> Result<ExportOutput, ExportError> {
    let content = match format {
        ExportFormat::Csv => to_csv(rows, options),
        ExportFormat::Json => to_json(rows, options)?,
    };

    let file_path = output_path(format, options)?;
    if let Some(path) = &file_path {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content.as_bytes()).await?;
        info!("Exported {} rows to {}", rows.len(), path.display());
    }

    Ok(ExportOutput { content, file_path })
}

/// Streams rows into a CSV file at `path` as they are produced.
///
/// Columns come from `options.columns` or from the first produced row. An empty
/// stream produces a header-only file when columns were given explicitly, and
/// an empty file otherwise.
pub async fn export_stream<S>(
    rows: S,
    path: &Path,
    options: &ExportOptions,
) -> Result<StreamSummary, ExportError>
where
    S: Stream<Item = Row>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::File::create(path).await?;
    let mut writer = tokio::io::BufWriter::new(file);

    let mut columns = options.columns.clone();
    if let (Some(cols), true) = (&columns, options.include_header) {
        writer
            .write_all(csv_line(cols.iter().map(String::as_str), options.delimiter).as_bytes())
            .await?;
    }

    let mut rows_written = 0usize;
    futures::pin_mut!(rows);
    while let Some(row) = rows.next().await {
        if columns.is_none() {
            let inferred = infer_columns(&row);
            if options.include_header {
                writer
                    .write_all(
                        csv_line(inferred.iter().map(String::as_str), options.delimiter)
                            .as_bytes(),
                    )
                    .await?;
            }
            columns = Some(inferred);
        }
        let cols = columns.as_deref().unwrap_or_default();
        writer
            .write_all(row_line(&row, cols, options.delimiter).as_bytes())
            .await?;
        rows_written += 1;
    }

    writer.flush().await?;
    info!("Streamed {} rows to {}", rows_written, path.display());

    Ok(StreamSummary {
        path: path.to_path_buf(),
        rows_written,
        columns: columns.unwrap_or_default(),
    })
}
