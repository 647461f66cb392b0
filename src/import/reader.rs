use super::validate::{normalize, normalize_key, ImportRecord, RawRecord, REQUIRED_HEADERS};
use std::io::ErrorKind;
use std::path::Path;

pub const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Tsv,
}

impl FileFormat {
    /// `.csv` is comma separated, `.txt` is tab separated.
    pub fn from_path(path: &Path) -> Result<Self, String> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(Self::Csv),
            "txt" => Ok(Self::Tsv),
            "" => Err("unsupported file format: no extension. use csv or txt files only.".into()),
            other => Err(format!(
                "unsupported file format: .{}. use csv or txt files only.",
                other
            )),
        }
    }

    fn delimiter(self) -> u8 {
        match self {
            Self::Csv => b',',
            Self::Tsv => b'\t',
        }
    }
}

#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub records: Vec<ImportRecord>,
    pub errors: Vec<String>,
    /// Data rows encountered, valid or not.
    pub rows_seen: usize,
}

impl ReadOutcome {
    fn failed(msg: String) -> Self {
        tracing::error!("{}", msg);
        Self {
            errors: vec![msg],
            ..Self::default()
        }
    }
}

fn read_text(path: &Path) -> Result<String, String> {
    let shown = path.to_string_lossy();
    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => format!("file not found: {}", shown),
        ErrorKind::PermissionDenied => format!("permission denied accessing file: {}", shown),
        _ => format!("unexpected error reading file {}: {}", shown, e),
    })?;
    if !meta.is_file() {
        return Err(format!("not a regular file: {}", shown));
    }
    if meta.len() > MAX_FILE_BYTES {
        return Err(format!(
            "file too large: {} bytes (max {} bytes)",
            meta.len(),
            MAX_FILE_BYTES
        ));
    }

    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => format!("permission denied accessing file: {}", shown),
        _ => format!("unexpected error reading file {}: {}", shown, e),
    })?;
    String::from_utf8(bytes)
        .map_err(|e| format!("file encoding error: {}. save the file as utf-8.", e))
}

/// Reads and validates every data row. File-level problems yield exactly
/// one error and no records; row-level problems are reported per line and
/// never stop the scan.
pub fn read_records(path: &Path) -> ReadOutcome {
    tracing::info!(path = %path.display(), "reading import file");

    let format = match FileFormat::from_path(path) {
        Ok(f) => f,
        Err(msg) => return ReadOutcome::failed(msg),
    };
    let text = match read_text(path) {
        Ok(t) => t,
        Err(msg) => return ReadOutcome::failed(msg),
    };

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(format.delimiter())
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = match rdr.headers() {
        Ok(h) => h.iter().map(normalize_key).collect(),
        Err(e) => return ReadOutcome::failed(format!("could not read header row: {}", e)),
    };
    if headers.iter().all(|h| h.is_empty()) {
        return ReadOutcome::failed("no headers found in file".to_string());
    }
    let missing: Vec<&str> = REQUIRED_HEADERS
        .iter()
        .copied()
        .filter(|req| !headers.iter().any(|h| h == req))
        .collect();
    if !missing.is_empty() {
        return ReadOutcome::failed(format!(
            "missing required headers: {}",
            missing.join(", ")
        ));
    }

    let mut out = ReadOutcome::default();
    for (i, row) in rdr.records().enumerate() {
        let line = i + 1;
        out.rows_seen += 1;

        let row = match row {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(line, error = %e, "unreadable row");
                out.errors.push(format!("line {}: error processing row - {}", line, e));
                continue;
            }
        };

        // Short rows read their missing trailing cells as empty.
        let raw = RawRecord::new(
            line,
            headers
                .iter()
                .enumerate()
                .map(|(col, h)| (h.as_str(), row.get(col).unwrap_or(""))),
        );
        match normalize(&raw) {
            Ok(rec) => {
                tracing::debug!(line, index_number = %rec.index_number, "valid record");
                out.records.push(rec);
            }
            Err(check) => {
                tracing::warn!(line, errors = ?check.errors, "invalid record");
                out.errors
                    .push(format!("line {}: {}", line, check.errors.join("; ")));
            }
        }
    }

    tracing::info!(
        rows = out.rows_seen,
        valid = out.records.len(),
        errors = out.errors.len(),
        "import file processed"
    );
    out
}
