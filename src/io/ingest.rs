//! CSV spectrum ingest.
//!
//! Accepted layout: one `q, I[, dI]` row per sample, `#` comments, and an
//! optional header row. With a header, columns are matched by name
//! (case-insensitive, `q`, `i`/`intensity`, `di`/`sigma`/`error`); without
//! one, positions 0, 1 and 2 are used.
//!
//! Unparseable rows are skipped and reported; an input that leaves no usable
//! rows is an error (exit code 3), and so is an input that violates the
//! spectrum invariants (exit code 2).

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::Spectrum;
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Ingest output: the validated spectrum plus what was skipped.
#[derive(Debug, Clone)]
pub struct IngestedSpectrum {
    pub spectrum: Spectrum,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
    /// Whether uncertainties came from the file (otherwise `sqrt(I)`).
    pub has_uncertainty: bool,
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    q: usize,
    intensity: usize,
    uncertainty: Option<usize>,
}

impl Columns {
    const POSITIONAL: Columns = Columns {
        q: 0,
        intensity: 1,
        uncertainty: None,
    };
}

/// Load a spectrum CSV from disk.
pub fn load_spectrum(path: &Path) -> Result<IngestedSpectrum, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;
    read_spectrum(file)
}

/// Parse a spectrum CSV from any reader.
pub fn read_spectrum<R: Read>(input: R) -> Result<IngestedSpectrum, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(input);

    let mut columns: Option<Columns> = None;
    let mut q = Vec::new();
    let mut intensity = Vec::new();
    let mut uncertainty = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for result in reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                let line = e.position().map(|p| p.line() as usize).unwrap_or(0);
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };
        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
        if record.iter().all(str::is_empty) {
            continue;
        }

        let cols = match columns {
            Some(c) => c,
            None => {
                if let Some(c) = header_columns(&record)? {
                    columns = Some(c);
                    continue;
                }
                let c = Columns {
                    uncertainty: (record.len() > 2).then_some(2),
                    ..Columns::POSITIONAL
                };
                columns = Some(c);
                c
            }
        };

        rows_read += 1;
        match parse_row(&record, cols) {
            Ok((qv, iv, dv)) => {
                q.push(qv);
                intensity.push(iv);
                if let Some(d) = dv {
                    uncertainty.push(d);
                }
            }
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    let rows_used = q.len();
    if rows_used == 0 {
        return Err(AppError::new(3, "No valid rows in spectrum CSV."));
    }

    let has_uncertainty = columns.and_then(|c| c.uncertainty).is_some();
    let uncertainty = has_uncertainty.then_some(uncertainty);
    let spectrum = Spectrum::new(q, intensity, uncertainty)?;

    Ok(IngestedSpectrum {
        spectrum,
        row_errors,
        rows_read,
        rows_used,
        has_uncertainty,
    })
}

/// Column layout from a header row, or `None` if the row is data.
fn header_columns(record: &StringRecord) -> Result<Option<Columns>, AppError> {
    if record.iter().all(|f| f.parse::<f64>().is_ok()) {
        return Ok(None);
    }
    let find = |names: &[&str]| {
        record
            .iter()
            .position(|f| names.contains(&normalize_header_name(f).as_str()))
    };
    let q = find(&["q"]).ok_or_else(|| AppError::new(2, "Missing required column: `q`"))?;
    let intensity =
        find(&["i", "intensity"]).ok_or_else(|| AppError::new(2, "Missing required column: `I`"))?;
    let uncertainty = find(&["di", "sigma", "error"]);
    Ok(Some(Columns {
        q,
        intensity,
        uncertainty,
    }))
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a BOM.
    name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase()
}

fn parse_row(record: &StringRecord, cols: Columns) -> Result<(f64, f64, Option<f64>), String> {
    let q = parse_field(record, cols.q, "q")?;
    let i = parse_field(record, cols.intensity, "I")?;
    let di = match cols.uncertainty {
        Some(idx) => Some(parse_field(record, idx, "dI")?),
        None => None,
    };
    Ok((q, i, di))
}

fn parse_field(record: &StringRecord, idx: usize, name: &str) -> Result<f64, String> {
    let raw = record
        .get(idx)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing `{name}` value."))?;
    let v = raw
        .parse::<f64>()
        .map_err(|_| format!("Invalid `{name}` value '{raw}'."))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(format!("Non-finite `{name}` value."))
    }
}
