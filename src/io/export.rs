//! Export measured vs fitted intensity to CSV.

use std::path::Path;

use crate::error::AppError;
use crate::report::ResidualRow;

/// Write `q, I, I_fit, residual` rows to a CSV file.
pub fn write_residuals_csv(path: &Path, rows: &[ResidualRow]) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;

    writer
        .write_record(["q", "I", "I_fit", "residual"])
        .map_err(|e| AppError::new(2, format!("Failed to write export CSV header: {e}")))?;
    for r in rows {
        writer
            .write_record([
                format!("{:.10e}", r.q),
                format!("{:.10e}", r.measured),
                format!("{:.10e}", r.modeled),
                format!("{:.10e}", r.residual),
            ])
            .map_err(|e| AppError::new(2, format!("Failed to write export CSV row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush export CSV: {e}")))?;
    Ok(())
}

/// Write a spectrum as `q, I, dI` rows (the `synth` output format).
pub fn write_spectrum_csv(path: &Path, spectrum: &crate::domain::Spectrum) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create spectrum CSV '{}': {e}", path.display())))?;
    writer
        .write_record(["q", "I", "dI"])
        .map_err(|e| AppError::new(2, format!("Failed to write spectrum CSV header: {e}")))?;
    for ((q, i), di) in spectrum.q().iter().zip(spectrum.intensity()).zip(spectrum.uncertainty()) {
        // Masked points carry no uncertainty; write a placeholder the reader accepts.
        let di = if di.is_finite() && *di > 0.0 { *di } else { 1.0 };
        writer
            .write_record([format!("{q:.10e}"), format!("{i:.10e}"), format!("{di:.10e}")])
            .map_err(|e| AppError::new(2, format!("Failed to write spectrum CSV row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush spectrum CSV: {e}")))?;
    Ok(())
}
