//! Error types.
//!
//! - `FitError`: hard failures of the fitting library (malformed inputs, broken
//!   internal invariants). Recoverable conditions such as optimizer
//!   non-convergence are *not* errors; they are reported in `FitReport`.
//! - `AppError`: binary-level error carrying a process exit code.

/// Hard errors raised by the fitting library.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    #[error("spectrum is empty")]
    EmptySpectrum,
    #[error("spectrum has no points with positive intensity")]
    NoPositiveIntensity,
    #[error("spectrum length mismatch: q={q}, I={intensity}, dI={uncertainty}")]
    LengthMismatch {
        q: usize,
        intensity: usize,
        uncertainty: usize,
    },
    #[error("q must be strictly increasing, index {index} has {current} after {previous}")]
    NonIncreasingQ {
        index: usize,
        previous: f64,
        current: f64,
    },
    #[error("spectrum field '{field}' must be finite, index {index} got {value}")]
    NonFiniteValue {
        field: &'static str,
        index: usize,
        value: f64,
    },
    #[error("flat parameter slot mismatch at position {position}: expected '{expected}', found '{found}'")]
    SlotMismatch {
        position: usize,
        expected: String,
        found: String,
    },
    #[error("invalid option '{field}': {message}")]
    InvalidOption {
        field: &'static str,
        message: String,
    },
}

impl FitError {
    /// Whether the error stems from user-supplied input rather than a computation.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, Self::SlotMismatch { .. })
    }
}

#[derive(Clone, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let code = match err {
            FitError::NoPositiveIntensity => 3,
            ref e if e.is_input_error() => 2,
            _ => 4,
        };
        AppError::new(code, err.to_string())
    }
}
