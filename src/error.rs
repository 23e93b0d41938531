// Error taxonomy for keyreach
// Gate failures abort the run; per-operation failures never do

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("malformed credential: {}", violations.join("; "))]
    MalformedCredential { violations: Vec<String> },

    #[error("AWS endpoints unreachable (tried {})", tried.join(", "))]
    PlatformUnreachable { tried: Vec<String> },

    #[error("credential rejected by STS: {code}")]
    InvalidCredential { code: String },

    #[error("unexpected probe failure: {0}")]
    UnknownProbe(String),

    #[error("failed to construct HTTP client: {0}")]
    ClientConstruction(#[from] reqwest::Error),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("export failed: {0}")]
    Export(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    /// Process exit code used by the binary. Usage errors exit 2 via clap
    /// before a ScanError ever exists.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanError::MalformedCredential { .. }
            | ScanError::PlatformUnreachable { .. }
            | ScanError::InvalidCredential { .. } => 1,
            ScanError::Catalog(_) => 3,
            ScanError::Io(_) | ScanError::Export(_) => 4,
            _ => 1,
        }
    }
}
