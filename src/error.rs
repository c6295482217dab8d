use thiserror::Error;

/// Failures reading text input (CLI arguments, feature lists).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),
    #[error("Invalid leaf: {0}")]
    InvalidLeaf(String),
    #[error("Invalid register: {0} (expected 0-3 or eax/ebx/ecx/edx)")]
    InvalidRegister(String),
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}
