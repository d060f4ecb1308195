use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Parse(#[from] crmai_core::ParseError),

    #[error("usage error: {0}")]
    Usage(String),

    #[error(transparent)]
    Orchestration(#[from] crmai_core::OrchestratorError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Parse(_) | Self::Usage(_) => 2,
            Self::Orchestration(_) => 3,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
