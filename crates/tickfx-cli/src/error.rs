use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] tickfx_core::ValidationError),

    #[error(transparent)]
    Engine(tickfx_core::EngineError),

    #[error("interrupted")]
    Interrupted,

    #[error("strict mode failed: {failed} symbol(s) failed")]
    StrictModeViolation { failed: usize },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<tickfx_core::EngineError> for CliError {
    fn from(error: tickfx_core::EngineError) -> Self {
        match error {
            tickfx_core::EngineError::Validation(error) => Self::Validation(error),
            error if error.is_cancelled() => Self::Interrupted,
            error => Self::Engine(error),
        }
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::StrictModeViolation { .. } => 3,
            Self::Serialization(_) => 4,
            Self::Engine(_) => 6,
            Self::Interrupted => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use tickfx_core::{EngineError, SourceError, ValidationError};

    use super::*;

    #[test]
    fn engine_errors_map_to_distinct_codes() {
        let validation: CliError = EngineError::from(ValidationError::EmptyRequest).into();
        assert_eq!(validation.exit_code(), 2);

        let cancelled: CliError = EngineError::from(SourceError::cancelled("ctrl-c")).into();
        assert!(matches!(cancelled, CliError::Interrupted));

        let offline: CliError = EngineError::from(SourceError::unavailable("offline")).into();
        assert_eq!(offline.exit_code(), 6);
    }
}
