use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("failed to load image: {0}")]
    Load(String),

    #[error("image encoding is unavailable: {0}")]
    EnvironmentCapability(String),

    #[error("image is {bytes} bytes after compression, above the {limit} byte limit; use a smaller image")]
    TooLarge { bytes: usize, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("choose an analysis mode or enter custom instructions")]
    NothingToInstruct,

    #[error("lens '{0}' is not registered")]
    UnknownLens(String),

    #[error("lens '{0}' needs a stated intent")]
    LensIntentRequired(String),

    #[error("a follow-up needs the prior analysis text")]
    MissingPriorAnalysis,

    #[error("a follow-up needs a question")]
    MissingQuestion,

    #[error("{0}")]
    Registry(String),
}

/// Failure of one analysis request, classified for the wire.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Image(#[from] NormalizeError),

    #[error("{message}")]
    Configuration {
        message: String,
        credential_present: bool,
    },

    #[error("{0}")]
    Upstream(String),
}

impl AnalysisError {
    pub fn status_code(&self) -> u16 {
        match self {
            AnalysisError::Validation(_) => 400,
            AnalysisError::Compose(ComposeError::Registry(_)) => 500,
            AnalysisError::Compose(_) => 400,
            AnalysisError::Image(NormalizeError::EnvironmentCapability(_)) => 500,
            AnalysisError::Image(_) => 400,
            AnalysisError::Configuration { .. } | AnalysisError::Upstream(_) => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

#[cfg(test)]
mod tests {
    use super::{AnalysisError, ComposeError, NormalizeError};

    #[test]
    fn status_codes_split_client_and_server_failures() {
        assert_eq!(
            AnalysisError::Validation("No image provided".to_string()).status_code(),
            400
        );
        assert_eq!(
            AnalysisError::from(ComposeError::NothingToInstruct).status_code(),
            400
        );
        assert_eq!(
            AnalysisError::from(NormalizeError::TooLarge {
                bytes: 10,
                limit: 5
            })
            .status_code(),
            400
        );
        assert_eq!(
            AnalysisError::Configuration {
                message: "missing key".to_string(),
                credential_present: false,
            }
            .status_code(),
            500
        );
        assert!(!AnalysisError::Upstream("boom".to_string()).is_client_error());
    }
}
