use thiserror::Error;

/// One entry in a validation report. Collected rather than bailed on so a
/// single run surfaces every problem in the config pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub file: String,
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.file, self.path, self.message)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error in {file}: {message}")]
    Config { file: String, message: String },

    #[error("validation failed with {} error(s)", .issues.len())]
    Validation { issues: Vec<ValidationIssue> },

    #[error("resolution failed for profile '{profile}': {message}")]
    Resolution { profile: String, message: String },

    #[error("skill '{skill}' conflicts with '{other}' already in the chain")]
    Conflict { skill: String, other: String },

    #[error("corrupt session state at {path}: {message}")]
    StateCorruption { path: String, message: String },

    #[error("evidence evaluation failed: {0}")]
    Evidence(String),

    #[error("retries exhausted after {attempts} attempt(s): {reason}")]
    RetryExhausted { attempts: u32, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(file: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Config {
            file: file.into(),
            message: message.to_string(),
        }
    }

    pub fn corrupt(path: &std::path::Path, message: impl std::fmt::Display) -> Self {
        Error::StateCorruption {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }
}
