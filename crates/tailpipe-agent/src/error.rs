//! Startup-fatal error kinds.
//!
//! Only conditions detected before the pipeline starts are represented
//! here; once running, every failure is handled in place (logged, dropped,
//! or retried) and nothing propagates.

use std::path::PathBuf;

/// Errors that abort the agent before the pipeline starts.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to open {path}: {source}")]
    TailOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build transmission client: {0}")]
    TransmissionBuild(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AgentError::InvalidConfig("unable to separate field into a key=val pair".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: unable to separate field into a key=val pair"
        );
    }

    #[test]
    fn test_tail_open_includes_path() {
        let error = AgentError::TailOpen {
            path: PathBuf::from("/var/log/app.log"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(error.to_string().contains("/var/log/app.log"));
    }
}
