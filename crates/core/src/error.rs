/// Result alias that carries the custom [`RadioError`] type.
pub type Result<T> = std::result::Result<T, RadioError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    /// The route or tuning configuration has the wrong shape. Only raised while
    /// loading; a radio never starts from a configuration that failed here.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// The mapper was asked about a position outside of the cycle.
    #[error("position {position} is outside of the cycle [0, {total})")]
    PositionOutOfRange { position: f64, total: f64 },
    /// An audio or visual asset could not be loaded.
    #[error("failed to load `{url}`: {reason}")]
    ResourceLoad { url: String, reason: String },
    /// A command was issued before the listener began the session.
    #[error("session has not been started")]
    SessionNotStarted,
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Route and tuning files are JSON.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl RadioError {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn load(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceLoad {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_names_the_resource() {
        let err = RadioError::load("coast-1.mp3", "decoder rejected header");
        assert_eq!(
            err.to_string(),
            "failed to load `coast-1.mp3`: decoder rejected header"
        );
    }

    #[test]
    fn io_errors_convert_with_question_mark() {
        fn read() -> Result<String> {
            Ok(std::fs::read_to_string("/nonexistent/route.json")?)
        }
        assert!(matches!(read(), Err(RadioError::Io(_))));
    }
}
