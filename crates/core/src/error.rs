/// Result alias that carries the custom [`ScopeError`] type.
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    /// The capture or playback endpoint could not be opened at all.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// The endpoint opened but refused the requested hardware parameters.
    #[error("audio configuration rejected: {0}")]
    ConfigurationRejected(String),
    /// A playback chunk transferred fewer frames than it asked for without
    /// the driver reporting an error.
    #[error(
        "short transfer at sample offset {offset}: {transferred} of {requested} frames"
    )]
    ShortTransfer {
        offset: usize,
        requested: usize,
        transferred: usize,
    },
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("spectral transform failed: {0}")]
    Fft(#[from] realfft::FftError),
}

impl ScopeError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Startup errors after which no audio session can exist.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable(_) | Self::ConfigurationRejected(_)
        )
    }
}

impl From<&str> for ScopeError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ScopeError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
