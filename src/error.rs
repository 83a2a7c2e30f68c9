//! Error handling for Redfire DTMF


pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("RTP error: {0}")]
    Rtp(String),

    #[error("DTMF error: {0}")]
    Dtmf(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    pub fn rtp<S: Into<String>>(msg: S) -> Self {
        Self::Rtp(msg.into())
    }

    pub fn dtmf<S: Into<String>>(msg: S) -> Self {
        Self::Dtmf(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<crate::protocols::dtmf::DtmfDecodeError> for Error {
    fn from(err: crate::protocols::dtmf::DtmfDecodeError) -> Self {
        Self::Dtmf(err.to_string())
    }
}
