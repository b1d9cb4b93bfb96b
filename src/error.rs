//! Error types.

/// Error type for contactmail.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Contactmail config is invalid: {0}")]
    Config(#[from] serini::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Required setting `{0}` is not set")]
    MissingSetting(&'static str),
    #[error("Setting `{name}` has unsupported value `{value}`")]
    InvalidSetting { name: &'static str, value: String },
    #[error("Cooldown store unavailable: {0}")]
    Store(#[from] redis::RedisError),
    #[error("Cooldown store lock poisoned")]
    StoreLock,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Mail provider answered {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("SMTP relay failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),
    #[error("Invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
}

impl Error {
    /// Whether retrying the same operation may succeed.
    ///
    /// Transport errors, throttling and server-side provider errors are transient,
    /// anything the provider rejected as a client error is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_builder() && !e.is_decode(),
            Error::Provider { status, .. } => *status == 429 || *status >= 500,
            Error::Smtp(e) => !e.is_permanent(),
            Error::Io(_) => true,
            _ => false,
        }
    }
}
