/// Core error type for the service.
///
/// Adapter crates map their library-specific errors into this type so the
/// HTTP layer can translate failures into the right response class
/// (client-correctable vs retryable vs opaque).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or incomplete request data, including credential
    /// normalization failures. Maps to 422.
    #[error("validation error: {0}")]
    Validation(String),

    /// The stored session cannot be used (unauthorized, revoked, or the
    /// credential is unusable at the session layer). The caller can fix
    /// this with a new session. Maps to 400.
    #[error("session invalid: {0}")]
    SessionInvalid(String),

    /// The network could not be reached through the configured proxy, or
    /// the operation timed out. Retryable by the caller. Maps to 502.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// The account still has no public handle after one was submitted.
    #[error("username could not be assigned")]
    IdentityAssignment,

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
