/// Typed failures for the token verification pipeline.
/// Everything except a missing token collapses into the same generic
/// client-facing rejection; the detail stays in server logs.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    // Request shape
    #[error("no token supplied")]
    MissingToken,
    #[error("malformed token: {reason}")]
    Malformed { reason: String },

    // Key resolution
    #[error("key resolution failed: {reason}")]
    KeyResolution { reason: String },

    // Verification
    #[error("token expired")]
    Expired,
    #[error("signature verification failed: {reason}")]
    Signature { reason: String },

    // Setup
    #[error("failed to build HTTP client: {reason}")]
    ClientBuild { reason: String },
}

impl AuthError {
    /// WebSocket close code reported to the client.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::MissingToken => 4001,
            _ => 4003,
        }
    }

    /// Close reason reported to the client. Never carries internals.
    pub fn close_reason(&self) -> &'static str {
        match self {
            Self::MissingToken => "Missing token",
            _ => "Invalid token",
        }
    }

    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::Malformed { .. } => "malformed",
            Self::KeyResolution { .. } => "key_resolution",
            Self::Expired => "expired",
            Self::Signature { .. } => "signature",
            Self::ClientBuild { .. } => "client_build",
        }
    }
}
