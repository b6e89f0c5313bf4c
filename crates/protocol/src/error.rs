pub type Result<T> = std::result::Result<T, Error>;

/// Typed protocol-side failures. The sender worker keys its retry
/// decision off [`Error::is_permanent`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The recipient identifier could not be normalized to a JID.
    #[error("invalid recipient {input:?}: {reason}")]
    InvalidRecipient { input: String, reason: String },

    /// The socket is not connected (yet, or anymore).
    #[error("socket not connected")]
    NotConnected,

    /// The client rejected the payload outright; retrying cannot help.
    #[error("send rejected: {reason}")]
    SendRejected { reason: String },

    /// Transient transport failure; safe to retry.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// The operation did not complete within its deadline.
    #[error("protocol operation timed out")]
    Timeout,
}

impl Error {
    #[must_use]
    pub fn invalid_recipient(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRecipient {
            input: input.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn rejected(reason: impl std::fmt::Display) -> Self {
        Self::SendRejected {
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn transport(reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same operation can ever succeed.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::InvalidRecipient { .. } | Self::SendRejected { .. })
    }
}
