//! Replies sent to clients.

use crate::errors::GatewayError;
use bytes::Bytes;

/// A single RESP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+<text>\r\n`
    Simple(String),
    /// `-<text>\r\n`
    Error(String),
    /// `$<len>\r\n<data>\r\n`
    Bulk(Bytes),
    /// `$-1\r\n`
    Null,
}

impl Reply {
    #[must_use]
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    #[must_use]
    pub fn pong() -> Self {
        Reply::Simple("PONG".to_string())
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl From<&GatewayError> for Reply {
    fn from(err: &GatewayError) -> Self {
        Reply::Error(err.client_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AuthError;

    #[test]
    fn test_from_gateway_error() {
        let reply = Reply::from(&GatewayError::Auth(AuthError::InvalidToken));
        assert_eq!(reply, Reply::Error("ERR invalid JWT: invalid JWT token".to_string()));
        assert!(reply.is_error());
        assert!(!Reply::ok().is_error());
    }
}
