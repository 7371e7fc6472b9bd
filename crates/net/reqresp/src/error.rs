//! Error types for req/resp calls.

use crate::Method;

/// Response code of a req/resp error chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    InvalidRequest,
    ServerError,
    ResourceUnavailable,
    Unknown(u8),
}

impl From<u8> for ResponseCode {
    fn from(code: u8) -> Self {
        match code {
            1 => Self::InvalidRequest,
            2 => Self::ServerError,
            3 => Self::ResourceUnavailable,
            other => Self::Unknown(other),
        }
    }
}

impl ResponseCode {
    pub const fn code(&self) -> u8 {
        match self {
            Self::InvalidRequest => 1,
            Self::ServerError => 2,
            Self::ResourceUnavailable => 3,
            Self::Unknown(code) => *code,
        }
    }
}

/// Failure reported by the transport for a single request.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The connection closed before or during the request.
    #[error("peer disconnected")]
    Disconnected,

    /// Stream-level I/O failure.
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    /// The response could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),

    /// The peer answered with an error chunk.
    #[error("error response {code:?}: {message}")]
    ErrorResponse { code: ResponseCode, message: String },
}

/// Error returned by [`ReqRespClient`](crate::ReqRespClient) calls.
#[derive(Debug, thiserror::Error)]
pub enum ReqRespError {
    /// The call did not complete before its deadline.
    #[error("{method} request timed out")]
    Timeout { method: Method },

    /// The transport failed the call.
    #[error("{method} request failed: {source}")]
    Rpc {
        method: Method,
        #[source]
        source: RpcError,
    },
}

impl ReqRespError {
    /// Method the failed call was made for.
    pub const fn method(&self) -> Method {
        match self {
            Self::Timeout { method } | Self::Rpc { method, .. } => *method,
        }
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
