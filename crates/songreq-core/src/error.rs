//! Error types shared by the request pipeline and its collaborators.

use thiserror::Error;

use crate::token::Provider;

/// Credential exchange against an identity provider failed.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{provider} token endpoint returned {status}: {body}")]
    Rejected {
        provider: Provider,
        status: u16,
        body: String,
    },

    #[error("{provider} token response carried no access token")]
    MissingAccessToken { provider: Provider },

    #[error("{provider} token response was malformed: {source}")]
    Malformed {
        provider: Provider,
        #[source]
        source: serde_json::Error,
    },

    #[error("{provider} token request failed: {source}")]
    Transport {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },
}

/// A downstream HTTP call failed or returned data we could not use.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("{endpoint} returned malformed data: {source}")]
    Malformed {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{endpoint} request failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl UpstreamError {
    /// True for 401/403 answers, after which the bearer token must be dropped.
    pub fn is_auth(&self) -> bool {
        matches!(self, UpstreamError::Status { status: 401 | 403, .. })
    }
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("no catalog item matched {query:?}")]
    NotFound { query: String },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Chat transport failures, both for the session and for outbound posts.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("chat I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chat server rejected the session: {0}")]
    Rejected(String),

    #[error("chat handshake timed out")]
    Timeout,

    #[error("chat connection closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

/// Why a pipeline run ended in `Failed`.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("no catalog item matched {query:?}")]
    NotFound { query: String },
}

impl From<CatalogError> for RequestError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound { query } => RequestError::NotFound { query },
            CatalogError::Upstream(e) => RequestError::Upstream(e),
        }
    }
}

/// Short classification used in log fields and test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    Upstream,
    NotFound,
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RequestError::Auth(_) => ErrorKind::Auth,
            RequestError::Upstream(_) => ErrorKind::Upstream,
            RequestError::NotFound { .. } => ErrorKind::NotFound,
        }
    }
}
