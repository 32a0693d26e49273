//! Error types for the Sluice gateway

use http::StatusCode;

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error used for body streams and client failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for the Sluice gateway
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No route matched the request
    #[error("route not found: {0}")]
    RouteNotFound(String),

    /// A filter failed during pre-processing
    #[error("pre-process of filter '{filter}' failed: {source}")]
    PreFilter {
        /// Filter name
        filter: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// A filter failed during post-processing
    #[error("post-process of filter '{filter}' failed: {source}")]
    PostFilter {
        /// Filter name
        filter: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Failure annotated with the route it happened on
    #[error("route '{route}': {source}")]
    Route {
        /// Route ID
        route: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Rate limiter denied the request
    #[error("rate limit exceeded (remaining tokens: {remaining})")]
    RateLimitExceeded {
        /// Whole tokens left in the bucket
        remaining: u64,
    },

    /// The per-request deadline expired
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The request was cancelled (client went away or server shutdown)
    #[error("request canceled")]
    Canceled,

    /// Circuit breaker is open
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    /// Circuit breaker is half-open and probe capacity is used up
    #[error("circuit breaker '{0}' is half-open and has too many requests")]
    HalfOpenRequestExceeded(String),

    /// Backend call failed
    #[error("backend request failed: {0}")]
    Upstream(String),

    /// Backend answered with a server error (only used for breaker accounting)
    #[error("backend responded with {0}")]
    UpstreamStatus(StatusCode),

    /// A builder argument is missing
    #[error("missing argument '{name}'")]
    MissingArgument {
        /// Argument name
        name: String,
    },

    /// A builder argument has the wrong type or an invalid value
    #[error("invalid argument '{name}': expected {expected}")]
    InvalidArgument {
        /// Argument name
        name: String,
        /// Description of the expected value
        expected: String,
    },

    /// No builder is registered under the requested name
    #[error("{kind} '{name}' not found")]
    UnknownBuilder {
        /// Registry kind ("predicate", "filter", ...)
        kind: &'static str,
        /// Requested name
        name: String,
    },

    /// Invalid inbound request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Request/response body failure
    #[error("body error: {0}")]
    Body(String),

    /// Hyper error
    #[error("HTTP error: {0}")]
    Hyper(#[from] hyper::Error),

    /// HTTP builder error
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not happen in production)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Classification used by the error mapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No route matched
    RouteNotFound,
    /// Rate limit denied the request
    RateLimitExceeded,
    /// Deadline expired or request cancelled
    DeadlineExceeded,
    /// Circuit breaker rejected the call
    CircuitBreaker,
    /// Backend failure
    Http,
    /// Anything else
    Unexpected,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::RouteNotFound => "route-not-found",
            ErrorKind::RateLimitExceeded => "rate-limit-exceeded",
            ErrorKind::DeadlineExceeded => "deadline-exceeded",
            ErrorKind::CircuitBreaker => "circuit-breaker",
            ErrorKind::Http => "http",
            ErrorKind::Unexpected => "unexpected",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Innermost error, skipping filter and route annotations
    pub fn root(&self) -> &Error {
        match self {
            Error::PreFilter { source, .. }
            | Error::PostFilter { source, .. }
            | Error::Route { source, .. } => source.root(),
            other => other,
        }
    }

    /// Kind of the innermost error
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Error::RouteNotFound(_) => ErrorKind::RouteNotFound,
            Error::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Error::DeadlineExceeded | Error::Canceled => ErrorKind::DeadlineExceeded,
            Error::CircuitOpen(_) | Error::HalfOpenRequestExceeded(_) => {
                ErrorKind::CircuitBreaker
            }
            Error::Upstream(_) | Error::UpstreamStatus(_) => ErrorKind::Http,
            _ => ErrorKind::Unexpected,
        }
    }

    /// Convert error to HTTP status code
    pub fn to_status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::RouteNotFound => StatusCode::NOT_FOUND,
            ErrorKind::DeadlineExceeded | ErrorKind::Http => StatusCode::BAD_GATEWAY,
            ErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::CircuitBreaker => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Annotate with the name of a failing pre-process filter
    pub fn pre_filter(filter: impl Into<String>, source: Error) -> Self {
        Error::PreFilter {
            filter: filter.into(),
            source: Box::new(source),
        }
    }

    /// Annotate with the name of a failing post-process filter
    pub fn post_filter(filter: impl Into<String>, source: Error) -> Self {
        Error::PostFilter {
            filter: filter.into(),
            source: Box::new(source),
        }
    }

    /// Annotate with the route ID
    pub fn route(route: impl Into<String>, source: Error) -> Self {
        Error::Route {
            route: route.into(),
            source: Box::new(source),
        }
    }

    /// Create a missing-argument error
    pub fn missing(name: impl Into<String>) -> Self {
        Error::MissingArgument { name: name.into() }
    }

    /// Create an invalid-argument error
    pub fn invalid(name: impl Into<String>, expected: impl Into<String>) -> Self {
        Error::InvalidArgument {
            name: name.into(),
            expected: expected.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            Error::RouteNotFound("/test".to_string()).to_status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::DeadlineExceeded.to_status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::Upstream("connection refused".to_string()).to_status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::RateLimitExceeded { remaining: 0 }.to_status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Error::CircuitOpen("backend".to_string()).to_status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Internal("boom".to_string()).to_status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_kind_pierces_annotations() {
        let err = Error::route(
            "users",
            Error::pre_filter("RateLimit", Error::RateLimitExceeded { remaining: 0 }),
        );
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert_eq!(err.to_status_code(), StatusCode::TOO_MANY_REQUESTS);

        let message = err.to_string();
        assert!(message.contains("users"));
        assert!(message.contains("RateLimit"));
    }

    #[test]
    fn test_canceled_is_deadline_kind() {
        assert_eq!(Error::Canceled.kind(), ErrorKind::DeadlineExceeded);
        assert_eq!(ErrorKind::DeadlineExceeded.to_string(), "deadline-exceeded");
    }
}
