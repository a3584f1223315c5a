use axum::http::StatusCode;
use thiserror::Error;

/// Failures surfaced while turning a request into a redirect decision.
#[derive(Debug, Error)]
pub enum RedirectError {
    /// A single TXT lookup failed or returned nothing usable.
    #[error("TXT lookup for {name} failed: {reason}")]
    Lookup { name: String, reason: String },

    /// Both the exact and the wildcard lookup failed.
    #[error("no redirect record found for {host}")]
    Resolution { host: String },

    #[error("could not parse TXT record with {0} records")]
    AmbiguousRecord(usize),

    #[error("invalid record: {0}")]
    Grammar(String),

    #[error("TXT record cannot exceed the maximum of {limit} characters")]
    LengthExceeded { limit: usize },

    #[error("{0} type is not enabled in configuration")]
    TypeDisabled(String),

    #[error("invalid destination {target}: {reason}")]
    InvalidDestination { target: String, reason: String },

    #[error("placeholder {token} cannot be resolved: {reason}")]
    Placeholder { token: String, reason: String },

    #[error("request canceled while resolving {name}")]
    Canceled { name: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RedirectError {
    /// Soft conditions hand the request to the next handler instead of failing it.
    pub fn is_soft(&self) -> bool {
        matches!(self, RedirectError::TypeDisabled(_))
    }

    /// Whether the cascade may absorb this failure.
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            RedirectError::Lookup { .. } | RedirectError::Resolution { .. }
        )
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, RedirectError::Canceled { .. })
    }

    /// Status the HTTP boundary answers with when this error escapes the engine.
    pub fn status(&self) -> StatusCode {
        match self {
            RedirectError::Canceled { .. } => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T, E = RedirectError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canceled_maps_to_client_closed_status() {
        let err = RedirectError::Canceled {
            name: "_redirect.example.test.".into(),
        };
        assert!(err.is_canceled());
        assert_eq!(err.status().as_u16(), 499);
    }

    #[test]
    fn only_type_disabled_is_soft() {
        assert!(RedirectError::TypeDisabled("path".into()).is_soft());
        assert!(!RedirectError::Grammar("arbitrary data not allowed".into()).is_soft());
        assert_eq!(
            RedirectError::AmbiguousRecord(2).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn resolution_failures_feed_the_cascade() {
        assert!(
            RedirectError::Resolution {
                host: "example.test".into()
            }
            .is_fallback()
        );
        assert!(!RedirectError::AmbiguousRecord(3).is_fallback());
    }
}
