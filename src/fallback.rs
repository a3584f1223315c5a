use std::fmt;

use tracing::info;

use crate::config::RedirectConfig;
use crate::dispatch::Outcome;
use crate::request::RequestContext;

/// Branch of the cascade that produced the final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    Www,
    Global,
    NotFound,
}

impl FallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackKind::Www => "www",
            FallbackKind::Global => "global",
            FallbackKind::NotFound => "404",
        }
    }
}

impl fmt::Display for FallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the cascade was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Neither the exact nor the wildcard record resolved.
    Unresolved,
    /// The record resolved but gave no target.
    EmptyTarget,
    /// A path record had no deeper match and no `root=`.
    PathExhausted,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Unresolved => f.write_str("unresolved"),
            FallbackReason::EmptyTarget => f.write_str("empty target"),
            FallbackReason::PathExhausted => f.write_str("path exhausted"),
        }
    }
}

/// Terminal-on-first-success degradation: `www.` prefix, then the global
/// redirect URL, then an empty 404.
pub fn cascade(
    request: &RequestContext,
    config: &RedirectConfig,
    reason: FallbackReason,
) -> (Outcome, FallbackKind) {
    let hostname = request.hostname();

    let (outcome, kind) = if config.is_enabled("www") {
        (
            Outcome::redirect(format!("{}://www.{}", request.scheme, request.host), 301),
            FallbackKind::Www,
        )
    } else if let Some(url) = &config.fallback_url {
        (Outcome::redirect(url.clone(), 302), FallbackKind::Global)
    } else {
        (Outcome::NotFound, FallbackKind::NotFound)
    };

    info!(host = %hostname, %reason, fallback = %kind, "Falling back");
    (outcome, kind)
}
