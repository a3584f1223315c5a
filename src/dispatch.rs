use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::config::RedirectConfig;
use crate::error::{RedirectError, Result};
use crate::fallback::FallbackReason;
use crate::path::{PathMatch, PathWalker};
use crate::record::{Record, RecordType};
use crate::request::RequestContext;
use crate::resolver::RecordResolver;

pub const REGISTRY_API_HEADER: &str = "Docker-Distribution-API-Version";
pub const REGISTRY_API_VERSION: &str = "registry/2.0";
const REGISTRY_CLIENT_AGENT: &str = "Docker-Client";
const DEFAULT_VCS: &str = "git";

/// What the host server should do with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Redirect {
        location: String,
        status: u16,
        headers: Vec<(&'static str, String)>,
    },
    /// 200 with an HTML body.
    Document { body: String },
    /// 404, empty body.
    NotFound,
    /// The record's type is disabled; hand the request to the next handler.
    PassThrough,
}

impl Outcome {
    pub fn redirect(location: String, status: u16) -> Self {
        Outcome::Redirect {
            location,
            status,
            headers: Vec::new(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Outcome::Redirect { status, .. } => Some(*status),
            Outcome::Document { .. } => Some(200),
            Outcome::NotFound => Some(404),
            Outcome::PassThrough => None,
        }
    }
}

/// Result of dispatching one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Done(Outcome),
    Fallback(FallbackReason),
}

/// Routes a parsed record to the handler for its type.
pub struct TypeDispatcher<'a> {
    resolver: &'a RecordResolver,
    config: &'a RedirectConfig,
}

impl<'a> TypeDispatcher<'a> {
    pub fn new(resolver: &'a RecordResolver, config: &'a RedirectConfig) -> Self {
        Self { resolver, config }
    }

    pub async fn dispatch(
        &self,
        record: &Record,
        request: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<(Dispatch, Option<PathMatch>)> {
        match record.record_type {
            RecordType::Path => self.path(record, request, cancel).await,
            _ => Ok((dispatch_record(record, request, &request.hostname())?, None)),
        }
    }

    async fn path(
        &self,
        record: &Record,
        request: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<(Dispatch, Option<PathMatch>)> {
        let host = request.hostname();
        let walker = PathWalker::new(self.resolver, self.config);

        if let Some(found) = walker.walk(&host, request, cancel).await? {
            let import_prefix = format!("{host}{}", found.prefix);
            let dispatch = match found.record.record_type {
                // nested path records act as plain hosts; the walk already went deep
                RecordType::Path => host_target(&found.record)?,
                _ => dispatch_record(&found.record, request, &import_prefix)?,
            };
            return Ok((dispatch, Some(found)));
        }

        if !record.root.is_empty() {
            debug!(host = %host, root = %record.root, "No path record matched; using root");
            let root = validate_destination(&record.root)?;
            return Ok((Dispatch::Done(Outcome::redirect(root, record.code)), None));
        }

        Ok((Dispatch::Fallback(FallbackReason::PathExhausted), None))
    }
}

/// Dispatch for every type that needs no further lookups.
pub fn dispatch_record(
    record: &Record,
    request: &RequestContext,
    import_prefix: &str,
) -> Result<Dispatch> {
    match record.record_type {
        RecordType::Host | RecordType::Path => host_target(record),
        RecordType::Gometa => gometa(record, request, import_prefix),
        RecordType::Dockerv2 => dockerv2(record, request),
    }
}

/// Redirect to `to=` with the record's status.
pub fn host_target(record: &Record) -> Result<Dispatch> {
    if record.to.is_empty() {
        return Ok(Dispatch::Fallback(FallbackReason::EmptyTarget));
    }
    let location = validate_destination(&record.to)?;
    Ok(Dispatch::Done(Outcome::redirect(location, record.code)))
}

/// `?go-get=1` gets the go-import document, everything else a host redirect.
pub fn gometa(record: &Record, request: &RequestContext, import_prefix: &str) -> Result<Dispatch> {
    if !request.query_has("go-get", "1") {
        return host_target(record);
    }
    if record.to.is_empty() {
        return Ok(Dispatch::Fallback(FallbackReason::EmptyTarget));
    }
    let repo = validate_destination(&record.to)?;
    let vcs = if record.vcs.is_empty() {
        DEFAULT_VCS
    } else {
        record.vcs.as_str()
    };
    let website = if record.website.is_empty() {
        None
    } else {
        Some(validate_destination(&record.website)?)
    };
    Ok(Dispatch::Done(Outcome::Document {
        body: render_gometa(import_prefix, vcs, &repo, website.as_deref()),
    }))
}

/// Registry clients are sent to `to=` plus the request path with the API
/// version header; browsers get the host behaviour.
pub fn dockerv2(record: &Record, request: &RequestContext) -> Result<Dispatch> {
    let target = validate_destination(&record.to)?;
    if !request.user_agent().starts_with(REGISTRY_CLIENT_AGENT) {
        return host_target(record);
    }

    let location = if request.path.is_empty() || request.path == "/" {
        target
    } else {
        format!("{}{}", target.trim_end_matches('/'), request.path)
    };
    Ok(Dispatch::Done(Outcome::Redirect {
        location,
        status: 302,
        headers: vec![(REGISTRY_API_HEADER, REGISTRY_API_VERSION.to_string())],
    }))
}

/// ASCII targets are kept as written; anything else is emitted in serialized
/// form (punycode host, percent-encoded path) so it fits in a header.
fn validate_destination(target: &str) -> Result<String> {
    let url = Url::parse(target).map_err(|err| RedirectError::InvalidDestination {
        target: target.to_string(),
        reason: err.to_string(),
    })?;
    if target.is_ascii() {
        Ok(target.to_string())
    } else {
        Ok(url.into())
    }
}

fn render_gometa(import_prefix: &str, vcs: &str, repo: &str, website: Option<&str>) -> String {
    let prefix = escape_attr(import_prefix);
    let mut body = String::from("<!DOCTYPE html>\n<html>\n<head>\n");
    body.push_str(&format!(
        "<meta name=\"go-import\" content=\"{prefix} {} {}\">\n",
        escape_attr(vcs),
        escape_attr(repo)
    ));
    if let Some(website) = website {
        body.push_str(&format!(
            "<meta name=\"go-source\" content=\"{prefix} {}\">\n",
            escape_attr(website)
        ));
    }
    body.push_str("</head>\n</html>\n");
    body
}

fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
