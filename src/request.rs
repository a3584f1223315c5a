use axum::http::{HeaderMap, Method, header};

/// Request attributes the engine reads; built fresh for every inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub scheme: String,
    /// Host as sent by the client, port included when present.
    pub host: String,
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
}

impl RequestContext {
    pub fn new(method: Method, scheme: &str, host: &str, path: &str) -> Self {
        Self {
            method,
            scheme: scheme.to_string(),
            host: host.to_string(),
            path: if path.is_empty() {
                "/".into()
            } else {
                path.to_string()
            },
            query: None,
            headers: HeaderMap::new(),
        }
    }

    /// Build a context from an absolute URL, handy for tests and tooling.
    pub fn from_url(method: Method, raw: &str) -> Option<Self> {
        let (scheme, rest) = raw.split_once("://")?;
        let (authority, tail) = match rest.find(['/', '?']) {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let (path, query) = match tail.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (tail, None),
        };
        let mut context = Self::new(method, scheme, authority, path);
        context.query = query;
        Some(context)
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn with_header(mut self, name: header::HeaderName, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers.insert(name, value);
        }
        self
    }

    /// Host without any `:port` suffix, lowercased.
    pub fn hostname(&self) -> String {
        strip_port(&self.host).to_ascii_lowercase()
    }

    /// Path plus `?query` when a query is present.
    pub fn uri(&self) -> String {
        match &self.query {
            Some(query) if !query.is_empty() => format!("{}?{}", self.path, query),
            _ => self.path.clone(),
        }
    }

    /// True when `key=value` appears among the query parameters.
    pub fn query_has(&self, key: &str, value: &str) -> bool {
        self.query
            .as_deref()
            .unwrap_or("")
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .any(|(k, v)| k == key && v == value)
    }

    pub fn user_agent(&self) -> &str {
        self.headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
    }
}

/// Drop a trailing `:port`, leaving bracketed or bare IPv6 literals intact.
pub(crate) fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &rest[..end],
            None => rest,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}
