use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{MetricsSection, RuntimeConfig};
use crate::dispatch::Outcome;
use crate::engine::Engine;
use crate::error::RedirectError;
use crate::metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
use crate::request::RequestContext;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Shared state for the redirect middleware.
#[derive(Clone)]
pub struct RedirectState {
    engine: Engine,
    server_header: HeaderValue,
}

impl RedirectState {
    pub fn new(engine: Engine, server_header: &str) -> Result<Self> {
        let server_header = HeaderValue::from_str(server_header)
            .with_context(|| format!("Invalid Server header value: {server_header}"))?;
        Ok(Self {
            engine,
            server_header,
        })
    }

    fn render(&self, outcome: Outcome) -> Response {
        let mut response = match outcome {
            Outcome::Redirect {
                location,
                status,
                headers,
            } => match redirect_response(&location, status, &headers) {
                Ok(response) => response,
                Err(err) => {
                    error!(location = %location, error = %err, "Failed to build redirect response");
                    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
                }
            },
            Outcome::Document { body } => {
                let mut response = Response::new(Body::from(body));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(HTML_CONTENT_TYPE),
                );
                response
            }
            Outcome::NotFound | Outcome::PassThrough => {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::NOT_FOUND;
                response
            }
        };
        response
            .headers_mut()
            .insert(header::SERVER, self.server_header.clone());
        response
    }
}

fn redirect_response(
    location: &str,
    status: u16,
    extra: &[(&'static str, String)],
) -> Result<Response> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() =
        StatusCode::from_u16(status).with_context(|| format!("Invalid status code {status}"))?;
    response.headers_mut().insert(
        header::LOCATION,
        HeaderValue::from_str(location).context("Location is not a valid header value")?,
    );
    for (name, value) in extra {
        response.headers_mut().insert(
            HeaderName::from_bytes(name.as_bytes()).context("Invalid auxiliary header name")?,
            HeaderValue::from_str(value).context("Invalid auxiliary header value")?,
        );
    }
    Ok(response)
}

fn error_response(err: &RedirectError) -> Response {
    (err.status(), err.to_string()).into_response()
}

/// Middleware that answers from `_redirect` records, or hands the request on
/// when the record's type is disabled.
pub async fn redirect_middleware(
    State(state): State<Arc<RedirectState>>,
    request: Request,
    next: Next,
) -> Response {
    let context = request_context(&request);
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    match state.engine.handle(&context, &cancel).await {
        Ok(Outcome::PassThrough) => next.run(request).await,
        Ok(outcome) => state.render(outcome),
        Err(err) => {
            error!(host = %context.host, path = %context.path, error = %err, "Redirect failed");
            let mut response = error_response(&err);
            response
                .headers_mut()
                .insert(header::SERVER, state.server_header.clone());
            response
        }
    }
}

fn request_context(request: &Request) -> RequestContext {
    let uri = request.uri();
    let headers = request.headers();
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|authority| authority.to_string()))
        .unwrap_or_default();
    let scheme = forwarded_scheme(headers)
        .or_else(|| uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".into());

    let mut context = RequestContext::new(request.method().clone(), &scheme, &host, uri.path());
    context.query = uri.query().map(str::to_string);
    context.headers = headers.clone();
    context
}

fn forwarded_scheme(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
}

async fn next_handler() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

/// Router with the redirect middleware in front of a plain 404 handler.
pub fn router(state: Arc<RedirectState>) -> Router {
    Router::new()
        .fallback(next_handler)
        .layer(middleware::from_fn_with_state(state, redirect_middleware))
}

/// Serve redirects (and metrics when enabled) until ctrl-c.
pub async fn run(runtime: RuntimeConfig) -> Result<()> {
    let config = runtime.redirect_config()?;
    let exporter = if config.metrics_enabled {
        Some(Arc::new(
            PrometheusMetrics::new().context("Failed to initialise redirect metrics")?,
        ))
    } else {
        None
    };
    let sink: Arc<dyn MetricsSink> = match &exporter {
        Some(metrics) => metrics.clone() as Arc<dyn MetricsSink>,
        None => Arc::new(NoopMetrics),
    };

    if let Some(resolver) = config.resolver {
        info!(resolver = %resolver, "Using custom DNS resolver");
    }
    let engine = Engine::with_dns(config, sink)?;
    let state = Arc::new(RedirectState::new(engine, &runtime.server.server_header)?);

    let listener = TcpListener::bind(&runtime.server.listen)
        .await
        .with_context(|| format!("Failed to bind listener at {}", runtime.server.listen))?;
    info!(listener = %runtime.server.listen, "Starting txtredirect server");

    let server = axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    if let Some(metrics) = exporter {
        tokio::try_join!(
            async {
                server
                    .await
                    .context("txtredirect server terminated unexpectedly")
            },
            run_metrics_server(&runtime.metrics, metrics),
        )?;
    } else {
        server
            .await
            .context("txtredirect server terminated unexpectedly")?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received; stopping txtredirect");
}

async fn run_metrics_server(section: &MetricsSection, metrics: Arc<PrometheusMetrics>) -> Result<()> {
    let listener = TcpListener::bind(&section.address)
        .await
        .with_context(|| format!("Failed to bind metrics listener at {}", section.address))?;

    let path = section.normalised_path();
    info!(listener = %section.address, path = %path, "Starting metrics server");

    let app = Router::new()
        .route(&path, get(metrics_handler))
        .with_state(metrics);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Metrics server terminated unexpectedly")
}

async fn metrics_handler(State(metrics): State<Arc<PrometheusMetrics>>) -> Response {
    match metrics.render() {
        Ok(buffer) => {
            let mut response = Response::new(Body::from(buffer));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
            );
            response
        }
        Err(err) => {
            error!(error = %err, "Failed to render redirect metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedirectConfig;
    use crate::resolver::StaticLookup;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(enabled: &[&str]) -> Router {
        let lookup = StaticLookup::new()
            .with_record("_redirect.host.e2e.test.", "v=txtv0;to=https://plain.host.test;code=301")
            .with_record("_redirect.pkg.example.test.", "to=https://github.com/example/pkg;type=gometa")
            .with_record("_redirect.paths.example.test.", "type=path;root=https://root.test")
            .with_record("_redirect.registry.example.test.", "to=https://gcr.io/;type=dockerv2")
            .with_record("_redirect.bad.example.test.", "to=https://x.test;oops");
        let config = RedirectConfig::default().with_enabled(enabled.iter().copied());
        let engine = Engine::new(config, Arc::new(lookup), Arc::new(NoopMetrics));
        router(Arc::new(
            RedirectState::new(engine, "txtredirect").expect("state"),
        ))
    }

    fn request(host: &str, uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .uri(uri)
            .header(header::HOST, host)
            .header(FORWARDED_PROTO, "https")
            .body(Body::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn redirect_sets_location_and_server() {
        let response = app(&["host"])
            .oneshot(request("host.e2e.test", "/"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "https://plain.host.test");
        assert_eq!(response.headers()[header::SERVER], "txtredirect");
    }

    #[tokio::test]
    async fn gometa_document_is_html() {
        let response = app(&["gometa"])
            .oneshot(request("pkg.example.test", "/?go-get=1"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], HTML_CONTENT_TYPE);
        let body = response.into_body().collect().await.expect("body").to_bytes();
        let body = String::from_utf8(body.to_vec()).expect("utf8");
        assert!(body.contains("pkg.example.test git https://github.com/example/pkg"));
    }

    #[tokio::test]
    async fn registry_client_gets_api_version_header() {
        let mut req = request("registry.example.test", "/v2/");
        req.headers_mut().insert(
            header::USER_AGENT,
            HeaderValue::from_static("Docker-Client/24.0.7 (linux)"),
        );
        let response = app(&["dockerv2"]).oneshot(req).await.expect("response");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "https://gcr.io/v2/");
        assert_eq!(
            response.headers()["docker-distribution-api-version"],
            "registry/2.0"
        );

        let response = app(&["dockerv2"])
            .oneshot(request("registry.example.test", "/v2/"))
            .await
            .expect("response");
        assert!(response.headers().get("docker-distribution-api-version").is_none());
    }

    #[tokio::test]
    async fn disabled_type_reaches_next_handler() {
        let response = app(&["host"])
            .oneshot(request("paths.example.test", "/"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(header::SERVER).is_none());
        let body = response.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(&body[..], b"not found");
    }

    #[tokio::test]
    async fn not_found_has_empty_body() {
        let response = app(&["host"])
            .oneshot(request("192.168.1.1:8080", "/"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.expect("body").to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn hard_errors_become_500() {
        let response = app(&["host"])
            .oneshot(request("bad.example.test", "/"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn forwarded_proto_picks_first_value() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_PROTO, HeaderValue::from_static("HTTPS, http"));
        assert_eq!(forwarded_scheme(&headers).as_deref(), Some("https"));
        assert!(forwarded_scheme(&HeaderMap::new()).is_none());
    }
}
