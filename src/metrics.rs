use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

const NAMESPACE: &str = "txtredirect";

/// Where redirect counters go. Implementations must never block or fail a request.
pub trait MetricsSink: Send + Sync {
    /// A 301/302 was served for `host`.
    fn redirect(&self, host: &str);
    fn status(&self, host: &str, status: u16);
    fn record_type(&self, host: &str, record_type: &str);
    fn fallback(&self, host: &str, record_type: &str, kind: &str);
    fn path(&self, host: &str, path: &str);
}

/// Sink used when metrics are switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn redirect(&self, _host: &str) {}
    fn status(&self, _host: &str, _status: u16) {}
    fn record_type(&self, _host: &str, _record_type: &str) {}
    fn fallback(&self, _host: &str, _record_type: &str, _kind: &str) {}
    fn path(&self, _host: &str, _path: &str) {}
}

/// Prometheus counters kept in a private registry.
pub struct PrometheusMetrics {
    registry: Registry,
    redirects_total: IntCounterVec,
    status_total: IntCounterVec,
    type_total: IntCounterVec,
    fallback_total: IntCounterVec,
    path_total: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let counter = |name: &str,
                       help: &str,
                       labels: &[&str]|
         -> Result<IntCounterVec, prometheus::Error> {
            IntCounterVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)
        };

        let redirects_total = counter("redirect_count_total", "Total requests per host", &["host"])?;
        let status_total = counter(
            "redirect_status_count_total",
            "Total returned statuses per host",
            &["host", "status"],
        )?;
        let type_total = counter(
            "redirect_type_count_total",
            "Total requests for each host based on type",
            &["host", "type"],
        )?;
        let fallback_total = counter(
            "fallback_type_count_total",
            "Total fallbacks triggered for each type",
            &["host", "type", "fallback"],
        )?;
        let path_total = counter(
            "redirect_path_count_total",
            "Total redirects per path for each host",
            &["host", "path"],
        )?;

        registry.register(Box::new(redirects_total.clone()))?;
        registry.register(Box::new(status_total.clone()))?;
        registry.register(Box::new(type_total.clone()))?;
        registry.register(Box::new(fallback_total.clone()))?;
        registry.register(Box::new(path_total.clone()))?;

        Ok(Self {
            registry,
            redirects_total,
            status_total,
            type_total,
            fallback_total,
            path_total,
        })
    }

    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl MetricsSink for PrometheusMetrics {
    fn redirect(&self, host: &str) {
        self.redirects_total.with_label_values(&[host]).inc();
    }

    fn status(&self, host: &str, status: u16) {
        let status = status.to_string();
        self.status_total
            .with_label_values(&[host, status.as_str()])
            .inc();
    }

    fn record_type(&self, host: &str, record_type: &str) {
        self.type_total.with_label_values(&[host, record_type]).inc();
    }

    fn fallback(&self, host: &str, record_type: &str, kind: &str) {
        self.fallback_total
            .with_label_values(&[host, record_type, kind])
            .inc();
    }

    fn path(&self, host: &str, path: &str) {
        self.path_total.with_label_values(&[host, path]).inc();
    }
}
