use std::sync::Arc;

use anyhow::Result as AnyResult;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RedirectConfig;
use crate::dispatch::{Dispatch, Outcome, TypeDispatcher};
use crate::error::Result;
use crate::fallback::{self, FallbackReason};
use crate::guard;
use crate::metrics::MetricsSink;
use crate::record::Record;
use crate::request::RequestContext;
use crate::resolver::{HickoryLookup, RecordResolver, TxtLookup};

/// Label used in metrics when no record was resolved.
const UNRESOLVED_TYPE: &str = "none";
/// Host label for requests that never resolved, so arbitrary Host headers
/// cannot grow the metric label sets.
const UNRESOLVED_HOST: &str = "unresolved";

/// Per-request orchestration: guard, resolve, parse, dispatch, fall back.
#[derive(Clone)]
pub struct Engine {
    config: Arc<RedirectConfig>,
    resolver: RecordResolver,
    metrics: Arc<dyn MetricsSink>,
}

impl Engine {
    pub fn new(
        config: RedirectConfig,
        lookup: Arc<dyn TxtLookup>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let resolver = RecordResolver::new(lookup, config.lookup_timeout);
        Self {
            config: Arc::new(config),
            resolver,
            metrics,
        }
    }

    /// Engine backed by real DNS, honouring the resolver override.
    pub fn with_dns(config: RedirectConfig, metrics: Arc<dyn MetricsSink>) -> AnyResult<Self> {
        let lookup = HickoryLookup::from_config(&config)?;
        Ok(Self::new(config, Arc::new(lookup), metrics))
    }

    pub fn config(&self) -> &RedirectConfig {
        &self.config
    }

    /// Decide what to answer for `request`.
    ///
    /// Errors are hard failures for the host to turn into a 500 (or 499 when
    /// `cancel` fired); everything recoverable ends in an [`Outcome`]. Every
    /// lookup made for the request shares one `lookup_timeout` deadline.
    pub async fn handle(
        &self,
        request: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        if guard::is_ip_literal(&request.host) {
            debug!(host = %request.host, "IP literal host; skipping lookup");
            return Ok(self.finish(UNRESOLVED_HOST, Outcome::NotFound));
        }
        let host = request.hostname();
        if host.is_empty() {
            debug!("Request without a host; skipping lookup");
            return Ok(self.finish(UNRESOLVED_HOST, Outcome::NotFound));
        }
        if self.config.is_blacklisted(&request.path) {
            debug!(path = %request.path, "Blacklisted path");
            return Ok(self.finish(UNRESOLVED_HOST, Outcome::NotFound));
        }

        let resolver = self.resolver.scoped();
        let txt = match resolver.resolve(&host, cancel).await {
            Ok(txt) => txt,
            Err(err) if err.is_fallback() => {
                debug!(host = %host, error = %err, "No usable redirect record");
                return Ok(self.fall_back(
                    request,
                    UNRESOLVED_HOST,
                    UNRESOLVED_TYPE,
                    FallbackReason::Unresolved,
                ));
            }
            Err(err) => return Err(err),
        };

        let record = match Record::parse(&txt, request, &self.config) {
            Ok(record) => record,
            Err(err) if err.is_soft() => {
                info!(host = %host, error = %err, "Passing request to next handler");
                return Ok(Outcome::PassThrough);
            }
            Err(err) => return Err(err),
        };
        let record_type = record.record_type.as_str();
        self.metrics.record_type(&host, record_type);

        let dispatcher = TypeDispatcher::new(&resolver, &self.config);
        let (dispatch, path_match) = dispatcher.dispatch(&record, request, cancel).await?;
        if let Some(found) = &path_match {
            self.metrics.path(&host, &found.prefix);
        }

        match dispatch {
            Dispatch::Done(outcome) => Ok(self.finish(&host, outcome)),
            Dispatch::Fallback(reason) => Ok(self.fall_back(request, &host, record_type, reason)),
        }
    }

    fn fall_back(
        &self,
        request: &RequestContext,
        host_label: &str,
        record_type: &str,
        reason: FallbackReason,
    ) -> Outcome {
        let (outcome, kind) = fallback::cascade(request, &self.config, reason);
        self.metrics.fallback(host_label, record_type, kind.as_str());
        self.finish(host_label, outcome)
    }

    fn finish(&self, host_label: &str, outcome: Outcome) -> Outcome {
        if let Some(status) = outcome.status() {
            self.metrics.status(host_label, status);
            if matches!(status, 301 | 302) {
                self.metrics.redirect(host_label);
            }
        }
        outcome
    }
}
