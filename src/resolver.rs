use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use hickory_proto::rr::rdata::TXT;
use hickory_resolver::{
    TokioResolver,
    config::{NameServerConfigGroup, ResolverConfig},
    name_server::TokioConnectionProvider,
};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RedirectConfig;
use crate::error::{RedirectError, Result};

/// Label prepended to every host to form its record name.
pub const RECORD_PREFIX: &str = "_redirect";
/// Replaces the leftmost host label on the wildcard retry.
pub const WILDCARD_LABEL: &str = "_";

/// Source of TXT answers. Returns one string per TXT record found at `name`.
#[async_trait]
pub trait TxtLookup: Send + Sync {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>>;
}

/// DNS-backed lookup with answer caching turned off.
pub struct HickoryLookup {
    resolver: TokioResolver,
}

impl HickoryLookup {
    /// Query `config.resolver` directly when set, otherwise the system resolvers.
    pub fn from_config(config: &RedirectConfig) -> anyhow::Result<Self> {
        let mut builder = match config.resolver {
            Some(addr) => {
                let servers = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
                TokioResolver::builder_with_config(
                    ResolverConfig::from_parts(None, vec![], servers),
                    TokioConnectionProvider::default(),
                )
            }
            None => TokioResolver::builder_tokio()
                .context("Unable to read system resolver configuration")?,
        };

        let options = builder.options_mut();
        options.cache_size = 0;
        options.attempts = 1;
        options.timeout = config.lookup_timeout;

        Ok(Self {
            resolver: builder.build(),
        })
    }
}

#[async_trait]
impl TxtLookup for HickoryLookup {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        let lookup = self
            .resolver
            .txt_lookup(name)
            .await
            .map_err(|err| RedirectError::Lookup {
                name: name.to_string(),
                reason: err.to_string(),
            })?;
        Ok(lookup.iter().map(txt_string).collect())
    }
}

/// Join the character-strings of one TXT record.
fn txt_string(txt: &TXT) -> String {
    txt.txt_data()
        .iter()
        .map(|chunk| String::from_utf8_lossy(chunk))
        .collect()
}

/// Fixed-answer lookup keyed by fully qualified record name.
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    records: HashMap<String, Vec<String>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, name: &str, txt: &str) -> Self {
        self.records
            .entry(name.to_string())
            .or_default()
            .push(txt.to_string());
        self
    }
}

#[async_trait]
impl TxtLookup for StaticLookup {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        self.records
            .get(name)
            .cloned()
            .ok_or_else(|| RedirectError::Lookup {
                name: name.to_string(),
                reason: "no records found".into(),
            })
    }
}

/// `_redirect.<host>.`
pub fn record_name(host: &str) -> String {
    format!(
        "{RECORD_PREFIX}.{}.",
        host.trim_end_matches('.').to_ascii_lowercase()
    )
}

/// `_redirect._.<host minus its leftmost label>.`
pub fn wildcard_name(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let rest = host.split_once('.').map(|(_, rest)| rest);
    match rest {
        Some(rest) => format!("{RECORD_PREFIX}.{WILDCARD_LABEL}.{rest}."),
        None => format!("{RECORD_PREFIX}.{WILDCARD_LABEL}."),
    }
}

/// Turns a host into the single TXT string configuring it.
#[derive(Clone)]
pub struct RecordResolver {
    lookup: Arc<dyn TxtLookup>,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl RecordResolver {
    pub fn new(lookup: Arc<dyn TxtLookup>, timeout: Duration) -> Self {
        Self {
            lookup,
            timeout,
            deadline: None,
        }
    }

    /// Copy whose lookups all share one deadline, `timeout` from now.
    /// Used once per request so sequential lookups cannot stack timeouts.
    pub fn scoped(&self) -> Self {
        Self {
            lookup: Arc::clone(&self.lookup),
            timeout: self.timeout,
            deadline: Some(Instant::now() + self.timeout),
        }
    }

    fn deadline(&self) -> Instant {
        self.deadline
            .unwrap_or_else(|| Instant::now() + self.timeout)
    }

    /// Exact lookup first; on failure or an empty first answer, one retry
    /// against the wildcard name. Several records is ambiguous and not retried.
    pub async fn resolve(&self, host: &str, cancel: &CancellationToken) -> Result<String> {
        let exact = record_name(host);
        let answers = match self.query(&exact, cancel).await {
            Ok(answers) if answers.first().is_some_and(|txt| !txt.is_empty()) => answers,
            Ok(_) => {
                debug!(name = %exact, "Empty TXT answer; trying wildcard");
                self.query_wildcard(host, cancel).await?
            }
            Err(err) if err.is_canceled() => return Err(err),
            Err(err) => {
                debug!(name = %exact, error = %err, "Initial DNS query failed; trying wildcard");
                self.query_wildcard(host, cancel).await?
            }
        };

        single_answer(answers)?.ok_or_else(|| RedirectError::Resolution {
            host: host.to_string(),
        })
    }

    /// Exact lookup of an already-built record name, no wildcard retry.
    /// `Ok(None)` means nothing usable lives there.
    pub async fn resolve_exact(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        match self.query(name, cancel).await {
            Ok(answers) => single_answer(answers),
            Err(err) if err.is_canceled() => Err(err),
            Err(err) => {
                debug!(name = %name, error = %err, "DNS query failed");
                Ok(None)
            }
        }
    }

    async fn query_wildcard(&self, host: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        let wildcard = wildcard_name(host);
        self.query(&wildcard, cancel).await.map_err(|err| {
            if err.is_canceled() {
                return err;
            }
            debug!(name = %wildcard, error = %err, "Wildcard DNS query failed");
            RedirectError::Resolution {
                host: host.to_string(),
            }
        })
    }

    async fn query(&self, name: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        if cancel.is_cancelled() {
            return Err(RedirectError::Canceled {
                name: name.to_string(),
            });
        }
        let deadline = self.deadline();
        if Instant::now() >= deadline {
            return Err(RedirectError::Lookup {
                name: name.to_string(),
                reason: "request DNS deadline already passed".into(),
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RedirectError::Canceled {
                name: name.to_string(),
            }),
            outcome = time::timeout_at(deadline, self.lookup.lookup_txt(name)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(RedirectError::Lookup {
                        name: name.to_string(),
                        reason: format!("timed out after {:?}", self.timeout),
                    }),
                }
            }
        }
    }
}

fn single_answer(mut answers: Vec<String>) -> Result<Option<String>> {
    match answers.len() {
        0 => Ok(None),
        1 => Ok(answers.pop().filter(|txt| !txt.is_empty())),
        n => Err(RedirectError::AmbiguousRecord(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{Message, MessageType, ResponseCode};
    use hickory_proto::rr::{RData, Record as DnsRecord};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::UdpSocket;

    struct CountingLookup {
        inner: StaticLookup,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TxtLookup for CountingLookup {
        async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.lookup_txt(name).await
        }
    }

    struct StalledLookup;

    #[async_trait]
    impl TxtLookup for StalledLookup {
        async fn lookup_txt(&self, _name: &str) -> Result<Vec<String>> {
            std::future::pending().await
        }
    }

    fn resolver(lookup: StaticLookup) -> RecordResolver {
        RecordResolver::new(Arc::new(lookup), Duration::from_secs(1))
    }

    #[test]
    fn builds_exact_and_wildcard_names() {
        assert_eq!(record_name("About.Test"), "_redirect.about.test.");
        assert_eq!(wildcard_name("a.b.example.test"), "_redirect._.b.example.test.");
        assert_eq!(wildcard_name("localhost"), "_redirect._.");
    }

    #[tokio::test]
    async fn exact_record_wins() {
        let lookup = StaticLookup::new()
            .with_record("_redirect.about.test.", "to=https://about.example")
            .with_record("_redirect._.test.", "to=https://wildcard.example");
        let txt = resolver(lookup)
            .resolve("about.test", &CancellationToken::new())
            .await
            .expect("resolved");
        assert_eq!(txt, "to=https://about.example");
    }

    #[tokio::test]
    async fn missing_exact_record_degrades_to_wildcard() {
        let lookup =
            StaticLookup::new().with_record("_redirect._.example.test.", "to=https://{label3}.io");
        let txt = resolver(lookup)
            .resolve("docs.example.test", &CancellationToken::new())
            .await
            .expect("resolved");
        assert_eq!(txt, "to=https://{label3}.io");
    }

    #[tokio::test]
    async fn empty_exact_answer_degrades_to_wildcard() {
        let lookup = StaticLookup::new()
            .with_record("_redirect.docs.example.test.", "")
            .with_record("_redirect._.example.test.", "to=https://wild.example");
        let txt = resolver(lookup)
            .resolve("docs.example.test", &CancellationToken::new())
            .await
            .expect("resolved");
        assert_eq!(txt, "to=https://wild.example");
    }

    #[tokio::test]
    async fn both_lookups_failing_is_a_resolution_failure() {
        let lookup = Arc::new(CountingLookup {
            inner: StaticLookup::new(),
            calls: AtomicUsize::new(0),
        });
        let resolver = RecordResolver::new(lookup.clone(), Duration::from_secs(1));
        let err = resolver
            .resolve("nothing.test", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RedirectError::Resolution { .. }));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn multiple_records_are_ambiguous_and_not_retried() {
        let lookup = Arc::new(CountingLookup {
            inner: StaticLookup::new()
                .with_record("_redirect.twice.test.", "to=https://a.example")
                .with_record("_redirect.twice.test.", "to=https://b.example"),
            calls: AtomicUsize::new(0),
        });
        let resolver = RecordResolver::new(lookup.clone(), Duration::from_secs(1));
        let err = resolver
            .resolve("twice.test", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RedirectError::AmbiguousRecord(2)));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_is_distinct_from_not_found() {
        let resolver = RecordResolver::new(Arc::new(StalledLookup), Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resolver.resolve("slow.test", &cancel).await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn deadline_turns_into_resolution_failure() {
        let resolver = RecordResolver::new(Arc::new(StalledLookup), Duration::from_millis(20));
        let err = resolver
            .resolve("slow.test", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RedirectError::Resolution { .. }));
    }

    #[tokio::test]
    async fn scoped_lookups_share_one_deadline() {
        let resolver = RecordResolver::new(Arc::new(StalledLookup), Duration::from_millis(100));
        let scoped = resolver.scoped();
        let cancel = CancellationToken::new();
        let started = std::time::Instant::now();

        let err = scoped.resolve("slow.test", &cancel).await.unwrap_err();
        assert!(matches!(err, RedirectError::Resolution { .. }));
        for depth in 0..8 {
            let name = format!("_redirect.level{depth}.slow.test.");
            assert!(scoped.resolve_exact(&name, &cancel).await.expect("lookup").is_none());
        }
        assert!(started.elapsed() < Duration::from_millis(400), "{:?}", started.elapsed());
    }

    /// Answers TXT queries on a loopback UDP socket; unknown names get NXDOMAIN.
    async fn spawn_txt_server(answers: HashMap<&'static str, Vec<&'static str>>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let addr = socket.local_addr().expect("local addr");
        tokio::spawn(async move {
            let mut buf = [0u8; 1500];
            while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                let Ok(query) = Message::from_vec(&buf[..len]) else {
                    continue;
                };
                let mut response = Message::new();
                response.set_id(query.id());
                response.set_message_type(MessageType::Response);
                response.set_op_code(query.op_code());
                response.set_recursion_desired(query.recursion_desired());
                response.set_recursion_available(true);
                response.add_queries(query.queries().to_vec());

                let question = query.queries().first();
                let chunks = question
                    .and_then(|q| answers.get(q.name().to_ascii().to_ascii_lowercase().as_str()));
                match (question, chunks) {
                    (Some(q), Some(chunks)) => {
                        response.set_response_code(ResponseCode::NoError);
                        let txt = TXT::new(chunks.iter().map(|c| c.to_string()).collect());
                        response.add_answer(DnsRecord::from_rdata(
                            q.name().clone(),
                            60,
                            RData::TXT(txt),
                        ));
                    }
                    _ => {
                        response.set_response_code(ResponseCode::NXDomain);
                    }
                }
                if let Ok(bytes) = response.to_vec() {
                    let _ = socket.send_to(&bytes, peer).await;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn hickory_lookup_uses_resolver_override() {
        let addr = spawn_txt_server(HashMap::from([
            (
                "_redirect.split.test.",
                vec!["v=txtv0;to=https://split", ".example;code=301"],
            ),
            ("_redirect.plain.test.", vec!["to=https://plain.example"]),
        ]))
        .await;

        let mut config = RedirectConfig::default();
        config.resolver = Some(addr);
        config.lookup_timeout = Duration::from_secs(2);
        let lookup = HickoryLookup::from_config(&config).expect("lookup");

        assert_eq!(
            lookup.lookup_txt("_redirect.split.test.").await.expect("split"),
            vec!["v=txtv0;to=https://split.example;code=301".to_string()]
        );
        assert_eq!(
            lookup.lookup_txt("_redirect.plain.test.").await.expect("plain"),
            vec!["to=https://plain.example".to_string()]
        );
        let err = lookup.lookup_txt("_redirect.missing.test.").await.unwrap_err();
        assert!(matches!(err, RedirectError::Lookup { .. }));
    }

    #[tokio::test]
    async fn hickory_backed_resolver_falls_back_to_wildcard() {
        let addr = spawn_txt_server(HashMap::from([(
            "_redirect._.example.test.",
            vec!["to=https://{label3}.example.org"],
        )]))
        .await;

        let mut config = RedirectConfig::default();
        config.resolver = Some(addr);
        config.lookup_timeout = Duration::from_secs(2);
        let lookup = HickoryLookup::from_config(&config).expect("lookup");
        let resolver = RecordResolver::new(Arc::new(lookup), config.lookup_timeout);

        let txt = resolver
            .resolve("docs.example.test", &CancellationToken::new())
            .await
            .expect("resolved");
        assert_eq!(txt, "to=https://{label3}.example.org");
    }

    #[tokio::test]
    async fn resolve_exact_skips_wildcards() {
        let lookup = StaticLookup::new().with_record("_redirect._.example.test.", "to=x");
        let found = resolver(lookup)
            .resolve_exact("_redirect.pkg.example.test.", &CancellationToken::new())
            .await
            .expect("lookup");
        assert!(found.is_none());
    }
}
