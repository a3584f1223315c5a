use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RedirectConfig;
use crate::error::{RedirectError, Result};
use crate::record::Record;
use crate::request::RequestContext;
use crate::resolver::{RECORD_PREFIX, RecordResolver};

/// Deepest nesting tried; each level costs one sequential lookup.
pub const MAX_PATH_DEPTH: usize = 16;

/// A nested record that supplied a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub record: Record,
    /// Request path segments consumed to reach the record, e.g. `/pkg/second`.
    pub prefix: String,
    pub depth: usize,
}

/// Walks request path segments as extra leftmost labels of the host's record name.
pub struct PathWalker<'a> {
    resolver: &'a RecordResolver,
    config: &'a RedirectConfig,
}

impl<'a> PathWalker<'a> {
    pub fn new(resolver: &'a RecordResolver, config: &'a RedirectConfig) -> Self {
        Self { resolver, config }
    }

    /// Look up `_redirect.<seg1>.<host>.`, then `_redirect.<seg2>.<seg1>.<host>.`
    /// and so on, one at a time. The first record with a non-empty `to=` ends
    /// the walk; missing, empty and disabled-type records are skipped.
    pub async fn walk(
        &self,
        host: &str,
        request: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<Option<PathMatch>> {
        let segments = path_segments(&request.path);
        let mut labels = String::new();
        let mut prefix = String::new();

        for (index, segment) in segments.iter().take(MAX_PATH_DEPTH).enumerate() {
            let depth = index + 1;
            labels = if labels.is_empty() {
                segment.to_ascii_lowercase()
            } else {
                format!("{}.{labels}", segment.to_ascii_lowercase())
            };
            prefix.push('/');
            prefix.push_str(segment);

            let name = format!(
                "{RECORD_PREFIX}.{labels}.{}.",
                host.trim_end_matches('.').to_ascii_lowercase()
            );
            let Some(txt) = self.resolver.resolve_exact(&name, cancel).await? else {
                continue;
            };

            match Record::parse(&txt, request, self.config) {
                Ok(record) if !record.to.is_empty() => {
                    debug!(name = %name, depth, "Path record matched");
                    return Ok(Some(PathMatch {
                        record,
                        prefix,
                        depth,
                    }));
                }
                Ok(_) => debug!(name = %name, depth, "Path record has no target; going deeper"),
                Err(RedirectError::TypeDisabled(kind)) => {
                    debug!(name = %name, depth, %kind, "Path record type disabled; going deeper")
                }
                Err(err) => return Err(err),
            }
        }

        Ok(None)
    }
}

fn path_segments(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect()
}
