//! HTTP redirects configured through `_redirect.<host>` DNS TXT records.
//!
//! A record such as `v=txtv0;to=https://example.org;code=301` makes every
//! request for its host redirect to `to=`. Records can also walk path
//! segments as nested labels (`type=path`), serve Go import metadata
//! (`type=gometa`) or point container registry clients elsewhere
//! (`type=dockerv2`). Hosts without a usable record fall back to a `www.`
//! redirect, a global URL, or a plain 404.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod guard;
pub mod metrics;
pub mod path;
pub mod placeholder;
pub mod record;
pub mod request;
pub mod resolver;
pub mod server;
pub mod telemetry;

pub use config::{RedirectConfig, RuntimeConfig};
pub use dispatch::Outcome;
pub use engine::Engine;
pub use error::RedirectError;
pub use record::{Record, RecordType};
pub use request::RequestContext;
pub use resolver::{HickoryLookup, StaticLookup, TxtLookup};
