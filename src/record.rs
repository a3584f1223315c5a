use std::fmt;

use tracing::warn;

use crate::config::RedirectConfig;
use crate::error::{RedirectError, Result};
use crate::placeholder;
use crate::request::RequestContext;

/// The only grammar version currently understood.
pub const SUPPORTED_VERSION: &str = "txtv0";
/// Upper bound on the text of a single directive.
pub const MAX_DIRECTIVE_LEN: usize = 255;
pub const DEFAULT_STATUS: u16 = 302;

/// Redirect behaviours a record can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecordType {
    #[default]
    Host,
    Path,
    Gometa,
    Dockerv2,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Host => "host",
            RecordType::Path => "path",
            RecordType::Gometa => "gometa",
            RecordType::Dockerv2 => "dockerv2",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "host" => Some(RecordType::Host),
            "path" => Some(RecordType::Path),
            "gometa" => Some(RecordType::Gometa),
            "dockerv2" => Some(RecordType::Dockerv2),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `_redirect` TXT record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub version: String,
    pub to: String,
    pub from: String,
    pub code: u16,
    pub record_type: RecordType,
    pub vcs: String,
    pub website: String,
    pub root: String,
    pub re: String,
}

impl Record {
    /// Parse the TXT text of a `_redirect` record.
    ///
    /// `to=` and `from=` have request placeholders expanded while parsing.
    /// Fails with [`RedirectError::TypeDisabled`] when the record's type is
    /// valid but switched off in `config`.
    pub fn parse(text: &str, request: &RequestContext, config: &RedirectConfig) -> Result<Self> {
        let mut record = Record::default();
        let mut type_name: Option<String> = None;

        for directive in text.split(';') {
            let Some((key, raw)) = directive.split_once('=') else {
                return Err(arbitrary_data());
            };

            let value = match key {
                "v" => {
                    if raw != SUPPORTED_VERSION {
                        return Err(RedirectError::Grammar(format!("unhandled version '{raw}'")));
                    }
                    warn!(version = raw, "{SUPPORTED_VERSION} is not suitable for production");
                    record.version = raw.to_string();
                    raw.to_string()
                }
                "to" => {
                    record.to = placeholder::substitute(raw, request)?;
                    record.to.clone()
                }
                "from" => {
                    record.from = placeholder::substitute(raw, request)?;
                    record.from.clone()
                }
                "code" => {
                    record.code = parse_status(raw)?;
                    raw.to_string()
                }
                "type" => {
                    type_name = Some(raw.to_string());
                    raw.to_string()
                }
                "vcs" => {
                    record.vcs = raw.to_string();
                    raw.to_string()
                }
                "website" => {
                    record.website = raw.to_string();
                    raw.to_string()
                }
                "root" => {
                    record.root = raw.to_string();
                    raw.to_string()
                }
                "re" => {
                    record.re = raw.to_string();
                    raw.to_string()
                }
                _ => {
                    if raw.contains('=') {
                        return Err(arbitrary_data());
                    }
                    continue;
                }
            };

            if value.len() > MAX_DIRECTIVE_LEN {
                return Err(RedirectError::LengthExceeded {
                    limit: MAX_DIRECTIVE_LEN,
                });
            }
        }

        if record.code == 0 {
            record.code = DEFAULT_STATUS;
        }

        let type_name = match type_name {
            Some(name) if !name.is_empty() => name,
            _ => RecordType::Host.as_str().to_string(),
        };
        if !config.is_enabled(&type_name) {
            return Err(RedirectError::TypeDisabled(type_name));
        }
        record.record_type = RecordType::from_name(&type_name).ok_or_else(|| {
            RedirectError::Grammar(format!("'{type_name}' is not a redirect record type"))
        })?;

        if record.record_type == RecordType::Dockerv2 && record.to.is_empty() {
            return Err(RedirectError::Grammar(
                "to= field is required in dockerv2 type".into(),
            ));
        }

        Ok(record)
    }
}

fn arbitrary_data() -> RedirectError {
    RedirectError::Grammar("arbitrary data not allowed".into())
}

fn parse_status(raw: &str) -> Result<u16> {
    let code: u16 = raw
        .parse()
        .map_err(|err| RedirectError::Grammar(format!("could not parse status code: {err}")))?;
    match code {
        0 | 100..=599 => Ok(code),
        _ => Err(RedirectError::Grammar(format!(
            "{code} is not a valid HTTP status code"
        ))),
    }
}
