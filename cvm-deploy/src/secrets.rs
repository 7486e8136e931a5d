use crate::{error::Error, types::SecretEntry};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use tracing::{info, warn};

/// Where the secrets for a deployment come from.
#[derive(Clone, Default)]
pub enum SecretSource {
    /// No secrets configured.
    #[default]
    None,
    /// A JSON object of secret name to value, in document order.
    Json(Map<String, Value>),
    /// `TARGET=SOURCE` lines; each SOURCE is read from the process environment.
    MappingFile(String),
}

impl SecretSource {
    /// Parse a JSON object such as the one exported by a secrets manager.
    pub fn from_json(secrets_json: &str) -> Result<Self, Error> {
        match serde_json::from_str(secrets_json) {
            Ok(Value::Object(secrets)) => Ok(SecretSource::Json(secrets)),
            Ok(_) => Err(Error::Configuration(
                "secrets JSON must be an object of name to value".into(),
            )),
            Err(e) => Err(Error::Configuration(format!("invalid secrets JSON: {e}"))),
        }
    }
}

impl fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretSource::None => f.write_str("None"),
            SecretSource::Json(secrets) => f
                .debug_tuple("Json")
                .field(&secrets.keys().collect::<Vec<_>>())
                .finish(),
            SecretSource::MappingFile(_) => f.write_str("MappingFile(..)"),
        }
    }
}

/// Parse a JSON array of key names to exclude.
pub fn parse_exclude_list(exclude_json: &str) -> Result<Vec<String>, Error> {
    serde_json::from_str(exclude_json)
        .map_err(|e| Error::Configuration(format!("invalid exclude list JSON: {e}")))
}

/// Normalizes secret sources into an ordered list of entries.
#[derive(Debug, Clone, Default)]
pub struct SecretCollector {
    exclude: HashSet<String>,
}

impl SecretCollector {
    pub fn new(exclude: impl IntoIterator<Item = String>) -> Self {
        Self {
            exclude: exclude.into_iter().collect(),
        }
    }

    /// Collect secrets, resolving mapping files against the process environment.
    pub fn collect(&self, source: &SecretSource) -> Result<Vec<SecretEntry>, Error> {
        self.collect_with(source, |name| std::env::var(name).ok())
    }

    /// Collect secrets, resolving mapping files through `lookup`.
    pub fn collect_with<F>(&self, source: &SecretSource, lookup: F) -> Result<Vec<SecretEntry>, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let entries = match source {
            SecretSource::None => {
                warn!("No secrets source configured");
                return Ok(Vec::new());
            }
            SecretSource::Json(secrets) => self.collect_json(secrets)?,
            SecretSource::MappingFile(contents) => self.collect_mapping(contents, lookup)?,
        };

        info!("Collected {} secret(s) for encryption", entries.len());
        Ok(entries)
    }

    fn collect_json(&self, secrets: &Map<String, Value>) -> Result<Vec<SecretEntry>, Error> {
        info!("Processing {} secret(s)", secrets.len());
        let mut entries = Vec::with_capacity(secrets.len());

        for (key, value) in secrets {
            if key.is_empty() {
                return Err(Error::Configuration("secret names must not be empty".into()));
            }
            if self.exclude.contains(key) {
                info!("Excluding '{key}' as requested");
                continue;
            }
            let value = match value {
                Value::Null => {
                    warn!("Skipping '{key}' because its value is null");
                    continue;
                }
                Value::String(value) => value.clone(),
                other => other.to_string(),
            };
            entries.push(SecretEntry::new(key.clone(), value));
        }

        Ok(entries)
    }

    fn collect_mapping<F>(&self, contents: &str, lookup: F) -> Result<Vec<SecretEntry>, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (target, source) = line
                .split_once('=')
                .map(|(target, source)| (target.trim(), source.trim()))
                .filter(|(target, source)| !target.is_empty() && !source.is_empty())
                .ok_or_else(|| {
                    Error::Configuration(format!(
                        "mapping line {} must look like TARGET=SOURCE",
                        index + 1
                    ))
                })?;

            if !seen.insert(target.to_string()) {
                return Err(Error::Configuration(format!(
                    "duplicate mapping for '{target}' on line {}",
                    index + 1
                )));
            }
            if self.exclude.contains(target) {
                info!("Excluding '{target}' as requested");
                continue;
            }

            match lookup(source) {
                Some(value) => entries.push(SecretEntry::new(target, value)),
                None => warn!("Skipping '{target}' because ${source} is not set"),
            }
        }

        Ok(entries)
    }
}
