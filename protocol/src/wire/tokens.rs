//! Service token table.
//!
//! Maps a voting site's service name to the shared secret it signs modern
//! votes with. Lookups are case-insensitive: keys are lowercased on
//! insertion and queries are lowercased before lookup. The table is an
//! immutable snapshot; reconfiguring means building a new one.

use std::collections::HashMap;

use thiserror::Error;

/// Errors from parsing a `name=secret` token specification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenSpecError {
    #[error("token entry {0:?} is not of the form name=secret")]
    MissingSeparator(String),

    #[error("token entry has an empty service name")]
    EmptyServiceName,

    #[error("token for service {0:?} is empty")]
    EmptySecret(String),
}

/// Immutable service-name to secret mapping.
#[derive(Clone, Default)]
pub struct ServiceTokenTable {
    tokens: HashMap<String, String>,
}

impl ServiceTokenTable {
    /// An empty table. Every modern vote will fail signature lookup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one `name=secret` entry. Whitespace around both sides is
    /// ignored; the secret may itself contain `=`.
    pub fn parse_entry(entry: &str) -> Result<(String, String), TokenSpecError> {
        let (name, secret) = entry
            .split_once('=')
            .ok_or_else(|| TokenSpecError::MissingSeparator(entry.to_string()))?;
        let name = name.trim();
        let secret = secret.trim();

        if name.is_empty() {
            return Err(TokenSpecError::EmptyServiceName);
        }
        if secret.is_empty() {
            return Err(TokenSpecError::EmptySecret(name.to_string()));
        }
        Ok((name.to_string(), secret.to_string()))
    }

    /// Parse a comma-separated list of `name=secret` entries. Empty entries
    /// (e.g. a trailing comma) are skipped.
    pub fn parse_list(spec: &str) -> Result<Self, TokenSpecError> {
        spec.split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(Self::parse_entry)
            .collect()
    }

    /// Secret for `service_name`, if one is configured.
    pub fn lookup(&self, service_name: &str) -> Option<&str> {
        self.tokens
            .get(&service_name.to_lowercase())
            .map(String::as_str)
    }

    /// Number of configured services.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// True if no service has a token, i.e. modern votes cannot succeed.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Configured service names (lowercased), sorted.
    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tokens.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ServiceTokenTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let tokens = iter
            .into_iter()
            .map(|(name, secret)| (name.as_ref().to_lowercase(), secret.into()))
            .collect();
        Self { tokens }
    }
}

// Secrets stay out of Debug output.
impl std::fmt::Debug for ServiceTokenTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTokenTable")
            .field("services", &self.services())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let table: ServiceTokenTable = [("HyVote", "s3cret")].into_iter().collect();
        assert_eq!(table.lookup("hyvote"), Some("s3cret"));
        assert_eq!(table.lookup("HYVOTE"), Some("s3cret"));
        assert_eq!(table.lookup("HyVote"), Some("s3cret"));
        assert_eq!(table.lookup("other"), None);
    }

    #[test]
    fn empty_table() {
        let table = ServiceTokenTable::new();
        assert!(table.is_empty());
        assert_eq!(table.lookup("anything"), None);
    }

    #[test]
    fn parse_list_of_entries() {
        let table = ServiceTokenTable::parse_list("Hyvote=abc, TopSites = x=y=z ,").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("hyvote"), Some("abc"));
        assert_eq!(table.lookup("topsites"), Some("x=y=z"));
        assert_eq!(table.services(), vec!["hyvote", "topsites"]);
    }

    #[test]
    fn parse_rejects_malformed_entries() {
        assert_eq!(
            ServiceTokenTable::parse_entry("nosecret"),
            Err(TokenSpecError::MissingSeparator("nosecret".into()))
        );
        assert_eq!(
            ServiceTokenTable::parse_entry(" =abc"),
            Err(TokenSpecError::EmptyServiceName)
        );
        assert_eq!(
            ServiceTokenTable::parse_entry("site= "),
            Err(TokenSpecError::EmptySecret("site".into()))
        );
    }

    #[test]
    fn debug_hides_secrets() {
        let table: ServiceTokenTable = [("site", "hunter2")].into_iter().collect();
        let rendered = format!("{table:?}");
        assert!(rendered.contains("site"));
        assert!(!rendered.contains("hunter2"));
    }
}
