//! Provider registry.
//!
//! Turns the `[sync] providers` list from config into an ordered set of
//! enabled [`Provider`]s. Entries are matched against the compile-time
//! [`MANIFEST`] by bare name (`lastfm`), qualified name
//! (`providers.lastfm`), or a glob over qualified names (`providers.*`).
//!
//! ```text
//! ["lastfm", "providers.*"]
//!        │
//!        ▼  expand against MANIFEST, first appearance wins
//! [lastfm, delicious, magnolia, flickr, ...]
//!        │
//!        ▼  build(&Config), drop failures and disabled providers
//! ProviderRegistry
//! ```

use anyhow::Result;
use globset::Glob;
use std::collections::HashSet;
use tracing::{error, warn};

use crate::config::Config;
use crate::providers::{qualified_name, Provider, ProviderEntry, MANIFEST, NAMESPACE};

/// An ordered collection of providers.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Box<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every enabled provider named in `config.sync.providers`.
    ///
    /// Unknown names and providers that fail to build are logged and
    /// skipped. Disabled providers are logged once with the settings they
    /// lack.
    pub fn discover(config: &Config) -> Self {
        let mut registry = Self::new();
        for entry in resolve(&config.sync.providers) {
            let provider = match (entry.build)(config) {
                Ok(provider) => provider,
                Err(err) => {
                    error!(
                        provider = entry.name,
                        error = %format!("{:#}", err),
                        "failed to load provider"
                    );
                    continue;
                }
            };
            let missing = provider.missing_settings();
            if !missing.is_empty() {
                warn!(
                    provider = entry.name,
                    missing = %missing.join(", "),
                    "provider is not available; settings are missing"
                );
                continue;
            }
            registry.register(provider);
        }
        registry
    }

    /// Append a provider. A name already present is ignored.
    pub fn register(&mut self, provider: Box<dyn Provider>) {
        if self.find(provider.name()).is_some() {
            return;
        }
        self.providers.push(provider);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Provider> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    /// Names in run order.
    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Names of enabled providers, sorted.
    pub fn enabled_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .iter()
            .filter(|p| p.enabled())
            .map(|p| p.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Provider> {
        self.providers.iter().map(|p| p.as_ref())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Expand config identifiers into manifest entries, in order of first
/// appearance.
fn resolve(identifiers: &[String]) -> Vec<&'static ProviderEntry> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for ident in identifiers {
        let matched = match matching_entries(ident) {
            Ok(matched) => matched,
            Err(err) => {
                error!(provider = %ident, error = %err, "invalid provider pattern");
                continue;
            }
        };
        if matched.is_empty() {
            error!(provider = %ident, "unknown provider");
            continue;
        }
        for entry in matched {
            if seen.insert(entry.name) {
                out.push(entry);
            }
        }
    }
    out
}

fn matching_entries(ident: &str) -> Result<Vec<&'static ProviderEntry>> {
    let ident = ident.trim();
    if is_glob(ident) {
        let matcher = Glob::new(ident)?.compile_matcher();
        return Ok(MANIFEST
            .iter()
            .filter(|e| matcher.is_match(e.qualified_name()))
            .collect());
    }

    let prefix = format!("{}.", NAMESPACE);
    let bare = ident.strip_prefix(prefix.as_str()).unwrap_or(ident);
    Ok(MANIFEST
        .iter()
        .filter(|e| e.name == bare || qualified_name(e.name) == ident)
        .collect())
}

fn is_glob(ident: &str) -> bool {
    ident.contains(['*', '?', '[', '{'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(entries: Vec<&'static ProviderEntry>) -> Vec<&'static str> {
        entries.into_iter().map(|e| e.name).collect()
    }

    #[test]
    fn wildcard_expands_in_manifest_order() {
        let all = names(resolve(&["providers.*".to_string()]));
        let manifest: Vec<&str> = MANIFEST.iter().map(|e| e.name).collect();
        assert_eq!(all, manifest);
    }

    #[test]
    fn first_appearance_wins() {
        let order = names(resolve(&[
            "lastfm".to_string(),
            "providers.*".to_string(),
            "providers.lastfm".to_string(),
        ]));
        assert_eq!(order[0], "lastfm");
        assert_eq!(order.len(), MANIFEST.len());
    }

    #[test]
    fn unknown_names_are_skipped() {
        let order = names(resolve(&[
            "myspace".to_string(),
            "providers.nope".to_string(),
            "twitter".to_string(),
        ]));
        assert_eq!(order, vec!["twitter"]);
    }

    #[test]
    fn disabled_providers_are_excluded() {
        let mut config = Config::minimal("unused.sqlite");
        config.providers.twitter = Some(crate::config::TwitterConfig {
            username: "jacob".to_string(),
        });
        let registry = ProviderRegistry::discover(&config);
        assert_eq!(registry.names(), vec!["twitter".to_string()]);
    }
}
