use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("lifestream/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Ordered provider identifiers: `lastfm`, `providers.lastfm`, or a glob
    /// such as `providers.*`.
    #[serde(default = "default_provider_list")]
    pub providers: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            providers: default_provider_list(),
        }
    }
}

fn default_provider_list() -> Vec<String> {
    vec!["providers.*".to_string()]
}

/// Per-provider settings. A missing section (or an empty credential) leaves
/// that provider disabled.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProvidersConfig {
    pub delicious: Option<DeliciousConfig>,
    pub magnolia: Option<MagnoliaConfig>,
    pub lastfm: Option<LastfmConfig>,
    pub flickr: Option<FlickrConfig>,
    pub twitter: Option<TwitterConfig>,
    pub pownce: Option<PownceConfig>,
    pub gsearch: Option<GsearchConfig>,
    pub youtube: Option<YoutubeConfig>,
    pub latitude: Option<LatitudeConfig>,
    #[serde(default)]
    pub gitscm: GitscmConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeliciousConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MagnoliaConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LastfmConfig {
    #[serde(default)]
    pub username: String,
    /// Minimum tag count for a Last.fm top tag to be kept.
    #[serde(default = "default_tag_threshold")]
    pub tag_usage_threshold: i64,
}

impl Default for LastfmConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            tag_usage_threshold: default_tag_threshold(),
        }
    }
}

fn default_tag_threshold() -> i64 {
    15
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FlickrConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TwitterConfig {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PownceConfig {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GsearchConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct YoutubeConfig {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LatitudeConfig {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GitscmConfig {
    /// Where repository clones are kept between runs. Defaults to
    /// `.git-cache/` next to the database file.
    pub cache_dir: Option<PathBuf>,
}

/// A code repository whose commits by `username` land on the timeline.
#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub username: String,
    pub url: String,
    #[serde(default)]
    pub public_changeset_template: String,
}

impl Config {
    /// A config with only a database path; every provider disabled.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            http: HttpConfig::default(),
            sync: SyncConfig::default(),
            providers: ProvidersConfig::default(),
            repositories: Vec::new(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.http.timeout_secs == 0 {
        anyhow::bail!("http.timeout_secs must be > 0");
    }

    for repo in &config.repositories {
        match repo.kind.as_str() {
            "git" | "svn" => {}
            other => anyhow::bail!(
                "Unknown repository kind '{}' for '{}'. Must be git or svn.",
                other,
                repo.name
            ),
        }
        if repo.url.trim().is_empty() {
            anyhow::bail!("repository '{}' has an empty url", repo.name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_a_bare_config() {
        let cfg: Config = toml::from_str("[db]\npath = \"x.sqlite\"\n").unwrap();
        assert_eq!(cfg.http.timeout_secs, 30);
        assert_eq!(cfg.sync.providers, vec!["providers.*".to_string()]);
        assert!(cfg.providers.lastfm.is_none());
        assert!(cfg.repositories.is_empty());
        validate(&cfg).unwrap();
    }

    #[test]
    fn provider_sections_parse() {
        let cfg: Config = toml::from_str(
            r#"
[db]
path = "x.sqlite"

[sync]
providers = ["lastfm", "providers.delicious"]

[providers.lastfm]
username = "jacob"

[[repositories]]
kind = "git"
name = "jellyroll"
username = "jacob@example.com"
url = "https://example.com/jellyroll.git"
"#,
        )
        .unwrap();
        let lastfm = cfg.providers.lastfm.unwrap();
        assert_eq!(lastfm.username, "jacob");
        assert_eq!(lastfm.tag_usage_threshold, 15);
        assert_eq!(cfg.repositories.len(), 1);
        assert_eq!(cfg.sync.providers.len(), 2);
    }

    #[test]
    fn rejects_unknown_repository_kind() {
        let cfg: Config = toml::from_str(
            r#"
[db]
path = "x.sqlite"

[[repositories]]
kind = "hg"
name = "old"
username = "me"
url = "https://example.com/old"
"#,
        )
        .unwrap();
        assert!(validate(&cfg).is_err());
    }
}
