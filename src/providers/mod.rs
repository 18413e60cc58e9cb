//! Data providers.
//!
//! Each provider syncs one external service into the timeline. Providers
//! share nothing but a [`SyncContext`]: the database pool, the fetcher, and
//! the shutdown flag. Every provider decides its own resume point from what
//! is already on the timeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 MANIFEST                     │
//! │  delicious  magnolia  lastfm  flickr  ...    │
//! └──────────────────────┬───────────────────────┘
//!                        ▼ build(&Config)
//!               ProviderRegistry::discover
//!                        ▼
//!               scheduler::run_update
//!                        ▼ Provider::update(&SyncContext)
//!        records::upsert_* + timeline::upsert_item
//! ```
//!
//! Providers are listed in config under the `providers` namespace, either
//! by bare name (`lastfm`), qualified name (`providers.lastfm`), or glob
//! (`providers.*`).

pub mod delicious;
pub mod flickr;
pub mod gitscm;
pub mod gsearch;
pub mod lastfm;
pub mod latitude;
pub mod magnolia;
pub mod pownce;
pub mod svn;
pub mod twitter;
pub mod youtube;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::error::{is_malformed, SyncError};
use crate::fetch::Fetcher;

pub const NAMESPACE: &str = "providers";

/// A named unit that syncs one external source.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use lifestream::providers::{Provider, SyncContext};
///
/// pub struct Quiet;
///
/// #[async_trait]
/// impl Provider for Quiet {
///     fn name(&self) -> &str { "quiet" }
///     fn missing_settings(&self) -> Vec<&'static str> { Vec::new() }
///
///     async fn update(&self, _ctx: &SyncContext) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name, also used as the provenance tag on timeline items.
    fn name(&self) -> &str;

    /// Config keys this provider needs but does not have.
    fn missing_settings(&self) -> Vec<&'static str>;

    fn enabled(&self) -> bool {
        self.missing_settings().is_empty()
    }

    /// Fetch whatever is new and write it to the timeline.
    ///
    /// Implementations call [`SyncContext::ensure_running`] between records
    /// so an operator interrupt takes effect promptly.
    async fn update(&self, ctx: &SyncContext) -> Result<()>;
}

/// One row of the compile-time provider table.
pub struct ProviderEntry {
    pub name: &'static str,
    pub build: fn(&Config) -> Result<Box<dyn Provider>>,
}

impl ProviderEntry {
    pub fn qualified_name(&self) -> String {
        qualified_name(self.name)
    }
}

pub fn qualified_name(name: &str) -> String {
    format!("{}.{}", NAMESPACE, name)
}

/// Every provider this build knows about, in default run order.
pub static MANIFEST: &[ProviderEntry] = &[
    ProviderEntry {
        name: "delicious",
        build: delicious::build,
    },
    ProviderEntry {
        name: "magnolia",
        build: magnolia::build,
    },
    ProviderEntry {
        name: "lastfm",
        build: lastfm::build,
    },
    ProviderEntry {
        name: "flickr",
        build: flickr::build,
    },
    ProviderEntry {
        name: "twitter",
        build: twitter::build,
    },
    ProviderEntry {
        name: "pownce",
        build: pownce::build,
    },
    ProviderEntry {
        name: "gsearch",
        build: gsearch::build,
    },
    ProviderEntry {
        name: "youtube",
        build: youtube::build,
    },
    ProviderEntry {
        name: "latitude",
        build: latitude::build,
    },
    ProviderEntry {
        name: "gitscm",
        build: gitscm::build,
    },
    ProviderEntry {
        name: "svn",
        build: svn::build,
    },
];

/// Cooperative termination flag, shared by every clone.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), SyncError> {
        if self.is_triggered() {
            Err(SyncError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Trigger on the first Ctrl-C; exit the process on the second.
    pub fn listen_for_ctrl_c(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping after the current record");
                flag.trigger();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
    }
}

/// Everything a provider may touch during a run.
#[derive(Clone)]
pub struct SyncContext {
    pub pool: SqlitePool,
    pub fetcher: Fetcher,
    pub shutdown: Shutdown,
}

impl SyncContext {
    pub fn new(pool: SqlitePool, fetcher: Fetcher) -> Self {
        Self {
            pool,
            fetcher,
            shutdown: Shutdown::new(),
        }
    }

    pub fn ensure_running(&self) -> Result<()> {
        self.shutdown.check()?;
        Ok(())
    }
}

/// Names of the settings in `settings` whose value is empty.
pub(crate) fn missing(settings: &[(&'static str, &str)]) -> Vec<&'static str> {
    settings
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| *key)
        .collect()
}

/// Let a record with unusable data go by with a warning; anything else
/// still fails the run.
pub(crate) fn skip_malformed(provider: &str, result: Result<()>) -> Result<()> {
    match result {
        Err(err) if is_malformed(&err) => {
            warn!(provider, error = %format!("{:#}", err), "skipping record");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn manifest_names_are_unique() {
        let names: HashSet<&str> = MANIFEST.iter().map(|e| e.name).collect();
        assert_eq!(names.len(), MANIFEST.len());
        assert_eq!(MANIFEST[0].qualified_name(), "providers.delicious");
    }

    #[test]
    fn every_provider_is_disabled_without_settings() {
        let config = Config::minimal("unused.sqlite");
        for entry in MANIFEST {
            let provider = (entry.build)(&config).unwrap();
            assert_eq!(provider.name(), entry.name);
            assert!(!provider.enabled(), "{} should be disabled", entry.name);
        }
    }

    #[test]
    fn shutdown_is_shared_between_clones() {
        let shutdown = Shutdown::new();
        let other = shutdown.clone();
        assert!(shutdown.check().is_ok());
        other.trigger();
        assert!(matches!(shutdown.check(), Err(SyncError::Interrupted)));
    }

    #[test]
    fn malformed_records_are_skipped_but_other_errors_are_not() {
        let bad: Result<()> = Err(SyncError::malformed("date", "never").into());
        assert!(skip_malformed("test", bad).is_ok());
        let worse: Result<()> = Err(anyhow::anyhow!("disk full"));
        assert!(skip_malformed("test", worse).is_err());
    }
}
