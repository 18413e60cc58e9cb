//! Scheduler and registry behavior with providers defined in Rust.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use lifestream::error::is_interrupt;
use lifestream::fetch::{CannedTransport, Fetcher};
use lifestream::models::{ItemFields, RecordKind};
use lifestream::providers::{Provider, SyncContext};
use lifestream::records::{self, NewBookmark};
use lifestream::registry::ProviderRegistry;
use lifestream::scheduler::{run_update, ProviderOutcome};
use lifestream::{db, migrate, timeline};

async fn setup() -> (TempDir, SyncContext) {
    let dir = TempDir::new().unwrap();
    let pool = db::connect_path(&dir.path().join("lifestream.sqlite"))
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();
    let ctx = SyncContext::new(pool, Fetcher::new(Arc::new(CannedTransport::new())));
    (dir, ctx)
}

#[derive(Clone, Copy)]
enum Behavior {
    SaveBookmark,
    Fail,
    Interrupt,
}

struct FakeProvider {
    name: &'static str,
    behavior: Behavior,
    enabled: bool,
    calls: Arc<AtomicUsize>,
}

impl FakeProvider {
    fn boxed(name: &'static str, behavior: Behavior, calls: &Arc<AtomicUsize>) -> Box<dyn Provider> {
        Box::new(Self {
            name,
            behavior,
            enabled: true,
            calls: calls.clone(),
        })
    }
}

async fn save_bookmark(pool: &SqlitePool, url: &str, source: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    let stored = records::upsert_bookmark(
        &mut *tx,
        &NewBookmark {
            url: url.to_string(),
            description: url.to_string(),
            ..NewBookmark::default()
        },
    )
    .await?;
    timeline::upsert_item(&mut *tx, &stored.record, ItemFields::default().source(source)).await?;
    tx.commit().await?;
    Ok(())
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn missing_settings(&self) -> Vec<&'static str> {
        if self.enabled {
            Vec::new()
        } else {
            vec!["token"]
        }
    }

    async fn update(&self, ctx: &SyncContext) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::SaveBookmark => {
                let url = format!("http://example.com/{}", self.name);
                save_bookmark(&ctx.pool, &url, self.name).await
            }
            Behavior::Fail => bail!("remote service is down"),
            Behavior::Interrupt => {
                ctx.shutdown.trigger();
                ctx.ensure_running()
            }
        }
    }
}

async fn bookmark_count(pool: &SqlitePool) -> usize {
    let mut conn = pool.acquire().await.unwrap();
    timeline::items_for_kind(&mut conn, RecordKind::Bookmark)
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn a_failing_provider_does_not_stop_the_others() {
    let (_dir, ctx) = setup().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut registry = ProviderRegistry::new();
    registry.register(FakeProvider::boxed("first", Behavior::SaveBookmark, &calls));
    registry.register(FakeProvider::boxed("second", Behavior::Fail, &calls));
    registry.register(FakeProvider::boxed("third", Behavior::SaveBookmark, &calls));

    let report = run_update(&ctx, &registry, None).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.completed(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.outcome("first"), Some(&ProviderOutcome::Completed));
    assert!(matches!(
        report.outcome("second"),
        Some(ProviderOutcome::Failed(msg)) if msg.contains("remote service is down")
    ));
    assert_eq!(report.outcome("third"), Some(&ProviderOutcome::Completed));
    assert_eq!(bookmark_count(&ctx.pool).await, 2);
}

#[tokio::test]
async fn an_interrupt_skips_the_remaining_providers() {
    let (_dir, ctx) = setup().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut registry = ProviderRegistry::new();
    registry.register(FakeProvider::boxed("first", Behavior::SaveBookmark, &calls));
    registry.register(FakeProvider::boxed("stopper", Behavior::Interrupt, &calls));
    registry.register(FakeProvider::boxed("never", Behavior::SaveBookmark, &calls));

    let err = run_update(&ctx, &registry, None).await.unwrap_err();

    assert!(is_interrupt(&err));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(bookmark_count(&ctx.pool).await, 1);
}

#[tokio::test]
async fn an_interrupt_before_the_run_starts_runs_nothing() {
    let (_dir, ctx) = setup().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut registry = ProviderRegistry::new();
    registry.register(FakeProvider::boxed("first", Behavior::SaveBookmark, &calls));
    ctx.shutdown.trigger();

    let err = run_update(&ctx, &registry, None).await.unwrap_err();
    assert!(is_interrupt(&err));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn selection_keeps_registry_order() {
    let (_dir, ctx) = setup().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut registry = ProviderRegistry::new();
    registry.register(FakeProvider::boxed("alpha", Behavior::SaveBookmark, &calls));
    registry.register(FakeProvider::boxed("beta", Behavior::SaveBookmark, &calls));
    registry.register(FakeProvider::boxed("gamma", Behavior::SaveBookmark, &calls));

    let selected = vec!["gamma".to_string(), "alpha".to_string(), "missing".to_string()];
    let report = run_update(&ctx, &registry, Some(&selected)).await.unwrap();

    let order: Vec<&str> = report.outcomes.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(order, vec!["alpha", "gamma"]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn disabled_providers_are_not_run() {
    let (_dir, ctx) = setup().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut registry = ProviderRegistry::new();
    registry.register(Box::new(FakeProvider {
        name: "off",
        behavior: Behavior::SaveBookmark,
        enabled: false,
        calls: calls.clone(),
    }));
    registry.register(FakeProvider::boxed("on", Behavior::SaveBookmark, &calls));

    assert_eq!(registry.enabled_names(), vec!["on".to_string()]);
    let report = run_update(&ctx, &registry, None).await.unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn registering_a_name_twice_keeps_the_first() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ProviderRegistry::new();
    registry.register(FakeProvider::boxed("dup", Behavior::SaveBookmark, &calls));
    registry.register(FakeProvider::boxed("dup", Behavior::Fail, &calls));
    assert_eq!(registry.len(), 1);
    assert!(!registry.is_empty());
}

#[test]
fn discovery_builds_only_configured_providers() {
    let mut config = lifestream::config::Config::minimal("unused.sqlite");
    config.sync.providers = vec![
        "providers.pownce".to_string(),
        "myspace".to_string(),
        "providers.*".to_string(),
    ];
    config.providers.lastfm = Some(lifestream::config::LastfmConfig {
        username: "jacobian".to_string(),
        ..Default::default()
    });
    config.providers.pownce = Some(lifestream::config::PownceConfig {
        username: "jacob".to_string(),
    });

    let registry = ProviderRegistry::discover(&config);
    assert_eq!(
        registry.names(),
        vec!["pownce".to_string(), "lastfm".to_string()]
    );
}
