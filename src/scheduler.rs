//! Update orchestration.
//!
//! Runs providers one after another. A provider that fails is logged and
//! the run moves on; an operator interrupt stops the whole run.

use anyhow::Result;
use tracing::{error, info};

use crate::error::is_interrupt;
use crate::providers::SyncContext;
use crate::registry::ProviderRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    Completed,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct UpdateReport {
    pub outcomes: Vec<(String, ProviderOutcome)>,
}

impl UpdateReport {
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == ProviderOutcome::Completed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.completed()
    }

    pub fn outcome(&self, provider: &str) -> Option<&ProviderOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == provider)
            .map(|(_, o)| o)
    }
}

/// Update every provider in `registry`, or only those named in `selected`.
///
/// Providers run in registry order either way. A selected name that is not
/// registered and enabled is logged and skipped.
pub async fn run_update(
    ctx: &SyncContext,
    registry: &ProviderRegistry,
    selected: Option<&[String]>,
) -> Result<UpdateReport> {
    if let Some(selected) = selected {
        for name in selected {
            if !registry.find(name).is_some_and(|p| p.enabled()) {
                error!(provider = %name, "requested provider is not available");
            }
        }
    }

    let mut report = UpdateReport::default();
    for provider in registry.iter() {
        let name = provider.name();
        if let Some(selected) = selected {
            if !selected.iter().any(|s| s == name) {
                continue;
            }
        }
        if !provider.enabled() {
            continue;
        }

        ctx.ensure_running()?;
        info!(provider = name, "updating");
        let outcome = match provider.update(ctx).await {
            Ok(()) => {
                info!(provider = name, "update finished");
                ProviderOutcome::Completed
            }
            Err(err) if is_interrupt(&err) => return Err(err),
            Err(err) => {
                let message = format!("{:#}", err);
                error!(provider = name, error = %message, "update failed");
                ProviderOutcome::Failed(message)
            }
        };
        report.outcomes.push((name.to_string(), outcome));
    }

    info!(
        completed = report.completed(),
        failed = report.failed(),
        "update run finished"
    );
    Ok(report)
}
