//! Subversion revisions from configured repositories.
//!
//! Each `kind = "svn"` repository is read remotely with `svn log --xml`
//! from the last revision on the timeline up to `HEAD`. Only revisions by
//! the repository's `username` are stored, oldest first.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::process::Command;
use tracing::{debug, error, info};

use super::{skip_malformed, Provider, SyncContext};
use crate::config::{Config, RepositoryConfig};
use crate::error::{is_interrupt, SyncError};
use crate::fetch::parse_date;
use crate::models::{CodeRepository, ItemFields, RecordKind};
use crate::records;
use crate::timeline::{self, ItemFilter};
use crate::xml::{self, Element};

pub const NAME: &str = "svn";

pub fn build(config: &Config) -> Result<Box<dyn Provider>> {
    let repositories = config
        .repositories
        .iter()
        .filter(|r| r.kind == "svn")
        .cloned()
        .collect();
    Ok(Box::new(Svn::new(repositories)))
}

pub struct Svn {
    repositories: Vec<RepositoryConfig>,
}

/// One `<logentry>` from `svn log --xml`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub revision: u64,
    pub author: String,
    pub date: String,
    pub message: String,
}

impl Svn {
    pub fn new(repositories: Vec<RepositoryConfig>) -> Self {
        Self { repositories }
    }

    async fn update_repository(&self, ctx: &SyncContext, repo: &CodeRepository) -> Result<usize> {
        let source = format!("{}:{}", NAME, repo.url);
        let since = {
            let mut conn = ctx.pool.acquire().await?;
            timeline::last_update_timestamp(
                &mut conn,
                RecordKind::CodeCommit,
                &ItemFilter::source(source.as_str()),
            )
            .await?
        };
        info!(url = %repo.url, %since, "updating changes");

        let url = repo.url.clone();
        let output = tokio::task::spawn_blocking(move || svn_log_since(&url, since))
            .await
            .context("svn worker panicked")??;
        let doc = xml::parse(&output).context("reading svn log output")?;

        let mut revisions: Vec<LogEntry> = parse_log(&doc)
            .into_iter()
            .filter(|r| r.author == repo.username)
            .collect();
        revisions.sort_by_key(|r| r.revision);
        debug!(revisions = revisions.len(), "handling revisions");

        let mut saved = 0usize;
        for entry in &revisions {
            ctx.ensure_running()?;
            match self.handle_revision(ctx, repo, &source, entry).await {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(err) => skip_malformed(NAME, Err(err))?,
            }
        }
        Ok(saved)
    }

    async fn handle_revision(
        &self,
        ctx: &SyncContext,
        repo: &CodeRepository,
        source: &str,
        entry: &LogEntry,
    ) -> Result<bool> {
        debug!(revision = entry.revision, url = %repo.url, "handling revision");
        let timestamp = parse_date(&entry.date)?;
        let revision = entry.revision.to_string();

        let mut tx = ctx.pool.begin().await?;
        let stored =
            records::get_or_create_commit(&mut *tx, &repo.id, &revision, &entry.message).await?;
        if stored.created {
            timeline::upsert_item(
                &mut *tx,
                &stored.record,
                ItemFields::at(timestamp).source(source),
            )
            .await?;
        }
        tx.commit().await?;
        Ok(stored.created)
    }
}

#[async_trait]
impl Provider for Svn {
    fn name(&self) -> &str {
        NAME
    }

    fn missing_settings(&self) -> Vec<&'static str> {
        if self.repositories.is_empty() {
            vec!["repositories"]
        } else {
            Vec::new()
        }
    }

    async fn update(&self, ctx: &SyncContext) -> Result<()> {
        let mut repos = Vec::with_capacity(self.repositories.len());
        {
            let mut conn = ctx.pool.acquire().await?;
            for config in &self.repositories {
                repos.push(records::ensure_code_repository(&mut conn, config).await?);
            }
        }

        let mut failed = 0usize;
        let mut saved = 0usize;
        for repo in &repos {
            ctx.ensure_running()?;
            match self.update_repository(ctx, repo).await {
                Ok(n) => saved += n,
                Err(err) if is_interrupt(&err) => return Err(err),
                Err(err) => {
                    error!(url = %repo.url, error = %format!("{:#}", err), "repository sync failed");
                    failed += 1;
                }
            }
        }

        info!(revisions = saved, "svn sync finished");
        if failed > 0 {
            bail!("{} of {} repositories failed to sync", failed, repos.len());
        }
        Ok(())
    }
}

/// Collect the `<logentry>` elements of an `svn log --xml` document.
/// Entries without a numeric revision are dropped.
pub fn parse_log(doc: &Element) -> Vec<LogEntry> {
    doc.descendants("logentry")
        .into_iter()
        .filter_map(|el| {
            let revision = el.attr("revision")?.trim().parse().ok()?;
            Some(LogEntry {
                revision,
                author: el.child_text("author").unwrap_or_default().to_string(),
                date: el.child_text("date").unwrap_or_default().to_string(),
                message: el.child_text("msg").unwrap_or_default().to_string(),
            })
        })
        .collect()
}

fn svn_log_since(url: &str, since: NaiveDateTime) -> Result<Vec<u8>> {
    let range = format!("{{{}}}:HEAD", since.format("%Y-%m-%dT%H:%M:%S"));
    let output = Command::new("svn")
        .args(["log", "--xml", "--non-interactive", "-r", range.as_str(), url])
        .output()
        .with_context(|| "Failed to execute 'svn log'. Is subversion installed?")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SyncError::Request {
            url: url.to_string(),
            message: format!("svn log failed: {}", stderr.trim()),
        }
        .into());
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<log>
<logentry revision="41">
<author>jacob</author>
<date>2008-06-09T17:16:00.000000Z</date>
<msg>Fixed #12 &amp; tidied up.</msg>
</logentry>
<logentry revision="42">
<author>adrian</author>
<date>2008-06-10T09:00:00.000000Z</date>
<msg>Other work</msg>
</logentry>
<logentry revision="head">
<author>jacob</author>
</logentry>
</log>"#;

    fn repo(kind: &str) -> RepositoryConfig {
        RepositoryConfig {
            kind: kind.to_string(),
            name: "django".to_string(),
            slug: String::new(),
            username: "jacob".to_string(),
            url: "http://code.djangoproject.com/svn/django/trunk".to_string(),
            public_changeset_template: "http://code.djangoproject.com/changeset/%s".to_string(),
        }
    }

    #[test]
    fn parses_log_entries() {
        let doc = xml::parse(LOG).unwrap();
        let entries = parse_log(&doc);
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0],
            LogEntry {
                revision: 41,
                author: "jacob".to_string(),
                date: "2008-06-09T17:16:00.000000Z".to_string(),
                message: "Fixed #12 & tidied up.".to_string(),
            }
        );
        assert_eq!(entries[1].author, "adrian");
        assert!(parse_date(&entries[0].date).is_ok());
    }

    #[test]
    fn only_svn_repositories_enable_the_provider() {
        let mut config = Config::minimal("/data/lifestream.sqlite");
        config.repositories.push(repo("git"));
        assert!(!build(&config).unwrap().enabled());

        config.repositories.push(repo("svn"));
        assert!(build(&config).unwrap().enabled());
    }
}
