//! Git commits from configured repositories.
//!
//! Each `kind = "git"` repository is cloned once into a local cache and
//! fetched on later runs. Commits authored by the repository's `username`
//! (matched against the author email) since the last commit on the
//! timeline are stored, oldest first.
//!
//! Repositories are isolated: one failing repository is logged and the rest
//! still sync. The provider fails at the end if any repository did.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error, info};

use super::{Provider, SyncContext};
use crate::config::{Config, RepositoryConfig};
use crate::error::is_interrupt;
use crate::fetch::from_unix_local;
use crate::models::{CodeRepository, ItemFields, RecordKind};
use crate::records;
use crate::timeline::{self, ItemFilter};

pub const NAME: &str = "gitscm";

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

pub fn build(config: &Config) -> Result<Box<dyn Provider>> {
    let repositories = config
        .repositories
        .iter()
        .filter(|r| r.kind == "git")
        .cloned()
        .collect();
    let cache_root = match &config.providers.gitscm.cache_dir {
        Some(dir) => dir.clone(),
        None => config
            .db
            .path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".git-cache"),
    };
    Ok(Box::new(Gitscm::new(repositories, cache_root)))
}

pub struct Gitscm {
    repositories: Vec<RepositoryConfig>,
    cache_root: PathBuf,
}

/// One commit as reported by `git log`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub revision: String,
    pub author_email: String,
    pub committed_at: i64,
    pub message: String,
}

impl Gitscm {
    pub fn new(repositories: Vec<RepositoryConfig>, cache_root: PathBuf) -> Self {
        Self {
            repositories,
            cache_root,
        }
    }

    fn clone_dir(&self, url: &str) -> PathBuf {
        self.cache_root.join(short_hash(url))
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
        let dir = self.clone_dir(&repo.url);
        let log = tokio::task::spawn_blocking(move || -> Result<String> {
            sync_clone(&url, &dir)?;
            git_log_since(&dir, since)
        })
        .await
        .context("git worker panicked")??;

        let mut commits: Vec<LogEntry> = parse_log(&log)
            .into_iter()
            .filter(|c| c.author_email.eq_ignore_ascii_case(&repo.username))
            .collect();
        commits.sort_by_key(|c| c.committed_at);
        debug!(commits = commits.len(), "handling commits");

        let mut saved = 0usize;
        for commit in &commits {
            ctx.ensure_running()?;
            if self.handle_commit(ctx, repo, &source, commit).await? {
                saved += 1;
            }
        }
        Ok(saved)
    }

    async fn handle_commit(
        &self,
        ctx: &SyncContext,
        repo: &CodeRepository,
        source: &str,
        commit: &LogEntry,
    ) -> Result<bool> {
        let short: String = commit.revision.chars().take(7).collect();
        debug!(revision = %short, url = %repo.url, "handling commit");
        let timestamp = from_unix_local(commit.committed_at)?;

        let mut tx = ctx.pool.begin().await?;
        let stored =
            records::get_or_create_commit(&mut *tx, &repo.id, &commit.revision, &commit.message)
                .await?;
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
impl Provider for Gitscm {
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

        info!(commits = saved, "gitscm sync finished");
        if failed > 0 {
            bail!("{} of {} repositories failed to sync", failed, repos.len());
        }
        Ok(())
    }
}

/// Split `git log` output written with `LOG_FORMAT` into entries.
pub fn parse_log(output: &str) -> Vec<LogEntry> {
    output
        .split(RECORD_SEP)
        .filter_map(|record| {
            let record = record.trim_start_matches('\n');
            if record.trim().is_empty() {
                return None;
            }
            let mut fields = record.splitn(4, FIELD_SEP);
            let revision = fields.next()?.trim().to_string();
            let author_email = fields.next()?.trim().to_string();
            let committed_at = fields.next()?.trim().parse().ok()?;
            let message = fields.next().unwrap_or_default().trim().to_string();
            Some(LogEntry {
                revision,
                author_email,
                committed_at,
                message,
            })
        })
        .collect()
}

const LOG_FORMAT: &str = "--format=%H%x1f%ae%x1f%ct%x1f%B%x1e";

fn sync_clone(url: &str, dir: &Path) -> Result<()> {
    if dir.join(".git").exists() {
        git_pull(dir)
    } else {
        git_clone(url, dir)
    }
}

fn git_clone(url: &str, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create cache directory: {}", dest.display()))?;

    let output = Command::new("git")
        .arg("clone")
        .arg(url)
        .arg(dest)
        .output()
        .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git clone failed: {}", stderr.trim());
    }
    Ok(())
}

fn git_pull(repo_dir: &Path) -> Result<()> {
    let output = Command::new("git")
        .args(["fetch", "origin"])
        .current_dir(repo_dir)
        .output()
        .with_context(|| "Failed to execute 'git fetch'")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git fetch failed: {}", stderr.trim());
    }

    let output = Command::new("git")
        .args(["reset", "--hard", "origin/HEAD"])
        .current_dir(repo_dir)
        .output()
        .with_context(|| "Failed to execute 'git reset'")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git reset failed: {}", stderr.trim());
    }
    Ok(())
}

fn git_log_since(repo_dir: &Path, since: NaiveDateTime) -> Result<String> {
    let since = format!("--since={}", since.format("%Y-%m-%d %H:%M:%S"));
    let output = Command::new("git")
        .args(["log", since.as_str(), LOG_FORMAT])
        .current_dir(repo_dir)
        .output()
        .with_context(|| "Failed to execute 'git log'")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git log failed: {}", stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(kind: &str) -> RepositoryConfig {
        RepositoryConfig {
            kind: kind.to_string(),
            name: "jellyroll".to_string(),
            slug: String::new(),
            username: "jacob@example.com".to_string(),
            url: "https://example.com/jellyroll.git".to_string(),
            public_changeset_template: String::new(),
        }
    }

    #[test]
    fn parses_log_records() {
        let out = "abc123\u{1f}jacob@example.com\u{1f}1250601047\u{1f}Fix the thing\n\nLonger body\n\u{1e}\n\
                   def456\u{1f}other@example.com\u{1f}1250600000\u{1f}Other\n\u{1e}\n";
        let entries = parse_log(out);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].revision, "abc123");
        assert_eq!(entries[0].committed_at, 1250601047);
        assert_eq!(entries[0].message, "Fix the thing\n\nLonger body");
        assert_eq!(entries[1].author_email, "other@example.com");
    }

    #[test]
    fn garbage_records_are_ignored() {
        assert!(parse_log("").is_empty());
        assert!(parse_log("abc\u{1f}me\u{1f}not-a-time\u{1f}msg\u{1e}").is_empty());
    }

    #[test]
    fn only_git_repositories_enable_the_provider() {
        let mut config = Config::minimal("/data/lifestream.sqlite");
        config.repositories.push(repo("svn"));
        assert!(!build(&config).unwrap().enabled());

        config.repositories.push(repo("git"));
        assert!(build(&config).unwrap().enabled());
    }

    #[test]
    fn clones_live_next_to_the_database() {
        let git = Gitscm::new(vec![repo("git")], PathBuf::from("/data/.git-cache"));
        let dir = git.clone_dir("https://example.com/jellyroll.git");
        assert!(dir.starts_with("/data/.git-cache"));
        assert_eq!(dir.file_name().unwrap().len(), 12);
    }
}
