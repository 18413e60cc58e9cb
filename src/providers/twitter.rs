//! Twitter statuses, read from the user's timeline RSS feed.
//!
//! Statuses carry no stable id in the feed, so each one is fingerprinted
//! from its text, link and time; a fingerprint already on the timeline is
//! skipped.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{missing, skip_malformed, Provider, SyncContext};
use crate::config::{Config, TwitterConfig};
use crate::error::SyncError;
use crate::fetch::{join_path, parse_date, FetchRequest};
use crate::models::{ItemFields, RecordKind};
use crate::records;
use crate::timeline::{self, ItemFilter};
use crate::xml::Element;

pub const NAME: &str = "twitter";
const TIMELINE_ROOT: &str = "http://twitter.com/statuses/user_timeline";

pub fn build(config: &Config) -> Result<Box<dyn Provider>> {
    let settings = config.providers.twitter.clone().unwrap_or_default();
    Ok(Box::new(Twitter::new(settings)))
}

pub struct Twitter {
    settings: TwitterConfig,
}

/// Hex SHA-256 of message, link and timestamp.
pub fn fingerprint(message: &str, url: &str, timestamp: NaiveDateTime) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hasher.update(url.as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Twitter {
    pub fn new(settings: TwitterConfig) -> Self {
        Self { settings }
    }

    fn feed_url(&self) -> Result<String> {
        let file = format!("{}.rss", self.settings.username);
        join_path(TIMELINE_ROOT, &[file.as_str()])
    }

    async fn handle_status(&self, ctx: &SyncContext, el: &Element) -> Result<bool> {
        let message = el
            .child_text("title")
            .filter(|m| !m.is_empty())
            .ok_or_else(|| SyncError::malformed("status", "missing text"))?;
        let url = el.child_text("link").unwrap_or_default();
        let published = el
            .child_text("pubDate")
            .ok_or_else(|| SyncError::malformed("status", format!("{} has no date", url)))?;
        let timestamp = parse_date(published)?;
        let source_id = fingerprint(message, url, timestamp);

        let mut tx = ctx.pool.begin().await?;
        let seen = timeline::item_exists(
            &mut *tx,
            Some(RecordKind::Message),
            &ItemFilter::source(NAME).with_source_id(source_id.as_str()),
        )
        .await?;
        if seen {
            return Ok(false);
        }

        debug!(message, "saving status");
        let stored = records::get_or_create_message(&mut *tx, message, url).await?;
        timeline::upsert_item(
            &mut *tx,
            &stored.record,
            ItemFields::at(timestamp).source(NAME).source_id(source_id),
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl Provider for Twitter {
    fn name(&self) -> &str {
        NAME
    }

    fn missing_settings(&self) -> Vec<&'static str> {
        missing(&[("providers.twitter.username", self.settings.username.as_str())])
    }

    async fn update(&self, ctx: &SyncContext) -> Result<()> {
        let feed = ctx
            .fetcher
            .get_xml(FetchRequest::get(self.feed_url()?))
            .await?;

        let mut saved = 0usize;
        for status in feed.descendants("item") {
            ctx.ensure_running()?;
            match self.handle_status(ctx, status).await {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(err) => skip_malformed(NAME, Err(err))?,
            }
        }

        info!(statuses = saved, "twitter sync finished");
        Ok(())
    }
}
