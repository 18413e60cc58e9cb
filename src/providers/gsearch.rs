//! Google search history.
//!
//! The history RSS feed mixes three kinds of entry, told apart by their
//! first category: a web query, a result page visited from a query, and a
//! video watched. Results name their query by `query_guid` and are attached
//! to it only if the query is already on the timeline.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{missing, skip_malformed, Provider, SyncContext};
use crate::config::{Config, GsearchConfig};
use crate::error::SyncError;
use crate::fetch::{parse_date, FetchRequest};
use crate::models::{ItemFields, RecordKind, RecordRef};
use crate::records;
use crate::timeline::{self, ItemFilter};
use crate::xml::Element;

pub const NAME: &str = "gsearch";
const HISTORY_URL: &str = "https://www.google.com/searchhistory/?output=rss";

const ENGINE_NAME: &str = "Google";
const ENGINE_HOME: &str = "http://www.google.com/";
const ENGINE_TEMPLATE: &str = "http://www.google.com/search?q=%s";

const VIDEO_SOURCE_NAME: &str = "Google";
const VIDEO_SOURCE_HOME: &str = "http://video.google.com/";
const VIDEO_SOURCE_EMBED: &str = "http://video.google.com/googleplayer.swf?docId=%s";

pub fn build(config: &Config) -> Result<Box<dyn Provider>> {
    let settings = config.providers.gsearch.clone().unwrap_or_default();
    Ok(Box::new(Gsearch::new(settings)))
}

pub struct Gsearch {
    settings: GsearchConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    WebQuery,
    WebResult,
    VideoResult,
}

impl EntryKind {
    fn of(entry: &Element) -> Option<Self> {
        match entry.child_text("category")? {
            "web query" => Some(EntryKind::WebQuery),
            "web result" => Some(EntryKind::WebResult),
            "video result" => Some(EntryKind::VideoResult),
            _ => None,
        }
    }
}

/// The history id of a query: the path of its guid URL, without the
/// `/searchhistory/` prefix.
fn query_guid(guid: &str) -> String {
    let path = url::Url::parse(guid)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| guid.to_string());
    path.replace("/searchhistory/", "")
}

fn entry_time(entry: &Element) -> Result<chrono::NaiveDateTime> {
    let raw = entry
        .child_text("pubDate")
        .or_else(|| entry.child_text("updated"))
        .ok_or_else(|| SyncError::malformed("history entry", "missing date"))?;
    parse_date(raw)
}

impl Gsearch {
    pub fn new(settings: GsearchConfig) -> Self {
        Self { settings }
    }

    async fn handle_query(&self, ctx: &SyncContext, entry: &Element) -> Result<()> {
        let guid = query_guid(entry.child_text("guid").unwrap_or_default());
        if guid.is_empty() {
            return Err(SyncError::malformed("web query", "missing guid").into());
        }
        let query = entry.child_text("title").unwrap_or_default();
        let timestamp = entry_time(entry)?;
        debug!(query, "handling query");

        let mut tx = ctx.pool.begin().await?;
        let filter = ItemFilter::source(NAME).with_source_id(guid.as_str());
        if timeline::item_exists(&mut *tx, Some(RecordKind::WebSearch), &filter).await? {
            return Ok(());
        }
        let engine_id =
            records::ensure_search_engine(&mut *tx, ENGINE_NAME, ENGINE_HOME, ENGINE_TEMPLATE)
                .await?;
        let stored = records::get_or_create_web_search(&mut *tx, &engine_id, query, &guid).await?;
        timeline::upsert_item(
            &mut *tx,
            &stored.record,
            ItemFields::at(timestamp).source(NAME).source_id(guid),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn handle_result(&self, ctx: &SyncContext, entry: &Element) -> Result<()> {
        let guid = entry.child_text("query_guid").unwrap_or_default();
        let title = entry.child_text("title").unwrap_or_default();
        let url = entry.child_text("link").unwrap_or_default();
        debug!(url, "adding search result");

        let mut tx = ctx.pool.begin().await?;
        let search = timeline::find_item(
            &mut *tx,
            Some(RecordKind::WebSearch),
            &ItemFilter::source(NAME).with_source_id(guid),
        )
        .await?;
        let Some(item) = search else {
            debug!(guid, "skipping result for an unknown query");
            return Ok(());
        };
        if let RecordRef::WebSearch(search_id) = &item.record {
            records::add_search_result(&mut *tx, search_id, title, url).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn handle_video(&self, ctx: &SyncContext, entry: &Element) -> Result<()> {
        let url = entry
            .child_text("link")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SyncError::malformed("video result", "missing link"))?;
        let title = entry.child_text("title").unwrap_or_default();
        let timestamp = entry_time(entry)?;
        debug!(title, "adding viewed video");

        let mut tx = ctx.pool.begin().await?;
        let source_id = records::ensure_video_source(
            &mut *tx,
            VIDEO_SOURCE_NAME,
            VIDEO_SOURCE_HOME,
            VIDEO_SOURCE_EMBED,
        )
        .await?;
        let stored = records::get_or_create_video(&mut *tx, &source_id, title, url).await?;
        timeline::upsert_item(&mut *tx, &stored.record, ItemFields::at(timestamp).source(NAME))
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Provider for Gsearch {
    fn name(&self) -> &str {
        NAME
    }

    fn missing_settings(&self) -> Vec<&'static str> {
        missing(&[
            ("providers.gsearch.username", self.settings.username.as_str()),
            ("providers.gsearch.password", self.settings.password.as_str()),
        ])
    }

    async fn update(&self, ctx: &SyncContext) -> Result<()> {
        let request = FetchRequest::get(HISTORY_URL)
            .basic_auth(self.settings.username.as_str(), self.settings.password.as_str());
        let feed = ctx.fetcher.get_xml(request).await?;

        // The feed is newest first; queries must land before their results.
        let mut entries = feed.descendants("item");
        entries.reverse();

        let mut handled = 0usize;
        for entry in entries {
            ctx.ensure_running()?;
            let result = match EntryKind::of(entry) {
                Some(EntryKind::WebQuery) => self.handle_query(ctx, entry).await,
                Some(EntryKind::WebResult) => self.handle_result(ctx, entry).await,
                Some(EntryKind::VideoResult) => self.handle_video(ctx, entry).await,
                None => {
                    debug!("ignoring uncategorized history entry");
                    continue;
                }
            };
            skip_malformed(NAME, result)?;
            handled += 1;
        }

        info!(entries = handled, "gsearch sync finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml;

    #[test]
    fn query_guid_strips_the_history_path() {
        assert_eq!(
            query_guid("http://www.google.com/searchhistory/abc123"),
            "abc123"
        );
        assert_eq!(query_guid("abc123"), "abc123");
    }

    #[test]
    fn first_category_decides_the_kind() {
        let doc = xml::parse(
            br#"<item><category>web result</category><category>web query</category></item>"#,
        )
        .unwrap();
        assert_eq!(EntryKind::of(&doc), Some(EntryKind::WebResult));

        let doc = xml::parse(b"<item><title>x</title></item>").unwrap();
        assert_eq!(EntryKind::of(&doc), None);
    }
}
