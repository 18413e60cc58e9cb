//! Ma.gnolia bookmarks.
//!
//! The watermark goes to the API as `from=`, so only newer bookmarks come
//! back. Private bookmarks never reach the timeline.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{missing, skip_malformed, Provider, SyncContext};
use crate::config::{Config, MagnoliaConfig};
use crate::error::SyncError;
use crate::fetch::{build_url, parse_date, FetchRequest};
use crate::models::{ItemFields, RecordKind, Tags};
use crate::records::{self, NewBookmark};
use crate::timeline::{self, is_epoch, ItemFilter};
use crate::xml::Element;

pub const NAME: &str = "magnolia";
const FIND_URL: &str = "http://ma.gnolia.com/api/rest/1/bookmarks_find/";

pub fn build(config: &Config) -> Result<Box<dyn Provider>> {
    let settings = config.providers.magnolia.clone().unwrap_or_default();
    Ok(Box::new(Magnolia::new(settings)))
}

pub struct Magnolia {
    settings: MagnoliaConfig,
}

impl Magnolia {
    pub fn new(settings: MagnoliaConfig) -> Self {
        Self { settings }
    }

    async fn handle_bookmark(&self, ctx: &SyncContext, el: &Element) -> Result<bool> {
        let id = el
            .attr("id")
            .ok_or_else(|| SyncError::malformed("bookmark", "missing id"))?;
        if el.attr("private") != Some("false") {
            debug!(id, "skipping private bookmark");
            return Ok(false);
        }
        let url = el
            .child_text("url")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SyncError::malformed("bookmark", format!("{} has no url", id)))?;
        let created = el
            .attr("created")
            .ok_or_else(|| SyncError::malformed("bookmark", format!("{} has no date", id)))?;
        let timestamp = parse_date(created)?;

        let tags: Tags = el
            .child("tags")
            .map(|t| {
                t.children_named("tag")
                    .filter_map(|tag| tag.attr("name"))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let bookmark = NewBookmark {
            url: url.to_string(),
            description: el.child_text("title").unwrap_or_default().to_string(),
            extended: el.child_text("description").unwrap_or_default().to_string(),
            thumbnail_url: el.child_text("screenshot").unwrap_or_default().to_string(),
        };

        let mut tx = ctx.pool.begin().await?;
        let stored = records::upsert_bookmark(&mut *tx, &bookmark).await?;
        timeline::upsert_item(
            &mut *tx,
            &stored.record,
            ItemFields::at(timestamp)
                .tags(tags)
                .source(NAME)
                .source_id(id),
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }
}

/// Order by creation time. Undated bookmarks go first and are skipped later.
fn oldest_first(bookmarks: &mut [&Element]) {
    bookmarks.sort_by_key(|el| el.attr("created").and_then(|c| parse_date(c).ok()));
}

#[async_trait]
impl Provider for Magnolia {
    fn name(&self) -> &str {
        NAME
    }

    fn missing_settings(&self) -> Vec<&'static str> {
        missing(&[
            ("providers.magnolia.api_key", self.settings.api_key.as_str()),
            ("providers.magnolia.username", self.settings.username.as_str()),
        ])
    }

    async fn update(&self, ctx: &SyncContext) -> Result<()> {
        let watermark = {
            let mut conn = ctx.pool.acquire().await?;
            timeline::last_update_timestamp(
                &mut conn,
                RecordKind::Bookmark,
                &ItemFilter::source(NAME),
            )
            .await?
        };

        let from = watermark.format("%Y-%m-%dT%H:%M:%S").to_string();
        let mut params: Vec<(&str, &str)> = vec![("person", self.settings.username.as_str())];
        if !is_epoch(watermark) {
            params.push(("from", from.as_str()));
        }
        params.push(("api_key", self.settings.api_key.as_str()));

        let doc = ctx
            .fetcher
            .get_xml(FetchRequest::get(build_url(FIND_URL, &params)?))
            .await?;

        let mut stored = 0usize;
        let mut bookmarks = doc.descendants("bookmark");
        oldest_first(&mut bookmarks);
        for el in bookmarks {
            ctx.ensure_running()?;
            match self.handle_bookmark(ctx, el).await {
                Ok(true) => stored += 1,
                Ok(false) => {}
                Err(err) => skip_malformed(NAME, Err(err))?,
            }
        }

        info!(bookmarks = stored, "magnolia sync finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml;

    #[test]
    fn bookmarks_are_ordered_by_instant_not_by_text() {
        let doc = xml::parse(
            br#"<bookmarks>
                 <bookmark id="late" created="2009-08-18T08:00:00Z"/>
                 <bookmark id="early" created="2009-08-18T09:00:00+02:00"/>
                 <bookmark id="undated"/>
               </bookmarks>"#,
        )
        .unwrap();
        let mut bookmarks = doc.descendants("bookmark");
        oldest_first(&mut bookmarks);
        let ids: Vec<&str> = bookmarks.iter().filter_map(|b| b.attr("id")).collect();
        assert_eq!(ids, vec!["undated", "early", "late"]);
    }
}
