//! YouTube favorites.
//!
//! Pages through the user's favorites feed 50 entries at a time until a
//! short page comes back. A video already stored is left alone.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{missing, skip_malformed, Provider, SyncContext};
use crate::config::{Config, YoutubeConfig};
use crate::error::SyncError;
use crate::fetch::{build_url, join_path, parse_date, FetchRequest};
use crate::models::{ItemFields, Tags};
use crate::records;
use crate::timeline;
use crate::xml::Element;

pub const NAME: &str = "youtube";
const USERS_ROOT: &str = "http://gdata.youtube.com/feeds/api/users";
const TAG_SCHEME: &str = "http://gdata.youtube.com/schemas/2007/keywords.cat";
const PAGE_SIZE: usize = 50;

const SOURCE_NAME: &str = "YouTube";
const SOURCE_HOME: &str = "http://www.youtube.com/";
const SOURCE_EMBED: &str = "http://www.youtube.com/v/%s";

pub fn build(config: &Config) -> Result<Box<dyn Provider>> {
    let settings = config.providers.youtube.clone().unwrap_or_default();
    Ok(Box::new(Youtube::new(settings)))
}

pub struct Youtube {
    settings: YoutubeConfig,
}

/// The watch page of an entry: its alternate link, or one built from the
/// video id.
fn video_url(entry: &Element) -> Option<String> {
    let alternate = entry
        .children_named("link")
        .find(|l| l.attr("rel") == Some("alternate"))
        .and_then(|l| l.attr("href"));
    if let Some(href) = alternate {
        return Some(href.to_string());
    }
    entry
        .descendants("videoid")
        .first()
        .map(|id| id.text.trim())
        .filter(|id| !id.is_empty())
        .map(|id| format!("http://www.youtube.com/watch?v={}", id))
}

fn keyword_tags(entry: &Element) -> Tags {
    entry
        .children_named("category")
        .filter(|c| c.attr("scheme") == Some(TAG_SCHEME))
        .filter_map(|c| c.attr("term"))
        .map(str::to_string)
        .collect()
}

impl Youtube {
    pub fn new(settings: YoutubeConfig) -> Self {
        Self { settings }
    }

    fn page_url(&self, start_index: usize) -> Result<String> {
        let base = join_path(
            USERS_ROOT,
            &[self.settings.username.as_str(), "favorites"],
        )?;
        let start = start_index.to_string();
        let max = PAGE_SIZE.to_string();
        build_url(
            &base,
            &[
                ("v", "2"),
                ("start-index", start.as_str()),
                ("max-results", max.as_str()),
            ],
        )
    }

    async fn handle_video(&self, ctx: &SyncContext, entry: &Element) -> Result<()> {
        let title = entry.child_text("title").unwrap_or_default();
        let url = video_url(entry)
            .ok_or_else(|| SyncError::malformed("video", format!("'{}' has no link", title)))?;
        let published = entry
            .child_text("published")
            .ok_or_else(|| SyncError::malformed("video", format!("'{}' has no date", title)))?;
        let timestamp = parse_date(published)?;
        debug!(title, "handling video");

        let mut tx = ctx.pool.begin().await?;
        let source_id =
            records::ensure_video_source(&mut *tx, SOURCE_NAME, SOURCE_HOME, SOURCE_EMBED).await?;
        let stored = records::get_or_create_video(&mut *tx, &source_id, title, &url).await?;
        if stored.created {
            timeline::upsert_item(
                &mut *tx,
                &stored.record,
                ItemFields::at(timestamp)
                    .tags(keyword_tags(entry))
                    .source(NAME),
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Provider for Youtube {
    fn name(&self) -> &str {
        NAME
    }

    fn missing_settings(&self) -> Vec<&'static str> {
        missing(&[("providers.youtube.username", self.settings.username.as_str())])
    }

    async fn update(&self, ctx: &SyncContext) -> Result<()> {
        let mut start_index = 1usize;
        let mut handled = 0usize;
        loop {
            ctx.ensure_running()?;
            debug!(
                from = start_index,
                to = start_index + PAGE_SIZE - 1,
                "fetching videos"
            );
            let feed = ctx
                .fetcher
                .get_xml(FetchRequest::get(self.page_url(start_index)?))
                .await?;

            let entries = feed.descendants("entry");
            for entry in &entries {
                ctx.ensure_running()?;
                skip_malformed(NAME, self.handle_video(ctx, entry).await)?;
                handled += 1;
            }
            if entries.len() < PAGE_SIZE {
                debug!("ran out of results; finishing");
                break;
            }
            start_index += PAGE_SIZE;
        }

        info!(videos = handled, "youtube sync finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml;

    const ENTRY: &[u8] = br#"<entry xmlns="http://www.w3.org/2005/Atom" xmlns:media="http://search.yahoo.com/mrss/" xmlns:yt="http://gdata.youtube.com/schemas/2007">
  <published>2009-08-01T10:00:00.000Z</published>
  <category scheme="http://schemas.google.com/g/2005#kind" term="http://gdata.youtube.com/schemas/2007#video"/>
  <category scheme="http://gdata.youtube.com/schemas/2007/keywords.cat" term="cats"/>
  <category scheme="http://gdata.youtube.com/schemas/2007/keywords.cat" term="piano"/>
  <title>Keyboard Cat</title>
  <media:group><yt:videoid>J---aiyznGQ</yt:videoid></media:group>
</entry>"#;

    #[test]
    fn keyword_categories_become_tags() {
        let entry = xml::parse(ENTRY).unwrap();
        assert_eq!(keyword_tags(&entry).to_string(), "cats piano");
    }

    #[test]
    fn url_falls_back_to_the_video_id() {
        let entry = xml::parse(ENTRY).unwrap();
        assert_eq!(
            video_url(&entry).as_deref(),
            Some("http://www.youtube.com/watch?v=J---aiyznGQ")
        );
    }
}
