//! Delicious bookmarks.
//!
//! Asks `posts/update` whether anything was posted since the last sync, then
//! walks `posts/dates` oldest first and pulls each day at or after the
//! watermark with `posts/get?dt=`. Re-reading a day is harmless: bookmarks
//! upsert by URL.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};

use super::{missing, skip_malformed, Provider, SyncContext};
use crate::config::{Config, DeliciousConfig};
use crate::error::SyncError;
use crate::fetch::{build_url, parse_date, FetchRequest};
use crate::models::{ItemFields, RecordKind, Tags};
use crate::records::{self, NewBookmark};
use crate::timeline::{self, is_epoch, ItemFilter};
use crate::xml::Element;

pub const NAME: &str = "delicious";
const API_ROOT: &str = "https://api.del.icio.us/v1";

pub fn build(config: &Config) -> Result<Box<dyn Provider>> {
    let settings = config.providers.delicious.clone().unwrap_or_default();
    Ok(Box::new(Delicious::new(settings)))
}

pub struct Delicious {
    settings: DeliciousConfig,
}

impl Delicious {
    pub fn new(settings: DeliciousConfig) -> Self {
        Self { settings }
    }

    fn request(&self, method: &str, params: &[(&str, &str)]) -> Result<FetchRequest> {
        let base = format!("{}/{}", API_ROOT, method);
        let url = if params.is_empty() {
            base
        } else {
            build_url(&base, params)?
        };
        Ok(FetchRequest::get(url).basic_auth(&self.settings.username, &self.settings.password))
    }

    async fn handle_post(&self, ctx: &SyncContext, post: &Element) -> Result<()> {
        let href = post
            .attr("href")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| SyncError::malformed("bookmark", "post without href"))?;
        let time = post
            .attr("time")
            .ok_or_else(|| SyncError::malformed("bookmark", format!("{} has no time", href)))?;
        let timestamp = parse_date(time)?;
        debug!(url = href, "handling bookmark");

        let bookmark = NewBookmark {
            url: href.to_string(),
            description: post.attr("description").unwrap_or_default().to_string(),
            extended: post.attr("extended").unwrap_or_default().to_string(),
            thumbnail_url: String::new(),
        };

        let mut tx = ctx.pool.begin().await?;
        let stored = records::upsert_bookmark(&mut *tx, &bookmark).await?;
        timeline::upsert_item(
            &mut *tx,
            &stored.record,
            ItemFields::at(timestamp)
                .tags(Tags::parse(post.attr("tag").unwrap_or_default()))
                .source(NAME)
                .source_id(post.attr("hash").unwrap_or_default()),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Provider for Delicious {
    fn name(&self) -> &str {
        NAME
    }

    fn missing_settings(&self) -> Vec<&'static str> {
        missing(&[
            ("providers.delicious.username", self.settings.username.as_str()),
            ("providers.delicious.password", self.settings.password.as_str()),
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
        debug!(%watermark, "last bookmark sync");

        let last_change = ctx.fetcher.get_xml(self.request("posts/update", &[])?).await?;
        let last_post = last_change
            .attr("time")
            .ok_or_else(|| SyncError::malformed("posts/update", "missing time"))?;
        let last_post = parse_date(last_post)?;
        if !is_epoch(watermark) && last_post <= watermark {
            info!(%last_post, "no new bookmarks; skipping");
            return Ok(());
        }

        let dates = ctx.fetcher.get_xml(self.request("posts/dates", &[])?).await?;
        let mut days: Vec<NaiveDate> = dates
            .descendants("date")
            .into_iter()
            .filter_map(|d| d.attr("date"))
            .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .filter(|day| is_epoch(watermark) || *day >= watermark.date())
            .collect();
        days.sort();

        let mut handled = 0usize;
        for day in days {
            ctx.ensure_running()?;
            let dt = day.format("%Y-%m-%d").to_string();
            debug!(day = %dt, "reading bookmarks");
            let posts = ctx
                .fetcher
                .get_xml(self.request("posts/get", &[("dt", dt.as_str())])?)
                .await?;
            for post in posts.descendants("post") {
                ctx.ensure_running()?;
                skip_malformed(NAME, self.handle_post(ctx, post).await)?;
                handled += 1;
            }
        }

        info!(bookmarks = handled, "delicious sync finished");
        Ok(())
    }
}
