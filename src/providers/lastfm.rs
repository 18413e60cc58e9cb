//! Last.fm listening history.
//!
//! Reads the user's recent tracks, ignoring plays older than the newest one
//! already on the timeline. A play is identified by a fingerprint of artist,
//! track and time, so a play seen on an earlier run is skipped.
//! Tags come from the artist's and the track's top tags, keeping only those
//! used at least `tag_usage_threshold` times.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use tracing::{debug, info};

use super::{missing, skip_malformed, Provider, SyncContext};
use crate::config::{Config, LastfmConfig};
use crate::error::{http_status, is_decode, is_timeout, SyncError};
use crate::fetch::{from_unix_local, join_path, FetchRequest};
use crate::models::{ItemFields, RecordKind, Tags};
use crate::records::{self, NewTrack};
use crate::timeline::{self, ItemFilter};
use crate::xml::Element;

pub const NAME: &str = "lastfm";
const API_ROOT: &str = "http://ws.audioscrobbler.com/1.0";
const MAX_TAG_LEN: usize = 50;
const TAG_CACHE_SIZE: usize = 512;

/// Top tags by lookup URL, for one run.
type TagCache = LruCache<String, Vec<String>>;

fn tag_cache() -> TagCache {
    LruCache::new(NonZeroUsize::new(TAG_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN))
}

pub fn build(config: &Config) -> Result<Box<dyn Provider>> {
    let settings = config.providers.lastfm.clone().unwrap_or_default();
    Ok(Box::new(Lastfm::new(settings)))
}

pub struct Lastfm {
    settings: LastfmConfig,
}

struct Play {
    artist_name: String,
    artist_mbid: String,
    track_name: String,
    track_mbid: String,
    url: String,
    played_at: NaiveDateTime,
}

impl Lastfm {
    pub fn new(settings: LastfmConfig) -> Self {
        Self { settings }
    }

    fn recent_tracks_url(&self) -> Result<String> {
        let base = join_path(
            API_ROOT,
            &["user", self.settings.username.as_str(), "recenttracks.xml"],
        )?;
        Ok(format!("{}?limit=100", base))
    }

    async fn tags_for_play(
        &self,
        ctx: &SyncContext,
        cache: &mut TagCache,
        play: &Play,
    ) -> Result<Tags> {
        let urls = [
            join_path(API_ROOT, &["artist", play.artist_name.as_str(), "toptags.xml"])?,
            join_path(
                API_ROOT,
                &[
                    "track",
                    play.artist_name.as_str(),
                    play.track_name.as_str(),
                    "toptags.xml",
                ],
            )?,
        ];

        let mut tags = Tags::new();
        for url in urls {
            let cached = cache.get(&url).cloned();
            let found = match cached {
                Some(found) => found,
                None => {
                    let found = self.tags_for_url(ctx, &url).await?;
                    cache.put(url, found.clone());
                    found
                }
            };
            tags.extend(found.into_iter().collect());
        }
        Ok(tags)
    }

    async fn tags_for_url(&self, ctx: &SyncContext, url: &str) -> Result<Vec<String>> {
        let doc = match ctx.fetcher.get_xml(FetchRequest::get(url)).await {
            Ok(doc) => doc,
            Err(err) if is_timeout(&err) || is_decode(&err) || http_status(&err) == Some(404) => {
                debug!(url, error = %err, "no tags");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let mut tags = BTreeSet::new();
        for tag in doc.descendants("tag") {
            let count: i64 = tag
                .child_text("count")
                .and_then(|c| c.parse().ok())
                .unwrap_or(0);
            if count < self.settings.tag_usage_threshold {
                continue;
            }
            let slug = slugify(tag.child_text("name").unwrap_or_default());
            let slug: String = slug.chars().take(MAX_TAG_LEN).collect();
            if !slug.is_empty() {
                tags.insert(slug);
            }
        }
        Ok(tags.into_iter().collect())
    }

    async fn handle_track(
        &self,
        ctx: &SyncContext,
        cache: &mut TagCache,
        watermark: NaiveDateTime,
        el: &Element,
    ) -> Result<bool> {
        if el.attr("nowplaying") == Some("true") {
            return Ok(false);
        }
        let play = parse_play(el)?;
        if play.played_at < watermark {
            return Ok(false);
        }
        let fingerprint = source_id(&play.artist_name, &play.track_name, play.played_at);

        let seen = {
            let mut conn = ctx.pool.acquire().await?;
            timeline::item_exists(
                &mut conn,
                Some(RecordKind::Track),
                &ItemFilter::source(NAME).with_source_id(fingerprint.as_str()),
            )
            .await?
        };
        if seen {
            return Ok(false);
        }

        let tags = self.tags_for_play(ctx, cache, &play).await?;
        debug!(artist = %play.artist_name, track = %play.track_name, "saving track");

        let track = NewTrack {
            artist_name: play.artist_name,
            track_name: play.track_name,
            url: play.url,
            track_mbid: play.track_mbid,
            artist_mbid: play.artist_mbid,
            played_at: play.played_at,
        };

        let mut tx = ctx.pool.begin().await?;
        let stored = records::upsert_track(&mut *tx, &track).await?;
        timeline::upsert_item(
            &mut *tx,
            &stored.record,
            ItemFields::at(track.played_at)
                .tags(tags)
                .source(NAME)
                .source_id(fingerprint),
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }
}

fn parse_play(el: &Element) -> Result<Play> {
    let artist = el
        .child("artist")
        .ok_or_else(|| SyncError::malformed("track", "missing artist"))?;
    let track_name = el
        .child_text("name")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| SyncError::malformed("track", "missing name"))?;
    let uts = el
        .child("date")
        .and_then(|d| d.attr("uts"))
        .ok_or_else(|| SyncError::malformed("track", format!("{} has no date", track_name)))?;
    let secs: i64 = uts
        .parse()
        .map_err(|_| SyncError::malformed("track date", uts))?;

    Ok(Play {
        artist_name: artist.text.trim().to_string(),
        artist_mbid: artist.attr("mbid").unwrap_or_default().to_string(),
        track_name: track_name.to_string(),
        track_mbid: el.child_text("mbid").unwrap_or_default().to_string(),
        url: el.child_text("url").unwrap_or_default().to_string(),
        played_at: from_unix_local(secs)?,
    })
}

fn source_id(artist: &str, track: &str, played_at: NaiveDateTime) -> String {
    let mut hasher = Sha256::new();
    hasher.update(artist.as_bytes());
    hasher.update(track.as_bytes());
    hasher.update(played_at.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Lowercase, drop anything but word characters, spaces and hyphens, then
/// collapse runs of spaces and hyphens into one hyphen.
fn slugify(text: &str) -> String {
    let kept: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_lowercase();

    let mut slug = String::with_capacity(kept.len());
    let mut pending_dash = false;
    for c in kept.chars() {
        if c == '-' || c.is_whitespace() {
            pending_dash = true;
            continue;
        }
        if pending_dash && !slug.is_empty() {
            slug.push('-');
        }
        pending_dash = false;
        slug.push(c);
    }
    slug
}

#[async_trait]
impl Provider for Lastfm {
    fn name(&self) -> &str {
        NAME
    }

    fn missing_settings(&self) -> Vec<&'static str> {
        missing(&[("providers.lastfm.username", self.settings.username.as_str())])
    }

    async fn update(&self, ctx: &SyncContext) -> Result<()> {
        let watermark = {
            let mut conn = ctx.pool.acquire().await?;
            timeline::last_update_timestamp(&mut conn, RecordKind::Track, &ItemFilter::source(NAME))
                .await?
        };
        debug!(%watermark, "last track sync");

        let doc = ctx
            .fetcher
            .get_xml(FetchRequest::get(self.recent_tracks_url()?))
            .await?;

        let mut cache = tag_cache();
        let mut saved = 0usize;
        // The feed is newest first; store oldest first.
        let mut tracks = doc.descendants("track");
        tracks.reverse();
        for el in tracks {
            ctx.ensure_running()?;
            match self.handle_track(ctx, &mut cache, watermark, el).await {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(err) => skip_malformed(NAME, Err(err))?,
            }
        }

        info!(tracks = saved, "lastfm sync finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_matches_tag_conventions() {
        assert_eq!(slugify("Hip-Hop"), "hip-hop");
        assert_eq!(slugify("  seen live "), "seen-live");
        assert_eq!(slugify("rock & roll"), "rock-roll");
        assert_eq!(slugify("80's"), "80s");
    }

    #[test]
    fn fingerprint_depends_on_every_part() {
        let at = NaiveDateTime::parse_from_str("2008-06-09 17:16:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let later = at + chrono::Duration::seconds(1);
        assert_eq!(source_id("a", "b", at), source_id("a", "b", at));
        assert_ne!(source_id("a", "b", at), source_id("a", "b", later));
        assert_ne!(source_id("a", "b", at), source_id("a", "c", at));
    }
}
