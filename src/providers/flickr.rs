//! Flickr photos.
//!
//! Pages through the user's public photos, newest first, and stops at the
//! first photo taken before the newest one already on the timeline. New
//! photos are stored oldest first. Each photo's details come from
//! `photos.getInfo`; EXIF data is fetched only the first time a photo is
//! seen.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::{missing, skip_malformed, Provider, SyncContext};
use crate::config::{Config, FlickrConfig};
use crate::error::SyncError;
use crate::fetch::{build_url, from_unix_local, parse_date, FetchRequest};
use crate::models::{ItemFields, RecordKind, RecordRef, Tags};
use crate::records::{self, NewPhoto};
use crate::timeline::{self, ItemFilter};

pub const NAME: &str = "flickr";
const REST_URL: &str = "http://flickr.com/services/rest/";
const PER_PAGE: &str = "50";

pub fn build(config: &Config) -> Result<Box<dyn Provider>> {
    let settings = config.providers.flickr.clone().unwrap_or_default();
    Ok(Box::new(Flickr::new(settings)))
}

pub struct Flickr {
    settings: FlickrConfig,
}

/// Render a JSON scalar the way Flickr means it: ids arrive as either
/// strings or numbers.
fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Flickr wraps most text as `{"_content": "..."}`.
fn content(value: &Value) -> String {
    scalar(&value["_content"])
}

fn int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

impl Flickr {
    pub fn new(settings: FlickrConfig) -> Self {
        Self { settings }
    }

    /// Call one REST method. A `stat: fail` answer becomes
    /// [`SyncError::Remote`].
    async fn call(&self, ctx: &SyncContext, method: &str, params: &[(&str, &str)]) -> Result<Value> {
        let mut query: Vec<(&str, &str)> = vec![
            ("method", method),
            ("api_key", self.settings.api_key.as_str()),
            ("format", "json"),
            ("nojsoncallback", "1"),
        ];
        query.extend_from_slice(params);

        let json = ctx
            .fetcher
            .get_json(FetchRequest::get(build_url(REST_URL, &query)?))
            .await?;
        if json["stat"] == "fail" {
            return Err(SyncError::Remote {
                service: NAME.to_string(),
                code: scalar(&json["code"]),
                message: scalar(&json["message"]),
            }
            .into());
        }
        Ok(json)
    }

    async fn licenses(&self, ctx: &SyncContext) -> Result<HashMap<String, String>> {
        let json = self.call(ctx, "flickr.photos.licenses.getInfo", &[]).await?;
        let licenses = json["licenses"]["license"]
            .as_array()
            .ok_or_else(|| SyncError::malformed("flickr licenses", "missing license list"))?;
        Ok(licenses
            .iter()
            .map(|l| (scalar(&l["id"]), scalar(&l["url"])))
            .collect())
    }

    async fn handle_photo(
        &self,
        ctx: &SyncContext,
        licenses: &HashMap<String, String>,
        summary: &Value,
        taken: NaiveDateTime,
    ) -> Result<()> {
        let photo_id = scalar(&summary["id"]);
        if photo_id.is_empty() {
            return Err(SyncError::malformed("flickr photo", "missing id").into());
        }
        let secret = scalar(&summary["secret"]);
        let license = licenses
            .get(&scalar(&summary["license"]))
            .cloned()
            .unwrap_or_default();

        let info = self
            .call(
                ctx,
                "flickr.photos.getInfo",
                &[("photo_id", photo_id.as_str()), ("secret", secret.as_str())],
            )
            .await?;
        let info = &info["photo"];

        let photo = NewPhoto {
            flickr_id: photo_id.clone(),
            server_id: int(&info["server"]),
            secret: secret.clone(),
            taken_by: scalar(&info["owner"]["username"]),
            cc_license: license,
            title: content(&info["title"]),
            description: content(&info["description"]),
            comment_count: int(&info["comments"]["_content"]),
            date_uploaded: from_unix_local(int(&info["dates"]["posted"])).ok(),
            date_updated: from_unix_local(int(&info["dates"]["lastupdate"])).ok(),
        };
        debug!(title = %photo.title, %taken, "handling photo");

        let mut tx = ctx.pool.begin().await?;
        let stored = records::upsert_photo(&mut *tx, &photo).await?;
        if stored.created {
            let exif = self
                .call(
                    ctx,
                    "flickr.photos.getExif",
                    &[("photo_id", photo_id.as_str()), ("secret", secret.as_str())],
                )
                .await?;
            if let RecordRef::Photo(id) = &stored.record {
                records::set_photo_exif(&mut *tx, id, &convert_exif(&exif)).await?;
            }
        }
        timeline::upsert_item(
            &mut *tx,
            &stored.record,
            ItemFields::at(taken)
                .tags(convert_tags(&info["tags"]))
                .source(NAME)
                .source_id(photo_id),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn convert_exif(json: &Value) -> BTreeMap<String, String> {
    let mut exif = BTreeMap::new();
    if let Some(entries) = json["photo"]["exif"].as_array() {
        for entry in entries {
            let label = scalar(&entry["label"]);
            let value = if entry["clean"].is_object() {
                content(&entry["clean"])
            } else {
                content(&entry["raw"])
            };
            if !label.is_empty() {
                exif.insert(label, value);
            }
        }
    }
    exif
}

/// Plain tags only; machine tags (`ns:pred=value`) are dropped.
fn convert_tags(json: &Value) -> Tags {
    json["tag"]
        .as_array()
        .map(|tags| {
            tags.iter()
                .filter(|t| int(&t["machine_tag"]) == 0 && t["machine_tag"] != true)
                .map(content)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Provider for Flickr {
    fn name(&self) -> &str {
        NAME
    }

    fn missing_settings(&self) -> Vec<&'static str> {
        missing(&[
            ("providers.flickr.api_key", self.settings.api_key.as_str()),
            ("providers.flickr.user_id", self.settings.user_id.as_str()),
            ("providers.flickr.username", self.settings.username.as_str()),
        ])
    }

    async fn update(&self, ctx: &SyncContext) -> Result<()> {
        let licenses = self.licenses(ctx).await?;
        let watermark = {
            let mut conn = ctx.pool.acquire().await?;
            timeline::last_update_timestamp(&mut conn, RecordKind::Photo, &ItemFilter::source(NAME))
                .await?
        };

        // Collect newest first, then store oldest first so the watermark
        // only ever moves past photos that were actually written.
        let mut fresh: Vec<(Value, NaiveDateTime)> = Vec::new();
        let mut page = 1i64;
        'pages: loop {
            ctx.ensure_running()?;
            debug!(page, "fetching photos");
            let page_str = page.to_string();
            let resp = self
                .call(
                    ctx,
                    "flickr.people.getPublicPhotos",
                    &[
                        ("user_id", self.settings.user_id.as_str()),
                        ("extras", "license,date_taken"),
                        ("per_page", PER_PAGE),
                        ("page", page_str.as_str()),
                    ],
                )
                .await?;
            let photos = &resp["photos"];
            if page > int(&photos["pages"]) {
                debug!("ran out of photos");
                break;
            }
            let list = photos["photo"].as_array().cloned().unwrap_or_default();
            if list.is_empty() {
                break;
            }

            for summary in list {
                let taken = match parse_date(&scalar(&summary["datetaken"])) {
                    Ok(taken) => taken,
                    Err(err) => {
                        skip_malformed(NAME, Err(err))?;
                        continue;
                    }
                };
                if taken < watermark {
                    debug!(%taken, %watermark, "hit an old photo; stopping");
                    break 'pages;
                }
                fresh.push((summary, taken));
            }
            page += 1;
        }

        let mut handled = 0usize;
        for (summary, taken) in fresh.iter().rev() {
            ctx.ensure_running()?;
            skip_malformed(NAME, self.handle_photo(ctx, &licenses, summary, *taken).await)?;
            handled += 1;
        }

        info!(photos = handled, "flickr sync finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn machine_tags_are_dropped() {
        let tags = convert_tags(&json!({
            "tag": [
                {"_content": "sunset", "machine_tag": 0},
                {"_content": "geo:lat=1", "machine_tag": 1},
                {"_content": "beach", "machine_tag": false},
            ]
        }));
        assert_eq!(tags.to_string(), "beach sunset");
    }

    #[test]
    fn exif_prefers_clean_values() {
        let exif = convert_exif(&json!({
            "photo": {"exif": [
                {"label": "Make", "raw": {"_content": "Canon"}},
                {"label": "Exposure", "raw": {"_content": "1/60"}, "clean": {"_content": "0.017 sec (1/60)"}},
            ]}
        }));
        assert_eq!(exif["Make"], "Canon");
        assert_eq!(exif["Exposure"], "0.017 sec (1/60)");
    }
}
