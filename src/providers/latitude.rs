//! Google Latitude current location.
//!
//! The public badge API returns a single GeoJSON feature. It is stored when
//! its timestamp is newer than the last location on the timeline.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::{missing, skip_malformed, Provider, SyncContext};
use crate::config::{Config, LatitudeConfig};
use crate::error::SyncError;
use crate::fetch::{build_url, from_unix_local, FetchRequest};
use crate::models::{ItemFields, RecordKind};
use crate::records::{self, NewLocation};
use crate::timeline::{self, ItemFilter};

pub const NAME: &str = "latitude";
const BADGE_URL: &str = "http://www.google.com/latitude/apps/badge/api";

pub fn build(config: &Config) -> Result<Box<dyn Provider>> {
    let settings = config.providers.latitude.clone().unwrap_or_default();
    Ok(Box::new(Latitude::new(settings)))
}

pub struct Latitude {
    settings: LatitudeConfig,
}

/// A location reading and its raw remote timestamp.
#[derive(Debug)]
struct Reading {
    location: NewLocation,
    stamp: i64,
}

/// Coordinates usually arrive as numbers; accept numeric strings too.
fn coordinate(value: &Value) -> Result<String> {
    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) if s.trim().parse::<f64>().is_ok() => Ok(s.trim().to_string()),
        other => Err(SyncError::malformed("location", format!("bad coordinate {}", other)).into()),
    }
}

fn unix_stamp(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        other => other.as_i64(),
    }
}

/// Read the first feature. GeoJSON orders coordinates longitude first.
fn parse_reading(json: &Value) -> Result<Reading> {
    let feature = &json["features"][0];
    if feature.is_null() {
        return Err(SyncError::malformed("location", "no features").into());
    }
    let coords = feature["geometry"]["coordinates"]
        .as_array()
        .filter(|c| c.len() >= 2)
        .ok_or_else(|| SyncError::malformed("location", "missing coordinates"))?;
    let props = &feature["properties"];
    let stamp = unix_stamp(&props["timeStamp"])
        .ok_or_else(|| SyncError::malformed("location", "missing timeStamp"))?;

    Ok(Reading {
        location: NewLocation {
            longitude: coordinate(&coords[0])?,
            latitude: coordinate(&coords[1])?,
            name: props["reverseGeocode"].as_str().unwrap_or_default().to_string(),
            seen_at: from_unix_local(stamp)?,
        },
        stamp,
    })
}

impl Latitude {
    pub fn new(settings: LatitudeConfig) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Provider for Latitude {
    fn name(&self) -> &str {
        NAME
    }

    fn missing_settings(&self) -> Vec<&'static str> {
        missing(&[("providers.latitude.user_id", self.settings.user_id.as_str())])
    }

    async fn update(&self, ctx: &SyncContext) -> Result<()> {
        let watermark = {
            let mut conn = ctx.pool.acquire().await?;
            timeline::last_update_timestamp(&mut conn, RecordKind::Location, &ItemFilter::any())
                .await?
        };
        debug!(%watermark, "last location update");

        let url = build_url(
            BADGE_URL,
            &[("user", self.settings.user_id.as_str()), ("type", "json")],
        )?;
        let json = ctx.fetcher.get_json(FetchRequest::get(url)).await?;
        let reading = match parse_reading(&json) {
            Ok(reading) => reading,
            Err(err) => return skip_malformed(NAME, Err(err)),
        };
        ctx.ensure_running()?;

        if reading.location.seen_at <= watermark {
            info!("location unchanged");
            return Ok(());
        }

        debug!(name = %reading.location.name, "new location");
        let mut tx = ctx.pool.begin().await?;
        let stored = records::upsert_location(&mut *tx, &reading.location).await?;
        timeline::upsert_item(
            &mut *tx,
            &stored.record,
            ItemFields::at(reading.location.seen_at)
                .source(NAME)
                .source_id(reading.stamp.to_string()),
        )
        .await?;
        tx.commit().await?;

        info!("latitude sync finished");
        Ok(())
    }
}
