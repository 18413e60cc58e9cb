//! Pownce notes.
//!
//! Pages through the user's notes, newest first, starting at page 0, and
//! stops at the first note already on the timeline or when the API runs out
//! of pages. New notes are stored oldest first.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::{missing, skip_malformed, Provider, SyncContext};
use crate::config::{Config, PownceConfig};
use crate::error::{http_status, SyncError};
use crate::fetch::{build_url, from_unix_local, join_path, FetchRequest};
use crate::models::{ItemFields, RecordKind};
use crate::records;
use crate::timeline::{self, ItemFilter};

pub const NAME: &str = "pownce";
const NOTE_LISTS_ROOT: &str = "http://api.pownce.com/2.0/note_lists";

pub fn build(config: &Config) -> Result<Box<dyn Provider>> {
    let settings = config.providers.pownce.clone().unwrap_or_default();
    Ok(Box::new(Pownce::new(settings)))
}

pub struct Pownce {
    settings: PownceConfig,
}

fn note_id(note: &Value) -> String {
    match &note["id"] {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl Pownce {
    pub fn new(settings: PownceConfig) -> Self {
        Self { settings }
    }

    fn page_url(&self, page: u32) -> Result<String> {
        let file = format!("{}.json", self.settings.username);
        let base = join_path(NOTE_LISTS_ROOT, &[file.as_str()])?;
        let page = page.to_string();
        build_url(
            &base,
            &[("type", "messages"), ("page", page.as_str()), ("limit", "100")],
        )
    }

    async fn handle_note(&self, ctx: &SyncContext, id: &str, note: &Value) -> Result<()> {
        let body = note["body"]
            .as_str()
            .ok_or_else(|| SyncError::malformed("note", format!("{} has no body", id)))?;
        let secs = note["timestamp"]
            .as_i64()
            .or_else(|| note["timestamp"].as_f64().map(|f| f as i64))
            .ok_or_else(|| SyncError::malformed("note", format!("{} has no timestamp", id)))?;
        let timestamp = from_unix_local(secs)?;
        debug!(id, "handling note");

        let mut tx = ctx.pool.begin().await?;
        let stored = records::get_or_create_message(&mut *tx, body, "").await?;
        if stored.created {
            timeline::upsert_item(
                &mut *tx,
                &stored.record,
                ItemFields::at(timestamp).source(NAME).source_id(id),
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Provider for Pownce {
    fn name(&self) -> &str {
        NAME
    }

    fn missing_settings(&self) -> Vec<&'static str> {
        missing(&[("providers.pownce.username", self.settings.username.as_str())])
    }

    async fn update(&self, ctx: &SyncContext) -> Result<()> {
        // Collect until a known note, then store oldest first so an
        // interrupted run leaves no gap behind the newest stored note.
        let mut fresh: Vec<(String, Value)> = Vec::new();
        let mut page = 0u32;
        'pages: loop {
            ctx.ensure_running()?;
            debug!(page, "fetching notes");
            let resp = match ctx
                .fetcher
                .get_json(FetchRequest::get(self.page_url(page)?))
                .await
            {
                Ok(resp) => resp,
                Err(err) if http_status(&err) == Some(404) => break,
                Err(err) => return Err(err),
            };
            if resp["error"]["status_code"].as_i64() == Some(404) {
                debug!("ran out of notes");
                break;
            }

            let notes = resp["notes"].as_array().cloned().unwrap_or_default();
            if notes.is_empty() {
                break;
            }
            for note in notes {
                let id = note_id(&note);
                let exists = {
                    let mut conn = ctx.pool.acquire().await?;
                    timeline::item_exists(
                        &mut conn,
                        Some(RecordKind::Message),
                        &ItemFilter::source(NAME).with_source_id(id.as_str()),
                    )
                    .await?
                };
                if exists {
                    debug!(id = %id, "found a note we already have; finishing");
                    break 'pages;
                }
                fresh.push((id, note));
            }
            page += 1;
        }

        let mut handled = 0usize;
        for (id, note) in fresh.iter().rev() {
            ctx.ensure_running()?;
            skip_malformed(NAME, self.handle_note(ctx, id, note).await)?;
            handled += 1;
        }

        info!(notes = handled, "pownce sync finished");
        Ok(())
    }
}
