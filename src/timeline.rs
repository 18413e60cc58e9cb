//! Timeline entry store.
//!
//! Every domain record that reaches the timeline has exactly one row in
//! `items`, keyed by `(content_type, object_id)`. The row carries a copy of
//! the record's label and URL, which is refreshed from the record on every
//! write so the two never drift apart.
//!
//! Items are ordered by timestamp, newest first. Ties fall back to
//! insertion order via SQLite's `rowid`.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{Item, ItemFields, RecordKind, RecordRef, Tags};
use crate::records;

/// The watermark reported when nothing has been synced yet.
pub const EPOCH: NaiveDateTime = match NaiveDate::from_ymd_opt(1970, 1, 1) {
    Some(date) => match date.and_hms_opt(0, 0, 0) {
        Some(ts) => ts,
        None => NaiveDateTime::MIN,
    },
    None => NaiveDateTime::MIN,
};

pub fn is_epoch(ts: NaiveDateTime) -> bool {
    ts == EPOCH
}

/// Optional constraints on an item lookup. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub source: Option<String>,
    pub source_id: Option<String>,
    pub timestamp: Option<NaiveDateTime>,
}

impl ItemFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn at(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

const ITEM_COLUMNS: &str =
    "id, content_type, object_id, url, timestamp, tags, source, source_id, object_str";

fn now_local() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Create or refresh the timeline item for `record`.
///
/// A new item takes `fields.timestamp`, or the current local time. An
/// existing item keeps its timestamp unless one is supplied; tags and
/// provenance are always overwritten. Fails if the record does not exist.
pub async fn upsert_item(
    conn: &mut SqliteConnection,
    record: &RecordRef,
    fields: ItemFields,
) -> Result<Item> {
    let loaded = records::load_record(conn, record)
        .await
        .with_context(|| format!("cannot attach a timeline item to {}", record))?;
    let object_str = loaded.to_string();
    let url = loaded.url().unwrap_or_default();

    let kind = record.kind();
    let existing: Option<(String, NaiveDateTime)> = sqlx::query_as(
        "SELECT id, timestamp FROM items WHERE content_type = ? AND object_id = ?",
    )
    .bind(kind.as_str())
    .bind(record.object_id())
    .fetch_optional(&mut *conn)
    .await?;

    let (id, timestamp) = match existing {
        Some((id, current)) => (id, fields.timestamp.unwrap_or(current)),
        None => (
            Uuid::new_v4().to_string(),
            fields.timestamp.unwrap_or_else(now_local),
        ),
    };

    sqlx::query(
        r#"
        INSERT INTO items (id, content_type, object_id, url, timestamp, tags, source, source_id, object_str)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(content_type, object_id) DO UPDATE SET
            url = excluded.url,
            timestamp = excluded.timestamp,
            tags = excluded.tags,
            source = excluded.source,
            source_id = excluded.source_id,
            object_str = excluded.object_str
        "#,
    )
    .bind(&id)
    .bind(kind.as_str())
    .bind(record.object_id())
    .bind(&url)
    .bind(timestamp)
    .bind(fields.tags.to_string())
    .bind(&fields.source)
    .bind(&fields.source_id)
    .bind(&object_str)
    .execute(&mut *conn)
    .await?;

    Ok(Item {
        id,
        record: record.clone(),
        url,
        timestamp,
        tags: fields.tags,
        source: fields.source,
        source_id: fields.source_id,
        object_str,
    })
}

/// Every item of one kind, newest first.
pub async fn items_for_kind(conn: &mut SqliteConnection, kind: RecordKind) -> Result<Vec<Item>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM items WHERE content_type = ? ORDER BY timestamp DESC, rowid DESC",
        ITEM_COLUMNS
    ))
    .bind(kind.as_str())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(item_from_row).collect()
}

/// The newest item timestamp for `kind` under `filter`, or [`EPOCH`].
pub async fn last_update_timestamp(
    conn: &mut SqliteConnection,
    kind: RecordKind,
    filter: &ItemFilter,
) -> Result<NaiveDateTime> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT MAX(timestamp) FROM items WHERE 1 = 1");
    push_conditions(&mut qb, Some(kind), filter);

    let latest: Option<NaiveDateTime> = qb
        .build_query_scalar()
        .fetch_one(&mut *conn)
        .await?;
    Ok(latest.unwrap_or(EPOCH))
}

/// The newest item matching `filter`, optionally restricted to one kind.
pub async fn find_item(
    conn: &mut SqliteConnection,
    kind: Option<RecordKind>,
    filter: &ItemFilter,
) -> Result<Option<Item>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM items WHERE 1 = 1",
        ITEM_COLUMNS
    ));
    push_conditions(&mut qb, kind, filter);
    qb.push(" ORDER BY timestamp DESC, rowid DESC LIMIT 1");

    let row = qb.build().fetch_optional(&mut *conn).await?;
    row.as_ref().map(item_from_row).transpose()
}

pub async fn item_exists(
    conn: &mut SqliteConnection,
    kind: Option<RecordKind>,
    filter: &ItemFilter,
) -> Result<bool> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM items WHERE 1 = 1");
    push_conditions(&mut qb, kind, filter);

    let count: i64 = qb.build_query_scalar().fetch_one(&mut *conn).await?;
    Ok(count > 0)
}

/// The timeline feed, newest first.
pub async fn timeline(
    conn: &mut SqliteConnection,
    kind: Option<RecordKind>,
    limit: i64,
) -> Result<Vec<Item>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM items WHERE 1 = 1",
        ITEM_COLUMNS
    ));
    push_conditions(&mut qb, kind, &ItemFilter::any());
    qb.push(" ORDER BY timestamp DESC, rowid DESC LIMIT ");
    qb.push_bind(limit);

    let rows = qb.build().fetch_all(&mut *conn).await?;
    rows.iter().map(item_from_row).collect()
}

fn push_conditions(qb: &mut QueryBuilder<'_, Sqlite>, kind: Option<RecordKind>, filter: &ItemFilter) {
    if let Some(kind) = kind {
        qb.push(" AND content_type = ").push_bind(kind.as_str());
    }
    if let Some(source) = &filter.source {
        qb.push(" AND source = ").push_bind(source.clone());
    }
    if let Some(source_id) = &filter.source_id {
        qb.push(" AND source_id = ").push_bind(source_id.clone());
    }
    if let Some(timestamp) = filter.timestamp {
        qb.push(" AND timestamp = ").push_bind(timestamp);
    }
}

fn item_from_row(row: &SqliteRow) -> Result<Item> {
    let content_type: String = row.get("content_type");
    let kind = RecordKind::from_str(&content_type)?;
    let tags: String = row.get("tags");

    Ok(Item {
        id: row.get("id"),
        record: RecordRef::new(kind, row.get("object_id")),
        url: row.get("url"),
        timestamp: row.get("timestamp"),
        tags: Tags::parse(&tags),
        source: row.get("source"),
        source_id: row.get("source_id"),
        object_str: row.get("object_str"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{upsert_bookmark, upsert_track, NewBookmark, NewTrack};
    use crate::{db, migrate};
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool) {
        let dir = TempDir::new().unwrap();
        let pool = db::connect_path(&dir.path().join("timeline.sqlite"))
            .await
            .unwrap();
        migrate::apply(&pool).await.unwrap();
        (dir, pool)
    }

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn bookmark(url: &str) -> NewBookmark {
        NewBookmark {
            url: url.to_string(),
            description: "A link".to_string(),
            ..NewBookmark::default()
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let (_dir, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let b = upsert_bookmark(&mut conn, &bookmark("http://example.com/"))
            .await
            .unwrap();
        let fields = ItemFields::at(ts("2008-01-01 09:00:00"))
            .tags(Tags::parse("django python"))
            .source("delicious")
            .source_id("abc");

        let first = upsert_item(&mut conn, &b.record, fields.clone()).await.unwrap();
        let second = upsert_item(&mut conn, &b.record, fields).await.unwrap();

        assert_eq!(first.id, second.id);
        let items = items_for_kind(&mut conn, RecordKind::Bookmark).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].tags.to_string(), "django python");
        assert_eq!(items[0].object_str, "http://example.com/");
        assert_eq!(items[0].url, "http://example.com/");
    }

    #[tokio::test]
    async fn timestamp_kept_unless_supplied() {
        let (_dir, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let b = upsert_bookmark(&mut conn, &bookmark("http://example.com/"))
            .await
            .unwrap();
        upsert_item(&mut conn, &b.record, ItemFields::at(ts("2008-01-01 09:00:00")))
            .await
            .unwrap();

        let refreshed = upsert_item(
            &mut conn,
            &b.record,
            ItemFields::default().tags(Tags::parse("later")),
        )
        .await
        .unwrap();
        assert_eq!(refreshed.timestamp, ts("2008-01-01 09:00:00"));
        assert!(refreshed.tags.contains("later"));

        let moved = upsert_item(&mut conn, &b.record, ItemFields::at(ts("2009-01-01 00:00:00")))
            .await
            .unwrap();
        assert_eq!(moved.timestamp, ts("2009-01-01 00:00:00"));
        assert!(moved.tags.is_empty());
    }

    #[tokio::test]
    async fn label_follows_the_record() {
        let (_dir, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let track = NewTrack {
            artist_name: "Outkast".to_string(),
            track_name: "The Train".to_string(),
            url: String::new(),
            track_mbid: String::new(),
            artist_mbid: String::new(),
            played_at: ts("2008-01-01 09:00:00"),
        };
        let t = upsert_track(&mut conn, &track).await.unwrap();
        let item = upsert_item(&mut conn, &t.record, ItemFields::at(track.played_at))
            .await
            .unwrap();
        assert_eq!(item.to_string(), "Track: Outkast - The Train");
        assert_eq!(item.url, "");

        let updated = NewTrack {
            url: "http://www.last.fm/music/Outkast/_/The+Train".to_string(),
            ..track
        };
        let again = upsert_track(&mut conn, &updated).await.unwrap();
        assert!(!again.created);
        let item = upsert_item(&mut conn, &again.record, ItemFields::default())
            .await
            .unwrap();
        assert_eq!(item.url, "http://www.last.fm/music/Outkast/_/The+Train");
    }

    #[tokio::test]
    async fn orphan_items_are_refused() {
        let (_dir, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let missing = RecordRef::new(RecordKind::Bookmark, "nope".to_string());
        assert!(upsert_item(&mut conn, &missing, ItemFields::default())
            .await
            .is_err());
        assert!(items_for_kind(&mut conn, RecordKind::Bookmark)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn ordering_and_watermark() {
        let (_dir, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        assert!(is_epoch(
            last_update_timestamp(&mut conn, RecordKind::Bookmark, &ItemFilter::any())
                .await
                .unwrap()
        ));

        for (url, at) in [
            ("http://a/", "2008-01-01 09:00:00"),
            ("http://c/", "2008-01-03 09:00:00"),
            ("http://b/", "2008-01-02 09:00:00"),
            ("http://d/", "2008-01-02 09:00:00"),
        ] {
            let b = upsert_bookmark(&mut conn, &bookmark(url)).await.unwrap();
            upsert_item(
                &mut conn,
                &b.record,
                ItemFields::at(ts(at)).source("delicious"),
            )
            .await
            .unwrap();
        }

        let urls: Vec<String> = items_for_kind(&mut conn, RecordKind::Bookmark)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.url)
            .collect();
        assert_eq!(urls, vec!["http://c/", "http://d/", "http://b/", "http://a/"]);

        let latest = last_update_timestamp(
            &mut conn,
            RecordKind::Bookmark,
            &ItemFilter::source("delicious"),
        )
        .await
        .unwrap();
        assert_eq!(latest, ts("2008-01-03 09:00:00"));

        let other = last_update_timestamp(
            &mut conn,
            RecordKind::Bookmark,
            &ItemFilter::source("magnolia"),
        )
        .await
        .unwrap();
        assert_eq!(other, EPOCH);

        let feed = timeline(&mut conn, None, 2).await.unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].url, "http://c/");
    }

    #[tokio::test]
    async fn find_by_provenance() {
        let (_dir, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let b = upsert_bookmark(&mut conn, &bookmark("http://a/")).await.unwrap();
        upsert_item(
            &mut conn,
            &b.record,
            ItemFields::at(ts("2008-01-01 09:00:00"))
                .source("delicious")
                .source_id("hash1"),
        )
        .await
        .unwrap();

        let filter = ItemFilter::source("delicious").with_source_id("hash1");
        assert!(item_exists(&mut conn, Some(RecordKind::Bookmark), &filter)
            .await
            .unwrap());
        assert!(!item_exists(&mut conn, Some(RecordKind::Track), &filter)
            .await
            .unwrap());

        let found = find_item(&mut conn, None, &filter).await.unwrap().unwrap();
        assert_eq!(found.record, b.record);

        let at = ItemFilter::source("delicious").at(ts("2008-01-01 09:00:00"));
        assert!(item_exists(&mut conn, None, &at).await.unwrap());
    }
}
