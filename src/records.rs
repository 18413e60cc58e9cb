//! Domain record store.
//!
//! One table per record kind, each with its own natural key. Two write
//! styles are offered, matching how providers use them:
//!
//! * `upsert_*` inserts a new row or refreshes the existing one in place.
//! * `get_or_create_*` inserts only when the natural key is new and leaves an
//!   existing row alone.
//!
//! Both report whether a row was created so providers can decide whether a
//! timeline item is due. All functions take a plain connection so they can
//! run inside the same transaction as the matching
//! [`crate::timeline::upsert_item`].

use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::config::RepositoryConfig;
use crate::models::{
    Bookmark, BookmarkId, CodeCommit, CodeCommitId, CodeRepository, Location, LocationId,
    Message, MessageId, Photo, PhotoId, Record, RecordRef, SearchEngine, Track, TrackId, Video,
    VideoId, VideoSource, WebSearch, WebSearchId, WebSearchResult,
};

/// Outcome of a record write.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub record: RecordRef,
    pub created: bool,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Default)]
pub struct NewBookmark {
    pub url: String,
    pub description: String,
    pub extended: String,
    pub thumbnail_url: String,
}

pub async fn upsert_bookmark(conn: &mut SqliteConnection, b: &NewBookmark) -> Result<Upserted> {
    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM bookmarks WHERE url = ?")
        .bind(&b.url)
        .fetch_optional(&mut *conn)
        .await?;
    let created = existing.is_none();
    let id = existing.unwrap_or_else(new_id);

    sqlx::query(
        r#"
        INSERT INTO bookmarks (id, url, description, extended, thumbnail_url)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(url) DO UPDATE SET
            description = excluded.description,
            extended = excluded.extended,
            thumbnail_url = excluded.thumbnail_url
        "#,
    )
    .bind(&id)
    .bind(&b.url)
    .bind(&b.description)
    .bind(&b.extended)
    .bind(&b.thumbnail_url)
    .execute(&mut *conn)
    .await?;

    Ok(Upserted {
        record: RecordRef::Bookmark(BookmarkId(id)),
        created,
    })
}

#[derive(Debug, Clone)]
pub struct NewTrack {
    pub artist_name: String,
    pub track_name: String,
    pub url: String,
    pub track_mbid: String,
    pub artist_mbid: String,
    pub played_at: NaiveDateTime,
}

pub async fn upsert_track(conn: &mut SqliteConnection, t: &NewTrack) -> Result<Upserted> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM tracks WHERE artist_name = ? AND track_name = ? AND played_at = ?",
    )
    .bind(&t.artist_name)
    .bind(&t.track_name)
    .bind(t.played_at)
    .fetch_optional(&mut *conn)
    .await?;
    let created = existing.is_none();
    let id = existing.unwrap_or_else(new_id);

    sqlx::query(
        r#"
        INSERT INTO tracks (id, artist_name, track_name, url, track_mbid, artist_mbid, played_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(artist_name, track_name, played_at) DO UPDATE SET
            url = excluded.url,
            track_mbid = excluded.track_mbid,
            artist_mbid = excluded.artist_mbid
        "#,
    )
    .bind(&id)
    .bind(&t.artist_name)
    .bind(&t.track_name)
    .bind(&t.url)
    .bind(&t.track_mbid)
    .bind(&t.artist_mbid)
    .bind(t.played_at)
    .execute(&mut *conn)
    .await?;

    Ok(Upserted {
        record: RecordRef::Track(TrackId(id)),
        created,
    })
}

#[derive(Debug, Clone, Default)]
pub struct NewPhoto {
    pub flickr_id: String,
    pub server_id: i64,
    pub secret: String,
    pub taken_by: String,
    pub cc_license: String,
    pub title: String,
    pub description: String,
    pub comment_count: i64,
    pub date_uploaded: Option<NaiveDateTime>,
    pub date_updated: Option<NaiveDateTime>,
}

/// Insert or refresh a photo. EXIF data is left alone; see [`set_photo_exif`].
pub async fn upsert_photo(conn: &mut SqliteConnection, p: &NewPhoto) -> Result<Upserted> {
    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM photos WHERE photo_id = ?")
        .bind(&p.flickr_id)
        .fetch_optional(&mut *conn)
        .await?;
    let created = existing.is_none();
    let id = existing.unwrap_or_else(new_id);

    sqlx::query(
        r#"
        INSERT INTO photos (id, photo_id, server_id, secret, taken_by, cc_license, title,
                            description, comment_count, date_uploaded, date_updated)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(photo_id) DO UPDATE SET
            server_id = excluded.server_id,
            secret = excluded.secret,
            taken_by = excluded.taken_by,
            cc_license = excluded.cc_license,
            title = excluded.title,
            description = excluded.description,
            comment_count = excluded.comment_count,
            date_uploaded = excluded.date_uploaded,
            date_updated = excluded.date_updated
        "#,
    )
    .bind(&id)
    .bind(&p.flickr_id)
    .bind(p.server_id)
    .bind(&p.secret)
    .bind(&p.taken_by)
    .bind(&p.cc_license)
    .bind(&p.title)
    .bind(&p.description)
    .bind(p.comment_count)
    .bind(p.date_uploaded)
    .bind(p.date_updated)
    .execute(&mut *conn)
    .await?;

    Ok(Upserted {
        record: RecordRef::Photo(PhotoId(id)),
        created,
    })
}

pub async fn set_photo_exif(
    conn: &mut SqliteConnection,
    photo: &PhotoId,
    exif: &BTreeMap<String, String>,
) -> Result<()> {
    sqlx::query("UPDATE photos SET exif_json = ? WHERE id = ?")
        .bind(serde_json::to_string(exif)?)
        .bind(photo.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewLocation {
    pub latitude: String,
    pub longitude: String,
    pub name: String,
    pub seen_at: NaiveDateTime,
}

pub async fn upsert_location(conn: &mut SqliteConnection, l: &NewLocation) -> Result<Upserted> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM locations WHERE latitude = ? AND longitude = ? AND seen_at = ?",
    )
    .bind(&l.latitude)
    .bind(&l.longitude)
    .bind(l.seen_at)
    .fetch_optional(&mut *conn)
    .await?;
    let created = existing.is_none();
    let id = existing.unwrap_or_else(new_id);

    sqlx::query(
        r#"
        INSERT INTO locations (id, latitude, longitude, name, seen_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(latitude, longitude, seen_at) DO UPDATE SET name = excluded.name
        "#,
    )
    .bind(&id)
    .bind(&l.latitude)
    .bind(&l.longitude)
    .bind(&l.name)
    .bind(l.seen_at)
    .execute(&mut *conn)
    .await?;

    Ok(Upserted {
        record: RecordRef::Location(LocationId(id)),
        created,
    })
}

pub async fn get_or_create_message(
    conn: &mut SqliteConnection,
    message: &str,
    url: &str,
) -> Result<Upserted> {
    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM messages WHERE message = ? AND url = ?")
            .bind(message)
            .bind(url)
            .fetch_optional(&mut *conn)
            .await?;
    if let Some(id) = existing {
        return Ok(Upserted {
            record: RecordRef::Message(MessageId(id)),
            created: false,
        });
    }

    let id = new_id();
    sqlx::query("INSERT INTO messages (id, message, url) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(message)
        .bind(url)
        .execute(&mut *conn)
        .await?;

    Ok(Upserted {
        record: RecordRef::Message(MessageId(id)),
        created: true,
    })
}

pub async fn get_or_create_video(
    conn: &mut SqliteConnection,
    source_id: &str,
    title: &str,
    url: &str,
) -> Result<Upserted> {
    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM videos WHERE url = ?")
        .bind(url)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(id) = existing {
        return Ok(Upserted {
            record: RecordRef::Video(VideoId(id)),
            created: false,
        });
    }

    let id = new_id();
    sqlx::query("INSERT INTO videos (id, source_id, title, url) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(source_id)
        .bind(title)
        .bind(url)
        .execute(&mut *conn)
        .await?;

    Ok(Upserted {
        record: RecordRef::Video(VideoId(id)),
        created: true,
    })
}

pub async fn get_or_create_commit(
    conn: &mut SqliteConnection,
    repository_id: &str,
    revision: &str,
    message: &str,
) -> Result<Upserted> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM code_commits WHERE repository_id = ? AND revision = ?",
    )
    .bind(repository_id)
    .bind(revision)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(id) = existing {
        return Ok(Upserted {
            record: RecordRef::CodeCommit(CodeCommitId(id)),
            created: false,
        });
    }

    let id = new_id();
    sqlx::query(
        "INSERT INTO code_commits (id, repository_id, revision, message) VALUES (?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(repository_id)
    .bind(revision)
    .bind(message)
    .execute(&mut *conn)
    .await?;

    Ok(Upserted {
        record: RecordRef::CodeCommit(CodeCommitId(id)),
        created: true,
    })
}

pub async fn get_or_create_web_search(
    conn: &mut SqliteConnection,
    engine_id: &str,
    query: &str,
    guid: &str,
) -> Result<Upserted> {
    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM web_searches WHERE guid = ?")
        .bind(guid)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(id) = existing {
        return Ok(Upserted {
            record: RecordRef::WebSearch(WebSearchId(id)),
            created: false,
        });
    }

    let id = new_id();
    sqlx::query("INSERT INTO web_searches (id, engine_id, query, guid) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(engine_id)
        .bind(query)
        .bind(guid)
        .execute(&mut *conn)
        .await?;

    Ok(Upserted {
        record: RecordRef::WebSearch(WebSearchId(id)),
        created: true,
    })
}

/// Attach a visited result page to a search. Returns `true` if it was new.
pub async fn add_search_result(
    conn: &mut SqliteConnection,
    search: &WebSearchId,
    title: &str,
    url: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO web_search_results (id, search_id, title, url)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(search_id, url) DO NOTHING
        "#,
    )
    .bind(new_id())
    .bind(search.as_str())
    .bind(title)
    .bind(url)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn search_results(
    conn: &mut SqliteConnection,
    search: &WebSearchId,
) -> Result<Vec<WebSearchResult>> {
    let rows = sqlx::query(
        "SELECT id, search_id, title, url FROM web_search_results WHERE search_id = ? ORDER BY rowid",
    )
    .bind(search.as_str())
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| WebSearchResult {
            id: row.get("id"),
            search_id: WebSearchId(row.get("search_id")),
            title: row.get("title"),
            url: row.get("url"),
        })
        .collect())
}

// ═══════════════════════════════════════════════════════════════════════
// Reference data
// ═══════════════════════════════════════════════════════════════════════

/// Insert or refresh a search engine by name; returns its id.
pub async fn ensure_search_engine(
    conn: &mut SqliteConnection,
    name: &str,
    home: &str,
    search_template: &str,
) -> Result<String> {
    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM search_engines WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
    let id = existing.unwrap_or_else(new_id);

    sqlx::query(
        r#"
        INSERT INTO search_engines (id, name, home, search_template) VALUES (?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            home = excluded.home,
            search_template = excluded.search_template
        "#,
    )
    .bind(&id)
    .bind(name)
    .bind(home)
    .bind(search_template)
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// Insert or refresh a video source by name; returns its id.
pub async fn ensure_video_source(
    conn: &mut SqliteConnection,
    name: &str,
    home: &str,
    embed_template: &str,
) -> Result<String> {
    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM video_sources WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    let id = existing.unwrap_or_else(new_id);

    sqlx::query(
        r#"
        INSERT INTO video_sources (id, name, home, embed_template) VALUES (?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            home = excluded.home,
            embed_template = excluded.embed_template
        "#,
    )
    .bind(&id)
    .bind(name)
    .bind(home)
    .bind(embed_template)
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// Insert or refresh a configured code repository, keyed by URL.
pub async fn ensure_code_repository(
    conn: &mut SqliteConnection,
    repo: &RepositoryConfig,
) -> Result<CodeRepository> {
    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM code_repositories WHERE url = ?")
            .bind(&repo.url)
            .fetch_optional(&mut *conn)
            .await?;
    let id = existing.unwrap_or_else(new_id);

    sqlx::query(
        r#"
        INSERT INTO code_repositories (id, kind, name, slug, username, public_changeset_template, url)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(url) DO UPDATE SET
            kind = excluded.kind,
            name = excluded.name,
            slug = excluded.slug,
            username = excluded.username,
            public_changeset_template = excluded.public_changeset_template
        "#,
    )
    .bind(&id)
    .bind(&repo.kind)
    .bind(&repo.name)
    .bind(&repo.slug)
    .bind(&repo.username)
    .bind(&repo.public_changeset_template)
    .bind(&repo.url)
    .execute(&mut *conn)
    .await?;

    Ok(CodeRepository {
        id,
        kind: repo.kind.clone(),
        name: repo.name.clone(),
        slug: repo.slug.clone(),
        username: repo.username.clone(),
        public_changeset_template: repo.public_changeset_template.clone(),
        url: repo.url.clone(),
    })
}

pub async fn code_repositories(
    conn: &mut SqliteConnection,
    kind: &str,
) -> Result<Vec<CodeRepository>> {
    let rows = sqlx::query(
        r#"
        SELECT id, kind, name, slug, username, public_changeset_template, url
        FROM code_repositories WHERE kind = ? ORDER BY name
        "#,
    )
    .bind(kind)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.iter().map(repository_from_row).collect())
}

fn repository_from_row(row: &SqliteRow) -> CodeRepository {
    CodeRepository {
        id: row.get("id"),
        kind: row.get("kind"),
        name: row.get("name"),
        slug: row.get("slug"),
        username: row.get("username"),
        public_changeset_template: row.get("public_changeset_template"),
        url: row.get("url"),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════════════════

/// Load the record behind `reference`, with whatever reference data its
/// label and URL depend on.
pub async fn load_record(conn: &mut SqliteConnection, reference: &RecordRef) -> Result<Record> {
    let record = match reference {
        RecordRef::Bookmark(id) => sqlx::query(
            "SELECT id, url, description, extended, thumbnail_url FROM bookmarks WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| {
            Record::Bookmark(Bookmark {
                id: BookmarkId(row.get("id")),
                url: row.get("url"),
                description: row.get("description"),
                extended: row.get("extended"),
                thumbnail_url: row.get("thumbnail_url"),
            })
        }),

        RecordRef::Track(id) => sqlx::query(
            r#"
            SELECT id, artist_name, track_name, url, track_mbid, artist_mbid, played_at
            FROM tracks WHERE id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| {
            Record::Track(Track {
                id: TrackId(row.get("id")),
                artist_name: row.get("artist_name"),
                track_name: row.get("track_name"),
                url: row.get("url"),
                track_mbid: row.get("track_mbid"),
                artist_mbid: row.get("artist_mbid"),
                played_at: row.get("played_at"),
            })
        }),

        RecordRef::Photo(id) => sqlx::query(
            r#"
            SELECT id, photo_id, server_id, secret, taken_by, cc_license, title, description,
                   comment_count, date_uploaded, date_updated, exif_json
            FROM photos WHERE id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| {
            Record::Photo(Photo {
                id: PhotoId(row.get("id")),
                flickr_id: row.get("photo_id"),
                server_id: row.get("server_id"),
                secret: row.get("secret"),
                taken_by: row.get("taken_by"),
                cc_license: row.get("cc_license"),
                title: row.get("title"),
                description: row.get("description"),
                comment_count: row.get("comment_count"),
                date_uploaded: row.get("date_uploaded"),
                date_updated: row.get("date_updated"),
                exif_json: row.get("exif_json"),
            })
        }),

        RecordRef::WebSearch(id) => sqlx::query(
            r#"
            SELECT s.id, s.query, s.guid,
                   e.id AS engine_id, e.name AS engine_name, e.home AS engine_home,
                   e.search_template AS engine_template
            FROM web_searches s JOIN search_engines e ON e.id = s.engine_id
            WHERE s.id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| {
            Record::WebSearch(WebSearch {
                id: WebSearchId(row.get("id")),
                engine: SearchEngine {
                    id: row.get("engine_id"),
                    name: row.get("engine_name"),
                    home: row.get("engine_home"),
                    search_template: row.get("engine_template"),
                },
                query: row.get("query"),
                guid: row.get("guid"),
            })
        }),

        RecordRef::Video(id) => sqlx::query(
            r#"
            SELECT v.id, v.title, v.url,
                   s.id AS source_id, s.name AS source_name, s.home AS source_home,
                   s.embed_template AS source_template
            FROM videos v JOIN video_sources s ON s.id = v.source_id
            WHERE v.id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| {
            Record::Video(Video {
                id: VideoId(row.get("id")),
                source: VideoSource {
                    id: row.get("source_id"),
                    name: row.get("source_name"),
                    home: row.get("source_home"),
                    embed_template: row.get("source_template"),
                },
                title: row.get("title"),
                url: row.get("url"),
            })
        }),

        RecordRef::CodeCommit(id) => sqlx::query(
            r#"
            SELECT c.id AS commit_id, c.revision, c.message,
                   r.id, r.kind, r.name, r.slug, r.username, r.public_changeset_template, r.url
            FROM code_commits c JOIN code_repositories r ON r.id = c.repository_id
            WHERE c.id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| {
            Record::CodeCommit(CodeCommit {
                id: CodeCommitId(row.get("commit_id")),
                repository: repository_from_row(&row),
                revision: row.get("revision"),
                message: row.get("message"),
            })
        }),

        RecordRef::Message(id) => sqlx::query("SELECT id, message, url FROM messages WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await?
            .map(|row| {
                Record::Message(Message {
                    id: MessageId(row.get("id")),
                    message: row.get("message"),
                    url: row.get("url"),
                })
            }),

        RecordRef::Location(id) => sqlx::query(
            "SELECT id, latitude, longitude, name, seen_at FROM locations WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| {
            Record::Location(Location {
                id: LocationId(row.get("id")),
                latitude: row.get("latitude"),
                longitude: row.get("longitude"),
                name: row.get("name"),
                seen_at: row.get("seen_at"),
            })
        }),
    };

    match record {
        Some(record) => Ok(record),
        None => bail!("{} record {} not found", reference.kind(), reference.object_id()),
    }
}
