use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run against an existing database.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Reference data
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_engines (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            home TEXT NOT NULL,
            search_template TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS video_sources (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            home TEXT NOT NULL,
            embed_template TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS code_repositories (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            slug TEXT NOT NULL DEFAULT '',
            username TEXT NOT NULL,
            public_changeset_template TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Domain records, one table per kind, each with its natural key
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bookmarks (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL,
            extended TEXT NOT NULL DEFAULT '',
            thumbnail_url TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            id TEXT PRIMARY KEY,
            artist_name TEXT NOT NULL,
            track_name TEXT NOT NULL,
            url TEXT NOT NULL DEFAULT '',
            track_mbid TEXT NOT NULL DEFAULT '',
            artist_mbid TEXT NOT NULL DEFAULT '',
            played_at TEXT NOT NULL,
            UNIQUE(artist_name, track_name, played_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS photos (
            id TEXT PRIMARY KEY,
            photo_id TEXT NOT NULL UNIQUE,
            server_id INTEGER NOT NULL,
            secret TEXT NOT NULL DEFAULT '',
            taken_by TEXT NOT NULL DEFAULT '',
            cc_license TEXT NOT NULL DEFAULT '',
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            comment_count INTEGER NOT NULL DEFAULT 0,
            date_uploaded TEXT,
            date_updated TEXT,
            exif_json TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS web_searches (
            id TEXT PRIMARY KEY,
            engine_id TEXT NOT NULL,
            query TEXT NOT NULL,
            guid TEXT NOT NULL UNIQUE,
            FOREIGN KEY (engine_id) REFERENCES search_engines(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS web_search_results (
            id TEXT PRIMARY KEY,
            search_id TEXT NOT NULL,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            UNIQUE(search_id, url),
            FOREIGN KEY (search_id) REFERENCES web_searches(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS videos (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            title TEXT NOT NULL,
            url TEXT NOT NULL UNIQUE,
            FOREIGN KEY (source_id) REFERENCES video_sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS code_commits (
            id TEXT PRIMARY KEY,
            repository_id TEXT NOT NULL,
            revision TEXT NOT NULL,
            message TEXT NOT NULL,
            UNIQUE(repository_id, revision),
            FOREIGN KEY (repository_id) REFERENCES code_repositories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            message TEXT NOT NULL,
            url TEXT NOT NULL DEFAULT '',
            UNIQUE(message, url)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS locations (
            id TEXT PRIMARY KEY,
            latitude TEXT NOT NULL,
            longitude TEXT NOT NULL,
            name TEXT NOT NULL,
            seen_at TEXT NOT NULL,
            UNIQUE(latitude, longitude, seen_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Timeline entries
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            content_type TEXT NOT NULL,
            object_id TEXT NOT NULL,
            url TEXT NOT NULL DEFAULT '',
            timestamp TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT '',
            source_id TEXT NOT NULL DEFAULT '',
            object_str TEXT NOT NULL DEFAULT '',
            UNIQUE(content_type, object_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_timestamp ON items(timestamp DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_items_type_source ON items(content_type, source, timestamp DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_source_id ON items(source, source_id)")
        .execute(pool)
        .await?;

    Ok(())
}
