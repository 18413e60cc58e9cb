//! # lifestream
//!
//! Aggregates personal activity from third-party services (bookmarks,
//! listening history, photos, status messages, searches, videos, locations,
//! code commits) into one chronological timeline stored in SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Providers  │──▶│   records   │──▶│   timeline   │
//! │ delicious…  │   │ typed rows  │   │ items table  │
//! └──────▲──────┘   └─────────────┘   └──────┬───────┘
//!        │ fetch (HTTP / canned)              │
//!        │                                    ▼
//! ┌──────┴──────┐                       ┌──────────┐
//! │  scheduler  │◀──── registry ◀────── │   CLI    │
//! └─────────────┘                       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lifestream init                       # create database
//! lifestream update --list-providers    # what is configured
//! lifestream update                     # sync everything
//! lifestream update -p lastfm -p flickr # sync a subset
//! lifestream timeline --limit 20
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Domain records, record references, timeline items |
//! | [`records`] | Domain record persistence |
//! | [`timeline`] | Timeline entry store and watermarks |
//! | [`fetch`] | HTTP fetching, canned transport, date parsing |
//! | [`xml`] | Small XML tree for feeds |
//! | [`providers`] | Provider trait, manifest, and the providers |
//! | [`registry`] | Provider discovery from config |
//! | [`scheduler`] | Sequential update runs |
//! | [`error`] | Error kinds callers tell apart |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod migrate;
pub mod models;
pub mod providers;
pub mod records;
pub mod registry;
pub mod scheduler;
pub mod timeline;
pub mod xml;
