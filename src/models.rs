//! Core data models: the domain records each provider produces, the typed
//! references between timeline entries and those records, and the timeline
//! [`Item`] itself.
//!
//! A domain record knows how to describe itself ([`fmt::Display`]) and,
//! where it has one, its URL. The timeline store copies both onto the
//! [`Item`] whenever the item is written.

use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// The kinds of domain record that can appear on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Bookmark,
    Track,
    Photo,
    WebSearch,
    Video,
    CodeCommit,
    Message,
    Location,
}

impl RecordKind {
    pub const ALL: [RecordKind; 8] = [
        RecordKind::Bookmark,
        RecordKind::Track,
        RecordKind::Photo,
        RecordKind::WebSearch,
        RecordKind::Video,
        RecordKind::CodeCommit,
        RecordKind::Message,
        RecordKind::Location,
    ];

    /// The value stored in `items.content_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Bookmark => "bookmark",
            RecordKind::Track => "track",
            RecordKind::Photo => "photo",
            RecordKind::WebSearch => "websearch",
            RecordKind::Video => "video",
            RecordKind::CodeCommit => "codecommit",
            RecordKind::Message => "message",
            RecordKind::Location => "location",
        }
    }

    /// Human-facing type name, used in `Item`'s display form.
    pub fn display_name(&self) -> &'static str {
        match self {
            RecordKind::Bookmark => "Bookmark",
            RecordKind::Track => "Track",
            RecordKind::Photo => "Photo",
            RecordKind::WebSearch => "WebSearch",
            RecordKind::Video => "Video",
            RecordKind::CodeCommit => "CodeCommit",
            RecordKind::Message => "Message",
            RecordKind::Location => "Location",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown record kind: '{}'", s))
    }
}

macro_rules! record_ids {
    ($($name:ident),* $(,)?) => {$(
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    )*};
}

record_ids!(
    BookmarkId,
    TrackId,
    PhotoId,
    WebSearchId,
    VideoId,
    CodeCommitId,
    MessageId,
    LocationId,
);

/// A typed pointer from a timeline entry to exactly one domain record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordRef {
    Bookmark(BookmarkId),
    Track(TrackId),
    Photo(PhotoId),
    WebSearch(WebSearchId),
    Video(VideoId),
    CodeCommit(CodeCommitId),
    Message(MessageId),
    Location(LocationId),
}

impl RecordRef {
    pub fn new(kind: RecordKind, object_id: String) -> Self {
        match kind {
            RecordKind::Bookmark => RecordRef::Bookmark(BookmarkId(object_id)),
            RecordKind::Track => RecordRef::Track(TrackId(object_id)),
            RecordKind::Photo => RecordRef::Photo(PhotoId(object_id)),
            RecordKind::WebSearch => RecordRef::WebSearch(WebSearchId(object_id)),
            RecordKind::Video => RecordRef::Video(VideoId(object_id)),
            RecordKind::CodeCommit => RecordRef::CodeCommit(CodeCommitId(object_id)),
            RecordKind::Message => RecordRef::Message(MessageId(object_id)),
            RecordKind::Location => RecordRef::Location(LocationId(object_id)),
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            RecordRef::Bookmark(_) => RecordKind::Bookmark,
            RecordRef::Track(_) => RecordKind::Track,
            RecordRef::Photo(_) => RecordKind::Photo,
            RecordRef::WebSearch(_) => RecordKind::WebSearch,
            RecordRef::Video(_) => RecordKind::Video,
            RecordRef::CodeCommit(_) => RecordKind::CodeCommit,
            RecordRef::Message(_) => RecordKind::Message,
            RecordRef::Location(_) => RecordKind::Location,
        }
    }

    /// The referenced record's primary key, as stored in `items.object_id`.
    pub fn object_id(&self) -> &str {
        match self {
            RecordRef::Bookmark(id) => id.as_str(),
            RecordRef::Track(id) => id.as_str(),
            RecordRef::Photo(id) => id.as_str(),
            RecordRef::WebSearch(id) => id.as_str(),
            RecordRef::Video(id) => id.as_str(),
            RecordRef::CodeCommit(id) => id.as_str(),
            RecordRef::Message(id) => id.as_str(),
            RecordRef::Location(id) => id.as_str(),
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.object_id())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Domain records
// ═══════════════════════════════════════════════════════════════════════

/// A bookmarked link. Unique by `url`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bookmark {
    pub id: BookmarkId,
    pub url: String,
    pub description: String,
    pub extended: String,
    pub thumbnail_url: String,
}

/// One play of a track. Unique by `(artist_name, track_name, played_at)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub artist_name: String,
    pub track_name: String,
    pub url: String,
    pub track_mbid: String,
    pub artist_mbid: String,
    pub played_at: NaiveDateTime,
}

/// A Flickr photo, possibly taken by someone else. Unique by `flickr_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub id: PhotoId,
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
    pub exif_json: String,
}

impl Photo {
    pub fn page_url(&self) -> String {
        format!(
            "http://www.flickr.com/photos/{}/{}/",
            self.taken_by, self.flickr_id
        )
    }

    /// Static image URL. `size` is one of `m s t b o`; anything else gives
    /// the default size.
    pub fn image_url(&self, size: Option<char>) -> String {
        match size {
            Some(s) if "mstbo".contains(s) => format!(
                "http://static.flickr.com/{}/{}_{}_{}.jpg",
                self.server_id, self.flickr_id, self.secret, s
            ),
            _ => format!(
                "http://static.flickr.com/{}/{}_{}.jpg",
                self.server_id, self.flickr_id, self.secret
            ),
        }
    }

    pub fn exif(&self) -> BTreeMap<String, String> {
        if self.exif_json.is_empty() {
            return BTreeMap::new();
        }
        serde_json::from_str(&self.exif_json).unwrap_or_default()
    }

    /// Short license code such as `by-nc-sa`, taken from the license URL.
    pub fn license_code(&self) -> Option<String> {
        if self.cc_license.is_empty() {
            return None;
        }
        let parsed = url::Url::parse(&self.cc_license).ok()?;
        parsed
            .path()
            .split('/')
            .nth(2)
            .filter(|code| !code.is_empty())
            .map(str::to_string)
    }

    pub fn taken_by(&self, username: &str) -> bool {
        self.taken_by == username
    }

    /// May this photo be republished (rather than only linked to)?
    pub fn can_republish(&self, my_username: &str, site_is_commercial: bool) -> bool {
        if self.taken_by(my_username) {
            return true;
        }
        match self.license_code() {
            None => false,
            Some(code) if site_is_commercial && code.contains("nc") => false,
            Some(_) => true,
        }
    }

    pub fn derivative_ok(&self, my_username: &str, site_is_commercial: bool) -> bool {
        self.can_republish(my_username, site_is_commercial)
            && !self
                .license_code()
                .map(|code| code.contains("nd"))
                .unwrap_or(false)
    }

    pub fn must_share_alike(&self, my_username: &str, site_is_commercial: bool) -> bool {
        self.can_republish(my_username, site_is_commercial)
            && self
                .license_code()
                .map(|code| code.contains("sa"))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchEngine {
    pub id: String,
    pub name: String,
    pub home: String,
    /// URL with a `%s` placeholder for the quoted query.
    pub search_template: String,
}

/// A search made with a search engine. Unique by the history `guid`.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSearch {
    pub id: WebSearchId,
    pub engine: SearchEngine,
    pub query: String,
    pub guid: String,
}

impl WebSearch {
    pub fn url(&self) -> String {
        let quoted: String = url::form_urlencoded::byte_serialize(self.query.as_bytes()).collect();
        self.engine.search_template.replacen("%s", &quoted, 1)
    }
}

/// A page visited from a [`WebSearch`].
#[derive(Debug, Clone, PartialEq)]
pub struct WebSearchResult {
    pub id: String,
    pub search_id: WebSearchId,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoSource {
    pub id: String,
    pub name: String,
    pub home: String,
    /// Player URL with a `%s` placeholder for the document id.
    pub embed_template: String,
}

/// A video you watched. Unique by `url`.
#[derive(Debug, Clone, PartialEq)]
pub struct Video {
    pub id: VideoId,
    pub source: VideoSource,
    pub title: String,
    pub url: String,
}

impl Video {
    pub fn docid(&self) -> String {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.query().and_then(|q| q.rsplit('=').next().map(str::to_string)))
            .unwrap_or_default()
    }

    pub fn embed_url(&self) -> String {
        self.source.embed_template.replacen("%s", &self.docid(), 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeRepository {
    pub id: String,
    /// `git` or `svn`.
    pub kind: String,
    pub name: String,
    pub slug: String,
    pub username: String,
    pub public_changeset_template: String,
    pub url: String,
}

/// A change you checked in. Unique by `(repository, revision)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeCommit {
    pub id: CodeCommitId,
    pub repository: CodeRepository,
    pub revision: String,
    pub message: String,
}

impl CodeCommit {
    /// Numeric revisions verbatim, hashes cut to seven characters.
    pub fn format_revision(&self) -> String {
        match self.revision.parse::<u64>() {
            Ok(n) => n.to_string(),
            Err(_) => self.revision.chars().take(7).collect(),
        }
    }

    pub fn url(&self) -> Option<String> {
        let template = &self.repository.public_changeset_template;
        if template.is_empty() {
            None
        } else {
            Some(template.replacen("%s", &self.revision, 1))
        }
    }
}

/// A short status message. Unique by `(message, url)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub message: String,
    pub url: String,
}

/// A place you were at some time. Unique by `(latitude, longitude, seen_at)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub id: LocationId,
    pub latitude: String,
    pub longitude: String,
    pub name: String,
    pub seen_at: NaiveDateTime,
}

/// A fully loaded domain record of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Bookmark(Bookmark),
    Track(Track),
    Photo(Photo),
    WebSearch(WebSearch),
    Video(Video),
    CodeCommit(CodeCommit),
    Message(Message),
    Location(Location),
}

impl Record {
    pub fn reference(&self) -> RecordRef {
        match self {
            Record::Bookmark(r) => RecordRef::Bookmark(r.id.clone()),
            Record::Track(r) => RecordRef::Track(r.id.clone()),
            Record::Photo(r) => RecordRef::Photo(r.id.clone()),
            Record::WebSearch(r) => RecordRef::WebSearch(r.id.clone()),
            Record::Video(r) => RecordRef::Video(r.id.clone()),
            Record::CodeCommit(r) => RecordRef::CodeCommit(r.id.clone()),
            Record::Message(r) => RecordRef::Message(r.id.clone()),
            Record::Location(r) => RecordRef::Location(r.id.clone()),
        }
    }

    /// The record's URL, for kinds that have one.
    pub fn url(&self) -> Option<String> {
        let url = match self {
            Record::Bookmark(r) => Some(r.url.clone()),
            Record::Track(r) => Some(r.url.clone()),
            Record::Photo(r) => Some(r.page_url()),
            Record::WebSearch(r) => Some(r.url()),
            Record::Video(r) => Some(r.url.clone()),
            Record::CodeCommit(r) => r.url(),
            Record::Message(r) => Some(r.url.clone()),
            Record::Location(_) => None,
        };
        url.filter(|u| !u.is_empty())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Bookmark(r) => f.write_str(&r.url),
            Record::Track(r) => write!(f, "{} - {}", r.artist_name, r.track_name),
            Record::Photo(r) => f.write_str(&r.title),
            Record::WebSearch(r) => f.write_str(&r.query),
            Record::Video(r) => f.write_str(&r.title),
            Record::CodeCommit(r) => write!(
                f,
                "[{}] {}",
                r.format_revision(),
                truncate_words(&r.message, 10)
            ),
            Record::Message(r) => f.write_str(&r.message),
            Record::Location(r) => f.write_str(&r.name),
        }
    }
}

fn truncate_words(text: &str, max: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max {
        return words.join(" ");
    }
    let mut kept = words[..max].join(" ");
    if !kept.ends_with("...") {
        kept.push_str(" ...");
    }
    kept
}

// ═══════════════════════════════════════════════════════════════════════
// Timeline items
// ═══════════════════════════════════════════════════════════════════════

/// An unordered set of short labels.
///
/// Parsed from free text split on whitespace and commas; stored as one
/// space-joined string in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(BTreeSet<String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        text.split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn insert(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !tag.is_empty() {
            self.0.insert(tag);
        }
    }

    pub fn extend(&mut self, other: Tags) {
        self.0.extend(other.0);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<String> for Tags {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut tags = Tags::new();
        for tag in iter {
            tags.insert(tag);
        }
        tags
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        f.write_str(&joined.join(" "))
    }
}

/// A generic timeline entry pointing at exactly one domain record.
///
/// `url` and `object_str` are copies of the record's URL and label, kept in
/// step by [`crate::timeline::upsert_item`].
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: String,
    pub record: RecordRef,
    pub url: String,
    pub timestamp: NaiveDateTime,
    pub tags: Tags,
    pub source: String,
    pub source_id: String,
    pub object_str: String,
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.record.kind().display_name(), self.object_str)
    }
}

/// Caller-supplied fields for [`crate::timeline::upsert_item`].
///
/// Leaving `timestamp` as `None` keeps an existing item's timestamp, or uses
/// the current local time for a new one.
#[derive(Debug, Clone, Default)]
pub struct ItemFields {
    pub timestamp: Option<NaiveDateTime>,
    pub tags: Tags,
    pub source: String,
    pub source_id: String,
}

impl ItemFields {
    pub fn at(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }

    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn repo(template: &str) -> CodeRepository {
        CodeRepository {
            id: "r1".to_string(),
            kind: "svn".to_string(),
            name: "Django".to_string(),
            slug: "django".to_string(),
            username: "jacob".to_string(),
            public_changeset_template: template.to_string(),
            url: "http://code.djangoproject.com/svn".to_string(),
        }
    }

    fn photo(taken_by: &str, license: &str) -> Photo {
        Photo {
            id: PhotoId("p".to_string()),
            flickr_id: "1".to_string(),
            server_id: 123,
            secret: "1234567890".to_string(),
            taken_by: taken_by.to_string(),
            cc_license: license.to_string(),
            title: "A photo".to_string(),
            description: String::new(),
            comment_count: 0,
            date_uploaded: None,
            date_updated: None,
            exif_json: String::new(),
        }
    }

    #[test]
    fn record_kind_round_trips_through_str() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.as_str().parse::<RecordKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<RecordKind>().is_err());
    }

    #[test]
    fn commit_label_and_url() {
        let commit = CodeCommit {
            id: CodeCommitId("c".to_string()),
            repository: repo("http://code.djangoproject.com/changeset/%s"),
            revision: "42".to_string(),
            message: "one two three four five six seven eight nine ten eleven".to_string(),
        };
        assert_eq!(
            commit.url().as_deref(),
            Some("http://code.djangoproject.com/changeset/42")
        );
        assert_eq!(
            Record::CodeCommit(commit).to_string(),
            "[42] one two three four five six seven eight nine ten ..."
        );
    }

    #[test]
    fn hashed_revisions_are_shortened() {
        let commit = CodeCommit {
            id: CodeCommitId("c".to_string()),
            repository: repo(""),
            revision: "a3c9f1e2d4b5a6c7".to_string(),
            message: "Fix it".to_string(),
        };
        assert_eq!(commit.format_revision(), "a3c9f1e");
        assert_eq!(commit.url(), None);
        assert_eq!(Record::CodeCommit(commit).url(), None);
    }

    #[test]
    fn web_search_url_quotes_the_query() {
        let search = WebSearch {
            id: WebSearchId("s".to_string()),
            engine: SearchEngine {
                id: "e".to_string(),
                name: "Google".to_string(),
                home: "http://www.google.com/".to_string(),
                search_template: "http://www.google.com/search?q=%s".to_string(),
            },
            query: "rust traits".to_string(),
            guid: "g".to_string(),
        };
        assert_eq!(search.url(), "http://www.google.com/search?q=rust+traits");
    }

    #[test]
    fn video_embed_urls() {
        let youtube = Video {
            id: VideoId("v".to_string()),
            source: VideoSource {
                id: "yt".to_string(),
                name: "YouTube".to_string(),
                home: "http://www.youtube.com/".to_string(),
                embed_template: "http://www.youtube.com/v/%s".to_string(),
            },
            title: "Clip".to_string(),
            url: "http://www.youtube.com/watch?v=1gvGDsIYrrQ".to_string(),
        };
        assert_eq!(youtube.docid(), "1gvGDsIYrrQ");
        assert_eq!(youtube.embed_url(), "http://www.youtube.com/v/1gvGDsIYrrQ");
    }

    #[test]
    fn photo_urls() {
        let p = photo("jacobian", "");
        assert_eq!(p.page_url(), "http://www.flickr.com/photos/jacobian/1/");
        assert_eq!(
            p.image_url(None),
            "http://static.flickr.com/123/1_1234567890.jpg"
        );
        assert_eq!(
            p.image_url(Some('s')),
            "http://static.flickr.com/123/1_1234567890_s.jpg"
        );
        assert_eq!(
            p.image_url(Some('x')),
            "http://static.flickr.com/123/1_1234567890.jpg"
        );
    }

    #[test]
    fn photo_rights() {
        let mine = photo("jacobian", "");
        let cc_by = photo("other", "http://creativecommons.org/licenses/by/2.0/");
        let none = photo("other", "");
        let nc_nd = photo("other", "http://creativecommons.org/licenses/by-nc-nd/2.0/");
        let sa = photo("other", "http://creativecommons.org/licenses/by-sa/2.0/");

        assert!(mine.can_republish("jacobian", false));
        assert!(cc_by.can_republish("jacobian", false));
        assert!(!none.can_republish("jacobian", false));
        assert!(nc_nd.can_republish("jacobian", false));
        assert!(!nc_nd.can_republish("jacobian", true));

        assert!(mine.derivative_ok("jacobian", false));
        assert!(!nc_nd.derivative_ok("jacobian", false));
        assert!(sa.derivative_ok("jacobian", false));

        assert!(!cc_by.must_share_alike("jacobian", false));
        assert!(sa.must_share_alike("jacobian", false));
        assert_eq!(nc_nd.license_code().as_deref(), Some("by-nc-nd"));
    }

    #[test]
    fn photo_exif_defaults_to_empty() {
        let mut p = photo("jacobian", "");
        assert!(p.exif().is_empty());
        p.exif_json = r#"{"Make":"Nokia 6682","Aperture":"f/3.2"}"#.to_string();
        assert_eq!(p.exif().get("Make").map(String::as_str), Some("Nokia 6682"));
    }

    #[test]
    fn tags_parse_and_render_sorted() {
        let tags = Tags::parse("me jacob, jacobian  me");
        assert_eq!(tags.len(), 3);
        assert!(tags.contains("jacob"));
        assert_eq!(tags.to_string(), "jacob jacobian me");
        assert!(Tags::parse("  ").is_empty());
    }

    #[test]
    fn item_display_uses_kind_name() {
        let item = Item {
            id: "i".to_string(),
            record: RecordRef::Track(TrackId("t".to_string())),
            url: String::new(),
            timestamp: NaiveDate::from_ymd_opt(2008, 1, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            tags: Tags::new(),
            source: "lastfm".to_string(),
            source_id: String::new(),
            object_str: "Outkast - The Train (feat. Scar & Sleepy Brown)".to_string(),
        };
        assert_eq!(
            item.to_string(),
            "Track: Outkast - The Train (feat. Scar & Sleepy Brown)"
        );
    }
}
