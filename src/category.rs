//! Categories: named partitions of the record universe
//!
//! A media run recognises the four [`MediaKind`]s, each mapped to a mime-type
//! filter over the upload collection. A content run recognises user-created
//! content types by uid and selects every entry of that collection.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::store::{ContentTypeKind, FilterExpr, Projection, RecordStore};

/// Collection holding uploaded media files
pub const MEDIA_COLLECTION: &str = "plugin::upload.file";

/// Field carrying a media file's mime type
pub const MIME_FIELD: &str = "mime";

/// Uid prefix of user-created content types
pub const USER_CONTENT_TYPE_PREFIX: &str = "api::";

const IMAGE_PREFIX: &str = "image/";
const VIDEO_PREFIX: &str = "video/";
const AUDIO_PREFIX: &str = "audio/";

/// Which family of categories a run addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunScope {
    /// Media files, partitioned by mime type
    #[default]
    Media,
    /// Entries of user-created content types
    Content,
}

/// Kinds of media file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// `image/*`
    Images,
    /// `video/*`
    Videos,
    /// `audio/*`
    Audios,
    /// Everything that is not an image, video or audio file
    Files,
}

impl MediaKind {
    /// All kinds, in display order
    pub const ALL: [MediaKind; 4] = [
        MediaKind::Images,
        MediaKind::Videos,
        MediaKind::Audios,
        MediaKind::Files,
    ];

    /// Name used in run requests
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Images => "images",
            MediaKind::Videos => "videos",
            MediaKind::Audios => "audios",
            MediaKind::Files => "files",
        }
    }

    /// Parse a request name; case sensitive
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    fn mime_prefix(self) -> Option<&'static str> {
        match self {
            MediaKind::Images => Some(IMAGE_PREFIX),
            MediaKind::Videos => Some(VIDEO_PREFIX),
            MediaKind::Audios => Some(AUDIO_PREFIX),
            MediaKind::Files => None,
        }
    }

    /// Mime-type membership filter
    ///
    /// `Files` is the complement of the three prefixed kinds, so the four
    /// filters partition the collection.
    pub fn filter(self) -> FilterExpr {
        match self.mime_prefix() {
            Some(prefix) => FilterExpr::starts_with(MIME_FIELD, prefix),
            None => FilterExpr::not(FilterExpr::starts_with_any(
                MIME_FIELD,
                [IMAGE_PREFIX, VIDEO_PREFIX, AUDIO_PREFIX],
            )),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recognised category within one run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    /// A media kind inside [`MEDIA_COLLECTION`]
    Media(MediaKind),
    /// A user-created content type, by uid
    ContentType(String),
}

impl Category {
    /// Resolve a raw request value within `scope`
    ///
    /// Returns `None` for values the scope does not recognise; callers skip
    /// those with a warning.
    pub fn resolve(scope: RunScope, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match scope {
            RunScope::Media => MediaKind::parse(raw).map(Category::Media),
            RunScope::Content => {
                let is_user_type = raw
                    .strip_prefix(USER_CONTENT_TYPE_PREFIX)
                    .is_some_and(|rest| !rest.is_empty());
                is_user_type.then(|| Category::ContentType(raw.to_string()))
            }
        }
    }

    /// Collection the category selects from
    pub fn collection(&self) -> &str {
        match self {
            Category::Media(_) => MEDIA_COLLECTION,
            Category::ContentType(uid) => uid,
        }
    }

    /// Membership filter, before any skip predicate
    pub fn membership_filter(&self) -> FilterExpr {
        match self {
            Category::Media(kind) => kind.filter(),
            Category::ContentType(_) => FilterExpr::All,
        }
    }

    /// Fields needed to decide membership
    pub fn projection(&self) -> Projection {
        match self {
            Category::Media(_) => Projection::ids().with_field(MIME_FIELD),
            Category::ContentType(_) => Projection::ids(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Media(kind) => write!(f, "{}", kind),
            Category::ContentType(uid) => f.write_str(uid),
        }
    }
}

/// Content type entry offered to callers choosing content categories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTypeSummary {
    /// Uid to pass back as a category
    pub uid: String,
    /// Singular name, or plural when no singular name is set
    pub name: Option<String>,
    /// Collection or single type
    pub kind: ContentTypeKind,
}

/// List the user-created content types of a store
#[instrument(skip(store))]
pub async fn list_content_types(
    store: &dyn RecordStore,
) -> crate::Result<Vec<ContentTypeSummary>> {
    let schemas = store.content_types().await.map_err(|e| {
        error!(error = %e, "Failed to list content types");
        e
    })?;

    let summaries: Vec<ContentTypeSummary> = schemas
        .into_iter()
        .filter(|schema| schema.uid.starts_with(USER_CONTENT_TYPE_PREFIX))
        .map(|schema| ContentTypeSummary {
            name: schema.singular_name.or(schema.plural_name),
            uid: schema.uid,
            kind: schema.kind,
        })
        .collect();

    info!(count = summaries.len(), "User-created content types listed");
    Ok(summaries)
}
