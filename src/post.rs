use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A content source (blog, publication, newsletter) a post belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Publication {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
}

/// Canonical local post shape. Every collection in the feed state holds
/// posts in this form, regardless of which remote query produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub image: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_time: Option<i64>,
    #[serde(default)]
    pub publication: Publication,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub num_upvotes: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub upvoted: bool,
    #[serde(default)]
    pub bookmarked: bool,
    #[serde(default)]
    pub bookmark_list: Option<String>,
}

/// Raw post payload as returned inside a feed edge. Field names follow the
/// wire format; everything optional on the wire carries a serde default.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPost {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_time: Option<i64>,
    #[serde(default)]
    pub source: Option<Publication>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub num_upvotes: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default)]
    pub upvoted: Option<bool>,
    #[serde(default)]
    pub bookmarked: Option<bool>,
    #[serde(default)]
    pub bookmark_list: Option<BookmarkListRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookmarkListRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Maps a raw wire post into the canonical local shape. Prefers the
/// permalink over the direct url when present, falls back to the low-res
/// placeholder when no image was provided.
pub fn map_post(raw: RawPost) -> Post {
    let url = match raw.permalink {
        Some(link) if !link.is_empty() => link,
        _ => raw.url,
    };
    let image = raw
        .image
        .or(raw.placeholder)
        .unwrap_or_default();
    Post {
        id: raw.id,
        title: raw.title.trim().to_string(),
        url,
        image,
        created_at: raw.created_at,
        read_time: raw.read_time,
        publication: raw.source.unwrap_or_default(),
        tags: raw.tags.unwrap_or_default(),
        num_upvotes: raw.num_upvotes,
        num_comments: raw.num_comments,
        read: raw.read.unwrap_or(false),
        upvoted: raw.upvoted.unwrap_or(false),
        bookmarked: raw.bookmarked.unwrap_or(false),
        bookmark_list: raw.bookmark_list.map(|list| list.id),
    }
}

/// A resolved ad creative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Ad {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub company: String,
    pub link: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub pixel: Vec<String>,
}

/// The ad sentinel occupying one slot per page boundary. It starts out as a
/// loading placeholder and is swapped for the resolved creative in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdSlot {
    pub loading: bool,
    pub ad: Option<Ad>,
}

impl AdSlot {
    pub fn placeholder() -> Self {
        AdSlot {
            loading: true,
            ad: None,
        }
    }

    pub fn resolved(ad: Ad) -> Self {
        AdSlot {
            loading: false,
            ad: Some(ad),
        }
    }
}

/// One entry of a feed collection: either a content post or the ad sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedEntry {
    Content(Post),
    Ad(AdSlot),
}

impl FeedEntry {
    pub fn is_ad(&self) -> bool {
        matches!(self, FeedEntry::Ad(_))
    }

    pub fn post_id(&self) -> Option<&str> {
        match self {
            FeedEntry::Content(post) => Some(post.id.as_str()),
            FeedEntry::Ad(_) => None,
        }
    }

    pub fn as_post(&self) -> Option<&Post> {
        match self {
            FeedEntry::Content(post) => Some(post),
            FeedEntry::Ad(_) => None,
        }
    }

    pub fn as_post_mut(&mut self) -> Option<&mut Post> {
        match self {
            FeedEntry::Content(post) => Some(post),
            FeedEntry::Ad(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(id: &str) -> RawPost {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "title": "  Why borrow checkers matter ",
            "url": "https://example.com/post",
            "createdAt": "2024-03-01T12:00:00Z",
            "numUpvotes": 3,
        }))
        .unwrap()
    }

    #[test]
    fn map_post_trims_title_and_defaults() {
        let post = map_post(raw("p1"));
        assert_eq!(post.id, "p1");
        assert_eq!(post.title, "Why borrow checkers matter");
        assert_eq!(post.url, "https://example.com/post");
        assert!(!post.bookmarked);
        assert!(post.bookmark_list.is_none());
        assert_eq!(post.num_upvotes, 3);
        assert_eq!(
            post.created_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn map_post_prefers_permalink_and_placeholder_fallback() {
        let mut raw = raw("p2");
        raw.permalink = Some("https://dev.feed/r/p2".into());
        raw.placeholder = Some("data:image/png;base64,xyz".into());
        let post = map_post(raw);
        assert_eq!(post.url, "https://dev.feed/r/p2");
        assert_eq!(post.image, "data:image/png;base64,xyz");
    }

    #[test]
    fn map_post_carries_bookmark_list_id() {
        let mut raw = raw("p3");
        raw.bookmarked = Some(true);
        raw.bookmark_list = Some(BookmarkListRef {
            id: "list-9".into(),
            name: "reading".into(),
        });
        let post = map_post(raw);
        assert!(post.bookmarked);
        assert_eq!(post.bookmark_list.as_deref(), Some("list-9"));
    }

    #[test]
    fn feed_entry_accessors() {
        let post = map_post(raw("p4"));
        let entry = FeedEntry::Content(post);
        assert!(!entry.is_ad());
        assert_eq!(entry.post_id(), Some("p4"));

        let slot = FeedEntry::Ad(AdSlot::placeholder());
        assert!(slot.is_ad());
        assert_eq!(slot.post_id(), None);
    }
}
