use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::post::{Ad, RawPost};
use crate::query::FeedQuery;

/// Pagination cursor returned alongside every feed page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub end_cursor: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
}

/// One page of raw posts as returned by the remote query service.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub posts: Vec<RawPost>,
    pub page_info: PageInfo,
}

pub trait FeedQueryService: Send + Sync {
    fn query(&self, query: &FeedQuery) -> Result<FeedPage>;
}

pub trait MutationService: Send + Sync {
    fn add_bookmarks(&self, post_ids: &[String]) -> Result<()>;
    fn remove_bookmark(&self, id: &str) -> Result<()>;
    fn add_bookmark_to_list(&self, id: &str, list_id: Option<&str>) -> Result<()>;
    fn upvote(&self, id: &str) -> Result<()>;
    fn cancel_upvote(&self, id: &str) -> Result<()>;
}

/// Persists feed personalization (followed tags, muted publications) for
/// authenticated sessions.
pub trait PreferenceService: Send + Sync {
    fn update_publication(&self, id: &str, enabled: bool) -> Result<()>;
    fn add_tags(&self, tags: &[String]) -> Result<()>;
    fn remove_tag(&self, tag: &str) -> Result<()>;
}

pub trait AdService: Send + Sync {
    fn fetch_ad(&self) -> Result<Vec<Ad>>;
}

/// Read-only view of the ambient user session.
pub trait ProfileSource: Send + Sync {
    fn is_logged_in(&self) -> bool;
    fn is_premium(&self) -> bool;
    fn show_only_unread(&self) -> bool;
}

/// Fixed profile, useful for anonymous sessions and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticProfile {
    pub logged_in: bool,
    pub premium: bool,
    pub show_only_unread: bool,
}

impl ProfileSource for StaticProfile {
    fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    fn is_premium(&self) -> bool {
        self.premium
    }

    fn show_only_unread(&self) -> bool {
        self.show_only_unread
    }
}

/// Scripted query service: hands out pre-baked pages in order and records
/// every query it was asked to run.
#[derive(Default)]
pub struct MockFeedQueryService {
    pages: Mutex<Vec<FeedPage>>,
    pub seen: Mutex<Vec<FeedQuery>>,
    pub fail: bool,
}

impl MockFeedQueryService {
    pub fn with_pages(pages: Vec<FeedPage>) -> Self {
        Self {
            pages: Mutex::new(pages),
            seen: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl FeedQueryService for MockFeedQueryService {
    fn query(&self, query: &FeedQuery) -> Result<FeedPage> {
        self.seen.lock().push(query.clone());
        if self.fail {
            anyhow::bail!("mock feed query failure");
        }
        let mut pages = self.pages.lock();
        if pages.is_empty() {
            return Ok(FeedPage::default());
        }
        Ok(pages.remove(0))
    }
}

/// Records mutations; each call can be forced to fail to exercise rollback.
#[derive(Default)]
pub struct MockMutationService {
    pub fail: bool,
    pub calls: Mutex<Vec<String>>,
}

impl MockMutationService {
    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls.lock().push(call);
        if self.fail {
            anyhow::bail!("mock mutation failure");
        }
        Ok(())
    }
}

impl MutationService for MockMutationService {
    fn add_bookmarks(&self, post_ids: &[String]) -> Result<()> {
        self.record(format!("add_bookmarks:{}", post_ids.join(",")))
    }

    fn remove_bookmark(&self, id: &str) -> Result<()> {
        self.record(format!("remove_bookmark:{id}"))
    }

    fn add_bookmark_to_list(&self, id: &str, list_id: Option<&str>) -> Result<()> {
        self.record(format!("add_bookmark_to_list:{id}:{}", list_id.unwrap_or("-")))
    }

    fn upvote(&self, id: &str) -> Result<()> {
        self.record(format!("upvote:{id}"))
    }

    fn cancel_upvote(&self, id: &str) -> Result<()> {
        self.record(format!("cancel_upvote:{id}"))
    }
}

#[derive(Default)]
pub struct MockPreferenceService {
    pub calls: Mutex<Vec<String>>,
}

impl PreferenceService for MockPreferenceService {
    fn update_publication(&self, id: &str, enabled: bool) -> Result<()> {
        self.calls.lock().push(format!("publication:{id}:{enabled}"));
        Ok(())
    }

    fn add_tags(&self, tags: &[String]) -> Result<()> {
        self.calls.lock().push(format!("add_tags:{}", tags.join(",")));
        Ok(())
    }

    fn remove_tag(&self, tag: &str) -> Result<()> {
        self.calls.lock().push(format!("remove_tag:{tag}"));
        Ok(())
    }
}

/// Ad service returning a fixed response. `None` means "no ad available".
#[derive(Default)]
pub struct MockAdService {
    pub ad: Option<Ad>,
    pub fail: bool,
}

impl AdService for MockAdService {
    fn fetch_ad(&self) -> Result<Vec<Ad>> {
        if self.fail {
            anyhow::bail!("mock ad failure");
        }
        Ok(self.ad.clone().into_iter().collect())
    }
}

pub type SharedQueryService = Arc<dyn FeedQueryService>;
pub type SharedMutationService = Arc<dyn MutationService>;
pub type SharedPreferenceService = Arc<dyn PreferenceService>;
pub type SharedAdService = Arc<dyn AdService>;
pub type SharedProfile = Arc<dyn ProfileSource>;
