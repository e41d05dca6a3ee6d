use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::post::{map_post, Ad, AdSlot, FeedEntry, Post};
use crate::query::{select_query, FeedQuery, QueryInput};
use crate::remote::{
    PageInfo, SharedAdService, SharedMutationService, SharedPreferenceService, SharedProfile,
    SharedQueryService,
};

/// The mutually exclusive logical feeds. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Main,
    Custom,
    Bookmarks,
}

/// A preview filter narrowing the feed to one publication or one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Publication { id: String },
    Tag { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Popularity,
    Time,
    Upvotes,
    Discussions,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Popularity => "popularity",
            SortBy::Time => "time",
            SortBy::Upvotes => "upvotes",
            SortBy::Discussions => "discussions",
        }
    }

    pub fn from_key(key: &str) -> SortBy {
        match key {
            "time" => SortBy::Time,
            "upvotes" => SortBy::Upvotes,
            "discussions" => SortBy::Discussions,
            _ => SortBy::Popularity,
        }
    }
}

/// Narrows the bookmarks view to unread entries or to one named list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookmarkScope {
    Unread,
    List(String),
}

impl BookmarkScope {
    /// Whether a toggle targeting `list` lands inside this scope. The unread
    /// scope is not a list, so no target ever matches it.
    fn matches(&self, list: Option<&str>) -> bool {
        match self {
            BookmarkScope::Unread => false,
            BookmarkScope::List(id) => list == Some(id.as_str()),
        }
    }
}

/// The aggregate feed state. Owned exclusively by [`FeedEngine`]; every
/// mutation goes through a named engine operation.
#[derive(Debug, Clone)]
pub struct FeedState {
    pub enabled_tags: HashSet<String>,
    pub disabled_publications: HashSet<String>,
    pub show_bookmarks: bool,
    pub page_info: Option<PageInfo>,
    pub loading: bool,
    pub posts: Vec<FeedEntry>,
    pub custom_posts: Vec<FeedEntry>,
    pub bookmarks: Vec<FeedEntry>,
    pub latest: Option<DateTime<Utc>>,
    pub filter: Option<Filter>,
    pub sort_by: SortBy,
    pub time_period: i64,
    pub search: Option<String>,
    pub ad: Option<Ad>,
    pub bookmark_list: Option<BookmarkScope>,
    pub last_used_bookmark_list: Option<String>,
    pub conflict_bookmarks: Option<Vec<Post>>,
}

impl Default for FeedState {
    fn default() -> Self {
        FeedState {
            enabled_tags: HashSet::new(),
            disabled_publications: HashSet::new(),
            show_bookmarks: false,
            page_info: None,
            loading: false,
            posts: Vec::new(),
            custom_posts: Vec::new(),
            bookmarks: Vec::new(),
            latest: None,
            filter: None,
            sort_by: SortBy::Popularity,
            time_period: 7,
            search: None,
            ad: None,
            bookmark_list: None,
            last_used_bookmark_list: None,
            conflict_bookmarks: None,
        }
    }
}

impl FeedState {
    /// Pure view arbitration: bookmarks beat filter, filter beats search,
    /// everything else is the main feed.
    pub fn active_view(&self) -> View {
        if self.show_bookmarks {
            return View::Bookmarks;
        }
        if self.filter.is_some() || self.search.is_some() {
            return View::Custom;
        }
        View::Main
    }

    pub fn collection(&self, view: View) -> &[FeedEntry] {
        match view {
            View::Main => &self.posts,
            View::Custom => &self.custom_posts,
            View::Bookmarks => &self.bookmarks,
        }
    }

    fn collection_mut(&mut self, view: View) -> &mut Vec<FeedEntry> {
        match view {
            View::Main => &mut self.posts,
            View::Custom => &mut self.custom_posts,
            View::Bookmarks => &mut self.bookmarks,
        }
    }

    /// The entries of the currently active view.
    pub fn feed(&self) -> &[FeedEntry] {
        self.collection(self.active_view())
    }

    /// True when the active view holds no content entries (ads excluded).
    pub fn empty_feed(&self) -> bool {
        !self.feed().iter().any(|entry| !entry.is_ad())
    }

    /// Whether the active filter is a preview, i.e. not already part of the
    /// persisted preferences.
    pub fn has_filter(&self) -> bool {
        match &self.filter {
            None => false,
            Some(Filter::Publication { id }) => !self.disabled_publications.contains(id),
            Some(Filter::Tag { name }) => self.enabled_tags.contains(name),
        }
    }

    pub fn has_conflicts(&self) -> bool {
        self.conflict_bookmarks
            .as_ref()
            .is_some_and(|set| !set.is_empty())
    }

    /// Sets the bookmark flag and list on the post in the active collection
    /// and, if that is not the main collection, mirrors the change there too.
    /// Returns the updated post.
    fn set_bookmark_in_feed(
        &mut self,
        id: &str,
        bookmarked: bool,
        list: Option<&str>,
    ) -> Option<Post> {
        let view = self.active_view();
        let updated = set_post_bookmark(self.collection_mut(view), id, bookmarked, list);
        if view != View::Main {
            let mirrored = set_post_bookmark(&mut self.posts, id, bookmarked, list);
            return updated.or(mirrored);
        }
        updated
    }

    /// One bookmark state transition, applied across all collections that
    /// hold the post. Used both for the optimistic apply and, with inverted
    /// arguments, for the rollback.
    fn apply_bookmark_toggle(&mut self, id: &str, bookmarked: bool, list: Option<String>) {
        if bookmarked {
            self.last_used_bookmark_list = list.clone();
        }

        let post = self.set_bookmark_in_feed(id, bookmarked, list.as_deref());

        let out_of_scope = self
            .bookmark_list
            .as_ref()
            .is_some_and(|scope| !scope.matches(list.as_deref()));
        let index = find_post(&self.bookmarks, id);
        if !bookmarked || out_of_scope {
            if let Some(i) = index {
                self.bookmarks.remove(i);
            }
        } else if let Some(post) = post {
            match index {
                Some(i) => self.bookmarks[i] = FeedEntry::Content(post),
                None => self.bookmarks.insert(0, FeedEntry::Content(post)),
            }
        }
    }

    /// Adjusts the vote flag and counter on the active view's copy only.
    /// Returns false when the post has scrolled out of the collection.
    fn apply_upvote_toggle(&mut self, id: &str, upvoted: bool) -> bool {
        let view = self.active_view();
        let Some(post) = self
            .collection_mut(view)
            .iter_mut()
            .filter_map(FeedEntry::as_post_mut)
            .find(|post| post.id == id)
        else {
            return false;
        };
        post.upvoted = upvoted;
        post.num_upvotes += if upvoted { 1 } else { -1 };
        true
    }
}

fn find_post(entries: &[FeedEntry], id: &str) -> Option<usize> {
    entries.iter().position(|entry| entry.post_id() == Some(id))
}

fn set_post_bookmark(
    entries: &mut [FeedEntry],
    id: &str,
    bookmarked: bool,
    list: Option<&str>,
) -> Option<Post> {
    let post = entries
        .iter_mut()
        .filter_map(FeedEntry::as_post_mut)
        .find(|post| post.id == id)?;
    post.bookmarked = bookmarked;
    post.bookmark_list = list.map(str::to_string);
    Some(post.clone())
}

/// Swaps the most recent page boundary's ad slot for the resolved creative.
/// Scans backwards for the last ad entry; if it already resolved, a later
/// page owns the slot and it must not be overwritten.
pub fn resolve_last_ad_slot(entries: &mut [FeedEntry], ad: Ad) -> bool {
    for entry in entries.iter_mut().rev() {
        if let FeedEntry::Ad(slot) = entry {
            if slot.loading {
                *slot = AdSlot::resolved(ad);
                return true;
            }
            return false;
        }
    }
    false
}

/// The persisted slice of anonymous-session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FeedSnapshot {
    pub bookmarks: Vec<Post>,
    pub enabled_tags: Vec<String>,
    pub disabled_publications: Vec<String>,
    pub sort_by: SortBy,
    pub time_period: i64,
}

/// Remote seams the engine drives. All shared so the ad fetch can run on its
/// own thread.
pub struct Services {
    pub queries: SharedQueryService,
    pub mutations: SharedMutationService,
    pub preferences: SharedPreferenceService,
    pub ads: SharedAdService,
    pub profile: SharedProfile,
}

/// The feed engine. Owns the state; callers drive it through the command
/// methods and read back through [`FeedEngine::state`]. All state transitions
/// happen synchronously inside a command call; the only background work is
/// the ad fetch, whose result is parked on a channel until the next command
/// (or an explicit [`FeedEngine::poll_ads`]) applies it.
pub struct FeedEngine {
    state: FeedState,
    queries: SharedQueryService,
    mutations: SharedMutationService,
    preferences: SharedPreferenceService,
    ads: SharedAdService,
    profile: SharedProfile,
    ad_tx: Sender<(View, Ad)>,
    ad_rx: Receiver<(View, Ad)>,
}

impl FeedEngine {
    pub fn new(services: Services) -> Self {
        let (ad_tx, ad_rx) = unbounded();
        FeedEngine {
            state: FeedState::default(),
            queries: services.queries,
            mutations: services.mutations,
            preferences: services.preferences,
            ads: services.ads,
            profile: services.profile,
            ad_tx,
            ad_rx,
        }
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn active_view(&self) -> View {
        self.state.active_view()
    }

    pub fn feed(&self) -> &[FeedEntry] {
        self.state.feed()
    }

    /// Applies any ad fetches that resolved since the last command.
    pub fn poll_ads(&mut self) {
        while let Ok((view, ad)) = self.ad_rx.try_recv() {
            self.apply_ad(view, ad);
        }
    }

    /// Installs a resolved ad: caches it for the next page boundary and
    /// patches the collection's last still-loading slot in place.
    pub fn apply_ad(&mut self, view: View, ad: Ad) {
        self.state.ad = Some(ad.clone());
        if !resolve_last_ad_slot(self.state.collection_mut(view), ad) {
            log::debug!("feed: ad arrived after its slot resolved, keeping cached copy only");
        }
    }

    fn spawn_ad_fetch(&self, view: View) {
        let ads = Arc::clone(&self.ads);
        let tx = self.ad_tx.clone();
        thread::spawn(move || match ads.fetch_ad() {
            Ok(mut batch) if !batch.is_empty() => {
                let _ = tx.send((view, batch.remove(0)));
            }
            Ok(_) => log::debug!("feed: no ad available"),
            Err(err) => log::warn!("feed: ad fetch failed: {err:#}"),
        });
    }

    fn build_query(&self, logged_in: bool) -> FeedQuery {
        let state = &self.state;
        select_query(&QueryInput {
            logged_in,
            show_only_unread: self.profile.show_only_unread(),
            now: state.latest.unwrap_or_else(Utc::now),
            after: state
                .page_info
                .as_ref()
                .and_then(|info| info.end_cursor.as_deref()),
            show_bookmarks: state.show_bookmarks,
            bookmark_scope: state.bookmark_list.as_ref(),
            filter: state.filter.as_ref(),
            search: state.search.as_deref(),
            sort_by: state.sort_by,
            time_period: state.time_period,
            enabled_tags: &state.enabled_tags,
            disabled_publications: &state.disabled_publications,
        })
    }

    /// Fetches the next page of the active view. Returns false without any
    /// network traffic when a fetch is already in flight, the previous page
    /// reported the end of data, or the bookmarks view has no session.
    pub fn load_next_page(&mut self) -> Result<bool> {
        self.poll_ads();

        if self.state.loading {
            return Ok(false);
        }
        if let Some(info) = &self.state.page_info {
            if !info.has_next_page {
                return Ok(false);
            }
        }

        let logged_in = self.profile.is_logged_in();
        let premium = self.profile.is_premium();
        let view = self.state.active_view();
        if view == View::Bookmarks && !logged_in {
            return Ok(false);
        }

        // Pin the temporal snapshot for the whole paging session so newly
        // published posts cannot shift later pages.
        if self.state.page_info.is_none() {
            self.state.latest = Some(Utc::now());
        }

        self.state.loading = true;
        self.state.ad = None;
        if !premium {
            self.spawn_ad_fetch(view);
        }

        let query = self.build_query(logged_in);
        let page = match self.queries.query(&query) {
            Ok(page) => page,
            Err(err) => {
                // Clear the gate before surfacing the failure, otherwise
                // pagination would be wedged for the rest of the session.
                self.state.loading = false;
                return Err(err.context("feed: fetch page"));
            }
        };

        let mut posts: Vec<Post> = page.posts.into_iter().map(map_post).collect();
        if !logged_in {
            // Anonymous sessions hold the authoritative bookmark set locally.
            let bookmarked: HashSet<&str> = self
                .state
                .bookmarks
                .iter()
                .filter_map(FeedEntry::post_id)
                .collect();
            for post in &mut posts {
                post.bookmarked = bookmarked.contains(post.id.as_str());
            }
        }

        let mut entries: Vec<FeedEntry> = posts.into_iter().map(FeedEntry::Content).collect();
        if !premium {
            self.poll_ads();
            let slot = match &self.state.ad {
                Some(ad) => AdSlot::resolved(ad.clone()),
                None => AdSlot::placeholder(),
            };
            entries.insert(0, FeedEntry::Ad(slot));
        }

        let first_page = self.state.page_info.is_none();
        let collection = self.state.collection_mut(view);
        if first_page {
            *collection = entries;
        } else if !entries.is_empty() {
            collection.extend(entries);
        }

        self.state.loading = false;
        self.state.page_info = Some(page.page_info);
        Ok(true)
    }

    /// Drops the stale view state and fetches a fresh first page. A no-op in
    /// the bookmarks view without a session.
    pub fn refresh_feed(&mut self) -> Result<bool> {
        if self.state.show_bookmarks && !self.profile.is_logged_in() {
            return Ok(false);
        }
        self.reset_feed();
        self.load_next_page()
    }

    fn reset_feed(&mut self) {
        self.state.page_info = None;
        self.state.custom_posts.clear();
    }

    pub fn set_filter(&mut self, filter: Option<Filter>) -> Result<bool> {
        self.state.filter = filter;
        self.refresh_feed()
    }

    pub fn back_to_main_feed(&mut self) -> Result<bool> {
        self.state.show_bookmarks = false;
        self.state.bookmark_list = None;
        self.state.search = None;
        self.set_filter(None)
    }

    /// Promotes the current preview filter into the persisted preferences.
    pub fn add_filter_to_feed(&mut self) -> Result<bool> {
        match self.state.filter.clone() {
            None => Ok(false),
            Some(Filter::Publication { id }) => self.set_enable_publication(&id, true),
            Some(Filter::Tag { name }) => self.set_enable_tag(&name, true),
        }
    }

    pub fn set_enable_publication(&mut self, id: &str, enabled: bool) -> Result<bool> {
        if enabled {
            self.state.disabled_publications.remove(id);
        } else {
            self.state.disabled_publications.insert(id.to_string());
        }
        if self.profile.is_logged_in() {
            self.preferences
                .update_publication(id, enabled)
                .context("feed: persist publication preference")?;
        }
        self.refresh_feed()
    }

    pub fn set_enable_tag(&mut self, tag: &str, enabled: bool) -> Result<bool> {
        if enabled {
            self.state.enabled_tags.insert(tag.to_string());
        } else {
            self.state.enabled_tags.remove(tag);
        }
        if self.profile.is_logged_in() {
            if enabled {
                self.preferences
                    .add_tags(&[tag.to_string()])
                    .context("feed: persist tag preference")?;
            } else {
                self.preferences
                    .remove_tag(tag)
                    .context("feed: remove tag preference")?;
            }
        }
        self.refresh_feed()
    }

    pub fn set_enabled_tags(&mut self, names: impl IntoIterator<Item = String>) {
        self.state.enabled_tags = names.into_iter().collect();
    }

    pub fn set_disabled_publications(&mut self, ids: impl IntoIterator<Item = String>) {
        self.state.disabled_publications = ids.into_iter().collect();
    }

    /// Wipes all personalization and reloads the main feed.
    pub fn reset(&mut self) -> Result<bool> {
        let state = &mut self.state;
        state.filter = None;
        state.custom_posts.clear();
        state.bookmarks.clear();
        state.disabled_publications.clear();
        state.enabled_tags.clear();
        state.show_bookmarks = false;
        state.bookmark_list = None;
        self.refresh_feed()
    }

    pub fn set_show_bookmarks(&mut self, value: bool) -> Result<bool> {
        self.state.show_bookmarks = value;
        self.state.bookmark_list = None;
        if self.profile.is_logged_in() {
            return self.refresh_feed();
        }
        Ok(false)
    }

    pub fn set_bookmark_list(&mut self, scope: Option<BookmarkScope>) -> Result<bool> {
        self.state.bookmark_list = scope;
        if self.profile.is_logged_in() {
            return self.refresh_feed();
        }
        Ok(false)
    }

    pub fn set_sort_by(&mut self, sort_by: SortBy) -> Result<bool> {
        self.state.sort_by = sort_by;
        self.refresh_feed()
    }

    pub fn set_time_period(&mut self, days: i64) -> Result<bool> {
        self.state.time_period = days;
        self.refresh_feed()
    }

    pub fn search(&mut self, query: Option<String>) -> Result<bool> {
        self.state.search = query;
        self.refresh_feed()
    }

    /// Optimistically toggles a bookmark. For anonymous sessions the local
    /// change is final; for authenticated sessions a failed remote mutation
    /// inverts the transition exactly, so the caller never sees a torn state.
    pub fn toggle_bookmark(&mut self, id: &str, bookmarked: bool) {
        self.state.apply_bookmark_toggle(id, bookmarked, None);
        if !self.profile.is_logged_in() {
            return;
        }
        let outcome = if bookmarked {
            self.mutations.add_bookmarks(&[id.to_string()])
        } else {
            self.mutations.remove_bookmark(id)
        };
        if let Err(err) = outcome {
            log::debug!("feed: bookmark mutation for {id} failed, rolling back: {err:#}");
            self.state.apply_bookmark_toggle(id, !bookmarked, None);
        }
    }

    /// Bookmarks a post into a specific list. Rollback restores the post's
    /// prior bookmark and list state, which may itself have been a bookmark
    /// under a different list. Returns whether the remote mutation stuck.
    pub fn add_bookmark_to_list(&mut self, post: &Post, list: Option<String>) -> bool {
        self.state
            .apply_bookmark_toggle(&post.id, true, list.clone());
        match self
            .mutations
            .add_bookmark_to_list(&post.id, list.as_deref())
        {
            Ok(()) => true,
            Err(err) => {
                log::debug!(
                    "feed: list bookmark for {} failed, rolling back: {err:#}",
                    post.id
                );
                self.state.apply_bookmark_toggle(
                    &post.id,
                    post.bookmarked,
                    post.bookmark_list.clone(),
                );
                false
            }
        }
    }

    /// Optimistic upvote toggle. Requires a session; the delta only touches
    /// the active view's copy of the post.
    pub fn toggle_upvote(&mut self, id: &str, upvoted: bool) {
        if !self.profile.is_logged_in() {
            return;
        }
        self.state.apply_upvote_toggle(id, upvoted);
        let outcome = if upvoted {
            self.mutations.upvote(id)
        } else {
            self.mutations.cancel_upvote(id)
        };
        if let Err(err) = outcome {
            log::debug!("feed: upvote mutation for {id} failed, rolling back: {err:#}");
            self.state.apply_upvote_toggle(id, !upvoted);
        }
    }

    /// Replaces the active collection's copy of a post wholesale.
    pub fn update_post(&mut self, post: Post) {
        let view = self.state.active_view();
        if let Some(i) = find_post(self.state.collection(view), &post.id) {
            self.state.collection_mut(view)[i] = FeedEntry::Content(post);
        }
    }

    pub fn remove_post(&mut self, id: &str) {
        let view = self.state.active_view();
        if let Some(i) = find_post(self.state.collection(view), id) {
            self.state.collection_mut(view).remove(i);
        }
    }

    /// Snapshots the local bookmarks into the conflict set. Called when local
    /// bookmark state may have diverged from the server, e.g. right after
    /// sign-in with pre-existing anonymous bookmarks.
    pub fn check_conflicts(&mut self) {
        let bookmarks: Vec<Post> = self
            .state
            .bookmarks
            .iter()
            .filter_map(FeedEntry::as_post)
            .cloned()
            .collect();
        if !bookmarks.is_empty() {
            self.state.conflict_bookmarks = Some(bookmarks);
        }
    }

    /// Pushes the whole conflict set to the server in one batched mutation,
    /// marks the posts bookmarked everywhere, and discards the set.
    pub fn merge_conflicts(&mut self) -> Result<bool> {
        let Some(conflicts) = self.state.conflict_bookmarks.clone() else {
            return Ok(false);
        };
        let ids: Vec<String> = conflicts.iter().map(|post| post.id.clone()).collect();
        self.mutations
            .add_bookmarks(&ids)
            .context("feed: merge bookmark conflicts")?;
        for post in &conflicts {
            self.state.set_bookmark_in_feed(&post.id, true, None);
        }
        self.state.conflict_bookmarks = None;
        Ok(true)
    }

    pub fn clear_conflicts(&mut self) {
        self.state.conflict_bookmarks = None;
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let mut enabled_tags: Vec<String> = self.state.enabled_tags.iter().cloned().collect();
        let mut disabled_publications: Vec<String> =
            self.state.disabled_publications.iter().cloned().collect();
        enabled_tags.sort();
        disabled_publications.sort();
        FeedSnapshot {
            bookmarks: self
                .state
                .bookmarks
                .iter()
                .filter_map(FeedEntry::as_post)
                .cloned()
                .collect(),
            enabled_tags,
            disabled_publications,
            sort_by: self.state.sort_by,
            time_period: self.state.time_period,
        }
    }

    pub fn restore(&mut self, snapshot: FeedSnapshot) {
        self.state.bookmarks = snapshot
            .bookmarks
            .into_iter()
            .map(FeedEntry::Content)
            .collect();
        self.state.enabled_tags = snapshot.enabled_tags.into_iter().collect();
        self.state.disabled_publications = snapshot.disabled_publications.into_iter().collect();
        self.state.sort_by = snapshot.sort_by;
        self.state.time_period = snapshot.time_period;
    }
}
