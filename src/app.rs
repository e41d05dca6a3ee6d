use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::client;
use crate::config;
use crate::feed::{FeedEngine, FeedSnapshot, Services, SortBy};
use crate::post::FeedEntry;
use crate::remote::{
    SharedAdService, SharedMutationService, SharedPreferenceService, SharedQueryService,
    StaticProfile,
};
use crate::storage;

/// Wires the engine to the real HTTP services, restores the persisted
/// snapshot, prints one page of the active feed, and persists the snapshot
/// back.
pub fn run() -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;

    let store = storage::Store::open(storage::Options {
        path: cfg.storage.path.clone(),
    })
    .context("open storage")?;

    let user_agent = if cfg.api.user_agent.trim().is_empty() {
        format!("devfeed/{}", crate::VERSION)
    } else {
        cfg.api.user_agent.clone()
    };
    let http = reqwest::blocking::Client::builder()
        .timeout(if cfg.api.timeout.is_zero() {
            Duration::from_secs(20)
        } else {
            cfg.api.timeout
        })
        .build()
        .context("build HTTP client")?;
    let token = if cfg.api.token.is_empty() {
        None
    } else {
        Some(cfg.api.token.clone())
    };
    let logged_in = token.is_some();

    let api = Arc::new(
        client::Client::new(client::ClientConfig {
            user_agent,
            base_url: Some(cfg.api.base_url.clone()),
            token,
            http_client: Some(http),
        })
        .context("build API client")?,
    );

    let queries: SharedQueryService = api.clone();
    let mutations: SharedMutationService = api.clone();
    let preferences: SharedPreferenceService = api.clone();
    let ads: SharedAdService = api;

    let mut engine = FeedEngine::new(Services {
        queries,
        mutations,
        preferences,
        ads,
        profile: Arc::new(StaticProfile {
            logged_in,
            premium: false,
            show_only_unread: false,
        }),
    });

    let mut snapshot = store.load_snapshot().context("load persisted state")?;
    if snapshot == FeedSnapshot::default() {
        snapshot.sort_by = SortBy::from_key(&cfg.feed.sort_by);
        snapshot.time_period = cfg.feed.time_period;
    }
    engine.restore(snapshot);

    if !engine.load_next_page().context("fetch first feed page")? {
        println!("Nothing to fetch for the current view.");
        return Ok(());
    }

    for entry in engine.feed() {
        match entry {
            FeedEntry::Content(post) => {
                let publication = if post.publication.name.is_empty() {
                    post.publication.id.as_str()
                } else {
                    post.publication.name.as_str()
                };
                println!("{:>5}  {}  ({})", post.num_upvotes, post.title, publication);
            }
            FeedEntry::Ad(slot) => match &slot.ad {
                Some(ad) => println!("   ad  {}  ({})", ad.description, ad.source),
                None => println!("   ad  ..."),
            },
        }
    }
    if engine.state().empty_feed() {
        println!("The feed is empty.");
    }

    store
        .save_snapshot(&engine.snapshot())
        .context("persist state")?;
    store.close().context("close storage")
}
