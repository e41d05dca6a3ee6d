use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::feed::{BookmarkScope, Filter, SortBy};

/// Named remote feed operations. The wire documents live with the HTTP
/// client; the engine only ever deals in these descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Bookmarks,
    SourceFeed,
    TagFeed,
    Search,
    MostUpvoted,
    MostDiscussed,
    Feed,
    AnonymousFeed,
}

impl QueryKind {
    pub fn operation_name(&self) -> &'static str {
        match self {
            QueryKind::Bookmarks => "bookmarksFeed",
            QueryKind::SourceFeed => "sourceFeed",
            QueryKind::TagFeed => "tagFeed",
            QueryKind::Search => "searchPosts",
            QueryKind::MostUpvoted => "mostUpvotedFeed",
            QueryKind::MostDiscussed => "mostDiscussedFeed",
            QueryKind::Feed => "feed",
            QueryKind::AnonymousFeed => "anonymousFeed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Ranking {
    Popularity,
    Time,
}

/// Anonymous sessions scope the ranked feed by locally-held preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_sources: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_tags: Option<Vec<String>>,
}

/// Variables attached to a feed query. Serializes straight into the GraphQL
/// request body; absent fields are omitted rather than sent as null.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variables {
    pub logged_in: bool,
    pub now: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranking: Option<Ranking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unread_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<FeedFilters>,
}

impl Variables {
    fn base(input: &QueryInput<'_>) -> Self {
        Variables {
            logged_in: input.logged_in,
            now: input.now,
            after: input.after.map(str::to_string),
            ranking: None,
            source: None,
            tag: None,
            query: None,
            period: None,
            unread_only: None,
            list_id: None,
            filters: None,
        }
    }
}

/// A fully resolved remote query: which operation to run, with what
/// variables.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedQuery {
    pub kind: QueryKind,
    pub variables: Variables,
}

/// Everything query selection may look at. Borrowed from the feed state so
/// the rule table stays a set of pure functions.
#[derive(Debug)]
pub struct QueryInput<'a> {
    pub logged_in: bool,
    pub show_only_unread: bool,
    pub now: DateTime<Utc>,
    pub after: Option<&'a str>,
    pub show_bookmarks: bool,
    pub bookmark_scope: Option<&'a BookmarkScope>,
    pub filter: Option<&'a Filter>,
    pub search: Option<&'a str>,
    pub sort_by: SortBy,
    pub time_period: i64,
    pub enabled_tags: &'a HashSet<String>,
    pub disabled_publications: &'a HashSet<String>,
}

type Rule = fn(&QueryInput<'_>) -> Option<FeedQuery>;

/// Precedence-ordered rules, first match wins. The ranked fallback at the
/// bottom always matches.
pub const RULES: &[(&str, Rule)] = &[
    ("bookmarks", bookmarks_rule),
    ("publication-filter", publication_rule),
    ("tag-filter", tag_rule),
    ("search", search_rule),
    ("most-upvoted", most_upvoted_rule),
    ("most-discussed", most_discussed_rule),
    ("ranked", ranked_rule),
];

pub fn select_query(input: &QueryInput<'_>) -> FeedQuery {
    for (_, rule) in RULES {
        if let Some(query) = rule(input) {
            return query;
        }
    }
    ranked(input)
}

fn bookmarks_rule(input: &QueryInput<'_>) -> Option<FeedQuery> {
    if !input.show_bookmarks {
        return None;
    }
    let mut variables = Variables::base(input);
    match input.bookmark_scope {
        Some(BookmarkScope::Unread) => variables.unread_only = Some(true),
        Some(BookmarkScope::List(id)) => variables.list_id = Some(id.clone()),
        None => {}
    }
    Some(FeedQuery {
        kind: QueryKind::Bookmarks,
        variables,
    })
}

fn publication_rule(input: &QueryInput<'_>) -> Option<FeedQuery> {
    match input.filter {
        Some(Filter::Publication { id }) => {
            let mut variables = Variables::base(input);
            variables.ranking = Some(Ranking::Time);
            variables.source = Some(id.clone());
            Some(FeedQuery {
                kind: QueryKind::SourceFeed,
                variables,
            })
        }
        _ => None,
    }
}

fn tag_rule(input: &QueryInput<'_>) -> Option<FeedQuery> {
    match input.filter {
        Some(Filter::Tag { name }) => {
            let mut variables = Variables::base(input);
            variables.ranking = Some(Ranking::Time);
            variables.tag = Some(name.clone());
            Some(FeedQuery {
                kind: QueryKind::TagFeed,
                variables,
            })
        }
        _ => None,
    }
}

fn search_rule(input: &QueryInput<'_>) -> Option<FeedQuery> {
    let search = input.search?;
    let mut variables = Variables::base(input);
    variables.query = Some(search.to_string());
    Some(FeedQuery {
        kind: QueryKind::Search,
        variables,
    })
}

fn most_upvoted_rule(input: &QueryInput<'_>) -> Option<FeedQuery> {
    if input.sort_by != SortBy::Upvotes {
        return None;
    }
    let mut variables = Variables::base(input);
    variables.period = Some(input.time_period);
    Some(FeedQuery {
        kind: QueryKind::MostUpvoted,
        variables,
    })
}

fn most_discussed_rule(input: &QueryInput<'_>) -> Option<FeedQuery> {
    if input.sort_by != SortBy::Discussions {
        return None;
    }
    Some(FeedQuery {
        kind: QueryKind::MostDiscussed,
        variables: Variables::base(input),
    })
}

fn ranked_rule(input: &QueryInput<'_>) -> Option<FeedQuery> {
    Some(ranked(input))
}

fn ranked(input: &QueryInput<'_>) -> FeedQuery {
    let mut variables = Variables::base(input);
    variables.ranking = Some(if input.sort_by == SortBy::Popularity {
        Ranking::Popularity
    } else {
        Ranking::Time
    });

    if input.logged_in {
        variables.unread_only = Some(input.show_only_unread);
        return FeedQuery {
            kind: QueryKind::Feed,
            variables,
        };
    }

    let mut exclude: Vec<String> = input.disabled_publications.iter().cloned().collect();
    let mut include: Vec<String> = input.enabled_tags.iter().cloned().collect();
    exclude.sort();
    include.sort();
    variables.filters = Some(FeedFilters {
        exclude_sources: if exclude.is_empty() {
            None
        } else {
            Some(exclude)
        },
        include_tags: if include.is_empty() {
            None
        } else {
            Some(include)
        },
    });
    FeedQuery {
        kind: QueryKind::AnonymousFeed,
        variables,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn input<'a>(
        tags: &'a HashSet<String>,
        pubs: &'a HashSet<String>,
    ) -> QueryInput<'a> {
        QueryInput {
            logged_in: false,
            show_only_unread: false,
            now: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            after: None,
            show_bookmarks: false,
            bookmark_scope: None,
            filter: None,
            search: None,
            sort_by: SortBy::Popularity,
            time_period: 7,
            enabled_tags: tags,
            disabled_publications: pubs,
        }
    }

    #[test]
    fn anonymous_default_selects_anonymous_feed_with_exclusions() {
        let tags = HashSet::new();
        let mut pubs = HashSet::new();
        pubs.insert("pub1".to_string());
        let query = select_query(&input(&tags, &pubs));
        assert_eq!(query.kind, QueryKind::AnonymousFeed);
        assert_eq!(query.variables.ranking, Some(Ranking::Popularity));
        let filters = query.variables.filters.unwrap();
        assert_eq!(filters.exclude_sources, Some(vec!["pub1".to_string()]));
        assert_eq!(filters.include_tags, None);
    }

    #[test]
    fn logged_in_default_selects_feed_with_unread_flag() {
        let tags = HashSet::new();
        let pubs = HashSet::new();
        let mut base = input(&tags, &pubs);
        base.logged_in = true;
        base.show_only_unread = true;
        base.sort_by = SortBy::Time;
        let query = select_query(&base);
        assert_eq!(query.kind, QueryKind::Feed);
        assert_eq!(query.variables.ranking, Some(Ranking::Time));
        assert_eq!(query.variables.unread_only, Some(true));
        assert!(query.variables.filters.is_none());
    }

    #[test]
    fn bookmarks_outrank_every_other_rule() {
        let tags = HashSet::new();
        let pubs = HashSet::new();
        let filter = Filter::Tag {
            name: "rust".into(),
        };
        let scope = BookmarkScope::List("list-1".into());
        let mut base = input(&tags, &pubs);
        base.logged_in = true;
        base.show_bookmarks = true;
        base.bookmark_scope = Some(&scope);
        base.filter = Some(&filter);
        base.search = Some("query");
        base.sort_by = SortBy::Upvotes;
        let query = select_query(&base);
        assert_eq!(query.kind, QueryKind::Bookmarks);
        assert_eq!(query.variables.list_id.as_deref(), Some("list-1"));
        assert_eq!(query.variables.unread_only, None);
    }

    #[test]
    fn unread_bookmark_scope_sets_unread_only() {
        let tags = HashSet::new();
        let pubs = HashSet::new();
        let scope = BookmarkScope::Unread;
        let mut base = input(&tags, &pubs);
        base.logged_in = true;
        base.show_bookmarks = true;
        base.bookmark_scope = Some(&scope);
        let query = select_query(&base);
        assert_eq!(query.variables.unread_only, Some(true));
        assert_eq!(query.variables.list_id, None);
    }

    #[test]
    fn publication_filter_outranks_search_and_sort() {
        let tags = HashSet::new();
        let pubs = HashSet::new();
        let filter = Filter::Publication { id: "pub9".into() };
        let mut base = input(&tags, &pubs);
        base.filter = Some(&filter);
        base.search = Some("rust");
        base.sort_by = SortBy::Upvotes;
        let query = select_query(&base);
        assert_eq!(query.kind, QueryKind::SourceFeed);
        assert_eq!(query.variables.source.as_deref(), Some("pub9"));
        assert_eq!(query.variables.ranking, Some(Ranking::Time));
    }

    #[test]
    fn search_outranks_sort_variants() {
        let tags = HashSet::new();
        let pubs = HashSet::new();
        let mut base = input(&tags, &pubs);
        base.search = Some("borrow checker");
        base.sort_by = SortBy::Discussions;
        let query = select_query(&base);
        assert_eq!(query.kind, QueryKind::Search);
        assert_eq!(query.variables.query.as_deref(), Some("borrow checker"));
    }

    #[test]
    fn upvote_sort_carries_period() {
        let tags = HashSet::new();
        let pubs = HashSet::new();
        let mut base = input(&tags, &pubs);
        base.sort_by = SortBy::Upvotes;
        base.time_period = 30;
        let query = select_query(&base);
        assert_eq!(query.kind, QueryKind::MostUpvoted);
        assert_eq!(query.variables.period, Some(30));
    }

    #[test]
    fn discussion_sort_selects_most_discussed() {
        let tags = HashSet::new();
        let pubs = HashSet::new();
        let mut base = input(&tags, &pubs);
        base.sort_by = SortBy::Discussions;
        let query = select_query(&base);
        assert_eq!(query.kind, QueryKind::MostDiscussed);
    }

    #[test]
    fn variables_serialize_camel_case_and_skip_absent() {
        let tags = HashSet::new();
        let pubs = HashSet::new();
        let mut base = input(&tags, &pubs);
        base.after = Some("cursor-1");
        let query = select_query(&base);
        let value = serde_json::to_value(&query.variables).unwrap();
        assert_eq!(value["after"], "cursor-1");
        assert_eq!(value["loggedIn"], false);
        assert!(value.get("tag").is_none());
        assert!(value.get("listId").is_none());
    }
}
