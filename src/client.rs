use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::post::{Ad, RawPost};
use crate::query::{FeedQuery, QueryKind};
use crate::remote::{
    AdService, FeedPage, FeedQueryService, MutationService, PageInfo, PreferenceService,
};

pub const DEFAULT_BASE_URL: &str = "https://api.devfeed.app/";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("api request failed with status {0}")]
    Status(StatusCode),
    #[error("graphql error: {0}")]
    GraphQl(String),
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub http_client: Option<HttpClient>,
}

/// Blocking HTTP client for the feed API: GraphQL queries and mutations plus
/// the ad endpoint. Implements the abstract service traits the engine runs
/// against.
pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    token: Option<String>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("api client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
            token: config.token,
        })
    }

    fn graphql<T: DeserializeOwned + Default>(
        &self,
        operation: &str,
        document: String,
        variables: Value,
    ) -> Result<T> {
        let url = self.base_url.join("graphql")?;
        let mut request = self
            .http
            .post(url)
            .header(USER_AGENT, &self.user_agent)
            .json(&json!({
                "operationName": operation,
                "query": document,
                "variables": variables,
            }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .with_context(|| format!("api: send {operation}"))?;

        if !response.status().is_success() {
            bail!(ApiError::Status(response.status()));
        }

        let envelope: GraphQlResponse<T> = response
            .json()
            .with_context(|| format!("api: decode {operation} response"))?;
        if let Some(error) = envelope.errors.into_iter().flatten().next() {
            bail!(ApiError::GraphQl(error.message));
        }
        envelope
            .data
            .ok_or_else(|| anyhow!("api: {operation} response missing data"))
    }

    fn mutate(&self, operation: &str, document: &str, variables: Value) -> Result<()> {
        let _: Value = self.graphql(operation, document.to_string(), variables)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize, Default)]
struct FeedData {
    feed: FeedConnection,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FeedConnection {
    #[serde(default)]
    page_info: PageInfo,
    #[serde(default)]
    edges: Vec<FeedEdge>,
}

#[derive(Debug, Deserialize)]
struct FeedEdge {
    node: RawPost,
}

const POST_FRAGMENT: &str = r#"fragment FeedPost on Post {
  id
  title
  url
  permalink
  image
  placeholder
  createdAt
  readTime
  source { id name image }
  tags
  numUpvotes
  numComments
  read
  upvoted
  bookmarked
  bookmarkList { id name }
}"#;

/// Every feed operation shares the same connection shape, so the documents
/// differ only in name, variable list, and root field arguments.
fn feed_document(kind: QueryKind) -> String {
    let (name, args, field) = match kind {
        QueryKind::Bookmarks => (
            "bookmarksFeed",
            "$loggedIn: Boolean!, $now: DateTime!, $after: String, $unreadOnly: Boolean, $listId: ID",
            "bookmarksFeed(now: $now, after: $after, unreadOnly: $unreadOnly, listId: $listId)",
        ),
        QueryKind::SourceFeed => (
            "sourceFeed",
            "$loggedIn: Boolean!, $now: DateTime!, $after: String, $ranking: Ranking, $source: ID!",
            "sourceFeed(now: $now, after: $after, ranking: $ranking, source: $source)",
        ),
        QueryKind::TagFeed => (
            "tagFeed",
            "$loggedIn: Boolean!, $now: DateTime!, $after: String, $ranking: Ranking, $tag: String!",
            "tagFeed(now: $now, after: $after, ranking: $ranking, tag: $tag)",
        ),
        QueryKind::Search => (
            "searchPosts",
            "$loggedIn: Boolean!, $now: DateTime!, $after: String, $query: String!",
            "searchPosts(now: $now, after: $after, query: $query)",
        ),
        QueryKind::MostUpvoted => (
            "mostUpvotedFeed",
            "$loggedIn: Boolean!, $now: DateTime!, $after: String, $period: Int",
            "mostUpvotedFeed(now: $now, after: $after, period: $period)",
        ),
        QueryKind::MostDiscussed => (
            "mostDiscussedFeed",
            "$loggedIn: Boolean!, $now: DateTime!, $after: String",
            "mostDiscussedFeed(now: $now, after: $after)",
        ),
        QueryKind::Feed => (
            "feed",
            "$loggedIn: Boolean!, $now: DateTime!, $after: String, $ranking: Ranking, $unreadOnly: Boolean",
            "feed(now: $now, after: $after, ranking: $ranking, unreadOnly: $unreadOnly)",
        ),
        QueryKind::AnonymousFeed => (
            "anonymousFeed",
            "$loggedIn: Boolean!, $now: DateTime!, $after: String, $ranking: Ranking, $filters: FiltersInput",
            "anonymousFeed(now: $now, after: $after, ranking: $ranking, filters: $filters)",
        ),
    };
    format!(
        "query {name}({args}) {{\n  feed: {field} {{\n    pageInfo {{ endCursor hasNextPage }}\n    edges {{ node {{ ...FeedPost }} }}\n  }}\n}}\n{POST_FRAGMENT}"
    )
}

impl FeedQueryService for Client {
    fn query(&self, query: &FeedQuery) -> Result<FeedPage> {
        let variables =
            serde_json::to_value(&query.variables).context("api: encode feed variables")?;
        let data: FeedData = self.graphql(
            query.kind.operation_name(),
            feed_document(query.kind),
            variables,
        )?;
        Ok(FeedPage {
            posts: data.feed.edges.into_iter().map(|edge| edge.node).collect(),
            page_info: data.feed.page_info,
        })
    }
}

impl MutationService for Client {
    fn add_bookmarks(&self, post_ids: &[String]) -> Result<()> {
        self.mutate(
            "addBookmarks",
            "mutation addBookmarks($data: AddBookmarkInput!) { addBookmarks(data: $data) { _ } }",
            json!({ "data": { "postIds": post_ids } }),
        )
    }

    fn remove_bookmark(&self, id: &str) -> Result<()> {
        self.mutate(
            "removeBookmark",
            "mutation removeBookmark($id: ID!) { removeBookmark(id: $id) { _ } }",
            json!({ "id": id }),
        )
    }

    fn add_bookmark_to_list(&self, id: &str, list_id: Option<&str>) -> Result<()> {
        self.mutate(
            "addBookmarkToList",
            "mutation addBookmarkToList($id: ID!, $listId: ID) { addBookmarkToList(id: $id, listId: $listId) { _ } }",
            json!({ "id": id, "listId": list_id }),
        )
    }

    fn upvote(&self, id: &str) -> Result<()> {
        self.mutate(
            "upvote",
            "mutation upvote($id: ID!) { upvote(id: $id) { _ } }",
            json!({ "id": id }),
        )
    }

    fn cancel_upvote(&self, id: &str) -> Result<()> {
        self.mutate(
            "cancelUpvote",
            "mutation cancelUpvote($id: ID!) { cancelUpvote(id: $id) { _ } }",
            json!({ "id": id }),
        )
    }
}

impl PreferenceService for Client {
    fn update_publication(&self, id: &str, enabled: bool) -> Result<()> {
        self.mutate(
            "updateFeedPublications",
            "mutation updateFeedPublications($data: [FeedPublicationInput!]!) { updateFeedPublications(data: $data) { _ } }",
            json!({ "data": [{ "publicationId": id, "enabled": enabled }] }),
        )
    }

    fn add_tags(&self, tags: &[String]) -> Result<()> {
        self.mutate(
            "addUserTags",
            "mutation addUserTags($tags: [String!]!) { addUserTags(tags: $tags) { _ } }",
            json!({ "tags": tags }),
        )
    }

    fn remove_tag(&self, tag: &str) -> Result<()> {
        self.mutate(
            "deleteUserTag",
            "mutation deleteUserTag($tag: String!) { deleteUserTag(tag: $tag) { _ } }",
            json!({ "tag": tag }),
        )
    }
}

impl AdService for Client {
    fn fetch_ad(&self) -> Result<Vec<Ad>> {
        let url = self.base_url.join("v1/a")?;
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .context("api: fetch ad")?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            bail!(ApiError::Status(response.status()));
        }
        response.json().context("api: decode ad response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_requires_user_agent() {
        let err = Client::new(ClientConfig::default()).err().unwrap();
        assert!(err.to_string().contains("user agent"));
    }

    #[test]
    fn feed_documents_carry_operation_and_fragment() {
        for kind in [
            QueryKind::Bookmarks,
            QueryKind::SourceFeed,
            QueryKind::TagFeed,
            QueryKind::Search,
            QueryKind::MostUpvoted,
            QueryKind::MostDiscussed,
            QueryKind::Feed,
            QueryKind::AnonymousFeed,
        ] {
            let document = feed_document(kind);
            assert!(document.contains(kind.operation_name()), "{document}");
            assert!(document.contains("...FeedPost"));
            assert!(document.contains("pageInfo { endCursor hasNextPage }"));
        }
    }

    #[test]
    fn graphql_envelope_decodes_data_and_errors() {
        let ok: GraphQlResponse<FeedData> = serde_json::from_str(
            r#"{"data":{"feed":{"pageInfo":{"endCursor":"c1","hasNextPage":true},"edges":[]}}}"#,
        )
        .unwrap();
        let data = ok.data.unwrap();
        assert_eq!(data.feed.page_info.end_cursor.as_deref(), Some("c1"));
        assert!(data.feed.page_info.has_next_page);

        let failed: GraphQlResponse<FeedData> =
            serde_json::from_str(r#"{"errors":[{"message":"unauthorized"}]}"#).unwrap();
        assert!(failed.data.is_none());
        assert_eq!(failed.errors.unwrap()[0].message, "unauthorized");
    }

    #[test]
    fn graphql_envelope_tolerates_empty_body() {
        let empty: GraphQlResponse<FeedData> = serde_json::from_str("{}").unwrap();
        assert!(empty.data.is_none());
        assert!(empty.errors.is_none());
    }

    #[test]
    fn feed_edges_decode_into_raw_posts() {
        let connection: FeedConnection = serde_json::from_str(
            r#"{
                "pageInfo": {"endCursor": null, "hasNextPage": false},
                "edges": [{"node": {"id": "p1", "title": "t", "url": "u", "createdAt": "2024-01-01T00:00:00Z"}}]
            }"#,
        )
        .unwrap();
        assert_eq!(connection.edges.len(), 1);
        assert_eq!(connection.edges[0].node.id, "p1");
    }
}
