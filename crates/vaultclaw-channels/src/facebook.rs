//! Facebook Page via the Graph API: comments and mentions in, page posts out.

use async_trait::async_trait;
use serde_json::{Value, json};
use vaultclaw_core::config::FacebookConfig;
use vaultclaw_core::{ActionItem, Result, VaultClawError};
use vaultclaw_vault::{ApprovalToken, GatedAction};

use crate::watcher::EventSource;

const RECENT_POSTS: u32 = 5;
const COMMENTS_PER_POST: u32 = 20;
const MENTIONS: u32 = 10;

/// Thin Graph API client.
#[derive(Debug, Clone)]
pub struct FacebookClient {
    config: FacebookConfig,
    http: reqwest::Client,
}

impl FacebookClient {
    pub fn new(config: FacebookConfig) -> Self {
        let http = crate::http_client(config.timeout_secs);
        Self { config, http }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.graph_base.trim_end_matches('/'), endpoint)
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.config.access_token.is_empty() {
            return Err(VaultClawError::NotConfigured("FACEBOOK_ACCESS_TOKEN".into()));
        }
        if self.config.page_id.is_empty() {
            return Err(VaultClawError::NotConfigured("FACEBOOK_PAGE_ID".into()));
        }
        Ok(())
    }

    async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        let response = self
            .http
            .get(self.url(endpoint))
            .query(&[("access_token", self.config.access_token.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|e| VaultClawError::Upstream(format!("Facebook GET {endpoint} failed: {e}")))?;
        read_graph(response, endpoint).await
    }

    pub(crate) async fn publish(&self, message: &str, link: Option<&str>) -> Result<Value> {
        self.ensure_configured()?;
        let endpoint = format!("{}/feed", self.config.page_id);
        let mut form = vec![
            ("message", message.to_string()),
            ("access_token", self.config.access_token.clone()),
        ];
        if let Some(link) = link.filter(|l| !l.is_empty()) {
            form.push(("link", link.to_string()));
        }
        let response = self
            .http
            .post(self.url(&endpoint))
            .form(&form)
            .send()
            .await
            .map_err(|e| VaultClawError::Upstream(format!("Facebook publish failed: {e}")))?;
        let body = read_graph(response, &endpoint).await?;
        tracing::info!("📣 Published Facebook post {}", body["id"].as_str().unwrap_or("?"));
        Ok(json!({ "post_id": body["id"] }))
    }
}

async fn read_graph(response: reqwest::Response, endpoint: &str) -> Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| VaultClawError::Upstream(format!("Invalid Graph response from {endpoint}: {e}")))?;
    if !status.is_success() || body.get("error").is_some() {
        let msg = body["error"]["message"].as_str().unwrap_or("unknown error");
        return Err(VaultClawError::Upstream(format!("Graph API {status} on {endpoint}: {msg}")));
    }
    Ok(body)
}

/// Comments on recent page posts and posts the page is tagged in.
pub struct FacebookSource {
    client: FacebookClient,
}

impl FacebookSource {
    pub fn new(client: FacebookClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventSource for FacebookSource {
    fn name(&self) -> &str {
        "facebook"
    }

    fn actor(&self) -> &str {
        "FacebookWatcher"
    }

    async fn fetch(&mut self) -> Result<Vec<ActionItem>> {
        self.client.ensure_configured()?;
        let page = self.client.config.page_id.clone();
        let mut items = Vec::new();

        let posts = self
            .client
            .get(
                &format!("{page}/posts"),
                &[
                    ("fields", "id,message,created_time".into()),
                    ("limit", RECENT_POSTS.to_string()),
                ],
            )
            .await?;
        for post in data(&posts) {
            let Some(post_id) = post["id"].as_str() else { continue };
            let comments = self
                .client
                .get(
                    &format!("{post_id}/comments"),
                    &[
                        ("fields", "id,message,from,created_time".into()),
                        ("limit", COMMENTS_PER_POST.to_string()),
                    ],
                )
                .await?;
            items.extend(comment_items(post, &comments));
        }

        let tagged = self
            .client
            .get(
                &format!("{page}/tagged"),
                &[
                    ("fields", "id,message,from,created_time,permalink_url".into()),
                    ("limit", MENTIONS.to_string()),
                ],
            )
            .await?;
        items.extend(mention_items(&tagged));
        Ok(items)
    }
}

fn data(v: &Value) -> &[Value] {
    v["data"].as_array().map(Vec::as_slice).unwrap_or_default()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub(crate) fn comment_items(post: &Value, comments: &Value) -> Vec<ActionItem> {
    let post_message = truncate(post["message"].as_str().unwrap_or(""), 100);
    data(comments)
        .iter()
        .filter_map(|c| {
            let id = c["id"].as_str()?;
            let from = c["from"]["name"].as_str().unwrap_or("Unknown");
            let message = c["message"].as_str().unwrap_or("");
            Some(
                ActionItem::new("facebook", "comment", format!("Facebook Comment from {from}"))
                    .with_external_id(id)
                    .with_summary(format!("**On Post:** {post_message}\n\n**Comment:**\n> {message}"))
                    .with_payload(json!({
                        "comment_id": id,
                        "post_id": post["id"],
                        "from_name": from,
                        "from_id": c["from"]["id"],
                        "message": message,
                        "created_time": c["created_time"],
                    })),
            )
        })
        .collect()
}

pub(crate) fn mention_items(tagged: &Value) -> Vec<ActionItem> {
    data(tagged)
        .iter()
        .filter_map(|m| {
            let id = m["id"].as_str()?;
            let from = m["from"]["name"].as_str().unwrap_or("Unknown");
            let message = m["message"].as_str().unwrap_or("");
            Some(
                ActionItem::new("facebook", "mention", format!("Facebook Mention by {from}"))
                    .with_external_id(id)
                    .with_summary(format!("**Message:**\n> {message}"))
                    .with_payload(json!({
                        "mention_id": id,
                        "from_name": from,
                        "from_id": m["from"]["id"],
                        "message": message,
                        "created_time": m["created_time"],
                        "permalink_url": m["permalink_url"],
                    })),
            )
        })
        .collect()
}

/// Publish to the page. Always gated.
pub struct FacebookPost {
    client: FacebookClient,
    pub message: String,
    pub link: Option<String>,
}

impl FacebookPost {
    pub fn new(client: FacebookClient, message: impl Into<String>, link: Option<String>) -> Self {
        Self {
            client,
            message: message.into(),
            link,
        }
    }
}

#[async_trait]
impl GatedAction for FacebookPost {
    fn kind(&self) -> &str {
        "facebook_post"
    }

    fn describe(&self) -> String {
        format!("Facebook page post: {}", truncate(&self.message, 80))
    }

    fn payload(&self) -> Value {
        json!({ "message": self.message, "link": self.link })
    }

    async fn execute(self, _token: ApprovalToken) -> Result<Value> {
        self.client.publish(&self.message, self.link.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_items() {
        let post = json!({ "id": "p1", "message": "Launch day!" });
        let comments = json!({ "data": [
            { "id": "c1", "message": "Congrats", "from": { "name": "Ana", "id": "9" }, "created_time": "2026-02-22T10:00:00+0000" },
            { "message": "no id, ignored" },
        ]});
        let items = comment_items(&post, &comments);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind(), "facebook_comment");
        assert_eq!(items[0].dedup_key().as_deref(), Some("comment:c1"));
        assert_eq!(items[0].title, "Facebook Comment from Ana");
        assert_eq!(items[0].payload["post_id"], "p1");
        assert!(items[0].summary.contains("Launch day!"));
    }

    #[test]
    fn test_mention_items_tolerate_missing_fields() {
        let tagged = json!({ "data": [ { "id": "m1" } ] });
        let items = mention_items(&tagged);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Facebook Mention by Unknown");
        assert!(mention_items(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_source() {
        let mut source = FacebookSource::new(FacebookClient::new(FacebookConfig::default()));
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, VaultClawError::NotConfigured(_)));
    }

    #[test]
    fn test_post_is_always_gated() {
        let post = FacebookPost::new(FacebookClient::new(FacebookConfig::default()), "Hello", None);
        let policy = vaultclaw_vault::ApprovalPolicy::default();
        assert!(policy.requires_approval(post.kind(), post.amount()));
        assert_eq!(post.payload()["message"], "Hello");
    }
}
