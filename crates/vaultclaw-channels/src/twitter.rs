//! Twitter / X API v2: mentions in, tweets out.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use vaultclaw_core::config::TwitterConfig;
use vaultclaw_core::{ActionItem, Result, VaultClawError};
use vaultclaw_vault::{ApprovalToken, GatedAction};

use crate::watcher::EventSource;

const MAX_MENTIONS: u32 = 10;

#[derive(Debug, Clone)]
pub struct TwitterClient {
    config: TwitterConfig,
    http: reqwest::Client,
}

impl TwitterClient {
    pub fn new(config: TwitterConfig) -> Self {
        let http = crate::http_client(config.timeout_secs);
        Self { config, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        if self.config.bearer_token.is_empty() {
            return Err(VaultClawError::NotConfigured("TWITTER_BEARER_TOKEN".into()));
        }
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.config.bearer_token)
            .query(params)
            .send()
            .await
            .map_err(|e| VaultClawError::Upstream(format!("Twitter GET {path} failed: {e}")))?;
        read_api(response, path).await
    }

    pub(crate) async fn me(&self) -> Result<String> {
        let body = self.get("users/me", &[]).await?;
        body["data"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| VaultClawError::Upstream("Twitter users/me returned no id".into()))
    }

    pub(crate) async fn mentions(&self, user_id: &str) -> Result<Value> {
        self.get(
            &format!("users/{user_id}/mentions"),
            &[
                ("max_results", MAX_MENTIONS.to_string()),
                (
                    "tweet.fields",
                    "created_at,author_id,public_metrics,text,conversation_id".into(),
                ),
                ("expansions", "author_id".into()),
                ("user.fields", "name,username".into()),
            ],
        )
        .await
    }

    pub(crate) async fn create_tweet(&self, text: &str, reply_to: Option<&str>) -> Result<Value> {
        if self.config.user_access_token.is_empty() {
            return Err(VaultClawError::NotConfigured("TWITTER_USER_ACCESS_TOKEN".into()));
        }
        let mut body = json!({ "text": text });
        if let Some(id) = reply_to {
            body["reply"] = json!({ "in_reply_to_tweet_id": id });
        }
        let response = self
            .http
            .post(self.url("tweets"))
            .bearer_auth(&self.config.user_access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| VaultClawError::Upstream(format!("Twitter post failed: {e}")))?;
        let result = read_api(response, "tweets").await?;
        let id = result["data"]["id"].clone();
        tracing::info!("🐦 Posted tweet {}", id.as_str().unwrap_or("?"));
        Ok(json!({ "tweet_id": id }))
    }
}

async fn read_api(response: reqwest::Response, path: &str) -> Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| VaultClawError::Upstream(format!("Invalid Twitter response from {path}: {e}")))?;
    if !status.is_success() {
        let detail = body["detail"]
            .as_str()
            .or_else(|| body["title"].as_str())
            .unwrap_or("unknown error");
        return Err(VaultClawError::Upstream(format!("Twitter {status} on {path}: {detail}")));
    }
    Ok(body)
}

/// Latest mentions of the authenticated account.
pub struct TwitterSource {
    client: TwitterClient,
    user_id: Option<String>,
}

impl TwitterSource {
    pub fn new(client: TwitterClient) -> Self {
        Self {
            client,
            user_id: None,
        }
    }
}

#[async_trait]
impl EventSource for TwitterSource {
    fn name(&self) -> &str {
        "twitter"
    }

    fn actor(&self) -> &str {
        "TwitterWatcher"
    }

    async fn fetch(&mut self) -> Result<Vec<ActionItem>> {
        if self.user_id.is_none() {
            self.user_id = Some(self.client.me().await?);
        }
        let user_id = self.user_id.clone().unwrap_or_default();
        let body = self.client.mentions(&user_id).await?;
        Ok(mention_items(&body))
    }
}

pub(crate) fn mention_items(body: &Value) -> Vec<ActionItem> {
    let users: HashMap<&str, (&str, &str)> = body["includes"]["users"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|u| {
            Some((
                u["id"].as_str()?,
                (
                    u["name"].as_str().unwrap_or("Unknown"),
                    u["username"].as_str().unwrap_or("unknown"),
                ),
            ))
        })
        .collect();

    body["data"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|t| {
            let id = t["id"].as_str()?;
            let author_id = t["author_id"].as_str().unwrap_or("");
            let (name, username) = users.get(author_id).copied().unwrap_or(("Unknown", "unknown"));
            let text = t["text"].as_str().unwrap_or("");
            Some(
                ActionItem::new("twitter", "mention", format!("Twitter Mention by @{username}"))
                    .with_external_id(id)
                    .with_summary(format!("**{name}** (@{username}):\n> {text}"))
                    .with_payload(json!({
                        "tweet_id": id,
                        "text": text,
                        "author_name": name,
                        "author_username": username,
                        "author_id": author_id,
                        "created_at": t["created_at"],
                        "conversation_id": t["conversation_id"],
                        "metrics": t["public_metrics"],
                    })),
            )
        })
        .collect()
}

/// Post a tweet or reply. Always gated.
pub struct Tweet {
    client: TwitterClient,
    pub text: String,
    pub reply_to: Option<String>,
}

impl Tweet {
    pub fn new(client: TwitterClient, text: impl Into<String>, reply_to: Option<String>) -> Self {
        Self {
            client,
            text: text.into(),
            reply_to,
        }
    }
}

#[async_trait]
impl GatedAction for Tweet {
    fn kind(&self) -> &str {
        "twitter_post"
    }

    fn describe(&self) -> String {
        match &self.reply_to {
            Some(id) => format!("Reply to tweet {id}: {}", self.text),
            None => format!("Tweet: {}", self.text),
        }
    }

    fn payload(&self) -> Value {
        json!({ "text": self.text, "reply_to": self.reply_to })
    }

    async fn execute(self, _token: ApprovalToken) -> Result<Value> {
        self.client.create_tweet(&self.text, self.reply_to.as_deref()).await
    }
}
