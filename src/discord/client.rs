//! Discord REST client.
//!
//! API: https://discord.com/developers/docs/reference (v10)
//! Auth: `Authorization: Bot <token>`
//! Rate limit: 429 with `retry_after` (seconds) in the JSON body.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ChatMessage, ChatTransport};
use crate::engine::report::Embed;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const USER_AGENT: &str = concat!("DiscordBot (banwatch, ", env!("CARGO_PKG_VERSION"), ")");

/// Discord caps one history page at 100 messages.
const MAX_HISTORY_PAGE: u32 = 100;

/// Retries after a 429 before the request is reported as failed.
const MAX_RATE_LIMIT_RETRIES: u32 = 5;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    #[serde(default)]
    username: String,
}

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
    author: DiscordUser,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after: f64,
}

fn parse_snowflake(raw: &str) -> Result<u64> {
    raw.parse::<u64>()
        .with_context(|| format!("Invalid Discord snowflake: {raw}"))
}

fn to_chat_messages(raw: Vec<DiscordMessage>) -> Result<Vec<ChatMessage>> {
    raw.into_iter()
        .map(|m| {
            Ok(ChatMessage {
                id: parse_snowflake(&m.id)?,
                author_id: parse_snowflake(&m.author.id)?,
                content: m.content,
            })
        })
        .collect()
}

/// `POST /channels/{id}/messages` body carrying one embed.
fn embed_payload(embed: &Embed) -> serde_json::Value {
    serde_json::json!({ "embeds": [embed] })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct DiscordClient {
    http: Client,
    api_base: String,
    bot_user_id: u64,
}

impl DiscordClient {
    /// Build the client and look up the bot's own user id, which is
    /// needed to recognise its earlier messages.
    pub async fn connect(api_base: &str, token: &SecretString) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bot {}", token.expose_secret()))
            .context("Discord token is not a valid header value")?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client for Discord")?;

        let mut client = Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_user_id: 0,
        };

        let resp = client
            .send(Method::GET, "/users/@me", None)
            .await
            .context("Discord identity lookup failed")?;
        let me: DiscordUser = resp
            .json()
            .await
            .context("Failed to parse Discord /users/@me response")?;
        client.bot_user_id = parse_snowflake(&me.id)?;

        info!(user = %me.username, id = client.bot_user_id, "Bot ready");
        Ok(client)
    }

    /// Send one request, sleeping through 429s. Any other status is
    /// returned to the caller as-is.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.api_base);

        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let mut req = self.http.request(method.clone(), &url);
            if let Some(body) = body {
                req = req.json(body);
            }

            debug!(method = %method, path, "Discord request");
            let resp = req.send().await.context("Discord API request failed")?;

            if resp.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(resp);
            }

            let wait = resp
                .json::<RateLimitBody>()
                .await
                .map(|b| b.retry_after)
                .unwrap_or(1.0);
            warn!(path, attempt = attempt + 1, retry_after = wait, "Discord rate limited");
            tokio::time::sleep(Duration::from_secs_f64(wait.max(0.0))).await;
        }

        anyhow::bail!("Discord kept rate limiting {path}")
    }
}

#[async_trait]
impl ChatTransport for DiscordClient {
    async fn recent_messages(&self, channel_id: u64, limit: u32) -> Result<Vec<ChatMessage>> {
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);
        let path = format!("/channels/{channel_id}/messages?limit={limit}");

        let resp = self.send(Method::GET, &path, None).await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Discord history error {status}: {body}");
        }

        let raw: Vec<DiscordMessage> = resp
            .json()
            .await
            .context("Failed to parse Discord message history")?;
        to_chat_messages(raw)
    }

    async fn delete_own_messages(&self, channel_id: u64, limit: u32) -> Result<usize> {
        let history = self.recent_messages(channel_id, limit).await?;
        let mut deleted = 0;

        for message in history.iter().filter(|m| m.author_id == self.bot_user_id) {
            let path = format!("/channels/{channel_id}/messages/{}", message.id);
            let resp = match self.send(Method::DELETE, &path, None).await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(channel_id, message_id = message.id, error = %e, "Failed to delete message");
                    continue;
                }
            };

            match resp.status() {
                s if s.is_success() => deleted += 1,
                StatusCode::NOT_FOUND => debug!(message_id = message.id, "Message already gone"),
                s => warn!(channel_id, message_id = message.id, status = %s, "Failed to delete message"),
            }
        }

        info!(channel_id, deleted, "Deleted previous bot messages");
        Ok(deleted)
    }

    async fn send_embed(&self, channel_id: u64, embed: &Embed) -> Result<()> {
        let path = format!("/channels/{channel_id}/messages");
        let payload = embed_payload(embed);

        let resp = self.send(Method::POST, &path, Some(&payload)).await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Discord send error {status}: {body}");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_history() {
        let json = r#"[
            {"id": "1203000000000000001", "channel_id": "9",
             "author": {"id": "555", "username": "someone", "bot": false},
             "content": "https://steamcommunity.com/id/gaben/TEAM1"},
            {"id": "1203000000000000002", "author": {"id": "777"}}
        ]"#;
        let raw: Vec<DiscordMessage> = serde_json::from_str(json).unwrap();
        let messages = to_chat_messages(raw).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, 1203000000000000001);
        assert_eq!(messages[0].author_id, 555);
        assert!(messages[0].content.ends_with("/TEAM1"));
        assert_eq!(messages[1].content, "");
    }

    #[test]
    fn test_bad_snowflake() {
        assert!(parse_snowflake("not-a-number").is_err());
        assert_eq!(parse_snowflake("42").unwrap(), 42);
    }

    #[test]
    fn test_embed_payload() {
        let mut embed = Embed::new("Invalid Accounts - UNGROUPED");
        embed.add_field("Invalid Accounts - UNGROUPED (Part 1)", "x", false);
        let payload = embed_payload(&embed);
        assert_eq!(payload["embeds"][0]["title"], "Invalid Accounts - UNGROUPED");
        assert_eq!(payload["embeds"][0]["fields"][0]["value"], "x");
    }

    #[test]
    fn test_rate_limit_body() {
        let body: RateLimitBody =
            serde_json::from_str(r#"{"message":"You are being rate limited.","retry_after":0.64,"global":false}"#)
                .unwrap();
        assert!((body.retry_after - 0.64).abs() < 1e-9);
    }
}
