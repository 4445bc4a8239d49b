//! Chat delivery.
//!
//! The scan orchestrator only needs three operations from the chat
//! platform: read recent history, remove its own previous output, and
//! post an embed. `ChatTransport` captures exactly that; `DiscordClient`
//! implements it over the Discord REST API.

pub mod client;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::report::Embed;

pub use client::DiscordClient;

/// One message from channel history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: u64,
    pub author_id: u64,
    pub content: String,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Most recent messages first, at most `limit`.
    async fn recent_messages(&self, channel_id: u64, limit: u32) -> Result<Vec<ChatMessage>>;

    /// Delete this bot's messages among the last `limit`. Messages that
    /// are already gone are skipped. Returns how many were deleted.
    async fn delete_own_messages(&self, channel_id: u64, limit: u32) -> Result<usize>;

    async fn send_embed(&self, channel_id: u64, embed: &Embed) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
