//! Scan orchestrator: one pass over a channel's history.
//!
//! Per channel: remove the bot's previous report, extract every Steam
//! profile link from recent messages, resolve it, look up bans and the
//! inventory, then post one set of embeds per bucket plus a totals embed.
//! Profiles are processed one at a time; the per-family rate gates in the
//! Steam clients set the pace.

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

use crate::discord::{ChatMessage, ChatTransport};
use crate::engine::report::{self, Embed};
use crate::engine::valuation::total_value;
use crate::steam::{InventorySource, ProfileLookup};
use crate::types::{Bucket, GroupTotals, GroupedAccounts, ProfileKind, ProfileReference, UNGROUPED};

fn scan_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https?://steamcommunity\.com/(profiles|id)/(\w+)(?:/(\w+))?").expect("Invalid scan link regex")
    })
}

// ---------------------------------------------------------------------------
// Link extraction
// ---------------------------------------------------------------------------

/// A profile link found in a message, with its group tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    pub reference: ProfileReference,
    pub group: String,
}

/// Every profile link in `content`, in order. A path segment after the
/// profile token is the group tag; without one the link is `UNGROUPED`.
pub fn extract_links(content: &str) -> Vec<ExtractedLink> {
    scan_link_re()
        .captures_iter(content)
        .filter_map(|caps| {
            let kind = ProfileKind::from_path_segment(&caps[1])?;
            let group = caps.get(3).map_or(UNGROUPED, |m| m.as_str());
            Some(ExtractedLink {
                reference: ProfileReference::new(kind, &caps[2]),
                group: group.to_string(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Per-channel accumulation
// ---------------------------------------------------------------------------

/// Account blocks and group totals gathered from one channel.
#[derive(Debug, Default)]
pub struct ChannelScan {
    pub buckets: BTreeMap<Bucket, GroupedAccounts>,
    pub totals: GroupTotals,
    pub total_found: usize,
}

impl ChannelScan {
    pub fn add(&mut self, bucket: Bucket, group: &str, block: String) {
        self.buckets.entry(bucket).or_default().add(group, block);
    }

    pub fn bucket(&self, bucket: Bucket) -> Option<&GroupedAccounts> {
        self.buckets.get(&bucket)
    }

    pub fn count(&self, bucket: Bucket) -> usize {
        self.bucket(bucket).map_or(0, |g| g.account_count())
    }

    /// Every embed for this channel: buckets in report order, then totals.
    pub fn render(&self) -> Vec<Embed> {
        let mut embeds = Vec::new();
        for bucket in Bucket::ALL {
            if let Some(grouped) = self.bucket(*bucket) {
                embeds.extend(report::render_grouped(bucket.title(), grouped, self.total_found));
            }
        }
        embeds.extend(report::render_totals(&self.totals));
        embeds
    }
}

fn banned_block(link: &str, steam_id: &str, inventory: &str) -> String {
    format!("Original ID: {link}\n`Steam ID:` {steam_id}\n```{inventory}```")
}

fn clean_block(link: &str, inventory: &str) -> String {
    format!("Original ID: {link}\n```{inventory}```")
}

// ---------------------------------------------------------------------------
// Scan report
// ---------------------------------------------------------------------------

/// Outcome of one channel scan, kept for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub channel_id: u64,
    pub total_found: usize,
    pub bucket_counts: BTreeMap<String, usize>,
    pub group_totals: GroupTotals,
    pub grand_total: f64,
    pub deleted_messages: usize,
    pub embeds_sent: usize,
    pub embeds_failed: usize,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct Scanner {
    resolver: Arc<dyn ProfileLookup>,
    inventory: Arc<dyn InventorySource>,
    app_id: u32,
    context_id: u32,
    history_limit: u32,
}

impl Scanner {
    pub fn new(
        resolver: Arc<dyn ProfileLookup>,
        inventory: Arc<dyn InventorySource>,
        app_id: u32,
        context_id: u32,
        history_limit: u32,
    ) -> Self {
        Self {
            resolver,
            inventory,
            app_id,
            context_id,
            history_limit,
        }
    }

    /// Resolve and classify every link in `messages`.
    pub async fn scan_messages(&self, messages: &[ChatMessage]) -> ChannelScan {
        let mut scan = ChannelScan::default();

        for message in messages {
            let links = extract_links(&message.content);
            if links.is_empty() {
                continue;
            }
            scan.total_found += links.len();
            debug!(message_id = message.id, count = links.len(), "Found steam links");

            for link in &links {
                self.process_link(link, &mut scan).await;
            }
        }

        scan
    }

    async fn process_link(&self, extracted: &ExtractedLink, scan: &mut ChannelScan) {
        let link = extracted.reference.raw_link.as_str();
        let group = extracted.group.as_str();

        let Some(profile) = self.resolver.normalize(link).await else {
            warn!(link, "Invalid/unresolvable Steam link");
            scan.add(Bucket::Invalid, group, format!("Invalid or unresolvable Steam link: {link}"));
            return;
        };
        let steam_id = profile.canonical_id.as_str();
        debug!(link, steam_id, original = %profile.original_reference, "Normalized link");

        let Some(status) = self.resolver.get_ban_status(steam_id).await else {
            warn!(steam_id, "Could not retrieve profile status");
            scan.add(
                Bucket::Clean,
                group,
                format!("Original ID: {link} (Steam ID: {steam_id}) - Could not retrieve data"),
            );
            return;
        };

        let inventory = self
            .inventory
            .get_summary(steam_id, self.app_id, self.context_id, true)
            .await;
        let value = total_value(&inventory);
        scan.totals.add(group, value);
        debug!(steam_id, group, value, primary = %status.primary_bucket(), "Added inventory value to group");

        let block = banned_block(link, steam_id, &inventory);
        for bucket in status.buckets() {
            let text = match bucket {
                Bucket::Game => format!("{block} - {} Game Ban(s)", status.game_ban_count),
                Bucket::Clean => clean_block(link, &inventory),
                _ => block.clone(),
            };
            scan.add(bucket, group, text);
        }
    }

    /// Full pass over one channel. Only a failed history read is an
    /// error; cleanup and per-embed delivery failures are logged.
    pub async fn run_channel(&self, chat: &dyn ChatTransport, channel_id: u64) -> Result<ScanReport> {
        info!(channel_id, "Processing channel");

        let deleted_messages = match chat.delete_own_messages(channel_id, self.history_limit).await {
            Ok(n) => n,
            Err(e) => {
                error!(channel_id, error = %e, "Failed while deleting previous bot messages");
                0
            }
        };

        let messages = chat.recent_messages(channel_id, self.history_limit).await?;
        let scan = self.scan_messages(&messages).await;

        info!(
            channel_id,
            total_found = scan.total_found,
            vac = scan.count(Bucket::Vac),
            community = scan.count(Bucket::Community),
            game = scan.count(Bucket::Game),
            clean = scan.count(Bucket::Clean),
            invalid = scan.count(Bucket::Invalid),
            groups = scan.totals.len(),
            "Channel summary"
        );

        let mut embeds_sent = 0;
        let mut embeds_failed = 0;
        for embed in scan.render() {
            match chat.send_embed(channel_id, &embed).await {
                Ok(()) => {
                    embeds_sent += 1;
                    info!(channel_id, title = %embed.title, printed = embed.printed, found = scan.total_found, "Sent embed");
                }
                Err(e) => {
                    embeds_failed += 1;
                    error!(channel_id, title = %embed.title, error = %e, "Failed to send embed");
                }
            }
        }

        Ok(ScanReport {
            channel_id,
            total_found: scan.total_found,
            bucket_counts: Bucket::ALL
                .iter()
                .map(|b| (b.to_string(), scan.count(*b)))
                .collect(),
            grand_total: scan.totals.grand_total(),
            group_totals: scan.totals,
            deleted_messages,
            embeds_sent,
            embeds_failed,
            finished_at: Utc::now(),
        })
    }

    /// Scan every channel in turn. A channel that fails is logged and
    /// skipped.
    pub async fn run(&self, chat: &dyn ChatTransport, channel_ids: &[u64]) -> Vec<ScanReport> {
        info!(channels = channel_ids.len(), "Steam check started");
        let mut reports = Vec::with_capacity(channel_ids.len());

        for &channel_id in channel_ids {
            match self.run_channel(chat, channel_id).await {
                Ok(report) => reports.push(report),
                Err(e) => error!(channel_id, error = %e, "Channel scan failed"),
            }
        }

        reports
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::fake::{FakeChat, BOT_ID};
    use crate::steam::inventory::MockInventorySource;
    use crate::steam::resolver::MockProfileLookup;
    use crate::types::{BanStatus, ResolvedProfile};

    const CHANNEL: u64 = 9;

    fn resolved(id: &str) -> Option<ResolvedProfile> {
        Some(ResolvedProfile {
            canonical_id: id.to_string(),
            original_reference: id.to_string(),
        })
    }

    /// Resolver where every numeric profile resolves to itself, vanity
    /// names fail, and bans come from a fixed table.
    fn lookup(bans: Vec<(&'static str, BanStatus)>) -> MockProfileLookup {
        let mut mock = MockProfileLookup::new();
        mock.expect_normalize().returning(|link| {
            link.strip_prefix("https://steamcommunity.com/profiles/").and_then(resolved)
        });
        mock.expect_get_ban_status().returning(move |id| {
            bans.iter().find(|(k, _)| *k == id).map(|(_, s)| *s)
        });
        mock
    }

    fn inventory(text: &'static str) -> MockInventorySource {
        let mut mock = MockInventorySource::new();
        mock.expect_get_summary()
            .withf(|_, app, ctx, use_cache| *app == 730 && *ctx == 2 && *use_cache)
            .returning(move |_, _, _, _| text.to_string());
        mock
    }

    fn scanner(resolver: MockProfileLookup, inv: MockInventorySource) -> Scanner {
        Scanner::new(Arc::new(resolver), Arc::new(inv), 730, 2, 100)
    }

    fn msg(content: &str) -> ChatMessage {
        ChatMessage { id: 1, author_id: 42, content: content.to_string() }
    }

    #[test]
    fn test_extract_links_with_groups() {
        let links = extract_links(
            "check https://steamcommunity.com/profiles/76561197960287930/TEAM1 and \
             http://steamcommunity.com/id/gabelogannewell plus https://steamcommunity.com/groups/x",
        );
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].reference.kind, ProfileKind::NumericId);
        assert_eq!(links[0].reference.token, "76561197960287930");
        assert_eq!(links[0].group, "TEAM1");
        assert_eq!(
            links[0].reference.raw_link,
            "https://steamcommunity.com/profiles/76561197960287930"
        );
        assert_eq!(links[1].reference.kind, ProfileKind::VanityName);
        assert_eq!(links[1].group, UNGROUPED);
        assert_eq!(links[1].reference.raw_link, "https://steamcommunity.com/id/gabelogannewell");
    }

    #[test]
    fn test_extract_links_trailing_slash_is_ungrouped() {
        let links = extract_links("https://steamcommunity.com/id/someone/");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].group, UNGROUPED);
    }

    #[tokio::test]
    async fn test_classification_and_formats() {
        let bans = vec![
            ("1", BanStatus { vac_banned: true, community_banned: false, game_ban_count: 2 }),
            ("2", BanStatus::default()),
            ("3", BanStatus { vac_banned: false, community_banned: true, game_ban_count: 0 }),
        ];
        let s = scanner(lookup(bans), inventory("Items:\nCase x2 - $1.50"));
        let scan = s
            .scan_messages(&[
                msg("https://steamcommunity.com/profiles/1/A https://steamcommunity.com/profiles/2/A"),
                msg("no links here"),
                msg("https://steamcommunity.com/profiles/3 https://steamcommunity.com/profiles/4/B"),
                msg("https://steamcommunity.com/id/nobody/B"),
            ])
            .await;

        assert_eq!(scan.total_found, 5);
        let banned = "Original ID: https://steamcommunity.com/profiles/1\n`Steam ID:` 1\n```Items:\nCase x2 - $1.50```";

        let vac = scan.bucket(Bucket::Vac).unwrap();
        assert_eq!(vac.get("A").unwrap(), &[banned.to_string()]);

        let game = scan.bucket(Bucket::Game).unwrap();
        assert_eq!(game.get("A").unwrap(), &[format!("{banned} - 2 Game Ban(s)")]);

        let community = scan.bucket(Bucket::Community).unwrap();
        assert_eq!(community.get(UNGROUPED).unwrap().len(), 1);

        let clean = scan.bucket(Bucket::Clean).unwrap();
        assert_eq!(
            clean.get("A").unwrap(),
            &["Original ID: https://steamcommunity.com/profiles/2\n```Items:\nCase x2 - $1.50```".to_string()]
        );
        assert_eq!(
            clean.get("B").unwrap(),
            &["Original ID: https://steamcommunity.com/profiles/4 (Steam ID: 4) - Could not retrieve data".to_string()]
        );

        let invalid = scan.bucket(Bucket::Invalid).unwrap();
        assert_eq!(
            invalid.get("B").unwrap(),
            &["Invalid or unresolvable Steam link: https://steamcommunity.com/id/nobody".to_string()]
        );

        // Only profiles with a ban record contribute to totals.
        assert!((scan.totals.get("A").unwrap() - 6.0).abs() < 1e-9);
        assert!((scan.totals.get(UNGROUPED).unwrap() - 3.0).abs() < 1e-9);
        assert!(scan.totals.get("B").is_none());
    }

    #[tokio::test]
    async fn test_sentinel_inventory_counts_zero() {
        let bans = vec![("7", BanStatus::default())];
        let s = scanner(lookup(bans), inventory("Inventory rate-limited"));
        let scan = s.scan_messages(&[msg("https://steamcommunity.com/profiles/7/G")]).await;
        assert_eq!(scan.totals.get("G"), Some(0.0));
        assert!(scan.bucket(Bucket::Clean).unwrap().get("G").unwrap()[0].contains("Inventory rate-limited"));
    }

    #[tokio::test]
    async fn test_run_channel_cleans_up_and_sends() {
        let bans = vec![("1", BanStatus { vac_banned: true, ..BanStatus::default() })];
        let s = scanner(lookup(bans), inventory("Items:\nCase - $2.00"));
        let chat = FakeChat::with_messages(CHANNEL, &["https://steamcommunity.com/profiles/1/T"]);
        chat.history.lock().unwrap().get_mut(&CHANNEL).unwrap().push(ChatMessage {
            id: 5,
            author_id: BOT_ID,
            content: String::new(),
        });

        let report = s.run_channel(&chat, CHANNEL).await.unwrap();
        assert_eq!(report.deleted_messages, 1);
        assert_eq!(report.total_found, 1);
        assert_eq!(report.bucket_counts["vac"], 1);
        assert_eq!(report.bucket_counts["clean"], 0);
        assert_eq!(report.embeds_sent, 2);
        assert_eq!(report.embeds_failed, 0);
        assert!((report.grand_total - 2.0).abs() < 1e-9);
        assert_eq!(
            chat.sent_titles(),
            vec!["VAC Banned Accounts - T".to_string(), "Group Inventory Totals".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_embed_does_not_stop_delivery() {
        let bans = vec![
            ("1", BanStatus { vac_banned: true, ..BanStatus::default() }),
            ("2", BanStatus::default()),
        ];
        let s = scanner(lookup(bans), inventory("No items found"));
        let mut chat = FakeChat::with_messages(
            CHANNEL,
            &["https://steamcommunity.com/profiles/1 https://steamcommunity.com/profiles/2"],
        );
        chat.reject_titles = vec!["VAC Banned Accounts - UNGROUPED".to_string()];

        let report = s.run_channel(&chat, CHANNEL).await.unwrap();
        assert_eq!(report.embeds_failed, 1);
        assert_eq!(report.embeds_sent, 2);
        assert_eq!(
            chat.sent_titles(),
            vec!["Not Banned Accounts - UNGROUPED".to_string(), "Group Inventory Totals".to_string()]
        );
    }

    #[tokio::test]
    async fn test_empty_channel_sends_nothing() {
        let s = scanner(MockProfileLookup::new(), MockInventorySource::new());
        let chat = FakeChat::with_messages(CHANNEL, &["hello", "no steam here"]);
        let reports = s.run(&chat, &[CHANNEL]).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].total_found, 0);
        assert_eq!(reports[0].embeds_sent, 0);
        assert!(chat.sent.lock().unwrap().is_empty());
    }
}
