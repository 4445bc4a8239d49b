//! Reporting engine: packs account blocks into Discord embeds.
//!
//! Discord rejects embeds that break any of its limits, so everything is
//! sized here before delivery:
//! - field value ≤ 1024 chars, field name ≤ 256 chars
//! - ≤ 25 fields per embed, one slot reserved for the summary field
//! - title + field values ≤ 6000 chars, kept under 5500 for margin
//!
//! Lengths are counted in chars, not bytes.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{GroupTotals, GroupedAccounts};

pub const FIELD_VALUE_LIMIT: usize = 1024;
pub const FIELD_NAME_LIMIT: usize = 256;
pub const TOTAL_LIMIT: usize = 6000;
pub const TOTAL_MARGIN: usize = 500;
pub const MAX_FIELDS: usize = 25;
pub const EMBED_COLOR: u32 = 0x1e90ff;

pub const SUMMARY_FIELD: &str = "Summary";
pub const TOTALS_TITLE: &str = "Group Inventory Totals";
pub const GRAND_TOTAL_FIELD: &str = "Grand Total";

// ---------------------------------------------------------------------------
// Embed model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// One message-sized output unit, serialized in Discord's embed shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    /// Accounts printed in this embed. Not sent.
    #[serde(skip)]
    pub printed: usize,
}

impl Embed {
    /// Titles are cut to the field-name limit, which Discord also applies
    /// to embed titles.
    pub fn new(title: &str) -> Self {
        Self {
            title: truncate(title, FIELD_NAME_LIMIT),
            color: EMBED_COLOR,
            fields: Vec::new(),
            printed: 0,
        }
    }

    pub fn add_field(&mut self, name: &str, value: &str, inline: bool) {
        self.fields.push(EmbedField {
            name: name.to_string(),
            value: value.to_string(),
            inline,
        });
    }

    /// Title plus every field value.
    pub fn char_len(&self) -> usize {
        self.title.chars().count()
            + self.fields.iter().map(|f| f.value.chars().count()).sum::<usize>()
    }
}

/// Cut `text` to `limit` chars, ending in `...` when anything was dropped.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{kept}...")
}

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

/// Greedy packer state: newline-joined items plus how many were folded in.
#[derive(Default)]
struct Packer {
    lines: Vec<String>,
    len: usize,
    count: usize,
}

impl Packer {
    fn fits(&self, item_len: usize, max: usize) -> bool {
        self.len + item_len + 1 <= max
    }

    fn push(&mut self, item: &str, item_len: usize, count: usize) {
        self.lines.push(item.to_string());
        self.len += item_len + 1;
        self.count += count;
    }

    fn flush_into(&mut self, out: &mut Vec<(String, usize)>) {
        if !self.lines.is_empty() {
            out.push((self.lines.join("\n"), self.count));
        }
        *self = Packer::default();
    }
}

/// Pack `items` into chunks of at most `max_unit_size` chars.
///
/// Items are joined with newlines while `len + item + 1` fits. An item
/// longer than the limit is split by lines, and a line still longer than
/// the limit is cut into `max_unit_size`-char fragments. Each piece of a
/// split item counts as one item.
pub fn chunk<S: AsRef<str>>(items: &[S], max_unit_size: usize) -> Vec<(String, usize)> {
    let max = max_unit_size.max(1);
    let mut out = Vec::new();
    let mut current = Packer::default();

    for item in items {
        let item = item.as_ref();
        let item_len = item.chars().count();

        if item_len > max {
            current.flush_into(&mut out);
            split_oversized(item, max, &mut out);
            continue;
        }

        if !current.lines.is_empty() && !current.fits(item_len, max) {
            current.flush_into(&mut out);
        }
        current.push(item, item_len, 1);
    }

    current.flush_into(&mut out);
    out
}

fn split_oversized(item: &str, max: usize, out: &mut Vec<(String, usize)>) {
    let mut sub = Packer::default();

    for line in item.split('\n') {
        let line_len = line.chars().count();

        if line_len > max {
            sub.flush_into(out);
            let chars: Vec<char> = line.chars().collect();
            for fragment in chars.chunks(max) {
                out.push((fragment.iter().collect(), 1));
            }
            continue;
        }

        if !sub.lines.is_empty() && !sub.fits(line_len, max) {
            sub.flush_into(out);
        }
        // The whole sub-chunk stands for one piece of the item.
        sub.push(line, line_len, if sub.lines.is_empty() { 1 } else { 0 });
    }

    sub.flush_into(out);
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Embed builder enforcing the field-count and size budgets. A field
/// that would cross either budget closes the current embed first.
struct EmbedSink {
    title: String,
    current: Embed,
    done: Vec<Embed>,
}

impl EmbedSink {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            current: Embed::new(title),
            done: Vec::new(),
        }
    }

    fn close(&mut self) {
        let mut embed = std::mem::replace(&mut self.current, Embed::new(&self.title));
        let summary = format!("Total accounts printed (this embed): {}", embed.printed);
        embed.add_field(SUMMARY_FIELD, &summary, false);
        self.done.push(embed);
    }

    fn add(&mut self, name: &str, value: &str, count: usize) {
        let value = truncate(value, FIELD_VALUE_LIMIT);
        let over_budget =
            self.current.char_len() + value.chars().count() > TOTAL_LIMIT - TOTAL_MARGIN;
        let full = self.current.fields.len() >= MAX_FIELDS - 1;
        if !self.current.fields.is_empty() && (full || over_budget) {
            self.close();
        }

        self.current.add_field(&truncate(name, FIELD_NAME_LIMIT), &value, false);
        self.current.printed += count;
    }

    fn finish(mut self) -> Vec<Embed> {
        if !self.current.fields.is_empty() {
            self.close();
        }
        self.done
    }
}

/// Embeds for one titled list of account blocks. Every embed ends with a
/// `Summary` field. No accounts, no embeds.
pub fn render<S: AsRef<str>>(title: &str, accounts: &[S], total_found: usize) -> Vec<Embed> {
    if accounts.is_empty() {
        debug!(title, "No accounts to render");
        return Vec::new();
    }

    let mut sink = EmbedSink::new(title);
    for (part, (text, count)) in chunk(accounts, FIELD_VALUE_LIMIT).into_iter().enumerate() {
        sink.add(&format!("{title} (Part {})", part + 1), &text, count);
    }

    let embeds = sink.finish();
    debug!(title, embeds = embeds.len(), total_found, "Rendered accounts");
    embeds
}

/// `render` once per group, titled `<title> - <group>`.
pub fn render_grouped(title: &str, accounts: &GroupedAccounts, total_found: usize) -> Vec<Embed> {
    accounts
        .iter()
        .flat_map(|(group, blocks)| render(&format!("{title} - {group}"), blocks, total_found))
        .collect()
}

/// One inline field per group, closing an embed at the field cap or the
/// size budget. Every embed ends with the `Grand Total`. No groups, no
/// embeds.
pub fn render_totals(totals: &GroupTotals) -> Vec<Embed> {
    if totals.is_empty() {
        return Vec::new();
    }

    let grand = format!("${:.2}", totals.grand_total());
    let seal = |mut embed: Embed| {
        embed.add_field(GRAND_TOTAL_FIELD, &grand, false);
        embed
    };

    let mut done = Vec::new();
    let mut current = Embed::new(TOTALS_TITLE);
    let mut used = 0;
    for (group, value) in totals.iter() {
        let name = truncate(group, FIELD_NAME_LIMIT);
        let value = format!("${value:.2}");
        let size = name.chars().count() + value.chars().count();

        let full = current.fields.len() >= MAX_FIELDS - 1;
        let over_budget = used + size > TOTAL_LIMIT - TOTAL_MARGIN;
        if !current.fields.is_empty() && (full || over_budget) {
            done.push(seal(std::mem::replace(&mut current, Embed::new(TOTALS_TITLE))));
            used = 0;
        }

        used += size;
        current.add_field(&name, &value, true);
    }
    done.push(seal(current));

    debug!(groups = totals.len(), embeds = done.len(), "Rendered group totals");
    done
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
