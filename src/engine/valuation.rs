//! Inventory valuation. Sums priced lines of a rendered inventory.
//!
//! Lines look like `<name> [x<qty>] - $<price>`. Anything else (header,
//! "Not Listed" items, sentinel strings) is skipped, so an inventory that
//! could not be fetched is worth 0.0.

use regex::Regex;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

fn priced_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(.*?)\s*(?:x(\d+))?\s*-\s*\$([0-9,]+\.\d{2})")
            .expect("Invalid priced line regex")
    })
}

/// Unit price differences at or below this are the same price.
const PRICE_TOLERANCE: Decimal = dec!(0.001);

/// Total market value of one inventory text.
///
/// Duplicate names accumulate quantity; when a later line carries a
/// different unit price, that price applies to the whole accumulated
/// quantity.
pub fn total_value(inventory_text: &str) -> f64 {
    if inventory_text.is_empty() {
        return 0.0;
    }

    let mut totals: HashMap<&str, (Decimal, u64)> = HashMap::new();
    for caps in priced_line_re().captures_iter(inventory_text) {
        let name = caps.get(1).map_or("", |m| m.as_str().trim());
        let qty = match caps.get(2) {
            Some(m) => match m.as_str().parse::<u64>() {
                Ok(q) => q,
                Err(_) => continue,
            },
            None => 1,
        };
        let raw_price = &caps[3];
        let price = match Decimal::from_str(&raw_price.replace(',', "")) {
            Ok(p) => p,
            Err(_) => {
                debug!(item = name, fragment = raw_price, "Failed to parse price fragment");
                continue;
            }
        };

        match totals.get_mut(name) {
            Some((unit, count)) => {
                if (*unit - price).abs() > PRICE_TOLERANCE {
                    debug!(item = name, previous = %unit, latest = %price, "Conflicting unit prices, using latest");
                    *unit = price;
                }
                *count = count.saturating_add(qty);
            }
            None => {
                totals.insert(name, (price, qty));
            }
        }
    }

    let mut total = Decimal::ZERO;
    for (name, (unit, count)) in &totals {
        let Some(total_with_line) = unit
            .checked_mul(Decimal::from(*count))
            .and_then(|line| total.checked_add(line))
        else {
            warn!(item = *name, unit = %unit, count, "Inventory value overflowed, skipping item");
            continue;
        };
        total = total_with_line;
    }
    total.to_f64().unwrap_or(0.0)
}
