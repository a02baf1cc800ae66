use crate::models::{CoercedListing, SaleListingRow};
use chrono::{DateTime, NaiveDate};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

const IMAGE_URL_PREFIX: &str = "https://shared.cloudflare.steamstatic.com/store_item_assets/steam/apps";

static APP_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/app/(\d+)").expect("static app id pattern"));

// ── Extraction helpers ────────────────────────────────────────────────────────

/// "https://steamdb.info/app/730/charts/" → "730"
pub fn extract_app_id(link: &str) -> Option<String> {
    APP_ID_RE
        .captures(link)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Capsule image for an app. Never scraped; always derived from the id.
pub fn image_link(app_id: &str) -> String {
    format!("{}/{}/capsule_231x87.jpg", IMAGE_URL_PREFIX, app_id)
}

/// Unix epoch (as found in `data-sort`) → "05 Nov 2024". Empty when the
/// attribute is missing or not a number.
pub fn format_epoch(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%d %b %Y").to_string())
        .unwrap_or_default()
}

// ── Coercion ──────────────────────────────────────────────────────────────────

/// Price: keep digits, dot and minus. "₪49.90" → 49.9 | "" → 0.0
pub fn parse_price(s: &str) -> f64 {
    let cleaned: String = s
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    parse_number(s, &cleaned)
}

/// "25%" → 25.0 | "-25%" → -25.0 | "" → 0.0
pub fn parse_pct(s: &str) -> f64 {
    let cleaned = s.trim().replace(['%', ','], "");
    parse_number(s, cleaned.trim())
}

fn parse_number(raw: &str, cleaned: &str) -> f64 {
    if cleaned.is_empty() {
        return 0.0;
    }
    cleaned.parse().unwrap_or_else(|_| {
        debug!("Unparsable number {:?}, using 0", raw);
        0.0
    })
}

/// Free-form listing dates. Month-only values land on the first day.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    const FORMATS: [&str; 7] = [
        "%d %b %Y",
        "%d %B %Y",
        "%b %d, %Y",
        "%B %d, %Y",
        "%Y-%m-%d",
        "%d/%m/%Y",
        "%d.%m.%Y",
    ];
    for fmt in FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    // "Oct 2024", "October 2024"
    let with_day = format!("1 {}", s);
    for fmt in ["%d %b %Y", "%d %B %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(&with_day, fmt) {
            return Some(d);
        }
    }

    None
}

pub fn coerce_row(row: &SaleListingRow) -> CoercedListing {
    CoercedListing {
        name: row.name.clone(),
        discount: parse_pct(&row.discount),
        price: parse_price(&row.price),
        rating: parse_pct(&row.rating),
        release_date: parse_date(&row.release_date),
        ends: parse_date(&row.sale_ends_at),
        starts: parse_date(&row.sale_starts_at),
        game_link: row.detail_link.clone(),
        image_link: row.image_link.clone(),
        app_id: row.app_id.clone(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
