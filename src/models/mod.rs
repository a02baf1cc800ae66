use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Column names of the destination table and the CSV snapshot, in order.
pub const COLUMNS: [&str; 10] = [
    "Name",
    "Discount",
    "Price",
    "Rating",
    "Release_Date",
    "Ends",
    "Starts",
    "Game_Link",
    "Image_Link",
    "ID",
];

// ── Scraped row ───────────────────────────────────────────────────────────────

/// One game entry from the sales listing. Every field is text; the
/// dashboard coerces them later.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaleListingRow {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Discount")]
    pub discount: String,
    #[serde(rename = "Price")]
    pub price: String,
    #[serde(rename = "Rating")]
    pub rating: String,
    #[serde(rename = "Release_Date")]
    pub release_date: String,
    #[serde(rename = "Ends")]
    pub sale_ends_at: String,
    #[serde(rename = "Starts")]
    pub sale_starts_at: String,
    #[serde(rename = "Game_Link")]
    pub detail_link: String,
    #[serde(rename = "Image_Link")]
    pub image_link: String,
    #[serde(rename = "ID")]
    pub app_id: String,
}

impl SaleListingRow {
    /// Values in `COLUMNS` order, for positional inserts.
    pub fn values(&self) -> [&str; 10] {
        [
            &self.name,
            &self.discount,
            &self.price,
            &self.rating,
            &self.release_date,
            &self.sale_ends_at,
            &self.sale_starts_at,
            &self.detail_link,
            &self.image_link,
            &self.app_id,
        ]
    }
}

// ── Anti-bot cookies ──────────────────────────────────────────────────────────

pub const CLEARANCE_COOKIE: &str = "cf_clearance";
pub const BOT_MANAGEMENT_COOKIE: &str = "__cf_bm";

/// A cookie as read back from a browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
}

impl BrowserCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// The two cookies the listing page demands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookies {
    pub clearance: String,
    pub bot_management: String,
}

impl SessionCookies {
    /// Picks both required cookies out of a session's jar, or `None` if
    /// either is still missing.
    pub fn from_jar(jar: &[BrowserCookie]) -> Option<Self> {
        let find = |name: &str| {
            jar.iter()
                .find(|c| c.name == name && !c.value.is_empty())
                .map(|c| c.value.clone())
        };
        Some(Self {
            clearance: find(CLEARANCE_COOKIE)?,
            bot_management: find(BOT_MANAGEMENT_COOKIE)?,
        })
    }

    pub fn header_value(&self) -> String {
        format!(
            "{}={}; {}={}",
            CLEARANCE_COOKIE, self.clearance, BOT_MANAGEMENT_COOKIE, self.bot_management
        )
    }
}

// ── Coerced row (dashboard side) ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CoercedListing {
    pub name: String,
    pub discount: f64,
    pub price: f64,
    pub rating: f64,
    pub release_date: Option<NaiveDate>,
    pub ends: Option<NaiveDate>,
    pub starts: Option<NaiveDate>,
    pub game_link: String,
    pub image_link: String,
    pub app_id: String,
}

impl CoercedListing {
    /// Days between start and end of the promotion. `None` when either date
    /// is missing or the promotion ends before it starts.
    pub fn promo_duration_days(&self) -> Option<i64> {
        let days = (self.ends? - self.starts?).num_days();
        (days >= 0).then_some(days)
    }

    /// First day of the month the promotion started in.
    pub fn start_month(&self) -> Option<NaiveDate> {
        let s = self.starts?;
        NaiveDate::from_ymd_opt(s.year(), s.month(), 1)
    }
}
