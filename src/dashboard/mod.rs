//! Read-only analytics over the published listing table.
//!
//! Every view is a pure function of the coerced table; none of them depends
//! on another, and nothing is cached per view.

pub mod render;
pub mod server;

use crate::models::{CoercedListing, SaleListingRow};
use crate::scraper::cleaner::coerce_row;
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const HISTOGRAM_BINS: usize = 100;
pub const RANKING_SIZE: usize = 10;

/// The coerced snapshot all views read from.
#[derive(Debug, Clone, Default)]
pub struct ListingTable {
    pub rows: Vec<CoercedListing>,
}

impl ListingTable {
    pub fn from_rows(rows: &[SaleListingRow]) -> Self {
        Self {
            rows: rows.iter().map(coerce_row).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ── View types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RankedGame {
    pub name: String,
    pub price: f64,
    pub rating: f64,
    pub discount: f64,
}

impl From<&CoercedListing> for RankedGame {
    fn from(l: &CoercedListing) -> Self {
        Self {
            name: l.name.clone(),
            price: l.price,
            rating: l.rating,
            discount: l.discount,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScatterPoint {
    pub name: String,
    pub price: f64,
    pub rating: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthlyPromotions {
    pub month: NaiveDate,
    pub count: usize,
    /// Mean over the month's rows with a defined duration.
    pub mean_duration_days: Option<f64>,
}

// ── Views ─────────────────────────────────────────────────────────────────────

/// Equal-width price buckets spanning min..=max. The top edge is inclusive.
pub fn price_histogram(table: &ListingTable, bins: usize) -> Vec<HistogramBin> {
    if table.is_empty() || bins == 0 {
        return Vec::new();
    }

    let prices = table.rows.iter().map(|r| r.price);
    let min = prices.clone().fold(f64::INFINITY, f64::min);
    let max = prices.fold(f64::NEG_INFINITY, f64::max);
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };

    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: min + width * i as f64,
            upper: min + width * (i + 1) as f64,
            count: 0,
        })
        .collect();

    for r in &table.rows {
        let idx = (((r.price - min) / width) as usize).min(bins - 1);
        out[idx].count += 1;
    }
    out
}

/// Stable: ties keep table order, like a "first n" selection.
fn ranked_by<F>(rows: Vec<&CoercedListing>, n: usize, mut cmp: F) -> Vec<RankedGame>
where
    F: FnMut(&CoercedListing, &CoercedListing) -> Ordering,
{
    let mut rows = rows;
    rows.sort_by(|a, b| cmp(a, b));
    rows.into_iter().take(n).map(RankedGame::from).collect()
}

pub fn top_priced(table: &ListingTable, n: usize) -> Vec<RankedGame> {
    ranked_by(table.rows.iter().collect(), n, |a, b| b.price.total_cmp(&a.price))
}

pub fn cheapest(table: &ListingTable, n: usize) -> Vec<RankedGame> {
    ranked_by(table.rows.iter().collect(), n, |a, b| a.price.total_cmp(&b.price))
}

/// Best rated among rows priced at most `max_price` that have a rating.
pub fn top_rated_affordable(table: &ListingTable, max_price: f64, n: usize) -> Vec<RankedGame> {
    let candidates = table
        .rows
        .iter()
        .filter(|r| r.price <= max_price && r.rating > 0.0)
        .collect();
    ranked_by(candidates, n, |a, b| b.rating.total_cmp(&a.rating))
}

/// Deepest discounts first. Discounts are stored negative ("-90%").
pub fn most_discounted(table: &ListingTable, n: usize) -> Vec<RankedGame> {
    let candidates = table.rows.iter().filter(|r| r.discount != 0.0).collect();
    ranked_by(candidates, n, |a, b| b.discount.abs().total_cmp(&a.discount.abs()))
}

pub fn price_vs_rating(table: &ListingTable) -> Vec<ScatterPoint> {
    table
        .rows
        .iter()
        .map(|r| ScatterPoint {
            name: r.name.clone(),
            price: r.price,
            rating: r.rating,
        })
        .collect()
}

/// Promotions started per calendar month, oldest month first. Rows without a
/// start date are left out.
pub fn promotions_by_start_month(table: &ListingTable) -> Vec<MonthlyPromotions> {
    let mut months: BTreeMap<NaiveDate, (usize, i64, usize)> = BTreeMap::new();

    for r in &table.rows {
        let Some(month) = r.start_month() else { continue };
        let entry = months.entry(month).or_default();
        entry.0 += 1;
        if let Some(days) = r.promo_duration_days() {
            entry.1 += days;
            entry.2 += 1;
        }
    }

    months
        .into_iter()
        .map(|(month, (count, total_days, with_duration))| MonthlyPromotions {
            month,
            count,
            mean_duration_days: (with_duration > 0)
                .then(|| total_days as f64 / with_duration as f64),
        })
        .collect()
}
