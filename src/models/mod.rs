use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── Price series ──────────────────────────────────────────────────────────────

/// One close observation. Serde names match the cache-file header
/// (`Date,Close`) written by earlier versions of the dashboard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Close")]
    pub close: f64,
}

/// An ascending, date-unique close series.
///
/// Only constructed through [`PriceSeries::from_unordered`], so the ordering
/// and uniqueness invariants hold wherever a series is passed around.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries(Vec<PricePoint>);

impl PriceSeries {
    /// Build a series from points in arbitrary order. Duplicate dates keep
    /// the point that appears later in the input.
    pub fn from_unordered(points: Vec<PricePoint>) -> Self {
        let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for p in points {
            by_date.insert(p.date, p.close);
        }
        Self(
            by_date
                .into_iter()
                .map(|(date, close)| PricePoint { date, close })
                .collect(),
        )
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&PricePoint> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.0.last()
    }

    /// Calendar days between the first and last point (0 for short series).
    pub fn span_days(&self) -> i64 {
        match (self.first(), self.last()) {
            (Some(a), Some(b)) => (b.date - a.date).num_days(),
            _ => 0,
        }
    }
}

// ── Raw extraction records ────────────────────────────────────────────────────

/// A date as it came off the page: usually text in one of several layouts,
/// occasionally already resolved (the price-board shape infers it).
#[derive(Debug, Clone, PartialEq)]
pub enum RawDate {
    Text(String),
    Parsed(NaiveDate),
}

/// An unvalidated date/price pair, alive only between extraction and
/// normalization. Numeric JSON prices are carried as their string form.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub date: RawDate,
    pub price: String,
}

impl RawRecord {
    pub fn text(date: impl Into<String>, price: impl Into<String>) -> Self {
        Self {
            date: RawDate::Text(date.into()),
            price: price.into(),
        }
    }

    pub fn dated(date: NaiveDate, price: impl Into<String>) -> Self {
        Self {
            date: RawDate::Parsed(date),
            price: price.into(),
        }
    }
}

/// Outcome of one extraction attempt against a fetched page. `NotFound`
/// means the page was readable but carried none of the recognized data
/// shapes. `Found` always carries at least one row.
#[derive(Debug, PartialEq)]
pub enum Extraction {
    Found(Vec<RawRecord>),
    NotFound,
}

// ── Instrument classification ─────────────────────────────────────────────────

/// How a portfolio code is routed: `.T` suffix means a Tokyo-listed stock,
/// purely alphabetic means a US ticker, anything else is treated as a fund
/// association code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    JpStock,
    UsStock,
    JpFund,
}

impl InstrumentKind {
    pub fn classify(code: &str) -> Self {
        let t = code.trim().to_uppercase();
        if t.ends_with(".T") {
            InstrumentKind::JpStock
        } else if !t.is_empty() && t.chars().all(|c| c.is_alphabetic()) {
            InstrumentKind::UsStock
        } else {
            InstrumentKind::JpFund
        }
    }

    pub fn is_fund(self) -> bool {
        matches!(self, InstrumentKind::JpFund)
    }
}

impl std::fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstrumentKind::JpStock => "JP_STOCK",
            InstrumentKind::UsStock => "US_STOCK",
            InstrumentKind::JpFund => "JP_FUND",
        };
        f.write_str(s)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
