pub mod cleaner;
pub mod embedded;
pub mod http_client;
pub mod quote_api;
pub mod table;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::models::{Extraction, PriceSeries, RawRecord};

use self::http_client::HttpClient;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Anything that can go wrong between a URL and extracted rows. All of
/// these are recoverable at the pipeline level; callers fall back to the
/// next source or end up with an empty series.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("embedded state is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ── Progress reporting ────────────────────────────────────────────────────────

/// Receives human-readable progress lines during a fetch, e.g. for a
/// spinner caption or log line.
pub trait ProgressSink: Send + Sync {
    fn status(&self, message: &str);
}

/// Sink that drops everything. For tests and one-shot lookups.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn status(&self, _message: &str) {}
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable price-history source abstraction.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch the available close history for one instrument code.
    /// Failures are absorbed; the caller sees an empty series.
    async fn fetch_history(&self, code: &str, progress: &dyn ProgressSink) -> PriceSeries;
}

// ── Yahoo Finance Japan fund scraper ──────────────────────────────────────────

pub struct YahooJpScraper {
    client: Arc<HttpClient>,
    base_url: String,
}

impl YahooJpScraper {
    pub fn new(client: Arc<HttpClient>, base_url: &str) -> Result<Self> {
        Url::parse(base_url).with_context(|| format!("Invalid base URL: {}", base_url))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL for a fund's price history page.
    fn history_url(&self, code: &str) -> String {
        format!("{}/quote/{}/history", self.base_url, code)
    }

    /// URL for a fund's chart page (carries the preloaded state).
    fn chart_url(&self, code: &str) -> String {
        format!("{}/quote/{}/chart", self.base_url, code)
    }

    /// URL for a fund's quote landing page.
    fn quote_url(&self, code: &str) -> String {
        format!("{}/quote/{}", self.base_url, code)
    }

    /// History page first (longest series), then the chart page's
    /// embedded state. Each failure is logged and the next stage tried.
    async fn fetch_fund_history(&self, code: &str, progress: &dyn ProgressSink) -> PriceSeries {
        progress.status(&format!("Fetching price history for {}", code));
        match self.try_history_page(code).await {
            Ok(Some(series)) => return series,
            Ok(None) => debug!("{}: no usable history table", code),
            Err(e) => warn!("{}: history page failed: {}", code, e),
        }

        progress.status(&format!("Trying chart data for {}", code));
        match self.try_chart_page(code).await {
            Ok(Some(series)) => return series,
            Ok(None) => debug!("{}: no usable embedded state", code),
            Err(e) => warn!("{}: chart page failed: {}", code, e),
        }

        warn!("{}: no price data from any source", code);
        PriceSeries::default()
    }

    async fn try_history_page(&self, code: &str) -> Result<Option<PriceSeries>, ScrapeError> {
        let html = self.client.get_text(&self.history_url(code)).await?;
        Ok(match table::extract(&html) {
            Extraction::Found(rows) => Self::to_series(rows),
            Extraction::NotFound => None,
        })
    }

    async fn try_chart_page(&self, code: &str) -> Result<Option<PriceSeries>, ScrapeError> {
        let html = self.client.get_text(&self.chart_url(code)).await?;
        Ok(match embedded::extract(&html)? {
            Extraction::Found(rows) => Self::to_series(rows),
            Extraction::NotFound => None,
        })
    }

    /// Normalize extracted rows; long daily runs collapse to weekly closes.
    fn to_series(rows: Vec<RawRecord>) -> Option<PriceSeries> {
        let resample = rows.len() > cleaner::RESAMPLE_THRESHOLD;
        let series = cleaner::normalize(rows, resample);
        if series.is_empty() { None } else { Some(series) }
    }

    /// Display name from the quote page title, e.g.
    /// "ニッセイ日経225インデックスファンド【2931113C】 - Yahoo!ファイナンス".
    pub async fn fetch_display_name(&self, code: &str) -> Option<String> {
        let html = self.client.get_text(&self.quote_url(code)).await.ok()?;
        title_to_name(&html)
    }

    /// Inspect both pages without touching the cache. Backs the `probe`
    /// command for diagnosing layout changes when a fund comes back empty.
    pub async fn probe(&self, code: &str) -> ProbeReport {
        let mut report = ProbeReport::default();

        match self.client.get_text(&self.history_url(code)).await {
            Ok(html) => {
                if let Extraction::Found(rows) = table::extract(&html) {
                    report.history_rows = Some(rows.len());
                }
            }
            Err(e) => warn!("{}: history page failed: {}", code, e),
        }

        match self.client.get_text(&self.chart_url(code)).await {
            Ok(html) => match embedded::parse_state(&html) {
                Ok(Some(state)) => {
                    report.state_found = true;
                    if let Some(map) = state.as_object() {
                        report.state_keys = map.keys().cloned().collect();
                    }
                    let today = Local::now().date_naive();
                    for (name, shape) in embedded::SHAPES {
                        let rows = shape(&state, today).map_or(0, |r| r.len());
                        report.shape_rows.push((name, rows));
                    }
                }
                Ok(None) => debug!("{}: no embedded state on chart page", code),
                Err(e) => warn!("{}: embedded state unreadable: {}", code, e),
            },
            Err(e) => warn!("{}: chart page failed: {}", code, e),
        }

        report.display_name = self.fetch_display_name(code).await;
        report
    }
}

#[async_trait]
impl HistorySource for YahooJpScraper {
    async fn fetch_history(&self, code: &str, progress: &dyn ProgressSink) -> PriceSeries {
        self.fetch_fund_history(code, progress).await
    }
}

/// What `probe` saw on each page.
#[derive(Debug, Default)]
pub struct ProbeReport {
    pub history_rows: Option<usize>,
    pub state_found: bool,
    pub state_keys: Vec<String>,
    pub shape_rows: Vec<(&'static str, usize)>,
    pub display_name: Option<String>,
}

fn title_to_name(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse("title").ok()?;
    let title = doc.select(&sel).next()?.text().collect::<String>();
    let name = title.split('【').next()?;
    let name = name.split(" - ").next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
