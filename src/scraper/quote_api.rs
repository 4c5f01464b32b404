use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::models::{PricePoint, PriceSeries};

use super::http_client::HttpClient;
use super::{HistorySource, ProgressSink, ScrapeError};

const RANGE: &str = "2y";
const INTERVAL: &str = "1d";

/// Listed stocks (7203.T, AAPL) come from the public chart API instead of
/// a scraped page. Symbols go through uppercased but otherwise untouched,
/// the `.T` suffix is part of the symbol.
pub struct YahooChartApi {
    client: Arc<HttpClient>,
    base: Url,
}

impl YahooChartApi {
    pub fn new(client: Arc<HttpClient>, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("Invalid chart API base URL: {}", base_url))?;
        Ok(Self { client, base })
    }

    fn chart_url(&self, symbol: &str) -> Result<Url, ScrapeError> {
        let mut url = self.base.join(&format!("v8/finance/chart/{}", symbol))?;
        url.query_pairs_mut()
            .append_pair("range", RANGE)
            .append_pair("interval", INTERVAL)
            .append_pair("includePrePost", "false");
        Ok(url)
    }

    async fn fetch_series(&self, symbol: &str) -> Result<PriceSeries, ScrapeError> {
        let url = self.chart_url(symbol)?;
        let envelope: ChartEnvelope = self.client.get_json(url.as_str()).await?;

        if let Some(err) = &envelope.chart.error {
            warn!("Chart API reported an error for {}: {}", symbol, err);
        }

        Ok(envelope.into_series())
    }
}

#[async_trait]
impl HistorySource for YahooChartApi {
    async fn fetch_history(&self, code: &str, progress: &dyn ProgressSink) -> PriceSeries {
        let symbol = code.trim().to_uppercase();
        progress.status(&format!("Fetching {} from the chart API", symbol));

        match self.fetch_series(&symbol).await {
            Ok(series) => {
                debug!("Chart API returned {} points for {}", series.len(), symbol);
                series
            }
            Err(e) => {
                warn!("Chart API fetch failed for {}: {}", symbol, e);
                PriceSeries::default()
            }
        }
    }
}

// ── Response envelope ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartPayload,
}

#[derive(Debug, Deserialize)]
struct ChartPayload {
    result: Option<Vec<ChartResult>>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteBlock>,
}

#[derive(Debug, Deserialize)]
struct QuoteBlock {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

impl ChartEnvelope {
    /// Zip timestamps with closes; null closes (holidays, halts) are
    /// skipped rather than zero-filled.
    fn into_series(self) -> PriceSeries {
        let Some(result) = self.chart.result.into_iter().flatten().next() else {
            return PriceSeries::default();
        };
        let Some(quote) = result.indicators.quote.into_iter().next() else {
            return PriceSeries::default();
        };

        let mut points = Vec::new();
        for (ts, close) in result.timestamp.iter().zip(quote.close.iter()) {
            let Some(close) = close else { continue };
            let Some(dt) = DateTime::from_timestamp(*ts, 0) else { continue };
            points.push(PricePoint {
                date: dt.date_naive(),
                close: *close,
            });
        }
        PriceSeries::from_unordered(points)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
