//! Pipeline orchestrator: routes each portfolio code to a source and
//! runs fund fetches through the daily cache.
//!
//! ## Flow per code
//!
//! 1. Classify the code (fund association code, JP stock, US stock).
//! 2. Funds: cache-through scrape of the Yahoo Japan fund pages, at most
//!    one network fetch per calendar day.
//!    Stocks: direct chart API call, never cached.
//!
//! Codes are processed strictly one after another; there is no fan-out.
//! A failed code logs a warning and the run moves on, so one delisted
//! fund cannot sink a portfolio refresh.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::models::{InstrumentKind, PriceSeries};
use crate::scraper::http_client::HttpClient;
use crate::scraper::quote_api::YahooChartApi;
use crate::scraper::{HistorySource, ProgressSink, YahooJpScraper};
use crate::storage::PriceCache;

pub struct Pipeline {
    cache: PriceCache,
    scraper: YahooJpScraper,
    chart_api: YahooChartApi,
}

impl Pipeline {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client =
            Arc::new(HttpClient::new(&config.fetch).context("Failed to build HTTP client")?);
        let scraper = YahooJpScraper::new(Arc::clone(&client), &config.fetch.base_url)
            .context("Failed to build fund scraper")?;
        let chart_api = YahooChartApi::new(client, &config.fetch.chart_api_url)
            .context("Failed to build chart API source")?;

        Ok(Self {
            cache: PriceCache::new(config.cache.dir.clone()),
            scraper,
            chart_api,
        })
    }

    pub fn scraper(&self) -> &YahooJpScraper {
        &self.scraper
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    /// History for one code, routed by kind. Funds go through the cache;
    /// stocks hit the chart API every time.
    pub async fn history_for(&self, code: &str, progress: &dyn ProgressSink) -> PriceSeries {
        let kind = InstrumentKind::classify(code);
        debug!("{}: classified as {}", code, kind);

        match kind {
            InstrumentKind::JpFund => {
                self.cache
                    .get_or_fetch(code, || self.scraper.fetch_history(code, progress))
                    .await
            }
            InstrumentKind::JpStock | InstrumentKind::UsStock => {
                self.chart_api.fetch_history(code, progress).await
            }
        }
    }

    /// Refresh a whole portfolio, one code at a time.
    pub async fn run(&self, codes: &[String], progress: &dyn ProgressSink) -> PipelineStats {
        let started = Instant::now();
        let codes = dedup_preserving_order(codes);
        info!("Processing {} instruments", codes.len());

        let mut stats = PipelineStats {
            instruments: codes.len(),
            ..PipelineStats::default()
        };

        for code in &codes {
            let series = self.history_for(code, progress).await;
            if series.is_empty() {
                warn!("{}: no data", code);
                stats.empty += 1;
            } else {
                if let (Some(first), Some(last)) = (series.first(), series.last()) {
                    info!(
                        "{}: {} points ({} → {})",
                        code,
                        series.len(),
                        first.date,
                        last.date
                    );
                }
                stats.with_data += 1;
                stats.points += series.len();
            }
        }

        stats.elapsed = started.elapsed();
        info!(
            "=== Done: {} instruments | {} with data | {} empty | {} points | {:?} ===",
            stats.instruments, stats.with_data, stats.empty, stats.points, stats.elapsed,
        );
        stats
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub instruments: usize,
    pub with_data: usize,
    pub empty: usize,
    pub points: usize,
    pub elapsed: Duration,
}

/// Trim, drop blanks, keep first occurrence of each code.
fn dedup_preserving_order(codes: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    codes
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty() && seen.insert(c.clone()))
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::NullSink;
    use tempfile::tempdir;

    const HISTORY_PAGE: &str = r#"
        <html><body><table>
          <tr><th>日付</th><th>基準価額</th></tr>
          <tr><td>2026年2月6日</td><td>20,696</td></tr>
          <tr><td>2026年2月13日</td><td>20,750</td></tr>
        </table></body></html>"#;

    fn test_config(server: &mockito::Server, cache_dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.fetch.base_url = server.url();
        config.fetch.chart_api_url = server.url();
        config.fetch.request_delay_ms = 0;
        config.fetch.jitter_ms = 0;
        config.cache.dir = cache_dir.to_path_buf();
        config
    }

    #[test]
    fn test_dedup_preserving_order() {
        let input = vec![
            "7203.T".to_string(),
            " AJ311217 ".to_string(),
            "7203.T".to_string(),
            "".to_string(),
            "AJ311217".to_string(),
        ];
        assert_eq!(dedup_preserving_order(&input), vec!["7203.T", "AJ311217"]);
    }

    #[test]
    fn test_pipeline_builds_from_default_config() {
        assert!(Pipeline::new(&AppConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_fund_history_fetched_once_per_day() {
        let mut server = mockito::Server::new_async().await;
        let history = server
            .mock("GET", "/quote/AJ311217/history")
            .with_status(200)
            .with_body(HISTORY_PAGE)
            .expect(1)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let pipeline = Pipeline::new(&test_config(&server, dir.path())).unwrap();

        let first = pipeline.history_for("AJ311217", &NullSink).await;
        let second = pipeline.history_for("AJ311217", &NullSink).await;

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        history.assert_async().await;
    }

    #[tokio::test]
    async fn test_stock_codes_bypass_cache() {
        let mut server = mockito::Server::new_async().await;
        let chart = server
            .mock("GET", "/v8/finance/chart/7203.T")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"chart":{"result":[{"timestamp":[1739404800],
                    "indicators":{"quote":[{"close":[3050.0]}]}}],"error":null}}"#,
            )
            .expect(2)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let pipeline = Pipeline::new(&test_config(&server, dir.path())).unwrap();

        pipeline.history_for("7203.T", &NullSink).await;
        let series = pipeline.history_for("7203.T", &NullSink).await;

        assert_eq!(series.len(), 1);
        chart.assert_async().await;
        // nothing was written for the stock
        assert_eq!(pipeline.cache().clear().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_isolates_failing_codes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/quote/AJ311217/history")
            .with_status(200)
            .with_body(HISTORY_PAGE)
            .create_async()
            .await;
        server
            .mock("GET", "/quote/DEADFUND1/history")
            .with_status(500)
            .create_async()
            .await;
        server
            .mock("GET", "/quote/DEADFUND1/chart")
            .with_status(500)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let pipeline = Pipeline::new(&test_config(&server, dir.path())).unwrap();

        let codes = vec!["DEADFUND1".to_string(), "AJ311217".to_string()];
        let stats = pipeline.run(&codes, &NullSink).await;

        assert_eq!(stats.instruments, 2);
        assert_eq!(stats.with_data, 1);
        assert_eq!(stats.empty, 1);
        assert_eq!(stats.points, 2);
    }
}
