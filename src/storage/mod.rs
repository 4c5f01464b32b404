use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate};
use tracing::{debug, warn};

use crate::models::{PricePoint, PriceSeries};

// ── Price cache ───────────────────────────────────────────────────────────────

/// Flat-file price cache: one `Date,Close` CSV per instrument, rows in
/// ascending date order. An entry is fresh for the calendar day it was
/// written and goes stale at midnight, so each instrument is fetched at
/// most once per day.
pub struct PriceCache {
    dir: PathBuf,
}

impl PriceCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache file for a code. Non-alphanumerics are dropped, so codes
    /// like "7203.T" cannot escape the cache directory.
    fn path_for(&self, code: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", sanitize_key(code)))
    }

    /// Cache-through read: today's entry if present, otherwise run
    /// `fetch` and persist a non-empty result.
    pub async fn get_or_fetch<F, Fut>(&self, code: &str, fetch: F) -> PriceSeries
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PriceSeries>,
    {
        self.get_or_fetch_at(code, Local::now().date_naive(), fetch)
            .await
    }

    async fn get_or_fetch_at<F, Fut>(&self, code: &str, today: NaiveDate, fetch: F) -> PriceSeries
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PriceSeries>,
    {
        if let Some(series) = self.load_fresh(code, today) {
            return series;
        }

        let series = fetch().await;
        if series.is_empty() {
            debug!("{}: fetch produced no data, cache untouched", code);
            return series;
        }
        if let Err(e) = self.store(code, &series) {
            warn!("{}: could not write cache: {}", code, e);
        }
        series
    }

    /// Load a cached series if its file was written today and reads
    /// cleanly. Anything else is a miss.
    pub fn load_fresh(&self, code: &str, today: NaiveDate) -> Option<PriceSeries> {
        let path = self.path_for(code);
        let written = modified_date(&path)?;
        if !is_fresh(written, today) {
            debug!("{}: cache entry from {} is stale", code, written);
            return None;
        }

        match read_series(&path) {
            Ok(series) if !series.is_empty() => {
                debug!("{}: cache hit, {} points", code, series.len());
                Some(series)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("{}: unreadable cache file {:?}: {}", code, path, e);
                None
            }
        }
    }

    /// Overwrite the cache entry for a code. Empty series are never
    /// persisted; the next run fetches again instead.
    pub fn store(&self, code: &str, series: &PriceSeries) -> Result<()> {
        if series.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Could not create cache dir {:?}", self.dir))?;

        let path = self.path_for(code);
        let mut writer =
            csv::Writer::from_path(&path).with_context(|| format!("Could not open {:?}", path))?;
        for point in series.points() {
            writer
                .serialize(point)
                .with_context(|| format!("Could not write row for {}", code))?;
        }
        writer.flush().context("Could not flush cache file")?;
        debug!("{}: cached {} points at {:?}", code, series.len(), path);
        Ok(())
    }

    /// Delete every cache entry. Returns how many files were removed.
    pub fn clear(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Could not read cache dir {:?}", self.dir));
            }
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                fs::remove_file(&path)
                    .with_context(|| format!("Could not remove {:?}", path))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Walk the cache directory for the `stats` command.
    pub fn stats(&self, today: NaiveDate) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(stats),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Could not read cache dir {:?}", self.dir));
            }
        };

        for entry in entries {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "csv") {
                continue;
            }
            stats.entries += 1;
            if modified_date(&path).is_some_and(|written| is_fresh(written, today)) {
                stats.fresh += 1;
            }
            let Ok(series) = read_series(&path) else { continue };
            stats.points += series.len();
            if let Some(first) = series.first() {
                stats.earliest = Some(stats.earliest.map_or(first.date, |e| e.min(first.date)));
            }
            if let Some(last) = series.last() {
                stats.latest = Some(stats.latest.map_or(last.date, |l| l.max(last.date)));
            }
        }
        Ok(stats)
    }
}

/// Snapshot of the cache directory.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub fresh: usize,
    pub points: usize,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

pub fn sanitize_key(code: &str) -> String {
    code.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Same-calendar-day freshness.
pub fn is_fresh(written: NaiveDate, today: NaiveDate) -> bool {
    written == today
}

fn modified_date(path: &Path) -> Option<NaiveDate> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Local>::from(modified).date_naive())
}

fn read_series(path: &Path) -> Result<PriceSeries> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Could not open {:?}", path))?;
    let mut points = Vec::new();
    for row in reader.deserialize::<PricePoint>() {
        points.push(row.with_context(|| format!("Bad row in {:?}", path))?);
    }
    Ok(PriceSeries::from_unordered(points))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
