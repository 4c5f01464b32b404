use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::models::{PricePoint, PriceSeries, RawDate, RawRecord};

/// Daily rows beyond this are resampled to weekly closes before caching.
pub const RESAMPLE_THRESHOLD: usize = 30;

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse a price cell: strip thousands separators, percent signs and the
/// yen suffix, then try as f64.
/// "20,696" → 20696.0 | "1,234.5円" → 1234.5 | "---" → None
pub fn parse_price(s: &str) -> Option<f64> {
    let cleaned = s.replace(',', "").replace('%', "").replace('円', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || matches!(cleaned, "-" | "---" | "N/A") {
        return None;
    }
    // "NaN"/"inf" parse as f64 but have no place in a price series
    cleaned.parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Parse dates: "2026年2月6日" (Yahoo Japan history table) or common
/// western layouts seen in the embedded JSON.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y年%m月%d日") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y/%m/%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%m/%d/%Y") {
        return Some(d);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }

    None
}

fn resolve_date(raw: &RawDate) -> Option<NaiveDate> {
    match raw {
        RawDate::Parsed(d) => Some(*d),
        RawDate::Text(s) => parse_date(s),
    }
}

// ── Raw records → PriceSeries ─────────────────────────────────────────────────

/// Turn extracted rows into a clean series. Rows with an unreadable date
/// are dropped; an unreadable price becomes 0.0 so the date survives
/// (Yahoo uses "---" for suspended quote days).
pub fn normalize(rows: Vec<RawRecord>, resample: bool) -> PriceSeries {
    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(date) = resolve_date(&row.date) else {
            debug!("Dropping row with unreadable date {:?}", row.date);
            continue;
        };
        let close = parse_price(&row.price).unwrap_or(0.0);
        points.push(PricePoint { date, close });
    }

    let series = PriceSeries::from_unordered(points);
    if resample {
        resample_weekly(&series)
    } else {
        series
    }
}

/// The Friday ending the week that contains `d` (Sat/Sun roll forward).
pub fn week_ending(d: NaiveDate) -> NaiveDate {
    let offset = (4 - d.weekday().num_days_from_monday() as i64).rem_euclid(7);
    d + Duration::days(offset)
}

/// Downsample to one point per week: the last close on or before each
/// Friday, stamped with that Friday.
pub fn resample_weekly(series: &PriceSeries) -> PriceSeries {
    let mut weekly: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for p in series.points() {
        weekly.insert(week_ending(p.date), p.close);
    }
    PriceSeries::from_unordered(
        weekly
            .into_iter()
            .map(|(date, close)| PricePoint { date, close })
            .collect(),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("20,696"), Some(20696.0));
        assert_eq!(parse_price("1,234.5円"), Some(1234.5));
        assert_eq!(parse_price("12.3%"), Some(12.3));
        assert_eq!(parse_price(" 9876 "), Some(9876.0));
        assert_eq!(parse_price("-"), None);
        assert_eq!(parse_price("---"), None);
        assert_eq!(parse_price("N/A"), None);
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("忍者"), None);
        assert_eq!(parse_price("NaN"), None);
        assert_eq!(parse_price("inf"), None);
    }

    #[test]
    fn test_parse_date_layouts() {
        assert_eq!(parse_date("2026年2月6日"), Some(d(2026, 2, 6)));
        assert_eq!(parse_date("2026年12月28日"), Some(d(2026, 12, 28)));
        assert_eq!(parse_date("2026-02-06"), Some(d(2026, 2, 6)));
        assert_eq!(parse_date("2026/02/06"), Some(d(2026, 2, 6)));
        assert_eq!(parse_date("20260206"), Some(d(2026, 2, 6)));
        assert_eq!(parse_date("02/06/2026"), Some(d(2026, 2, 6)));
        assert_eq!(parse_date("2026-02-06T15:00:00"), Some(d(2026, 2, 6)));
        assert_eq!(parse_date("基準日"), None);
    }

    #[test]
    fn test_normalize_history_rows() {
        let rows = vec![
            RawRecord::text("2026年2月6日", "20,696"),
            RawRecord::text("2026年2月13日", "20,750"),
        ];
        let series = normalize(rows, false);
        assert_eq!(
            series.points(),
            &[
                PricePoint { date: d(2026, 2, 6), close: 20696.0 },
                PricePoint { date: d(2026, 2, 13), close: 20750.0 },
            ]
        );
    }

    #[test]
    fn test_normalize_keeps_placeholder_prices_as_zero() {
        let rows = vec![
            RawRecord::text("2026-02-06", "---"),
            RawRecord::text("2026-02-07", "101"),
        ];
        let series = normalize(rows, false);
        assert_eq!(series.len(), 2);
        assert_eq!(series.points()[0].close, 0.0);
        assert_eq!(series.points()[1].close, 101.0);
    }

    #[test]
    fn test_normalize_drops_unreadable_dates() {
        let rows = vec![
            RawRecord::text("not a date", "100"),
            RawRecord::text("2026-02-06", "200"),
        ];
        let series = normalize(rows, false);
        assert_eq!(series.len(), 1);
        assert_eq!(series.points()[0].date, d(2026, 2, 6));
    }

    #[test]
    fn test_normalize_sorts_and_dedupes() {
        let rows = vec![
            RawRecord::text("2026-02-13", "2"),
            RawRecord::text("2026-02-06", "1"),
            RawRecord::text("2026-02-13", "3"),
        ];
        let series = normalize(rows, false);
        assert_eq!(series.len(), 2);
        assert_eq!(series.points()[0].date, d(2026, 2, 6));
        assert_eq!(series.points()[1].close, 3.0);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let rows = vec![
            RawRecord::text("2026-02-13", "20,750"),
            RawRecord::text("2026年2月6日", "20,696"),
        ];
        let once = normalize(rows, false);
        let again = normalize(
            once.points()
                .iter()
                .map(|p| RawRecord::dated(p.date, p.close.to_string()))
                .collect(),
            false,
        );
        assert_eq!(once, again);
    }

    #[test]
    fn test_normalize_passes_through_parsed_dates() {
        let rows = vec![RawRecord::dated(d(2026, 3, 2), "42")];
        let series = normalize(rows, false);
        assert_eq!(series.points()[0].date, d(2026, 3, 2));
        assert_eq!(series.points()[0].close, 42.0);
    }

    #[test]
    fn test_week_ending() {
        // 2026-01-05 is a Monday, 2026-01-09 the matching Friday
        assert_eq!(week_ending(d(2026, 1, 5)), d(2026, 1, 9));
        assert_eq!(week_ending(d(2026, 1, 9)), d(2026, 1, 9));
        // weekend rolls forward to the next Friday
        assert_eq!(week_ending(d(2026, 1, 10)), d(2026, 1, 16));
        assert_eq!(week_ending(d(2026, 1, 11)), d(2026, 1, 16));
    }

    #[test]
    fn test_resample_weekly_takes_last_close_per_week() {
        // eight Mon-Fri weeks starting 2026-01-05, close = running index
        let mut rows = Vec::new();
        let mut day = d(2026, 1, 5);
        for i in 0..40 {
            rows.push(RawRecord::dated(day, (i as i64).to_string()));
            let step = if day.weekday() == chrono::Weekday::Fri { 3 } else { 1 };
            day = day + Duration::days(step);
        }
        let series = normalize(rows, true);

        assert_eq!(series.len(), 8);
        assert_eq!(series.first().unwrap().date, d(2026, 1, 9));
        assert_eq!(series.last().unwrap().date, d(2026, 2, 27));
        for (w, p) in series.points().iter().enumerate() {
            assert_eq!(p.date.weekday(), chrono::Weekday::Fri);
            assert_eq!(p.close, (w * 5 + 4) as f64);
        }
    }

    #[test]
    fn test_resample_is_stable_on_friday_only_data() {
        let rows = vec![
            RawRecord::dated(d(2026, 1, 9), "1"),
            RawRecord::dated(d(2026, 1, 16), "2"),
        ];
        let daily = normalize(rows.clone(), false);
        let weekly = normalize(rows, true);
        assert_eq!(daily, weekly);
    }

    #[test]
    fn test_resample_empty() {
        assert!(resample_weekly(&PriceSeries::default()).is_empty());
    }
}
