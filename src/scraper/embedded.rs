use chrono::{Datelike, Local, NaiveDate};
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use crate::models::{Extraction, RawRecord};

use super::ScrapeError;

const STATE_MARKER: &str = "window.__PRELOADED_STATE__";

/// A candidate layout inside the preloaded state. Takes the parsed state
/// and today's date (the price-board shape has to infer a year) and
/// returns rows, or `None` when the layout is absent or yields nothing.
pub type ShapeFn = fn(&Value, NaiveDate) -> Option<Vec<RawRecord>>;

/// Known layouts, best first. The chart feed carries the longest history,
/// the fund-history list a few weeks, the price board a single quote.
pub const SHAPES: [(&str, ShapeFn); 3] = [
    ("chart-line", chart_line),
    ("fund-history", fund_history),
    ("price-board", price_board),
];

// ── State blob ────────────────────────────────────────────────────────────────

/// Locate and parse the preloaded-state assignment. `Ok(None)` when no
/// script carries the marker; `Err` when the blob is there but does not
/// parse. The blob is cut at the first `;` after the `=`, which holds for
/// the pages Yahoo serves today.
pub fn parse_state(html: &str) -> Result<Option<Value>, ScrapeError> {
    let doc = Html::parse_document(html);
    let Ok(script_sel) = Selector::parse("script") else { return Ok(None) };

    for script in doc.select(&script_sel) {
        let text = script.text().collect::<String>();
        let Some(marker) = text.find(STATE_MARKER) else { continue };

        let after = &text[marker + STATE_MARKER.len()..];
        let Some(eq) = after.find('=') else { continue };
        let tail = &after[eq + 1..];
        let json = match tail.find(';') {
            Some(end) => &tail[..end],
            None => tail,
        };

        let state: Value = serde_json::from_str(json.trim())?;
        return Ok(Some(state));
    }

    Ok(None)
}

// ── Shape walkers ─────────────────────────────────────────────────────────────

fn chart_line(state: &Value, _today: NaiveDate) -> Option<Vec<RawRecord>> {
    let data = state
        .get("mainYJChart")?
        .get("chart")?
        .get("chartLine")?
        .get(0)?
        .get("data")?
        .as_array()?;

    let records: Vec<RawRecord> = data.iter().filter_map(entry_to_record).collect();
    if records.is_empty() { None } else { Some(records) }
}

fn fund_history(state: &Value, _today: NaiveDate) -> Option<Vec<RawRecord>> {
    let histories = state.get("mainFundHistory")?.get("histories")?.as_array()?;

    let records: Vec<RawRecord> = histories.iter().filter_map(entry_to_record).collect();
    if records.is_empty() { None } else { Some(records) }
}

fn price_board(state: &Value, today: NaiveDate) -> Option<Vec<RawRecord>> {
    let board = state.get("mainFundPriceBoard")?.get("fundPrices")?;
    let price = scalar_string(board.get("price")?)?;
    let update = board.get("updateDate")?.as_str()?;
    let date = month_day_this_year(update, today)?;
    Some(vec![RawRecord::dated(date, price)])
}

/// One chart/history entry → raw record. Key names vary across page
/// revisions, so several are accepted for each field.
fn entry_to_record(entry: &Value) -> Option<RawRecord> {
    let date = entry.get("date").or_else(|| entry.get("Date"))?;
    let price = entry
        .get("price")
        .or_else(|| entry.get("Close"))
        .or_else(|| entry.get("close"))
        .or_else(|| entry.get("value"))?;
    Some(RawRecord::text(scalar_string(date)?, scalar_string(price)?))
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// "MM/DD" stamped with the current year. An early-January update that
/// refers to late December still gets the current year.
fn month_day_this_year(s: &str, today: NaiveDate) -> Option<NaiveDate> {
    let (m, d) = s.trim().split_once('/')?;
    let month: u32 = m.trim().parse().ok()?;
    let day: u32 = d.trim().parse().ok()?;
    NaiveDate::from_ymd_opt(today.year(), month, day)
}

// ── Entry points ──────────────────────────────────────────────────────────────

pub fn extract(html: &str) -> Result<Extraction, ScrapeError> {
    extract_with_today(html, Local::now().date_naive())
}

/// Walk the shapes in rank order against the parsed state; the first one
/// that yields rows wins.
pub fn extract_with_today(html: &str, today: NaiveDate) -> Result<Extraction, ScrapeError> {
    let Some(state) = parse_state(html)? else {
        return Ok(Extraction::NotFound);
    };

    for (name, shape) in SHAPES {
        if let Some(records) = shape(&state, today) {
            debug!("Embedded state matched {} shape, {} rows", name, records.len());
            return Ok(Extraction::Found(records));
        }
    }

    Ok(Extraction::NotFound)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
