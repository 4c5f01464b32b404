use scraper::{Html, Selector};
use tracing::debug;

use crate::models::{Extraction, RawRecord};

const DATE_MARKER: &str = "日付";
const PRICE_MARKER: &str = "基準価額";

/// Pull date/price rows out of the fund history page.
///
/// Yahoo Japan does not tag the history table with a stable id or class,
/// so candidate tables are recognized by content: the table text must
/// mention both the date and NAV column labels. Header rows (`th`) name
/// the columns; data rows are kept only when their cell count matches the
/// current header, which drops rowspan/colspan artifacts.
pub fn extract(html: &str) -> Extraction {
    let doc = Html::parse_document(html);

    let Ok(table_sel) = Selector::parse("table") else { return Extraction::NotFound };
    let Ok(tr_sel) = Selector::parse("tr") else { return Extraction::NotFound };
    let Ok(th_sel) = Selector::parse("th") else { return Extraction::NotFound };
    let Ok(td_sel) = Selector::parse("td") else { return Extraction::NotFound };

    for table in doc.select(&table_sel) {
        let table_text = table.text().collect::<String>();
        if !table_text.contains(DATE_MARKER) || !table_text.contains(PRICE_MARKER) {
            continue;
        }

        let mut header: Vec<String> = Vec::new();
        let mut data: Vec<Vec<String>> = Vec::new();

        for tr in table.select(&tr_sel) {
            let ths: Vec<String> = tr
                .select(&th_sel)
                .map(|th| th.text().collect::<String>().trim().to_string())
                .collect();
            if !ths.is_empty() {
                header = ths;
                continue;
            }

            let cells: Vec<String> = tr
                .select(&td_sel)
                .map(|td| td.text().collect::<String>().trim().to_string())
                .collect();
            if cells.is_empty() || cells.len() != header.len() {
                continue;
            }
            data.push(cells);
        }

        let Some(date_idx) = header.iter().position(|h| h.contains(DATE_MARKER)) else {
            debug!("Marker table without a date column, trying next");
            continue;
        };
        let Some(price_idx) = header.iter().position(|h| h.contains(PRICE_MARKER)) else {
            debug!("Marker table without a price column, trying next");
            continue;
        };

        let records: Vec<RawRecord> = data
            .iter()
            .filter_map(|cells| {
                let (Some(date), Some(price)) = (cells.get(date_idx), cells.get(price_idx))
                else {
                    return None;
                };
                Some(RawRecord::text(date.clone(), price.clone()))
            })
            .collect();

        if !records.is_empty() {
            return Extraction::Found(records);
        }
    }

    Extraction::NotFound
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawDate;

    const HISTORY_PAGE: &str = r#"
        <html><body>
        <table><tr><td>株式</td><td>投信</td><td>FX</td></tr></table>
        <table>
          <tr><th>日付</th><th>基準価額</th><th>純資産総額</th></tr>
          <tr><td>2026年2月6日</td><td>20,696</td><td>152,340百万円</td></tr>
          <tr><td>2026年2月13日</td><td>20,750</td><td>152,998百万円</td></tr>
          <tr><td>2026年2月20日</td><td>20,512</td><td>151,107百万円</td></tr>
        </table>
        </body></html>"#;

    #[test]
    fn test_extracts_history_table() {
        let Extraction::Found(records) = extract(HISTORY_PAGE) else {
            panic!("expected rows");
        };
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], RawRecord::text("2026年2月6日", "20,696"));
        assert_eq!(records[2].price, "20,512");
    }

    #[test]
    fn test_page_without_marker_table() {
        let html = r#"
            <table><tr><th>銘柄</th><th>出来高</th></tr>
            <tr><td>7203</td><td>123</td></tr></table>"#;
        assert_eq!(extract(html), Extraction::NotFound);
    }

    #[test]
    fn test_mismatched_rows_are_dropped() {
        let html = r#"
            <table>
              <tr><th>日付</th><th>基準価額</th></tr>
              <tr><td colspan="2">データ提供:時事通信社</td></tr>
              <tr><td>2026年2月6日</td><td>20,696</td></tr>
            </table>"#;
        let Extraction::Found(records) = extract(html) else {
            panic!("expected rows");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, RawDate::Text("2026年2月6日".to_string()));
    }

    #[test]
    fn test_marker_in_body_but_not_in_header() {
        // both tokens appear in the table text, but the NAV label is not a
        // column header, so the price column cannot be located
        let html = r#"
            <table>
              <tr><th>日付</th><th>値</th></tr>
              <tr><td>2026年2月6日</td><td>基準価額は20,696円</td></tr>
            </table>"#;
        assert_eq!(extract(html), Extraction::NotFound);
    }

    #[test]
    fn test_header_only_table() {
        let html = r#"
            <table><tr><th>日付</th><th>基準価額</th></tr></table>"#;
        assert_eq!(extract(html), Extraction::NotFound);
    }

    #[test]
    fn test_skips_nav_table_and_uses_later_match() {
        // first table mentions both tokens in links only, second is the real one
        let html = r#"
            <table><tr><td>日付順</td><td>基準価額ランキング</td></tr></table>
            <table>
              <tr><th>日付</th><th>基準価額</th></tr>
              <tr><td>2026年1月9日</td><td>19,800</td></tr>
            </table>"#;
        let Extraction::Found(records) = extract(html) else {
            panic!("expected rows");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price, "19,800");
    }
}
