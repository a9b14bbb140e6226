//! Tide table extraction
//!
//! Turns the upstream HTML page into one month of day records. The first
//! `<table>` of the page is taken to be the tide table; its rows are scanned
//! top to bottom until the end of the current month.

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, info};

use super::{normalize_field, MonthCache, FIELD_COUNT};

/// Errors raised when the page does not look like a tide table
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document has no `<table>` element
    #[error("No table found in the tide page")]
    NoTable,

    /// A day row does not have the expected column layout
    #[error("Day {day} has {found} columns, expected 9")]
    SchemaMismatch { day: String, found: usize },

    /// The table ended before any day row was seen
    #[error("No day rows found for {month}")]
    NoDayRows { month: String },

    #[error("Invalid selector: {0}")]
    Selector(String),
}

/// How a table row is treated while scanning
#[derive(Debug, PartialEq, Eq)]
enum RowKind {
    Day(u32),
    EndOfMonth,
    Other,
}

/// Extracts one month of tide records from the tide page
#[derive(Debug, Clone, Default)]
pub struct TableExtractor;

impl TableExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Parses `html` into the records of the month containing `reference`.
    ///
    /// The reference date, normally "today" in the target timezone, decides
    /// the `MMYY` key suffix and which single-cell rows are month headers.
    /// An empty month is returned as-is; the caller decides whether that is
    /// acceptable.
    ///
    /// # Arguments
    /// * `html` - The full tide page
    /// * `reference` - Any date in the month being extracted
    ///
    /// # Returns
    /// * `Ok(month)` with one entry per day row, keyed by `DDMMYY`
    /// * `Err` if there is no table or a day row has the wrong cell count
    pub fn extract(&self, html: &str, reference: NaiveDate) -> Result<MonthCache, ParseError> {
        let rows = table_rows(html)?;
        let label = month_label(reference);

        let mut month = MonthCache::new();
        for cells in &rows {
            match classify(cells, reference) {
                RowKind::Day(day) => {
                    if cells.len() != FIELD_COUNT {
                        return Err(ParseError::SchemaMismatch {
                            day: cells[0].clone(),
                            found: cells.len(),
                        });
                    }
                    let fields = cells.iter().map(|c| normalize_field(c)).collect();
                    month.insert(day_key(day, reference), fields);
                }
                RowKind::EndOfMonth => {
                    debug!(row = ?cells, "End of month marker");
                    break;
                }
                RowKind::Other => {
                    debug!(row = ?cells, "Skipping row");
                }
            }
        }

        info!(month = %label, entries = month.len(), "Extracted tide table");
        Ok(month)
    }
}

/// Builds the `DDMMYY` key of `day` in the month of `reference`
pub fn day_key(day: u32, reference: NaiveDate) -> String {
    format!("{:02}{}", day, reference.format("%m%y"))
}

/// Display label of the month containing `reference`, e.g. `September 2024`
pub fn month_label(reference: NaiveDate) -> String {
    reference.format("%B %Y").to_string()
}

/// Non-empty trimmed cell texts of every row of the first table
fn table_rows(html: &str) -> Result<Vec<Vec<String>>, ParseError> {
    let document = Html::parse_document(html);
    let table_sel = selector("table")?;

    let table = document
        .select(&table_sel)
        .next()
        .ok_or(ParseError::NoTable)?;

    Ok(own_rows(table).into_iter().map(row_cells).collect())
}

/// `<tr>` elements of `table` itself, looking through row groups but never
/// into nested tables
fn own_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|row| row.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}

fn row_cells(row: ElementRef<'_>) -> Vec<String> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "td" | "th"))
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|e| ParseError::Selector(e.to_string()))
}

fn classify(cells: &[String], reference: NaiveDate) -> RowKind {
    let Some(first) = cells.first() else {
        return RowKind::EndOfMonth;
    };
    if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) {
        return match first.parse() {
            Ok(day) => RowKind::Day(day),
            Err(_) => RowKind::Other,
        };
    }
    if cells.len() == 1 && !is_month_header(first, reference) {
        return RowKind::EndOfMonth;
    }
    RowKind::Other
}

/// Whether a lone cell names the reference month (`September 2024` or
/// `September`), ignoring quotes and case.
fn is_month_header(text: &str, reference: NaiveDate) -> bool {
    let text = text.trim_matches(|c| c == '\'' || c == '"').trim();
    let name = reference.format("%B").to_string();
    text.eq_ignore_ascii_case(&month_label(reference)) || text.eq_ignore_ascii_case(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn september_2024() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 15).unwrap()
    }

    fn day_fields(day: u32) -> Vec<String> {
        vec![
            day.to_string(),
            format!("{:02}:17", day % 12),
            "54".to_string(),
            format!("{:02}:03", 12 + day % 12),
            "49".to_string(),
            format!("{:02}:02", (day + 6) % 12),
            "26".to_string(),
            if day % 7 == 0 { "-".to_string() } else { format!("{:02}:45", 12 + (day + 6) % 12) },
            if day % 7 == 0 { "-".to_string() } else { "31".to_string() },
        ]
    }

    fn row(cells: &[String]) -> String {
        let tds: String = cells.iter().map(|c| format!("<td>{}</td>", c)).collect();
        format!("<tr>{}</tr>", tds)
    }

    fn page(rows: &[String]) -> String {
        format!(
            "<html><body><table><tbody>{}</tbody></table><table><tr><td>other</td></tr></table></body></html>",
            rows.concat()
        )
    }

    fn september_page(trailing: &[String]) -> String {
        let mut rows = vec![
            row(&["September 2024".to_string()]),
            row(&["Date".into(), "High Tide".into(), "Low Tide".into()]),
        ];
        rows.extend((1..=30).map(|d| row(&day_fields(d))));
        rows.extend(trailing.iter().cloned());
        page(&rows)
    }

    #[test]
    fn test_day_key_is_zero_padded() {
        assert_eq!(day_key(5, september_2024()), "050924");
        assert_eq!(day_key(30, september_2024()), "300924");
    }

    #[test]
    fn test_extract_full_month_with_empty_terminator() {
        let html = september_page(&[row(&[])]);

        let month = TableExtractor::new().extract(&html, september_2024()).unwrap();

        assert_eq!(month.len(), 30);
        assert_eq!(month.get("150924"), Some(&day_fields(15)));
        assert_eq!(month.keys().next().map(String::as_str), Some("010924"));
    }

    #[test]
    fn test_rows_after_terminator_are_discarded() {
        let mut trailing = vec![row(&[]), row(&["October 2024".to_string()])];
        trailing.extend((1..=5).map(|d| row(&day_fields(d))));
        let html = september_page(&trailing);

        let month = TableExtractor::new().extract(&html, september_2024()).unwrap();

        assert_eq!(month.len(), 30);
        assert_eq!(month.get("010924"), Some(&day_fields(1)));
    }

    #[test]
    fn test_next_month_header_terminates() {
        let mut trailing = vec![row(&["'October 2024'".to_string()])];
        trailing.extend((1..=31).map(|d| row(&day_fields(d))));
        let html = september_page(&trailing);

        let month = TableExtractor::new().extract(&html, september_2024()).unwrap();

        assert_eq!(month.len(), 30);
    }

    #[test]
    fn test_quoted_month_header_is_skipped() {
        let rows = vec![
            row(&["'September 2024'".to_string()]),
            row(&day_fields(1)),
            row(&day_fields(2)),
        ];

        let month = TableExtractor::new()
            .extract(&page(&rows), september_2024())
            .unwrap();

        assert_eq!(month.len(), 2);
    }

    #[test]
    fn test_header_cells_in_th_are_skipped() {
        let html = "<table>\
            <tr><th>September 2024</th></tr>\
            <tr><th>Day</th><th>High</th><th>Low</th></tr>\
            <tr><td>1</td><td>03:17</td><td>54</td><td>18:03</td><td>49</td>\
                <td>10:02</td><td>26</td><td>-</td><td>-</td></tr>\
            </table>";

        let month = TableExtractor::new().extract(html, september_2024()).unwrap();

        assert_eq!(
            month.get("010924").unwrap(),
            &["1", "03:17", "54", "18:03", "49", "10:02", "26", "-", "-"]
        );
    }

    #[test]
    fn test_rows_of_nested_tables_are_ignored() {
        let mut rows = vec![
            row(&["September 2024".to_string()]),
            "<tr><td>Legend<table><tr><td>Heights in cm</td></tr></table></td><td>HT</td></tr>"
                .to_string(),
        ];
        rows.extend((1..=3).map(|d| row(&day_fields(d))));

        let month = TableExtractor::new()
            .extract(&page(&rows), september_2024())
            .unwrap();

        assert_eq!(month.len(), 3, "nested single-cell row does not end the month");
    }

    #[test]
    fn test_empty_cells_are_dropped() {
        let html = "<table><tr><td>2</td><td></td><td> 03:17 </td><td>54</td><td>18:03</td>\
            <td>49</td><td>10:02</td><td>26</td><td>22:40</td><td>30</td><td>  </td></tr></table>";

        let month = TableExtractor::new().extract(html, september_2024()).unwrap();

        assert_eq!(month["020924"][1], "03:17");
        assert_eq!(month["020924"].len(), FIELD_COUNT);
    }

    #[test]
    fn test_last_seen_day_row_wins() {
        let mut replacement = day_fields(3);
        replacement[2] = "99".to_string();
        let rows = vec![row(&day_fields(3)), row(&replacement)];

        let month = TableExtractor::new()
            .extract(&page(&rows), september_2024())
            .unwrap();

        assert_eq!(month.len(), 1);
        assert_eq!(month["030924"][2], "99");
    }

    #[test]
    fn test_missing_table_is_an_error() {
        let err = TableExtractor::new()
            .extract("<html><body><p>maintenance</p></body></html>", september_2024())
            .unwrap_err();

        assert!(matches!(err, ParseError::NoTable));
    }

    #[test]
    fn test_short_day_row_is_a_schema_mismatch() {
        let rows = vec![row(&day_fields(1)), row(&day_fields(2)[..7])];

        let err = TableExtractor::new()
            .extract(&page(&rows), september_2024())
            .unwrap_err();

        match err {
            ParseError::SchemaMismatch { day, found } => {
                assert_eq!(day, "2");
                assert_eq!(found, 7);
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_month_is_not_an_error() {
        let rows = vec![row(&["September 2024".to_string()]), row(&[])];

        let month = TableExtractor::new()
            .extract(&page(&rows), september_2024())
            .unwrap();

        assert!(month.is_empty());
    }

    #[test]
    fn test_classify_rows() {
        let reference = september_2024();
        let cells = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(classify(&cells(&["12", "a"]), reference), RowKind::Day(12));
        assert_eq!(classify(&[], reference), RowKind::EndOfMonth);
        assert_eq!(classify(&cells(&["Notes"]), reference), RowKind::EndOfMonth);
        assert_eq!(classify(&cells(&["september"]), reference), RowKind::Other);
        assert_eq!(classify(&cells(&["Day", "Time"]), reference), RowKind::Other);
    }
}
