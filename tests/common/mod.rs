//! Shared fixtures for integration tests

use chrono::NaiveDate;

/// The nine fields of a fixture day; every 7th day has no second low tide.
pub fn day_fields(day: u32) -> Vec<String> {
    let (second_low, second_low_height) = if day % 7 == 0 {
        ("-".to_string(), "-".to_string())
    } else {
        (format!("{:02}:{:02}", 16 + day % 8, day % 60), format!("{}", 20 + day))
    };
    vec![
        day.to_string(),
        format!("{:02}:{:02}", day % 6, (day * 7) % 60),
        format!("{}", 50 + day % 9),
        format!("{:02}:{:02}", 12 + day % 6, (day * 3) % 60),
        format!("{}", 45 + day % 7),
        format!("{:02}:{:02}", 6 + day % 5, (day * 11) % 60),
        format!("{}", 20 + day % 5),
        second_low,
        second_low_height,
    ]
}

fn row(cells: &[String]) -> String {
    let tds: String = cells.iter().map(|c| format!("<td>{}</td>", c)).collect();
    format!("<tr>{}</tr>", tds)
}

/// A tide page for the month of `reference` with `days` day rows, an empty
/// terminator row and rows of the following month after it.
pub fn tide_page(reference: NaiveDate, days: u32) -> String {
    let mut rows = vec![
        row(&[format!("'{}'", reference.format("%B %Y"))]),
        row(&[
            "Date".to_string(),
            "High Tide".to_string(),
            "Low Tide".to_string(),
        ]),
    ];
    rows.extend((1..=days).map(|d| row(&day_fields(d))));
    rows.push("<tr><td></td><td> </td></tr>".to_string());
    rows.push(row(&["Next month".to_string()]));
    rows.extend((1..=3).map(|d| row(&day_fields(d))));

    format!(
        "<!DOCTYPE html><html><head><title>Tides</title></head><body>\
         <h1>Sun, Moon and Tides</h1><table class=\"tides\"><tbody>{}</tbody></table>\
         <table><tr><td>unrelated</td></tr></table></body></html>",
        rows.concat()
    )
}
