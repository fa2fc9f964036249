//! `tether query`: run one statement and print its rows as text or JSON.

use anyhow::Result;
use tether_pool::{DataSource, Row, Statement};

pub fn query(ds: &DataSource, sql: &str, format: &str) -> Result<()> {
    let conn = ds.get_connection()?;
    let mut stmt = conn.statement()?;
    let mut rs = stmt.execute_query(sql)?;
    let columns = rs.columns().to_vec();
    let rows = rs.rows()?;
    rs.close()?;

    match format {
        "json" => {
            let output = serde_json::json!({ "columns": columns, "rows": rows });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            print!("{}", render_text(&columns, &rows));
        }
    }

    Ok(())
}

/// Left-aligned table with a row count footer.
pub fn render_text(columns: &[String], rows: &[Row]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.values().iter().map(ToString::to_string).collect())
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let line = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(value, width)| format!("{value:<width$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    if !columns.is_empty() {
        out.push_str(&line(columns));
        out.push('\n');
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        out.push_str(&rule.join("-+-"));
        out.push('\n');
    }
    for row in &cells {
        out.push_str(&line(row.as_slice()));
        out.push('\n');
    }
    let noun = if rows.len() == 1 { "row" } else { "rows" };
    out.push_str(&format!("({} {noun})\n", rows.len()));
    out
}
