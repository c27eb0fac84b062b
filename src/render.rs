//! Plain-text rendering of query results for the terminal.

use crate::models::Rows;

/// Render rows as a column-aligned text table. Column order follows the
/// first row, which carries the warehouse schema order.
pub fn render_table(rows: &Rows) -> String {
    let headers: Vec<&String> = match rows.first() {
        Some(row) => row.keys().collect(),
        None => return "(no rows)".to_string(),
    };

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| headers.iter().map(|h| render_cell(row.get(*h))).collect())
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut out = String::new();
    let header_line = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:<width$}", h, width = widths[i]))
        .collect::<Vec<_>>()
        .join(" | ");
    out.push_str(&header_line);
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');

    for row in &cells {
        let line = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect::<Vec<_>>()
            .join(" | ");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn render_cell(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => "NULL".to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Row;

    #[test]
    fn test_render_empty() {
        assert_eq!(render_table(&Vec::new()), "(no rows)");
    }

    #[test]
    fn test_render_aligns_columns() {
        let mut a = Row::new();
        a.insert("client".to_string(), serde_json::json!("acme"));
        a.insert("headcount".to_string(), serde_json::json!(7));
        let mut b = Row::new();
        b.insert("client".to_string(), serde_json::json!("globex corp"));
        b.insert("headcount".to_string(), serde_json::json!(12));

        let table = render_table(&vec![a, b]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "client      | headcount");
        assert_eq!(lines[1], "------------+----------");
        assert_eq!(lines[2], "acme        | 7        ");
        assert_eq!(lines[3], "globex corp | 12       ");
    }

    #[test]
    fn test_render_null_cell() {
        let mut row = Row::new();
        row.insert("maybe".to_string(), serde_json::Value::Null);
        assert!(render_table(&vec![row]).contains("NULL"));
    }
}
