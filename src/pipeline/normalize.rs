//! Table normalization: make a candidate rectangular and name its first column.

use crate::model::RawTable;
use tracing::warn;

/// Name given to a blank or placeholder first header cell.
pub const PRIMARY_COLUMN: &str = "primary_submarket";

/// Header texts that parsers emit for columns without a label.
const PLACEHOLDERS: &[&str] = &["", "unnamed", "none", "null", "nan", "-"];

/// Whether a header cell carries no real column name.
pub fn is_placeholder_header(cell: &str) -> bool {
    let cell = cell.trim().to_ascii_lowercase();
    // pandas-style "Unnamed: 0"
    PLACEHOLDERS.contains(&cell.as_str()) || cell.starts_with("unnamed:")
}

/// Return a rectangular copy of `table` whose width is the header's.
///
/// * A blank or placeholder first header becomes [`PRIMARY_COLUMN`].
/// * Short rows are padded with empty strings.
/// * Long rows are truncated to the header width; dropped non-empty cells
///   are logged.
pub fn normalize(table: &RawTable) -> RawTable {
    let mut rows: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| row.iter().map(|c| c.trim().to_string()).collect())
        .collect();

    if let Some(header) = rows.first_mut() {
        match header.first_mut() {
            Some(first) if is_placeholder_header(first.as_str()) => *first = PRIMARY_COLUMN.to_string(),
            Some(_) => {}
            None => header.push(PRIMARY_COLUMN.to_string()),
        }
    }

    let width = rows.first().map(Vec::len).unwrap_or(1);
    let mut dropped = 0_usize;
    for row in rows.iter_mut() {
        if row.len() > width {
            dropped += row[width..].iter().filter(|c| !c.is_empty()).count();
            row.truncate(width);
        } else {
            row.resize(width, String::new());
        }
    }

    if dropped > 0 {
        warn!(
            "Page {}, table {}: truncated {} non-empty cell(s) beyond the {}-column header",
            table.page, table.position, dropped, width
        );
    }

    RawTable {
        page: table.page,
        position: table.position,
        caption: table.caption.clone(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: Vec<Vec<&str>>) -> RawTable {
        RawTable {
            page: 1,
            position: 0,
            caption: None,
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(String::from).collect())
                .collect(),
        }
    }

    #[test]
    fn blank_first_header_is_named() {
        let t = normalize(&table(vec![vec!["", "Vacancy %"], vec!["Southeast", "5.4%"]]));
        assert_eq!(t.header()[0], PRIMARY_COLUMN);
        assert_eq!(t.header()[1], "Vacancy %");
    }

    #[test]
    fn placeholder_first_headers_are_named() {
        for placeholder in ["unnamed", "Unnamed: 0", "NaN", " none "] {
            let t = normalize(&table(vec![vec![placeholder, "Rent"], vec!["North", "$7.25"]]));
            assert_eq!(t.header()[0], PRIMARY_COLUMN, "placeholder {placeholder:?}");
        }
    }

    #[test]
    fn real_first_header_is_kept() {
        let t = normalize(&table(vec![vec!["Submarket", "Rent"], vec!["North", "1"]]));
        assert_eq!(t.header()[0], "Submarket");
    }

    #[test]
    fn pads_short_and_truncates_long_rows() {
        let t = normalize(&table(vec![
            vec!["", "A", "B"],
            vec!["North"],
            vec!["South", "1", "2", "3", ""],
        ]));
        assert!(t.is_rectangular());
        assert_eq!(t.rows[1], vec!["North", "", ""]);
        assert_eq!(t.rows[2], vec!["South", "1", "2"]);
    }

    #[test]
    fn normalizing_twice_changes_nothing() {
        let once = normalize(&table(vec![vec!["", "A"], vec!["x"]]));
        assert_eq!(normalize(&once), once);
    }
}
