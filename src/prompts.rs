//! Prompts for the semantic-judgment oracle.
//!
//! Every prompt lives here so a wording change touches exactly one place and
//! unit tests can inspect prompts without calling a model.

use crate::model::RawTable;
use crate::output::CANONICAL_HEADER;

/// System prompt for the geographic-subdivision check.
pub const GEOGRAPHY_SYSTEM_PROMPT: &str = "You classify place names found in commercial real-estate market reports. \
Answer with exactly one word: YES or NO.";

/// Ask whether `name` is a geographic subdivision of `metro`.
pub fn geography_question(metro: &str, name: &str) -> String {
    let metro = if metro.trim().is_empty() {
        "the report's metropolitan market"
    } else {
        metro.trim()
    };
    format!(
        "Market: {metro}\n\
         Name: {name}\n\n\
         Is the name a geographic subdivision of the market (a county, city, \
         submarket, district, corridor or neighborhood)? Answer YES or NO."
    )
}

/// System prompt used when the oracle generates the mapped CSV.
pub const MAPPING_SYSTEM_PROMPT: &str = r#"You convert one industrial real-estate submarket statistics table into CSV.

Output columns, in this order and with exactly these names:
primary_submarket,secondary_submarket,property_type,total_inventory_q,vacancy_q,net_absorption_q,under_construction_q,rent_q,delivered_q,leasing_activity_q

Column sources:
- primary_submarket: submarket, county, or the first (often unlabeled) geographic column
- secondary_submarket: city or other secondary geographic column
- property_type: warehouse, manufacturing, flex, bulk, class A, class B, etc.
- total_inventory_q: net rentable area, building SF, inventory, total inventory
- vacancy_q: vacancy rate, written as a decimal fraction
- net_absorption_q: quarterly net absorption; year-to-date only if no quarterly column
- under_construction_q: under construction
- rent_q: industrial / warehouse asking rent first, then generic asking rent
- delivered_q: quarterly deliveries; year-to-date only if no quarterly column
- leasing_activity_q: SF leased first, then gross absorption, then gross activity

Rules:
- Keep every row, including submarket subtotals and the market total row at the bottom.
- Leave a field empty when the table has no value for it; never invent numbers.
- Numbers in parentheses are negative. Do not use thousands separators.
- N/A and - become empty fields. Do not quote any field.
- Output only the CSV, starting with the header line."#;

/// Build the user message carrying the selected table for CSV generation.
pub fn mapping_request(metro: &str, table: &RawTable) -> String {
    format!(
        "Market: {metro}\nTable from page {page}{caption}:\n\n{body}\nRespond with CSV starting with:\n{CANONICAL_HEADER}",
        page = table.page,
        caption = table
            .caption
            .as_deref()
            .map(|c| format!(" ({c})"))
            .unwrap_or_default(),
        body = table_as_markdown(table),
    )
}

/// Render a table as a GFM pipe table. Pipes inside cells are escaped.
pub fn table_as_markdown(table: &RawTable) -> String {
    let escape = |cell: &str| cell.replace('|', "\\|");
    let mut out = String::new();
    for (i, row) in table.rows.iter().enumerate() {
        let cells: Vec<String> = row.iter().map(|c| escape(c)).collect();
        out.push_str("| ");
        out.push_str(&cells.join(" | "));
        out.push_str(" |\n");
        if i == 0 {
            out.push('|');
            out.push_str(&" --- |".repeat(row.len().max(1)));
            out.push('\n');
        }
    }
    out
}
