use std::collections::HashMap;

use tracing::warn;

use super::blocks::RawTable;
use super::sections::SectionRecord;

pub const TABLE_TITLE: &str = "<table>";

/// Tables sit between their anchor section (key `k`) and the next one (`k + 1`).
const TABLE_OFFSET: f64 = 0.1;

/// Interleave tables into the section stream. Each table follows the last
/// section that touches its page; several tables on one anchor keep their
/// discovery order and get distinct keys in `[k + 0.1, k + 0.2)`. A table
/// whose page has no section is dropped.
pub fn merge_tables(sections: Vec<SectionRecord>, tables: &[RawTable]) -> Vec<SectionRecord> {
    let mut anchored: Vec<(f64, &RawTable)> = Vec::with_capacity(tables.len());
    for table in tables {
        match anchor_key(&sections, table.page) {
            Some(key) => anchored.push((key, table)),
            None => warn!("dropping table on page {}: no section covers it", table.page),
        }
    }

    let mut per_anchor: HashMap<u64, usize> = HashMap::new();
    for (key, _) in &anchored {
        *per_anchor.entry(key.to_bits()).or_default() += 1;
    }

    let mut seen: HashMap<u64, usize> = HashMap::new();
    let mut merged = sections;
    for (key, table) in anchored {
        let total = per_anchor[&key.to_bits()];
        let nth = seen.entry(key.to_bits()).or_default();
        let order_key = key + TABLE_OFFSET + TABLE_OFFSET * (*nth as f64) / (total as f64);
        *nth += 1;

        merged.push(SectionRecord {
            order_key,
            title: TABLE_TITLE.to_string(),
            page_nos: vec![table.page],
            content: table.markdown.clone(),
        });
    }

    merged.sort_by(|a, b| a.order_key.total_cmp(&b.order_key));
    merged
}

/// Largest order key among sections touching `page`.
fn anchor_key(sections: &[SectionRecord], page: u32) -> Option<f64> {
    sections
        .iter()
        .filter(|s| s.touches_page(page))
        .map(|s| s.order_key)
        .max_by(|a, b| a.total_cmp(b))
}
