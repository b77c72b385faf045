use std::collections::{BTreeSet, HashMap};

use super::blocks::LineItem;

pub const MAX_HEADING_DEPTH: u8 = 6;
const NESTING_SYMBOL: char = '#';

/// Raw heading marker → depth 1..=6.
///
/// Only the first six distinct markers in lexicographic order are kept, so a
/// document with more heading styles than that loses the rest. Markers without
/// any nesting symbol, or nested deeper than six, never map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadingLevelMap {
    levels: HashMap<String, u8>,
}

impl HeadingLevelMap {
    pub fn build<'a>(markers: impl IntoIterator<Item = &'a str>) -> Self {
        let distinct: BTreeSet<&str> = markers.into_iter().filter(|m| !m.is_empty()).collect();

        let levels = distinct
            .into_iter()
            .take(MAX_HEADING_DEPTH as usize)
            .filter_map(|marker| {
                let depth = marker.matches(NESTING_SYMBOL).count();
                (1..=MAX_HEADING_DEPTH as usize)
                    .contains(&depth)
                    .then(|| (marker.to_string(), depth as u8))
            })
            .collect();

        HeadingLevelMap { levels }
    }

    pub fn from_line_items(items: &[LineItem]) -> Self {
        Self::build(items.iter().filter_map(|i| i.marker.as_deref()))
    }

    pub fn level(&self, marker: Option<&str>) -> Option<u8> {
        marker.and_then(|m| self.levels.get(m).copied())
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_is_nesting_count() {
        let map = HeadingLevelMap::build(["##", "#", "###", "#", ""]);
        assert_eq!(map.len(), 3);
        assert_eq!(map.level(Some("#")), Some(1));
        assert_eq!(map.level(Some("###")), Some(3));
        assert_eq!(map.level(Some("####")), None);
        assert_eq!(map.level(None), None);
    }

    #[test]
    fn keeps_first_six_in_sort_order() {
        let markers = ["#a", "#b", "#c", "#d", "#e", "#f", "#g"];
        let map = HeadingLevelMap::build(markers);
        assert_eq!(map.len(), 6);
        assert_eq!(map.level(Some("#f")), Some(1));
        assert_eq!(map.level(Some("#g")), None);
    }

    #[test]
    fn truncation_happens_before_depth_filter() {
        // "#######" sorts first and is too deep; "#6" is cut by the limit.
        let markers = ["#1", "#2", "#3", "#4", "#5", "#6", "#######"];
        let map = HeadingLevelMap::build(markers);
        assert_eq!(map.len(), 5);
        assert_eq!(map.level(Some("#######")), None);
        assert_eq!(map.level(Some("#6")), None);
        assert_eq!(map.level(Some("#5")), Some(1));
    }

    #[test]
    fn marker_without_symbol_never_maps() {
        let map = HeadingLevelMap::build(["bold"]);
        assert!(map.is_empty());
    }
}
