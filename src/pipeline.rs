use std::cmp::Ordering;

use serde_json::Value;
use tracing::trace;

use crate::api::Record;

// The record view pipeline. Works on an index mapping (view position to row
// index) so the loaded rows are never reordered or copied; the grid resolves
// cells through the mapping.

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortConfig {
    pub column: Option<String>,
    pub ascending: bool,
}

impl SortConfig {
    // Selecting the already ascending column flips it to descending, anything
    // else restarts ascending on the selected column.
    pub fn toggle(&mut self, column: &str) {
        if self.column.as_deref() == Some(column) && self.ascending {
            self.ascending = false;
        } else {
            self.column = Some(column.to_string());
            self.ascending = true;
        }
        trace!("Sort is now {:?}", self);
    }

    pub fn clear(&mut self) {
        self.column = None;
        self.ascending = false;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageState {
    pub current_page: usize, // 1-indexed
    pub per_page: usize,
}

impl PageState {
    pub fn new(per_page: usize) -> Self {
        PageState {
            current_page: 1,
            per_page,
        }
    }

    pub fn total_pages(&self, nrows: usize) -> usize {
        std::cmp::max(1, nrows.div_ceil(self.per_page))
    }

    pub fn next(&mut self, nrows: usize) {
        self.current_page = std::cmp::min(self.current_page + 1, self.total_pages(nrows));
    }

    pub fn prev(&mut self) {
        self.current_page = std::cmp::max(self.current_page - 1, 1);
    }

    pub fn reset(&mut self) {
        self.current_page = 1;
    }

    // Index range of the current page into the filtered and sorted mapping
    pub fn slice(&self, nrows: usize) -> std::ops::Range<usize> {
        let begin = std::cmp::min((self.current_page - 1) * self.per_page, nrows);
        let end = std::cmp::min(self.current_page * self.per_page, nrows);
        begin..end
    }
}

// Keep the row iff no search is active, or the stringified cell contains the
// query case-insensitively. A search needs both a column and a query.
pub fn filter_rows(rows: &[Record], search_column: Option<&str>, query: &str) -> Vec<usize> {
    let Some(column) = search_column.filter(|_| !query.is_empty()) else {
        return (0..rows.len()).collect();
    };
    let needle = query.to_lowercase();
    rows.iter()
        .enumerate()
        .filter(|(_, row)| match_text(row.get(column)).to_lowercase().contains(&needle))
        .map(|(idx, _)| idx)
        .collect()
}

// Stable sort of the mapping by the configured column. No-op without one.
pub fn sort_rows(rows: &[Record], mut mask: Vec<usize>, sort: &SortConfig) -> Vec<usize> {
    let Some(column) = sort.column.as_deref() else {
        return mask;
    };
    mask.sort_by(|&a, &b| {
        let ord = compare_cells(rows[a].get(column), rows[b].get(column));
        if sort.ascending { ord } else { ord.reverse() }
    });
    mask
}

pub fn apply(
    rows: &[Record],
    search_column: Option<&str>,
    query: &str,
    sort: &SortConfig,
) -> Vec<usize> {
    sort_rows(rows, filter_rows(rows, search_column, query), sort)
}

// Type aware cell comparison: two numeric values (a JSON number, or a string
// that parses as one) compare numerically, otherwise lexicographically on the
// stringified values. Null and missing cells order before everything.
pub fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => match_text(Some(a)).cmp(&match_text(Some(b))),
        },
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// Stringification used for search matching and lexicographic comparison.
// Null renders as the literal "null" so it can be searched for.
pub fn match_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

// Stringification used for display; null cells render empty
pub fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(v: serde_json::Value) -> Record {
        v.as_object().unwrap().clone()
    }

    fn rows() -> Vec<Record> {
        vec![
            record(json!({"id": 1, "name": "B"})),
            record(json!({"id": 2, "name": "A"})),
            record(json!({"id": 3, "name": "A"})),
        ]
    }

    #[test]
    fn filter_without_column_or_query_is_identity() {
        let rows = rows();
        assert_eq!(filter_rows(&rows, None, "a"), vec![0, 1, 2]);
        assert_eq!(filter_rows(&rows, Some("name"), ""), vec![0, 1, 2]);
    }

    #[test]
    fn filter_matches_case_insensitive_substring() {
        let rows = vec![
            record(json!({"name": "Semana de BD"})),
            record(json!({"name": "Workshop"})),
            record(json!({"name": "congresso bd"})),
        ];
        assert_eq!(filter_rows(&rows, Some("name"), "BD"), vec![0, 2]);
        assert_eq!(filter_rows(&rows, Some("name"), "xyz"), Vec::<usize>::new());
    }

    #[test]
    fn filter_stringifies_numbers_and_nulls() {
        let rows = vec![
            record(json!({"id": 1024, "note": null})),
            record(json!({"id": 7, "note": "set"})),
        ];
        assert_eq!(filter_rows(&rows, Some("id"), "102"), vec![0]);
        // String(null) contains "null"
        assert_eq!(filter_rows(&rows, Some("note"), "null"), vec![0]);
    }

    #[test]
    fn sort_is_stable_on_equal_keys() {
        let rows = rows();
        let sort = SortConfig {
            column: Some("name".to_string()),
            ascending: true,
        };
        // id 2 stays before id 3, both "A"
        assert_eq!(apply(&rows, None, "", &sort), vec![1, 2, 0]);
    }

    #[test]
    fn sort_without_column_preserves_filtered_order() {
        let rows = rows();
        let mask = filter_rows(&rows, None, "");
        assert_eq!(sort_rows(&rows, mask.clone(), &SortConfig::default()), mask);
    }

    #[test]
    fn toggle_goes_ascending_then_descending_then_resets() {
        let mut sort = SortConfig::default();
        sort.toggle("name");
        assert_eq!(sort.column.as_deref(), Some("name"));
        assert!(sort.ascending);
        sort.toggle("name");
        assert!(!sort.ascending);
        // Descending toggled again restarts ascending
        sort.toggle("name");
        assert!(sort.ascending);
        // A different column restarts ascending too
        sort.toggle("id");
        assert_eq!(sort.column.as_deref(), Some("id"));
        assert!(sort.ascending);
    }

    #[test]
    fn numeric_strings_compare_numerically() {
        let a = json!("9");
        let b = json!("10");
        assert_eq!(compare_cells(Some(&a), Some(&b)), Ordering::Less);

        let a = json!(9);
        let b = json!("10");
        assert_eq!(compare_cells(Some(&a), Some(&b)), Ordering::Less);
    }

    #[test]
    fn non_numeric_values_compare_lexicographically() {
        let a = json!("10 people");
        let b = json!("9");
        assert_eq!(compare_cells(Some(&a), Some(&b)), Ordering::Less);
    }

    #[test]
    fn nulls_sort_first() {
        let null = json!(null);
        let text = json!("abc");
        assert_eq!(compare_cells(Some(&null), Some(&text)), Ordering::Less);
        assert_eq!(compare_cells(Some(&text), None), Ordering::Greater);
        assert_eq!(compare_cells(None, Some(&null)), Ordering::Equal);
    }

    #[test]
    fn total_pages_has_a_floor_of_one() {
        let page = PageState::new(10);
        assert_eq!(page.total_pages(0), 1);
        assert_eq!(page.total_pages(10), 1);
        assert_eq!(page.total_pages(11), 2);
        assert_eq!(page.slice(0), 0..0);
    }

    #[test]
    fn pages_slice_in_fixed_chunks() {
        let mut page = PageState::new(2);
        assert_eq!(page.total_pages(5), 3);
        assert_eq!(page.slice(5), 0..2);
        page.next(5);
        assert_eq!(page.slice(5), 2..4);
        page.next(5);
        assert_eq!(page.slice(5), 4..5);
        // Clamped at the last page
        page.next(5);
        assert_eq!(page.current_page, 3);
        page.prev();
        page.prev();
        page.prev();
        assert_eq!(page.current_page, 1);
    }

    #[test]
    fn page_slice_never_exceeds_page_size() {
        let rows: Vec<Record> = (0..23)
            .map(|i| record(json!({"id": i})))
            .collect();
        let mut page = PageState::new(10);
        let mask = apply(&rows, None, "", &SortConfig::default());
        for _ in 0..5 {
            let slice = page.slice(mask.len());
            assert!(slice.len() <= 10);
            page.next(mask.len());
        }
        assert_eq!(page.current_page, page.total_pages(mask.len()));
    }
}
