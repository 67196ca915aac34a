use crate::model::Row;

/// Dataset of the active view plus its live filter and selection.
///
/// Selection is 1-based: index 0 is the header line, so the selection always sits in
/// `1..=max(1, visible_len)`.
#[derive(Debug, Clone)]
pub struct FilterableTable {
    columns: Vec<String>,
    rows: Vec<Row>,
    filter: String,
    visible: Vec<usize>,
    selected: usize,
    status_column: Option<usize>,
}

impl Default for FilterableTable {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            filter: String::new(),
            visible: Vec::new(),
            selected: 1,
            status_column: None,
        }
    }
}

impl FilterableTable {
    pub fn set_data(&mut self, columns: Vec<String>, rows: Vec<Row>) {
        self.columns = columns;
        self.rows = rows;
        self.recompute();
        self.selected = 1;
    }

    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
        self.recompute();
        self.clamp_selection();
    }

    pub fn set_status_column(&mut self, column: Option<usize>) {
        self.status_column = column;
    }

    pub fn clear(&mut self, columns: Vec<String>) {
        self.filter.clear();
        self.set_data(columns, Vec::new());
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn status_column(&self) -> Option<usize> {
        self.status_column
    }

    pub fn total_len(&self) -> usize {
        self.rows.len()
    }

    pub fn visible_len(&self) -> usize {
        self.visible.len()
    }

    /// Header line plus every visible data row.
    pub fn rendered_row_count(&self) -> usize {
        self.visible.len() + 1
    }

    pub fn visible_rows(&self) -> impl Iterator<Item = &Row> {
        self.visible.iter().filter_map(|index| self.rows.get(*index))
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn selected_row(&self) -> Option<&Row> {
        let position = self.selected.checked_sub(1)?;
        let index = self.visible.get(position)?;
        self.rows.get(*index)
    }

    pub fn move_selection(&mut self, delta: isize) {
        let max_index = self.max_selection() as isize;
        let next = (self.selected as isize).saturating_add(delta);
        self.selected = next.clamp(1, max_index) as usize;
    }

    pub fn page_selection(&mut self, direction: isize) {
        let page = (self.visible.len() / 2).max(1) as isize;
        self.move_selection(page.saturating_mul(direction.signum()));
    }

    /// Moves the selection onto the visible row with `key`. Leaves it untouched when absent.
    pub fn select_key(&mut self, key: &str) -> bool {
        let position = self
            .visible
            .iter()
            .position(|index| self.rows.get(*index).is_some_and(|row| row.key == key));
        match position {
            Some(position) => {
                self.selected = position + 1;
                true
            }
            None => false,
        }
    }

    pub fn jump_top(&mut self) {
        self.selected = 1;
    }

    pub fn jump_bottom(&mut self) {
        self.selected = self.max_selection();
    }

    pub fn selection_summary(&self) -> String {
        if self.visible.is_empty() {
            return "0/0".to_string();
        }
        format!("{}/{}", self.selected, self.visible.len())
    }

    /// Last selectable line: every rendered line except the header, and never below 1.
    fn max_selection(&self) -> usize {
        self.rendered_row_count().saturating_sub(1).max(1)
    }

    fn clamp_selection(&mut self) {
        self.selected = self.selected.clamp(1, self.max_selection());
    }

    fn recompute(&mut self) {
        self.visible = filtered_indices(&self.rows, &self.filter);
    }
}

/// Positions of the rows whose joined cell text contains `filter`, case-insensitively, in
/// their original order.
pub fn filtered_indices(rows: &[Row], filter: &str) -> Vec<usize> {
    let needle = filter.trim().to_lowercase();
    rows.iter()
        .enumerate()
        .filter(|(_, row)| row.matches_filter(&needle))
        .map(|(index, _)| index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{FilterableTable, filtered_indices};
    use crate::model::Row;

    fn row(cells: &[&str]) -> Row {
        Row::new(
            cells.first().copied().unwrap_or_default(),
            cells.iter().map(|cell| cell.to_string()).collect(),
        )
    }

    fn sample_rows() -> Vec<Row> {
        vec![row(&["alpha", "running"]), row(&["beta", "stopped"])]
    }

    fn headers() -> Vec<String> {
        vec!["NAME".to_string(), "STATUS".to_string()]
    }

    fn fleet() -> Vec<Row> {
        vec![
            row(&["web", "RUNNING", "pool-a"]),
            row(&["worker", "SUSPENDED", "pool-b"]),
            row(&["web-canary", "STARTING", "pool-a"]),
            row(&["batch", "FAILED", "pool-c"]),
            row(&["Webhook", "RUNNING", "pool-b"]),
        ]
    }

    #[test]
    fn filter_narrows_to_matching_rows() {
        let mut table = FilterableTable::default();
        table.set_data(headers(), sample_rows());
        assert_eq!(table.rendered_row_count(), 3);

        table.set_filter("run");
        assert_eq!(table.rendered_row_count(), 2);
        assert_eq!(table.selected_row().map(|row| row.key.as_str()), Some("alpha"));
        assert_eq!(table.selection_summary(), "1/1");
    }

    #[test]
    fn empty_filter_keeps_every_row_in_order() {
        let rows = fleet();
        assert_eq!(filtered_indices(&rows, ""), vec![0, 1, 2, 3, 4]);
        assert_eq!(filtered_indices(&rows, "   "), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn filtering_is_an_order_preserving_subsequence() {
        let rows = fleet();
        for filter in ["web", "POOL-A", "running", "x", "b", ""] {
            let indices = filtered_indices(&rows, filter);
            assert!(indices.windows(2).all(|pair| pair[0] < pair[1]), "{filter}");
            assert!(indices.iter().all(|index| *index < rows.len()));
        }
    }

    #[test]
    fn filtering_is_idempotent() {
        let rows = fleet();
        for filter in ["web", "RUN", "pool-b", "zzz", ""] {
            let once = filtered_indices(&rows, filter)
                .into_iter()
                .map(|index| rows[index].clone())
                .collect::<Vec<_>>();
            let twice = filtered_indices(&once, filter)
                .into_iter()
                .map(|index| once[index].clone())
                .collect::<Vec<_>>();
            assert_eq!(once, twice, "{filter}");
        }
    }

    #[test]
    fn filter_matches_across_cell_boundaries() {
        let rows = fleet();
        assert_eq!(filtered_indices(&rows, "web running"), vec![0]);
    }

    #[test]
    fn selection_stays_within_bounds_after_every_mutation() {
        let mut table = FilterableTable::default();
        let check = |table: &FilterableTable| {
            let index = table.selected_index();
            assert!(index >= 1 && index <= table.visible_len().max(1));
        };

        table.set_data(headers(), fleet());
        check(&table);
        table.move_selection(10);
        check(&table);
        assert_eq!(table.selected_index(), 5);
        table.set_filter("web");
        check(&table);
        assert_eq!(table.selected_index(), 3);
        table.set_filter("nothing matches");
        check(&table);
        assert!(table.selected_row().is_none());
        assert_eq!(table.selection_summary(), "0/0");
        table.move_selection(-3);
        check(&table);
        table.page_selection(1);
        check(&table);
        table.set_filter("");
        table.jump_bottom();
        check(&table);
        table.set_data(headers(), Vec::new());
        check(&table);
        table.jump_bottom();
        check(&table);
    }

    #[test]
    fn paging_moves_by_half_the_visible_rows() {
        let mut table = FilterableTable::default();
        table.set_data(headers(), fleet());
        table.page_selection(1);
        assert_eq!(table.selected_index(), 3);
        table.page_selection(1);
        assert_eq!(table.selected_index(), 5);
        table.page_selection(-1);
        assert_eq!(table.selected_index(), 3);

        table.set_filter("batch");
        table.page_selection(1);
        assert_eq!(table.selected_index(), 1);
    }

    #[test]
    fn new_data_resets_selection_to_first_row() {
        let mut table = FilterableTable::default();
        table.set_data(headers(), fleet());
        table.jump_bottom();
        assert_eq!(table.selection_summary(), "5/5");

        table.set_data(headers(), fleet());
        assert_eq!(table.selection_summary(), "1/5");
    }

    #[test]
    fn select_key_finds_visible_rows_only() {
        let mut table = FilterableTable::default();
        table.set_data(headers(), fleet());
        assert!(table.select_key("batch"));
        assert_eq!(table.selected_index(), 4);

        table.set_filter("pool-a");
        assert!(!table.select_key("batch"));
        assert!(table.select_key("web-canary"));
        assert_eq!(table.selection_summary(), "2/2");
    }

    #[test]
    fn new_data_is_filtered_against_the_active_filter() {
        let mut table = FilterableTable::default();
        table.set_filter("pool-b");
        table.set_data(headers(), fleet());
        assert_eq!(table.visible_len(), 2);
        assert_eq!(table.total_len(), 5);
        assert_eq!(
            table.visible_rows().map(|row| row.key.as_str()).collect::<Vec<_>>(),
            vec!["worker", "Webhook"]
        );
    }
}
