//! Virtualized, responsive grid layout with variable-height rows
//!
//! Only rows that overlap the viewport (plus a few overscan rows) are
//! produced. A row is tall when it holds the single expanded entity.
//! Row heights and offsets are measured lazily into a prefix cache; any
//! change that can alter a row's height truncates the cache at the first
//! affected row so stale heights never overlap the rows below them.

use crate::config::GridConfig;
use crate::types::NormalizedEntity;
use serde::Serialize;
use tracing::debug;

/// Minimum viewport widths and the column count from each width upwards
pub const BREAKPOINTS: [(f64, usize); 4] = [(1280.0, 4), (1024.0, 3), (768.0, 2), (640.0, 1)];

/// Step function of viewport width: 1/1/2/3/4 columns
pub fn column_count_for_width(width: f64) -> usize {
    BREAKPOINTS
        .iter()
        .find(|(min_width, _)| width >= *min_width)
        .map(|(_, columns)| *columns)
        .unwrap_or(1)
}

pub fn column_width_for(available_width: f64, columns: usize, gap: f64) -> f64 {
    let columns = columns.max(1);
    let gaps = (columns - 1) as f64 * gap;
    ((available_width - gaps) / columns as f64).max(0.0)
}

/// Which entity, if any, is expanded across the whole view
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Expansion {
    #[default]
    Collapsed,
    Expanded(String),
}

impl Expansion {
    /// Toggle semantics: the expanded entity collapses, any other entity replaces it
    pub fn toggled(&self, id: &str) -> Expansion {
        match self {
            Expansion::Expanded(current) if current == id => Expansion::Collapsed,
            _ => Expansion::Expanded(id.to_string()),
        }
    }

    pub fn expanded_id(&self) -> Option<&str> {
        match self {
            Expansion::Expanded(id) => Some(id),
            Expansion::Collapsed => None,
        }
    }
}

/// Derived layout for the current width, item order and expansion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderGeometry {
    pub column_count: usize,
    pub column_width: f64,
    pub base_row_height: f64,
    pub expanded_row_height: f64,
    /// Row holding the expanded entity
    pub expanded_row: Option<usize>,
}

impl RenderGeometry {
    pub fn row_height_for(&self, row_index: usize) -> f64 {
        if self.expanded_row == Some(row_index) {
            self.expanded_row_height
        } else {
            self.base_row_height
        }
    }

    pub fn row_count(&self, item_count: usize) -> usize {
        item_count.div_ceil(self.column_count.max(1))
    }

    pub fn row_of(&self, item_index: usize) -> usize {
        item_index / self.column_count.max(1)
    }
}

/// Measured prefix of row heights and their top offsets
#[derive(Debug, Default)]
struct HeightCache {
    heights: Vec<f64>,
    offsets: Vec<f64>,
}

impl HeightCache {
    fn len(&self) -> usize {
        self.heights.len()
    }

    fn get(&self, row: usize) -> Option<f64> {
        self.heights.get(row).copied()
    }

    fn end_offset(&self) -> f64 {
        match (self.offsets.last(), self.heights.last()) {
            (Some(top), Some(height)) => top + height,
            _ => 0.0,
        }
    }

    /// Forget every row from `row` onwards
    fn reset_after(&mut self, row: usize) {
        self.heights.truncate(row);
        self.offsets.truncate(row);
    }

    fn measure_through(&mut self, row: usize, geometry: &RenderGeometry) {
        while self.heights.len() <= row {
            let top = self.end_offset();
            self.heights.push(geometry.row_height_for(self.heights.len()));
            self.offsets.push(top);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedCell {
    pub id: String,
    /// Position in the view
    pub index: usize,
    pub column: usize,
    pub x: f64,
    pub width: f64,
    pub expanded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedRow {
    pub index: usize,
    pub top: f64,
    pub height: f64,
    pub cells: Vec<RenderedCell>,
}

/// Rows to draw for the current scroll position
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RenderedWindow {
    pub rows: Vec<RenderedRow>,
    pub total_height: f64,
    pub scroll_top: f64,
}

impl RenderedWindow {
    pub fn row_indices(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.index).collect()
    }
}

pub struct VirtualGrid {
    config: GridConfig,
    viewport_width: f64,
    viewport_height: f64,
    scroll_top: f64,
    item_ids: Vec<String>,
    expansion: Expansion,
    /// View position of the expanded entity; the first match if ids repeat
    expanded_index: Option<usize>,
    geometry: RenderGeometry,
    cache: HeightCache,
}

impl VirtualGrid {
    pub fn new(config: GridConfig, viewport_width: f64, viewport_height: f64) -> Self {
        let column_count = column_count_for_width(viewport_width);
        let available = (viewport_width - 2.0 * config.horizontal_padding).max(0.0);
        Self {
            geometry: RenderGeometry {
                column_count,
                column_width: column_width_for(available, column_count, config.gap),
                base_row_height: config.base_row_height,
                expanded_row_height: config.expanded_row_height,
                expanded_row: None,
            },
            config,
            viewport_width,
            viewport_height: viewport_height.max(0.0),
            scroll_top: 0.0,
            item_ids: Vec::new(),
            expansion: Expansion::Collapsed,
            expanded_index: None,
            cache: HeightCache::default(),
        }
    }

    pub fn geometry(&self) -> &RenderGeometry {
        &self.geometry
    }

    pub fn expansion(&self) -> &Expansion {
        &self.expansion
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    pub fn row_count(&self) -> usize {
        self.geometry.row_count(self.item_ids.len())
    }

    /// Height of `row` if it is currently measured
    pub fn cached_row_height(&self, row: usize) -> Option<f64> {
        self.cache.get(row)
    }

    pub fn total_height(&self) -> f64 {
        let rows = self.row_count();
        if rows == 0 {
            return 0.0;
        }
        let extra = match self.geometry.expanded_row {
            Some(row) if row < rows => {
                self.geometry.expanded_row_height - self.geometry.base_row_height
            }
            _ => 0.0,
        };
        rows as f64 * self.geometry.base_row_height + extra
    }

    /// Replace the ordered item list; a different order re-measures every row
    pub fn set_items<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = ids.into_iter().map(|s| s.as_ref().to_string()).collect();
        if ids == self.item_ids {
            return;
        }
        self.item_ids = ids;
        self.refresh_expanded_row();
        self.invalidate_from(0);
    }

    pub fn set_expansion(&mut self, expansion: Expansion) {
        if expansion == self.expansion {
            return;
        }
        let previous_row = self.geometry.expanded_row;
        self.expansion = expansion;
        self.refresh_expanded_row();

        // Re-measure from the earliest row whose height may have changed
        let start = match (previous_row, self.geometry.expanded_row) {
            (Some(a), Some(b)) => a.min(b),
            (Some(row), None) | (None, Some(row)) => row,
            (None, None) => 0,
        };
        self.invalidate_from(start);
    }

    pub fn toggle(&mut self, id: &str) {
        let next = self.expansion.toggled(id);
        self.set_expansion(next);
    }

    /// Apply a new viewport size; any width change re-measures every row
    pub fn resize(&mut self, width: f64, height: f64) {
        self.viewport_height = height.max(0.0);
        if width == self.viewport_width {
            return;
        }
        self.viewport_width = width;

        let columns = column_count_for_width(width);
        let available = (width - 2.0 * self.config.horizontal_padding).max(0.0);
        self.geometry.column_width = column_width_for(available, columns, self.config.gap);
        if columns != self.geometry.column_count {
            debug!(
                "Grid columns {} -> {}",
                self.geometry.column_count, columns
            );
            self.geometry.column_count = columns;
            self.refresh_expanded_row();
        }
        self.invalidate_from(0);
    }

    pub fn scroll_to(&mut self, offset: f64) {
        self.scroll_top = offset.max(0.0);
    }

    /// Scroll so the row holding `id` starts at the top of the viewport
    pub fn scroll_to_item(&mut self, id: &str) -> bool {
        let Some(index) = self.item_ids.iter().position(|item| item == id) else {
            return false;
        };
        let row = self.geometry.row_of(index);
        self.cache.measure_through(row, &self.geometry);
        self.scroll_top = self.cache.offsets[row];
        true
    }

    /// Render `view` for the given expansion and viewport.
    ///
    /// Re-invoke on scroll, resize and expansion change.
    pub fn render_view(
        &mut self,
        view: &[NormalizedEntity],
        expansion: &Expansion,
        viewport_width: f64,
        viewport_height: f64,
    ) -> RenderedWindow {
        self.resize(viewport_width, viewport_height);
        self.set_items(view.iter().map(|e| e.id.as_str()));
        self.set_expansion(expansion.clone());
        self.render()
    }

    pub fn render(&mut self) -> RenderedWindow {
        let row_count = self.row_count();
        if row_count == 0 {
            self.scroll_top = 0.0;
            return RenderedWindow::default();
        }

        let total_height = self.total_height();
        let max_scroll = (total_height - self.viewport_height).max(0.0);
        self.scroll_top = self.scroll_top.min(max_scroll);

        let start = self.row_at_offset(self.scroll_top, row_count);
        let limit = self.scroll_top + self.viewport_height;
        let mut end = start;
        while end + 1 < row_count {
            self.cache.measure_through(end + 1, &self.geometry);
            if self.cache.offsets[end + 1] >= limit {
                break;
            }
            end += 1;
        }

        let first = start.saturating_sub(self.config.overscan_rows);
        let last = (end + self.config.overscan_rows).min(row_count - 1);
        self.cache.measure_through(last, &self.geometry);

        let rows = (first..=last).map(|row| self.render_row(row)).collect();

        RenderedWindow {
            rows,
            total_height,
            scroll_top: self.scroll_top,
        }
    }

    fn render_row(&self, row: usize) -> RenderedRow {
        let columns = self.geometry.column_count.max(1);
        let first_item = row * columns;
        let last_item = (first_item + columns).min(self.item_ids.len());
        let cells = (first_item..last_item)
            .map(|index| {
                let column = index - first_item;
                let id = &self.item_ids[index];
                RenderedCell {
                    id: id.clone(),
                    index,
                    column,
                    x: self.config.horizontal_padding
                        + column as f64 * (self.geometry.column_width + self.config.gap),
                    width: self.geometry.column_width,
                    expanded: self.expanded_index == Some(index),
                }
            })
            .collect();

        RenderedRow {
            index: row,
            top: self.cache.offsets[row],
            height: self.cache.heights[row],
            cells,
        }
    }

    /// Row containing `offset`, measuring as far as needed
    fn row_at_offset(&mut self, offset: f64, row_count: usize) -> usize {
        while self.cache.end_offset() <= offset && self.cache.len() < row_count {
            let next = self.cache.len();
            self.cache.measure_through(next, &self.geometry);
        }
        let after = self.cache.offsets.partition_point(|top| *top <= offset);
        after.saturating_sub(1).min(row_count - 1)
    }

    fn refresh_expanded_row(&mut self) {
        self.expanded_index = self
            .expansion
            .expanded_id()
            .and_then(|id| self.item_ids.iter().position(|item| item == id));
        self.geometry.expanded_row = self.expanded_index.map(|index| self.geometry.row_of(index));
    }

    fn invalidate_from(&mut self, row: usize) {
        if row < self.cache.len() {
            debug!("Invalidating grid row heights from row {}", row);
        }
        self.cache.reset_after(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: f64 = 240.0;
    const TALL: f64 = 620.0;

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("entity-{}", i)).collect()
    }

    fn grid(width: f64, height: f64, n: usize) -> VirtualGrid {
        let mut grid = VirtualGrid::new(GridConfig::default(), width, height);
        grid.set_items(ids(n));
        grid
    }

    #[test]
    fn test_column_breakpoints() {
        assert_eq!(column_count_for_width(500.0), 1);
        assert_eq!(column_count_for_width(640.0), 1);
        assert_eq!(column_count_for_width(767.0), 1);
        assert_eq!(column_count_for_width(768.0), 2);
        assert_eq!(column_count_for_width(1024.0), 3);
        assert_eq!(column_count_for_width(1279.0), 3);
        assert_eq!(column_count_for_width(1280.0), 4);
        assert_eq!(column_count_for_width(2560.0), 4);
    }

    #[test]
    fn test_column_width() {
        assert_eq!(column_width_for(1280.0, 4, 16.0), 308.0);
        assert_eq!(column_width_for(500.0, 1, 16.0), 500.0);
        assert_eq!(column_width_for(10.0, 4, 16.0), 0.0);
    }

    #[test]
    fn test_toggle_semantics() {
        let collapsed = Expansion::Collapsed;
        let a = collapsed.toggled("a");
        assert_eq!(a, Expansion::Expanded("a".into()));
        assert_eq!(a.toggled("b"), Expansion::Expanded("b".into()));
        assert_eq!(a.toggled("a"), Expansion::Collapsed);
    }

    #[test]
    fn test_expand_marks_only_its_row_tall() {
        let mut grid = grid(1280.0, 2000.0, 9);
        assert_eq!(grid.geometry().column_count, 4);

        // index 6 sits in row 1 with four columns
        grid.set_expansion(Expansion::Expanded("entity-7".into()));
        let window = grid.render();

        assert_eq!(window.row_indices(), vec![0, 1, 2]);
        assert_eq!(grid.cached_row_height(0), Some(BASE));
        assert_eq!(grid.cached_row_height(1), Some(TALL));
        assert_eq!(grid.cached_row_height(2), Some(BASE));
        assert_eq!(window.rows[2].top, BASE + TALL);
        assert_eq!(window.total_height, 2.0 * BASE + TALL);
        assert!(window.rows[1].cells[2].expanded);
        assert_eq!(window.rows[1].cells[2].id, "entity-7");
    }

    #[test]
    fn test_collapse_restores_base_height() {
        let mut grid = grid(1280.0, 2000.0, 9);
        grid.toggle("entity-7");
        grid.render();

        grid.toggle("entity-7");
        assert_eq!(grid.expansion(), &Expansion::Collapsed);
        // Rows above the collapsed one keep their measurements
        assert_eq!(grid.cached_row_height(0), Some(BASE));
        assert_eq!(grid.cached_row_height(1), None);

        let window = grid.render();
        assert_eq!(grid.cached_row_height(0), Some(BASE));
        assert_eq!(grid.cached_row_height(1), Some(BASE));
        assert_eq!(grid.cached_row_height(2), Some(BASE));
        assert_eq!(window.rows[2].top, 2.0 * BASE);
        assert_eq!(window.total_height, 3.0 * BASE);
    }

    #[test]
    fn test_switching_expansion_to_later_row_clears_stale_tall_row() {
        let mut grid = grid(1280.0, 2000.0, 12);
        grid.toggle("entity-5"); // row 1
        grid.render();
        grid.toggle("entity-10"); // row 2

        let window = grid.render();
        assert_eq!(grid.cached_row_height(1), Some(BASE));
        assert_eq!(grid.cached_row_height(2), Some(TALL));
        assert_eq!(window.rows[2].top, 2.0 * BASE);
        assert!(!window.rows[1].cells[0].expanded);
        assert!(window.rows[2].cells[1].expanded);
    }

    #[test]
    fn test_column_change_invalidates_every_row() {
        let mut grid = grid(1280.0, 2000.0, 9);
        grid.toggle("entity-7");
        grid.render();
        assert!(grid.cached_row_height(0).is_some());

        grid.resize(1100.0, 2000.0);
        assert_eq!(grid.geometry().column_count, 3);
        for row in 0..3 {
            assert_eq!(grid.cached_row_height(row), None);
        }

        // index 6 now starts row 2
        grid.render();
        assert_eq!(grid.geometry().expanded_row, Some(2));
        assert_eq!(grid.cached_row_height(1), Some(BASE));
        assert_eq!(grid.cached_row_height(2), Some(TALL));
    }

    #[test]
    fn test_only_visible_rows_plus_overscan_render() {
        let mut grid = grid(500.0, 1000.0, 100);
        let window = grid.render();
        assert_eq!(window.row_indices(), (0..=6).collect::<Vec<_>>());
        assert_eq!(window.total_height, 100.0 * BASE);
        assert!(grid.cached_row_height(7).is_none());

        grid.scroll_to(2400.0);
        let window = grid.render();
        assert_eq!(window.row_indices(), (8..=16).collect::<Vec<_>>());
        assert_eq!(window.rows[2].top, 2400.0);
    }

    #[test]
    fn test_scroll_is_clamped_to_content() {
        let mut grid = grid(500.0, 1000.0, 100);
        grid.scroll_to(1e9);
        let window = grid.render();
        assert_eq!(window.scroll_top, 100.0 * BASE - 1000.0);
        assert_eq!(window.row_indices(), (93..=99).collect::<Vec<_>>());
    }

    #[test]
    fn test_scroll_position_survives_expansion_above() {
        let mut grid = grid(500.0, 1000.0, 100);
        grid.scroll_to(2400.0);
        grid.render();

        grid.toggle("entity-3");
        let window = grid.render();
        assert_eq!(window.scroll_top, 2400.0);
        // Rows below shifted down by the extra height of row 2
        assert_eq!(grid.cached_row_height(2), Some(TALL));
        assert_eq!(window.rows[0].index, 6);
        assert_eq!(window.rows[2].top, 8.0 * BASE + (TALL - BASE));
    }

    #[test]
    fn test_empty_view_renders_nothing() {
        let mut grid = VirtualGrid::new(GridConfig::default(), 1280.0, 800.0);
        let window = grid.render_view(&[], &Expansion::Expanded("x".into()), 1280.0, 800.0);
        assert!(window.rows.is_empty());
        assert_eq!(window.total_height, 0.0);
    }

    #[test]
    fn test_expanded_id_not_in_view_is_ignored() {
        let mut grid = grid(1280.0, 2000.0, 4);
        grid.set_expansion(Expansion::Expanded("missing".into()));
        let window = grid.render();
        assert_eq!(grid.geometry().expanded_row, None);
        assert_eq!(window.total_height, BASE);
    }

    #[test]
    fn test_scroll_to_item() {
        let mut grid = grid(1280.0, 500.0, 40);
        assert!(grid.scroll_to_item("entity-21"));
        assert_eq!(grid.scroll_top(), 5.0 * BASE);
        assert!(!grid.scroll_to_item("nope"));
    }

    #[test]
    fn test_repeated_id_expands_a_single_cell() {
        let mut grid = VirtualGrid::new(GridConfig::default(), 1280.0, 2000.0);
        grid.set_items(["a", "b", "c", "d", "a"]);
        grid.set_expansion(Expansion::Expanded("a".into()));
        let window = grid.render();

        let expanded: Vec<(usize, usize)> = window
            .rows
            .iter()
            .flat_map(|row| row.cells.iter().map(move |cell| (row.index, cell.index, cell.expanded)))
            .filter(|(_, _, expanded)| *expanded)
            .map(|(row, index, _)| (row, index))
            .collect();
        assert_eq!(expanded, vec![(0, 0)]);
        assert_eq!(window.rows[0].height, TALL);
        assert_eq!(window.rows[1].height, BASE);
    }
}
