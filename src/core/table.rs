// src/core/table.rs
//! Logical grid reconstruction for tables with merged and omitted cells, and
//! CALS emission of the result.
use crate::config::ConverterConfig;
use crate::markup::{Element, Node};
use crate::model::{RawCell, RawRow, TableBlock, VMerge};
use log::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum GridCell<'a> {
    Start {
        cell: &'a RawCell,
        rowspan: usize,
        colspan: usize,
    },
    /// Covered by a `Start` further left in the same row.
    HMerged,
    /// Continues a vertical merge; `anchor` is the absorbing `Start` once resolved.
    VMerged { anchor: Option<(usize, usize)> },
    Omitted,
}

/// Normalized grid: every row holds exactly `num_cols` slots.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalTableGrid<'a> {
    num_cols: usize,
    rows: Vec<Vec<GridCell<'a>>>,
    header_flags: Vec<bool>,
    grid_widths: Vec<u32>,
}

impl<'a> LogicalTableGrid<'a> {
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, r: usize) -> &[GridCell<'a>] {
        &self.rows[r]
    }

    pub fn cell(&self, r: usize, c: usize) -> Option<&GridCell<'a>> {
        self.rows.get(r).and_then(|row| row.get(c))
    }

    /// Columns accounted for by `Start` spans, omitted slots and absorbed vertical slots.
    pub fn row_width(&self, r: usize) -> usize {
        self.rows[r]
            .iter()
            .map(|slot| match slot {
                GridCell::Start { colspan, .. } => *colspan,
                GridCell::Omitted | GridCell::VMerged { .. } => 1,
                GridCell::HMerged => 0,
            })
            .sum()
    }

    /// `(row, col, cell, rowspan, colspan)` for every `Start`, row-major.
    pub fn starts(&self) -> impl Iterator<Item = (usize, usize, &'a RawCell, usize, usize)> + '_ {
        self.rows.iter().enumerate().flat_map(|(r, row)| {
            row.iter().enumerate().filter_map(move |(c, slot)| match slot {
                GridCell::Start {
                    cell,
                    rowspan,
                    colspan,
                } => Some((r, c, *cell, *rowspan, *colspan)),
                _ => None,
            })
        })
    }

    /// Explicitly flagged rows, plus rows made of one cell spanning every column.
    ///
    /// The span rule also catches decorative banner rows; nothing in the source
    /// distinguishes the two. One-column tables never use it.
    pub fn is_header_row(&self, r: usize) -> bool {
        if self.header_flags.get(r).copied().unwrap_or(false) {
            return true;
        }
        if self.num_cols < 2 {
            return false;
        }
        let row = &self.rows[r];
        matches!(row.first(), Some(GridCell::Start { colspan, .. }) if *colspan == self.num_cols)
            && row[1..].iter().all(|slot| matches!(slot, GridCell::HMerged))
    }

    pub fn header_rows(&self) -> Vec<usize> {
        (0..self.num_rows()).filter(|&r| self.is_header_row(r)).collect()
    }

    /// Length of the header block when the header rows are exactly `0..k`.
    pub fn header_prefix(&self) -> Option<usize> {
        let headers = self.header_rows();
        if headers.is_empty() {
            return None;
        }
        headers
            .iter()
            .enumerate()
            .all(|(i, &r)| i == r)
            .then_some(headers.len())
    }

    /// Column widths as percentages of the declared total; equal split otherwise.
    pub fn column_percentages(&self) -> Vec<f64> {
        let total: u64 = self.grid_widths.iter().map(|&w| w as u64).sum();
        if self.grid_widths.len() == self.num_cols && total > 0 {
            self.grid_widths
                .iter()
                .map(|&w| w as f64 * 100.0 / total as f64)
                .collect()
        } else {
            vec![100.0 / self.num_cols as f64; self.num_cols]
        }
    }
}

pub struct TableReconstructor {
    width_tolerance: u32,
}

impl TableReconstructor {
    pub fn new(config: &ConverterConfig) -> Self {
        Self {
            width_tolerance: config.width_tolerance,
        }
    }

    pub fn reconstruct<'a>(&self, table: &'a TableBlock) -> LogicalTableGrid<'a> {
        let num_cols = column_count(table);
        let mut rows = Vec::with_capacity(table.rows.len());

        for (r, raw) in table.rows.iter().enumerate() {
            rows.push(self.fill_row(r, raw, &table.grid_widths, num_cols));
        }
        resolve_rowspans(&mut rows);

        LogicalTableGrid {
            num_cols,
            rows,
            header_flags: table.rows.iter().map(|r| r.header).collect(),
            grid_widths: table.grid_widths.clone(),
        }
    }

    fn fill_row<'a>(
        &self,
        r: usize,
        raw: &'a RawRow,
        widths: &[u32],
        num_cols: usize,
    ) -> Vec<GridCell<'a>> {
        let mut slots: Vec<Option<GridCell<'a>>> = vec![None; num_cols];
        for slot in slots.iter_mut().take(raw.grid_before) {
            *slot = Some(GridCell::Omitted);
        }
        for slot in slots.iter_mut().rev().take(raw.grid_after) {
            *slot = Some(GridCell::Omitted);
        }

        for cell in &raw.cells {
            let Some(first_free) = slots.iter().position(Option::is_none) else {
                warn!("row {}: no free column left, cell dropped", r);
                continue;
            };
            let colspan = self.colspan(cell, widths, first_free);
            let start = if colspan == num_cols { 0 } else { first_free };
            let colspan = colspan.clamp(1, num_cols - start);

            if cell.v_merge == Some(VMerge::Continue) {
                for slot in &mut slots[start..start + colspan] {
                    *slot = Some(GridCell::VMerged { anchor: None });
                }
                continue;
            }
            slots[start] = Some(GridCell::Start {
                cell,
                rowspan: 1,
                colspan,
            });
            for slot in &mut slots[start + 1..start + colspan] {
                *slot = Some(GridCell::HMerged);
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or(GridCell::Omitted))
            .collect()
    }

    /// Explicit grid span, else the number of declared columns the cell width covers.
    fn colspan(&self, cell: &RawCell, widths: &[u32], start: usize) -> usize {
        if let Some(span) = cell.grid_span {
            return span.max(1);
        }
        let Some(width) = cell.width else {
            return 1;
        };
        let target = width.saturating_sub(self.width_tolerance);
        let mut covered = 0u32;
        let mut span = 0;
        for w in widths.iter().skip(start) {
            covered += w;
            span += 1;
            if covered >= target {
                break;
            }
        }
        span.max(1)
    }
}

/// Declared grid width, or the widest row when no grid is declared.
fn column_count(table: &TableBlock) -> usize {
    if !table.grid_widths.is_empty() {
        return table.grid_widths.len();
    }
    let needed = table
        .rows
        .iter()
        .map(|row| {
            row.grid_before
                + row.grid_after
                + row
                    .cells
                    .iter()
                    .map(|c| c.grid_span.unwrap_or(1).max(1))
                    .sum::<usize>()
        })
        .max()
        .unwrap_or(0);
    needed.max(1)
}

/// Grows each `Start` down through rows whose same column range is entirely `VMerged`.
fn resolve_rowspans(rows: &mut [Vec<GridCell<'_>>]) {
    for r in 0..rows.len() {
        for c in 0..rows[r].len() {
            let GridCell::Start { colspan, .. } = rows[r][c] else {
                continue;
            };
            let mut span = 1;
            for next in rows.iter_mut().skip(r + 1) {
                let continues = next[c..c + colspan]
                    .iter()
                    .all(|slot| matches!(slot, GridCell::VMerged { anchor: None }));
                if !continues {
                    break;
                }
                for slot in &mut next[c..c + colspan] {
                    *slot = GridCell::VMerged {
                        anchor: Some((r, c)),
                    };
                }
                span += 1;
            }
            if let GridCell::Start { rowspan, .. } = &mut rows[r][c] {
                *rowspan = span;
            }
        }
    }

    // A continuation with nothing above it keeps its column as an empty slot.
    for row in rows.iter_mut() {
        for slot in row.iter_mut() {
            if matches!(slot, GridCell::VMerged { anchor: None }) {
                *slot = GridCell::Omitted;
            }
        }
    }
}

/// Builds a CALS `table` element; `render_cell` supplies entry content.
pub fn emit_table<'a, F>(grid: &LogicalTableGrid<'a>, mut render_cell: F) -> Element
where
    F: FnMut(&'a RawCell) -> Vec<Node>,
{
    let num_cols = grid.num_cols();
    let mut tgroup = Element::new("tgroup").with_attr("cols", num_cols.to_string());
    for (i, pct) in grid.column_percentages().into_iter().enumerate() {
        tgroup.push(
            Element::new("colspec")
                .with_attr("colname", colname(i))
                .with_attr("colnum", (i + 1).to_string())
                .with_attr("colwidth", format_width(pct)),
        );
    }

    let body_start = match grid.header_prefix() {
        Some(k) => {
            let mut thead = Element::new("thead");
            for r in 0..k {
                thead.push(emit_row(grid, r, k, 0, false, &mut render_cell));
            }
            tgroup.push(thead);
            k
        }
        None => 0,
    };

    let mut tbody = Element::new("tbody");
    for r in body_start..grid.num_rows() {
        let inline_header = body_start == 0 && grid.is_header_row(r);
        tbody.push(emit_row(
            grid,
            r,
            grid.num_rows(),
            body_start,
            inline_header,
            &mut render_cell,
        ));
    }
    if tbody.children.is_empty() {
        tbody.push(Element::new("row").with_child(Element::new("entry").with_attr("colname", colname(0))));
    }
    tgroup.push(tbody);

    Element::new("table").with_child(tgroup)
}

fn emit_row<'a, F>(
    grid: &LogicalTableGrid<'a>,
    r: usize,
    section_end: usize,
    section_start: usize,
    inline_header: bool,
    render_cell: &mut F,
) -> Element
where
    F: FnMut(&'a RawCell) -> Vec<Node>,
{
    let mut row = Element::new("row");
    if inline_header {
        row.set_attr("outputclass", "header");
    }
    for (c, slot) in grid.row(r).iter().enumerate() {
        match slot {
            GridCell::Start {
                cell,
                rowspan,
                colspan,
            } => {
                let mut entry = Element::new("entry");
                if *colspan > 1 {
                    entry.set_attr("namest", colname(c));
                    entry.set_attr("nameend", colname(c + colspan - 1));
                } else {
                    entry.set_attr("colname", colname(c));
                }
                // Spans may not cross from the header block into the body.
                let rows_down = (*rowspan).min(section_end - r);
                if rows_down > 1 {
                    entry.set_attr("morerows", (rows_down - 1).to_string());
                }
                entry.children = render_cell(*cell);
                row.push(entry);
            }
            GridCell::VMerged {
                anchor: Some((anchor_row, _)),
            } if *anchor_row < section_start => {
                row.push(Element::new("entry").with_attr("colname", colname(c)));
            }
            GridCell::Omitted => {
                row.push(Element::new("entry").with_attr("colname", colname(c)));
            }
            GridCell::HMerged | GridCell::VMerged { .. } => {}
        }
    }
    row
}

fn colname(index: usize) -> String {
    format!("c{}", index + 1)
}

fn format_width(pct: f64) -> String {
    if (pct - pct.round()).abs() < 0.005 {
        format!("{}*", pct.round() as u64)
    } else {
        format!("{:.2}*", pct)
    }
}
