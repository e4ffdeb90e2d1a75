//! Grid layout selection for the composite.
//!
//! The chosen (cols, rows) maximizes utilization: the share of the
//! terminal's visual area covered by sources after contain-fitting the
//! mean source aspect into each cell. Candidates are every configuration
//! with `cols * rows >= sources` and at most `cols` spare cells.

/// A chosen grid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub cols: u32,
    pub rows: u32,
}

/// Float comparisons tolerate this much before the tie-break applies.
const UTIL_EPS: f32 = 1e-6;

/// Visual aspect (width over height) of a cell spanning `cell_w` x
/// `cell_h` character cells, given the character aspect.
fn cell_visual_aspect(cell_w: f32, cell_h: f32, char_aspect: f32) -> f32 {
    cell_w / (cell_h * char_aspect)
}

/// Fraction of a cell covered when `src_aspect` is contain-fitted into a
/// cell of visual aspect `cell_aspect`.
fn fitted_fraction(src_aspect: f32, cell_aspect: f32) -> f32 {
    if cell_aspect >= src_aspect {
        src_aspect / cell_aspect
    } else {
        cell_aspect / src_aspect
    }
}

/// Choose the grid for `sources` participants on a `term_cols` x
/// `term_rows` character canvas. Ties prefer more columns.
///
/// `sources` of 0 or 1 short-circuit to a 1x1 grid; callers bypass the
/// compositor entirely in those cases.
pub fn choose_grid(sources: usize, term_cols: u32, term_rows: u32, mean_aspect: f32, char_aspect: f32) -> GridLayout {
    if sources <= 1 {
        return GridLayout { cols: 1, rows: 1 };
    }
    let count = sources as u32;
    let term_w = term_cols.max(1) as f32;
    let term_h = term_rows.max(1) as f32;

    let mut best = GridLayout {
        cols: 1,
        rows: count,
    };
    let mut best_util = f32::MIN;

    for cols in 1..=count {
        for rows in 1..=count {
            let cells = cols * rows;
            if cells < count || cells - count > cols {
                continue;
            }
            let cell_aspect = cell_visual_aspect(term_w / cols as f32, term_h / rows as f32, char_aspect);
            let frac = fitted_fraction(mean_aspect, cell_aspect);
            // Empty cells contribute nothing to the covered area.
            let util = frac * count as f32 / cells as f32;

            if util > best_util + UTIL_EPS
                || ((util - best_util).abs() <= UTIL_EPS && cols > best.cols)
            {
                best_util = util;
                best = GridLayout { cols, rows };
            }
        }
    }
    best
}

/// Pixel rectangle of cell `index` (row-major) on a composite of
/// `width_px` x `height_px`.
pub fn cell_rect(index: usize, layout: GridLayout, width_px: u32, height_px: u32) -> (u32, u32, u32, u32) {
    let cell_w = width_px / layout.cols.max(1);
    let cell_h = height_px / layout.rows.max(1);
    let col = index as u32 % layout.cols;
    let row = index as u32 / layout.cols;
    (col * cell_w, row * cell_h, cell_w, cell_h)
}

/// Contain-fit `src` into `dst`: aspect preserved, the tighter dimension
/// filled exactly, the other never exceeding its bound.
pub fn contain_fit(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> (u32, u32) {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return (0, 0);
    }
    // Width-limited when src is wider (relatively) than dst.
    if src_w as u64 * dst_h as u64 >= src_h as u64 * dst_w as u64 {
        let h = ((src_h as u64 * dst_w as u64) / src_w as u64).max(1) as u32;
        (dst_w, h.min(dst_h))
    } else {
        let w = ((src_w as u64 * dst_h as u64) / src_h as u64).max(1) as u32;
        (w.min(dst_w), dst_h)
    }
}
