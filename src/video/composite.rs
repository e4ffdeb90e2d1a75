//! Grid compositor: collect the latest frame of every sending client and
//! tile them into one RGB composite for a recipient.
//!
//! Phases per tick: snapshot the registry under its read lock, collect
//! and validate source frames with no lock held, choose the grid, then
//! blit contain-fitted sources into their cells.

use crate::client::{ClientRegistry, SourceSnapshot};
use crate::video::grid;
use crate::video::image::{ImagePool, RgbImage};

/// A finished composite plus the source count that produced it.
pub struct CompositeFrame {
    pub image: RgbImage,
    pub source_count: usize,
}

/// Per-worker compositor with pooled scratch buffers. Not shared across
/// threads; every video render worker owns one.
pub struct Compositor {
    pool: ImagePool,
    snapshots: Vec<SourceSnapshot>,
    frame_scratch: Vec<u8>,
    sources: Vec<RgbImage>,
}

impl Compositor {
    pub fn new() -> Self {
        Self {
            pool: ImagePool::new(),
            snapshots: Vec::new(),
            frame_scratch: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Build the composite for a recipient terminal of `term_cols` x
    /// `term_rows` character cells. Returns `None` when no participant has
    /// a decodable frame; the caller must not transmit anything then.
    pub fn compose(
        &mut self,
        registry: &ClientRegistry,
        term_cols: u32,
        term_rows: u32,
        char_aspect: f32,
    ) -> Option<CompositeFrame> {
        self.collect_sources(registry);
        let sources = std::mem::take(&mut self.sources);
        self.compose_images(sources, term_cols, term_rows, char_aspect)
    }

    /// Snapshot phase + collection phase. A client that claims to be
    /// sending but has not committed a frame yet simply contributes
    /// nothing.
    fn collect_sources(&mut self, registry: &ClientRegistry) {
        registry.video_snapshot(&mut self.snapshots);
        self.sources.clear();

        for snap in &self.snapshots {
            if !snap.sending || !snap.active {
                continue;
            }
            if snap
                .client
                .incoming_video
                .get_latest(&mut self.frame_scratch)
                .is_none()
            {
                continue;
            }
            match self.pool.decode_payload(&self.frame_scratch) {
                Ok(image) => self.sources.push(image),
                Err(e) => {
                    log::debug!("skipping frame from client {}: {e}", snap.id);
                }
            }
        }
        self.snapshots.clear();
    }

    /// Layout and composite phases over already-decoded sources.
    pub fn compose_images(
        &mut self,
        mut sources: Vec<RgbImage>,
        term_cols: u32,
        term_rows: u32,
        char_aspect: f32,
    ) -> Option<CompositeFrame> {
        let count = sources.len();
        if count == 0 {
            return None;
        }
        if count == 1 {
            // Single source passes through unscaled; the encoder fits it.
            return Some(CompositeFrame {
                image: sources.pop().unwrap(),
                source_count: 1,
            });
        }

        let mean_aspect = sources.iter().map(RgbImage::aspect).sum::<f32>() / count as f32;
        let layout = grid::choose_grid(count, term_cols, term_rows, mean_aspect, char_aspect);

        // Half-block pixel space: one column per character cell, two rows.
        let width_px = term_cols.max(1);
        let height_px = term_rows.max(1) * 2;
        let mut composite = self.pool.acquire(width_px, height_px);
        composite.fill((0, 0, 0));

        for (i, source) in sources.iter().enumerate() {
            let cell = grid::cell_rect(i, layout, width_px, height_px);
            blit_contain(&mut composite, source, cell);
        }
        for source in sources {
            self.pool.release(source);
        }

        Some(CompositeFrame {
            image: composite,
            source_count: count,
        })
    }

    /// Return a composite's image buffer to the pool.
    pub fn release(&mut self, frame: CompositeFrame) {
        self.pool.release(frame.image);
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

/// Contain-fit `src` into the cell, center it, and copy pixels with a
/// strict clip to the cell bounds.
fn blit_contain(dst: &mut RgbImage, src: &RgbImage, cell: (u32, u32, u32, u32)) {
    let (cell_x, cell_y, cell_w, cell_h) = cell;
    let (fit_w, fit_h) = grid::contain_fit(src.width(), src.height(), cell_w, cell_h);
    if fit_w == 0 || fit_h == 0 {
        return;
    }
    let off_x = cell_x + (cell_w - fit_w) / 2;
    let off_y = cell_y + (cell_h - fit_h) / 2;

    for y in 0..fit_h {
        let dy = off_y + y;
        if dy >= dst.height() || dy >= cell_y + cell_h {
            break;
        }
        let sy = (y as u64 * src.height() as u64 / fit_h as u64) as u32;
        for x in 0..fit_w {
            let dx = off_x + x;
            if dx >= dst.width() || dx >= cell_x + cell_w {
                break;
            }
            let sx = (x as u64 * src.width() as u64 / fit_w as u64) as u32;
            dst.set_pixel(dx, dy, src.pixel(sx, sy));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(w: u32, h: u32, rgb: (u8, u8, u8)) -> RgbImage {
        let mut image = RgbImage::new(w, h);
        image.fill(rgb);
        image
    }

    #[test]
    fn test_no_sources_yields_no_frame() {
        let mut compositor = Compositor::new();
        assert!(compositor.compose_images(vec![], 80, 24, 2.0).is_none());
    }

    #[test]
    fn test_single_source_passes_through() {
        let mut compositor = Compositor::new();
        let frame = compositor
            .compose_images(vec![flat(320, 240, (128, 64, 32))], 80, 24, 2.0)
            .unwrap();
        assert_eq!(frame.source_count, 1);
        assert_eq!(frame.image.width(), 320);
        assert_eq!(frame.image.height(), 240);
        assert_eq!(frame.image.pixel(0, 0), (128, 64, 32));
    }

    #[test]
    fn test_two_sources_tile_vertically() {
        let mut compositor = Compositor::new();
        let frame = compositor
            .compose_images(
                vec![flat(640, 480, (255, 0, 0)), flat(640, 480, (0, 255, 0))],
                80,
                40,
                2.0,
            )
            .unwrap();
        assert_eq!(frame.source_count, 2);
        assert_eq!(frame.image.width(), 80);
        assert_eq!(frame.image.height(), 80);

        // Vertical stack: red centered in the top half, green in the
        // bottom half.
        assert_eq!(frame.image.pixel(40, 20), (255, 0, 0));
        assert_eq!(frame.image.pixel(40, 60), (0, 255, 0));
    }

    #[test]
    fn test_sources_never_bleed_across_cells() {
        let mut compositor = Compositor::new();
        // A source with an extreme aspect still stays inside its cell.
        let frame = compositor
            .compose_images(
                vec![flat(2000, 10, (9, 9, 9)), flat(10, 2000, (7, 7, 7))],
                80,
                40,
                2.0,
            )
            .unwrap();
        let image = &frame.image;

        // Cell boundary for a 1x2 grid on 80x80 px is y = 40.
        let mut top_has_bottom_color = false;
        for y in 0..40 {
            for x in 0..image.width() {
                if image.pixel(x, y) == (7, 7, 7) {
                    top_has_bottom_color = true;
                }
            }
        }
        assert!(!top_has_bottom_color);
    }

    #[test]
    fn test_empty_cells_stay_black() {
        let mut compositor = Compositor::new();
        let frame = compositor
            .compose_images(
                vec![
                    flat(100, 100, (1, 1, 1)),
                    flat(100, 100, (2, 2, 2)),
                    flat(100, 100, (3, 3, 3)),
                ],
                80,
                40,
                2.0,
            )
            .unwrap();
        assert_eq!(frame.source_count, 3);
        // With three sources at least one grid cell is unoccupied; the
        // composite's corners outside fitted areas remain black.
        assert_eq!(frame.image.pixel(frame.image.width() - 1, frame.image.height() - 1), (0, 0, 0));
    }
}
