//! Capability-aware ASCII converter.
//!
//! Turns an RGB image into terminal bytes for one recipient: luminance
//! ramp glyphs, optional ANSI 16/256/truecolor painting, and a half-block
//! mode that packs two vertical pixels per character cell. Escape
//! sequences are elided while the color state is unchanged.

use lazy_static::lazy_static;

use crate::error::{EngineError, Result};
use crate::protocol::packet::{ColorMode, RenderMode};
use crate::video::image::RgbImage;

/// Server default luminance ramp, dark to bright.
pub const DEFAULT_RAMP: &str = "   ...',;:clodxkO0KXNWM";

/// Terminal attribute reset; every rendered frame ends with it.
pub const RESET: &[u8] = b"\x1b[0m";

/// Upper half block glyph used by half-block mode.
const HALF_BLOCK: &str = "\u{2580}";

/// Intensity levels of the 256-color cube axis.
const CUBE_LEVELS: [u8; 6] = [0, 95, 135, 175, 215, 255];

/// The standard 16 ANSI colors as RGB.
const ANSI16_RGB: [(u8, u8, u8); 16] = [
    (0, 0, 0),
    (170, 0, 0),
    (0, 170, 0),
    (170, 85, 0),
    (0, 0, 170),
    (170, 0, 170),
    (0, 170, 170),
    (170, 170, 170),
    (85, 85, 85),
    (255, 85, 85),
    (85, 255, 85),
    (255, 255, 85),
    (85, 85, 255),
    (255, 85, 255),
    (85, 255, 255),
    (255, 255, 255),
];

lazy_static! {
    /// Per-channel intensity to nearest cube axis index.
    static ref CUBE_INDEX: [u8; 256] = {
        let mut table = [0u8; 256];
        for (v, slot) in table.iter_mut().enumerate() {
            let mut best = 0u8;
            let mut best_dist = i32::MAX;
            for (i, level) in CUBE_LEVELS.iter().enumerate() {
                let dist = (v as i32 - *level as i32).abs();
                if dist < best_dist {
                    best_dist = dist;
                    best = i as u8;
                }
            }
            *slot = best;
        }
        table
    };
}

/// Luminance ramp mapping brightness to glyphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    glyphs: Vec<char>,
}

impl Palette {
    /// Build a palette from a dark-to-bright ramp string.
    pub fn from_ramp(ramp: &str) -> Result<Self> {
        let glyphs: Vec<char> = ramp.chars().collect();
        if glyphs.is_empty() {
            return Err(EngineError::InvalidParam("empty palette ramp".into()));
        }
        Ok(Self { glyphs })
    }

    /// The server default ramp.
    pub fn default_ramp() -> Self {
        Self::from_ramp(DEFAULT_RAMP).unwrap_or_else(|_| Self { glyphs: vec![' '] })
    }

    /// Glyph for an 8-bit luminance value.
    #[inline]
    pub fn glyph_for(&self, luma: u8) -> char {
        let idx = luma as usize * (self.glyphs.len() - 1) / 255;
        self.glyphs[idx]
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::default_ramp()
    }
}

/// Parameters handed to the converter for one frame.
pub struct RenderSpec<'a> {
    /// Terminal width in character cells.
    pub max_cols: u32,
    /// Terminal height in character rows.
    pub max_rows: u32,
    pub color: ColorMode,
    pub mode: RenderMode,
    pub palette: &'a Palette,
    pub char_aspect: f32,
}

/// Quantized color in the recipient's space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Paint {
    None,
    Idx16(u8),
    Idx256(u8),
    True(u8, u8, u8),
}

#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}

fn nearest_ansi16(r: u8, g: u8, b: u8) -> u8 {
    let mut best = 0u8;
    let mut best_dist = i64::MAX;
    for (i, (cr, cg, cb)) in ANSI16_RGB.iter().enumerate() {
        let dr = r as i64 - *cr as i64;
        let dg = g as i64 - *cg as i64;
        let db = b as i64 - *cb as i64;
        let dist = dr * dr + dg * dg + db * db;
        if dist < best_dist {
            best_dist = dist;
            best = i as u8;
        }
    }
    best
}

fn nearest_ansi256(r: u8, g: u8, b: u8) -> u8 {
    let ci = CUBE_INDEX[r as usize];
    let cj = CUBE_INDEX[g as usize];
    let ck = CUBE_INDEX[b as usize];
    let cube_rgb = (CUBE_LEVELS[ci as usize], CUBE_LEVELS[cj as usize], CUBE_LEVELS[ck as usize]);
    let cube_code = 16 + 36 * ci as u16 + 6 * cj as u16 + ck as u16;

    // Grayscale ramp candidate: 232..=255 covers 8..=238 in steps of 10.
    let y = luma(r, g, b) as i32;
    let gray_idx = ((y - 8) / 10).clamp(0, 23);
    let gray_level = (8 + gray_idx * 10) as u8;
    let gray_code = 232 + gray_idx as u16;

    let dist = |c: (u8, u8, u8)| {
        let dr = r as i64 - c.0 as i64;
        let dg = g as i64 - c.1 as i64;
        let db = b as i64 - c.2 as i64;
        dr * dr + dg * dg + db * db
    };
    if dist((gray_level, gray_level, gray_level)) < dist(cube_rgb) {
        gray_code as u8
    } else {
        cube_code as u8
    }
}

fn quantize(rgb: (u8, u8, u8), color: ColorMode) -> Paint {
    match color {
        ColorMode::Mono => Paint::None,
        ColorMode::Ansi16 => Paint::Idx16(nearest_ansi16(rgb.0, rgb.1, rgb.2)),
        ColorMode::Ansi256 => Paint::Idx256(nearest_ansi256(rgb.0, rgb.1, rgb.2)),
        ColorMode::Truecolor => Paint::True(rgb.0, rgb.1, rgb.2),
    }
}

fn push_fg(out: &mut Vec<u8>, paint: Paint) {
    match paint {
        Paint::None => {}
        Paint::Idx16(i) => {
            let code = if i < 8 { 30 + i as u32 } else { 90 + i as u32 - 8 };
            out.extend_from_slice(format!("\x1b[{code}m").as_bytes());
        }
        Paint::Idx256(i) => out.extend_from_slice(format!("\x1b[38;5;{i}m").as_bytes()),
        Paint::True(r, g, b) => {
            out.extend_from_slice(format!("\x1b[38;2;{r};{g};{b}m").as_bytes())
        }
    }
}

fn push_bg(out: &mut Vec<u8>, paint: Paint) {
    match paint {
        Paint::None => {}
        Paint::Idx16(i) => {
            let code = if i < 8 { 40 + i as u32 } else { 100 + i as u32 - 8 };
            out.extend_from_slice(format!("\x1b[{code}m").as_bytes());
        }
        Paint::Idx256(i) => out.extend_from_slice(format!("\x1b[48;5;{i}m").as_bytes()),
        Paint::True(r, g, b) => {
            out.extend_from_slice(format!("\x1b[48;2;{r};{g};{b}m").as_bytes())
        }
    }
}

/// Output raster after aspect fitting: character columns and sample rows.
/// In half-block mode a sample row is one pixel row (two per character).
fn fit_output(image: &RgbImage, spec: &RenderSpec) -> (u32, u32) {
    let sample_rows_max = match spec.mode {
        RenderMode::HalfBlock => spec.max_rows * 2,
        _ => spec.max_rows,
    };
    // Visual height of one sample row, in character-width units.
    let row_visual = match spec.mode {
        RenderMode::HalfBlock => spec.char_aspect / 2.0,
        _ => spec.char_aspect,
    };
    let src_aspect = image.aspect();
    let box_aspect = spec.max_cols as f32 / (sample_rows_max as f32 * row_visual);

    if src_aspect >= box_aspect {
        let rows = (spec.max_cols as f32 / (src_aspect * row_visual)).round() as u32;
        (spec.max_cols.max(1), rows.clamp(1, sample_rows_max.max(1)))
    } else {
        let cols = (src_aspect * sample_rows_max as f32 * row_visual).round() as u32;
        (cols.clamp(1, spec.max_cols.max(1)), sample_rows_max.max(1))
    }
}

/// Box-average the source region one output sample covers.
fn sample(image: &RgbImage, cx: u32, ry: u32, out_cols: u32, out_rows: u32) -> (u8, u8, u8) {
    let x0 = (cx as u64 * image.width() as u64 / out_cols as u64) as u32;
    let mut x1 = ((cx + 1) as u64 * image.width() as u64 / out_cols as u64) as u32;
    let y0 = (ry as u64 * image.height() as u64 / out_rows as u64) as u32;
    let mut y1 = ((ry + 1) as u64 * image.height() as u64 / out_rows as u64) as u32;
    x1 = x1.max(x0 + 1).min(image.width());
    y1 = y1.max(y0 + 1).min(image.height());

    let mut r = 0u64;
    let mut g = 0u64;
    let mut b = 0u64;
    for y in y0..y1 {
        for x in x0..x1 {
            let px = image.pixel(x, y);
            r += px.0 as u64;
            g += px.1 as u64;
            b += px.2 as u64;
        }
    }
    let n = ((x1 - x0) * (y1 - y0)) as u64;
    ((r / n) as u8, (g / n) as u8, (b / n) as u8)
}

/// Convert an image to terminal bytes, aspect-fitted to the recipient's
/// terminal. The result always ends with [`RESET`].
pub fn render_ascii(image: &RgbImage, spec: &RenderSpec) -> Vec<u8> {
    if image.width() == 0 || image.height() == 0 {
        let mut out = Vec::with_capacity(RESET.len());
        out.extend_from_slice(RESET);
        return out;
    }
    let (out_cols, sample_rows) = fit_output(image, spec);

    let mut out = Vec::with_capacity(out_cols as usize * sample_rows as usize * 4);
    match spec.mode {
        RenderMode::HalfBlock if spec.color != ColorMode::Mono => {
            render_half_block(image, spec, out_cols, sample_rows, &mut out)
        }
        _ => render_full_cell(image, spec, out_cols, sample_rows, &mut out),
    }
    out.extend_from_slice(RESET);
    out
}

fn render_full_cell(image: &RgbImage, spec: &RenderSpec, out_cols: u32, sample_rows: u32, out: &mut Vec<u8>) {
    // Mono half-block degenerates to ramp glyphs over pixel pairs.
    let char_rows = match spec.mode {
        RenderMode::HalfBlock => sample_rows.div_ceil(2),
        _ => sample_rows,
    };
    let mut glyph_buf = [0u8; 4];

    for cy in 0..char_rows {
        let mut last_paint = Paint::None;
        for cx in 0..out_cols {
            let rgb = match spec.mode {
                RenderMode::HalfBlock => {
                    let top = sample(image, cx, cy * 2, out_cols, sample_rows);
                    let bottom_row = (cy * 2 + 1).min(sample_rows - 1);
                    let bottom = sample(image, cx, bottom_row, out_cols, sample_rows);
                    (
                        ((top.0 as u16 + bottom.0 as u16) / 2) as u8,
                        ((top.1 as u16 + bottom.1 as u16) / 2) as u8,
                        ((top.2 as u16 + bottom.2 as u16) / 2) as u8,
                    )
                }
                _ => sample(image, cx, cy, out_cols, sample_rows),
            };
            let paint = quantize(rgb, spec.color);
            match spec.mode {
                RenderMode::Background if spec.color != ColorMode::Mono => {
                    if paint != last_paint {
                        push_bg(out, paint);
                        last_paint = paint;
                    }
                    out.push(b' ');
                }
                _ => {
                    if paint != last_paint {
                        push_fg(out, paint);
                        last_paint = paint;
                    }
                    let glyph = spec.palette.glyph_for(luma(rgb.0, rgb.1, rgb.2));
                    out.extend_from_slice(glyph.encode_utf8(&mut glyph_buf).as_bytes());
                }
            }
        }
        if last_paint != Paint::None {
            out.extend_from_slice(RESET);
        }
        out.extend_from_slice(b"\r\n");
    }
}

fn render_half_block(image: &RgbImage, spec: &RenderSpec, out_cols: u32, sample_rows: u32, out: &mut Vec<u8>) {
    let char_rows = sample_rows.div_ceil(2);
    for cy in 0..char_rows {
        let mut last_fg = Paint::None;
        let mut last_bg = Paint::None;
        for cx in 0..out_cols {
            let top = sample(image, cx, cy * 2, out_cols, sample_rows);
            let bottom = if cy * 2 + 1 < sample_rows {
                sample(image, cx, cy * 2 + 1, out_cols, sample_rows)
            } else {
                (0, 0, 0)
            };
            let fg = quantize(top, spec.color);
            let bg = quantize(bottom, spec.color);
            if fg != last_fg {
                push_fg(out, fg);
                last_fg = fg;
            }
            if bg != last_bg {
                push_bg(out, bg);
                last_bg = bg;
            }
            out.extend_from_slice(HALF_BLOCK.as_bytes());
        }
        out.extend_from_slice(RESET);
        out.extend_from_slice(b"\r\n");
    }
}

/// Enforce the reset-tail discipline on converter output: if the buffer
/// does not end with [`RESET`], truncate to the last reset present. A
/// buffer with no reset at all is left alone and logged as an anomaly.
pub fn ensure_reset_tail(buf: &mut Vec<u8>) {
    if buf.ends_with(RESET) {
        return;
    }
    if let Some(at) = buf.windows(RESET.len()).rposition(|w| w == RESET) {
        buf.truncate(at + RESET.len());
    } else {
        log::warn!("ascii frame carries no reset sequence; sending as-is");
    }
}

/// Render for a recipient's capabilities: pick the converter's target rows
/// from the render mode and enforce the reset tail.
pub fn render_for_terminal(
    image: &RgbImage,
    cols: u32,
    rows: u32,
    color: ColorMode,
    mode: RenderMode,
    palette: &Palette,
    char_aspect: f32,
) -> Vec<u8> {
    let spec = RenderSpec {
        max_cols: cols.max(1),
        max_rows: rows.max(1),
        color,
        mode,
        palette,
        char_aspect,
    };
    let mut out = render_ascii(image, &spec);
    ensure_reset_tail(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_image(w: u32, h: u32, rgb: (u8, u8, u8)) -> RgbImage {
        let mut image = RgbImage::new(w, h);
        image.fill(rgb);
        image
    }

    #[test]
    fn test_output_ends_with_reset() {
        let image = flat_image(32, 16, (128, 64, 32));
        for mode in [RenderMode::Foreground, RenderMode::Background, RenderMode::HalfBlock] {
            for color in [ColorMode::Mono, ColorMode::Ansi16, ColorMode::Ansi256, ColorMode::Truecolor] {
                let out = render_for_terminal(&image, 40, 12, color, mode, &Palette::default_ramp(), 2.0);
                assert!(out.ends_with(b"\x1b[0m"), "{mode:?}/{color:?} missing reset");
            }
        }
    }

    #[test]
    fn test_mono_foreground_has_no_escapes_before_tail() {
        let image = flat_image(8, 4, (200, 200, 200));
        let out = render_ascii(
            &image,
            &RenderSpec {
                max_cols: 8,
                max_rows: 4,
                color: ColorMode::Mono,
                mode: RenderMode::Foreground,
                palette: &Palette::default_ramp(),
                char_aspect: 2.0,
            },
        );
        let body = &out[..out.len() - RESET.len()];
        assert!(!body.contains(&0x1b));
    }

    #[test]
    fn test_half_block_packs_two_pixels_per_row() {
        // A square source on an 8x8 terminal with 2:1 cells: 8 columns of
        // visually square pixels make 8 sample rows, so 4 character rows,
        // each cell carrying a pixel pair in a half-block glyph.
        let image = flat_image(16, 16, (10, 10, 10));
        let out = render_for_terminal(
            &image,
            8,
            8,
            ColorMode::Truecolor,
            RenderMode::HalfBlock,
            &Palette::default_ramp(),
            2.0,
        );
        let rows = out.iter().filter(|&&b| b == b'\n').count();
        assert_eq!(rows, 4);
        assert!(out.windows(3).any(|w| w == "\u{2580}".as_bytes()));
    }

    #[test]
    fn test_escape_elision_on_flat_color() {
        // 16x4 source fits a 16x2 cell grid exactly at 2:1 cells.
        let image = flat_image(16, 4, (255, 0, 0));
        let out = render_ascii(
            &image,
            &RenderSpec {
                max_cols: 16,
                max_rows: 2,
                color: ColorMode::Truecolor,
                mode: RenderMode::Foreground,
                palette: &Palette::default_ramp(),
                char_aspect: 2.0,
            },
        );
        // One fg escape per row, not one per cell.
        let pat: &[u8] = b"\x1b[38;";
        let escapes = out.windows(pat.len()).filter(|w| *w == pat).count();
        assert_eq!(escapes, 2);
    }

    #[test]
    fn test_ensure_reset_truncates_trailing_garbage() {
        let mut buf = b"abc\x1b[0mgarbage".to_vec();
        ensure_reset_tail(&mut buf);
        assert_eq!(buf, b"abc\x1b[0m");
    }

    #[test]
    fn test_ensure_reset_leaves_resetless_buffer() {
        let mut buf = b"no escapes here".to_vec();
        ensure_reset_tail(&mut buf);
        assert_eq!(buf, b"no escapes here");
    }

    #[test]
    fn test_ansi256_gray_axis() {
        // Pure grays land on the grayscale ramp, not the color cube.
        let code = nearest_ansi256(128, 128, 128);
        assert!(code >= 232, "mid gray should use the gray ramp, got {code}");
    }

    #[test]
    fn test_palette_glyph_extremes() {
        let palette = Palette::from_ramp(" .x@").unwrap();
        assert_eq!(palette.glyph_for(0), ' ');
        assert_eq!(palette.glyph_for(255), '@');
    }

    #[test]
    fn test_empty_ramp_rejected() {
        assert!(Palette::from_ramp("").is_err());
    }
}
