// Font atlas construction
//
// A TTF buffer goes in, a single-channel atlas plus a per-codepoint
// glyph table comes out. The atlas is immutable once built; text
// layout only ever reads the glyph table. Rasterization rides
// freetype, layout is plain advance arithmetic.

extern crate freetype as ft;

use utils::{anyhow, log, Context, Result};

use std::collections::HashMap;

/// Atlas dimensions. Fixed size; ranges that do not fit are dropped
/// with a logged error.
pub const ATLAS_SIZE: u32 = 1024;

/// Codepoint ranges always baked in: printable ASCII and Cyrillic
const DEFAULT_RANGES: [(u32, u32); 2] = [(32, 126), (0x0400, 0x04FF)];

/// Per-codepoint layout record
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Glyph {
    /// Atlas UV rectangle
    pub uv0: (f32, f32),
    pub uv1: (f32, f32),
    /// Pixel box offset from the pen position. The y offset is
    /// relative to the baseline, negative above it.
    pub offset: (f32, f32),
    /// Pixel box size
    pub size: (f32, f32),
    /// Horizontal pen advance in pixels
    pub advance: f32,
}

pub struct FontAtlas {
    width: u32,
    height: u32,
    /// R8 greyscale coverage
    pixels: Vec<u8>,
    /// Scaled ascent/descent in pixels
    ascent: f32,
    descent: f32,
    /// The pixel height the face was rasterized at
    pixel_height: f32,
    glyphs: HashMap<char, Glyph>,
}

impl FontAtlas {
    /// Rasterize `ttf` at `pixel_height` into a fresh atlas covering
    /// the default ranges plus `extra_ranges`.
    pub fn new(ttf: &[u8], pixel_height: u32, extra_ranges: &[(u32, u32)]) -> Result<Self> {
        let library = ft::Library::init().context("Initializing freetype")?;
        let face = library
            .new_memory_face(ttf.to_vec(), 0)
            .context("Parsing font face")?;
        face.set_pixel_sizes(0, pixel_height)
            .context("Setting font pixel size")?;

        let metrics = face
            .size_metrics()
            .ok_or(anyhow!("Font face has no size metrics"))?;
        let ascent = (metrics.ascender >> 6) as f32;
        let descent = (metrics.descender >> 6) as f32;

        let mut atlas = Self {
            width: ATLAS_SIZE,
            height: ATLAS_SIZE,
            pixels: vec![0u8; (ATLAS_SIZE * ATLAS_SIZE) as usize],
            ascent: ascent,
            descent: descent,
            pixel_height: pixel_height as f32,
            glyphs: HashMap::new(),
        };

        // simple shelf packer, one pixel of padding per glyph
        let mut pen_x: u32 = 0;
        let mut pen_y: u32 = 0;
        let mut row_h: u32 = 0;

        let mut ranges: Vec<(u32, u32)> = DEFAULT_RANGES.to_vec();
        ranges.extend_from_slice(extra_ranges);

        'ranges: for (start, end) in ranges.iter() {
            for codepoint in *start..=*end {
                let ch = match std::char::from_u32(codepoint) {
                    Some(c) => c,
                    None => continue,
                };
                if face.get_char_index(codepoint as usize) == 0 {
                    continue;
                }
                if face
                    .load_char(codepoint as usize, ft::face::LoadFlag::RENDER)
                    .is_err()
                {
                    continue;
                }

                let slot = face.glyph();
                let bitmap = slot.bitmap();
                let (gw, gh) = (bitmap.width() as u32, bitmap.rows() as u32);

                if pen_x + gw >= atlas.width {
                    pen_x = 0;
                    pen_y += row_h + 1;
                    row_h = 0;
                }
                if pen_y + gh >= atlas.height {
                    log::error!("Font atlas full, dropping remaining ranges");
                    break 'ranges;
                }

                let buffer = bitmap.buffer();
                for y in 0..gh {
                    for x in 0..gw {
                        let src = (y * gw + x) as usize;
                        let dst = ((pen_y + y) * atlas.width + pen_x + x) as usize;
                        atlas.pixels[dst] = buffer[src];
                    }
                }

                atlas.glyphs.insert(
                    ch,
                    Glyph {
                        uv0: (
                            pen_x as f32 / atlas.width as f32,
                            pen_y as f32 / atlas.height as f32,
                        ),
                        uv1: (
                            (pen_x + gw) as f32 / atlas.width as f32,
                            (pen_y + gh) as f32 / atlas.height as f32,
                        ),
                        offset: (slot.bitmap_left() as f32, -(slot.bitmap_top() as f32)),
                        size: (gw as f32, gh as f32),
                        advance: (slot.advance().x >> 6) as f32,
                    },
                );

                pen_x += gw + 1;
                row_h = utils::partial_max(row_h, gh);
            }
        }

        Ok(atlas)
    }

    /// Wrap an atlas that was rasterized elsewhere
    pub fn from_raw(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        ascent: f32,
        descent: f32,
        pixel_height: f32,
        glyphs: HashMap<char, Glyph>,
    ) -> Self {
        assert_eq!(pixels.len(), (width * height) as usize);
        Self {
            width: width,
            height: height,
            pixels: pixels,
            ascent: ascent,
            descent: descent,
            pixel_height: pixel_height,
            glyphs: glyphs,
        }
    }

    /// Look up a codepoint, falling back to '?' for anything the
    /// atlas does not cover.
    pub fn glyph(&self, ch: char) -> Option<&Glyph> {
        self.glyphs.get(&ch).or_else(|| self.glyphs.get(&'?'))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn ascent(&self) -> f32 {
        self.ascent
    }

    pub fn descent(&self) -> f32 {
        self.descent
    }

    pub fn pixel_height(&self) -> f32 {
        self.pixel_height
    }

    pub fn glyph_count(&self) -> usize {
        self.glyphs.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A tiny synthetic atlas with fixed-advance glyphs, enough for
    /// exercising text layout without rasterizing anything.
    pub fn test_atlas() -> FontAtlas {
        let mut glyphs = HashMap::new();
        for ch in " ?abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789".chars() {
            glyphs.insert(
                ch,
                Glyph {
                    uv0: (0.0, 0.0),
                    uv1: (0.5, 0.5),
                    offset: (1.0, -8.0),
                    size: (6.0, 8.0),
                    advance: 8.0,
                },
            );
        }
        FontAtlas::from_raw(vec![0u8; 64 * 64], 64, 64, 10.0, -2.0, 12.0, glyphs)
    }

    #[test]
    fn unknown_codepoints_fall_back_to_question_mark() {
        let atlas = test_atlas();
        let question = *atlas.glyph('?').unwrap();
        // the synthetic atlas has no '§'
        assert_eq!(*atlas.glyph('§').unwrap(), question);
    }

    #[test]
    fn known_codepoints_resolve_directly() {
        let atlas = test_atlas();
        assert!(atlas.glyph('a').is_some());
    }

    #[test]
    fn raw_atlas_checks_pixel_size() {
        let atlas = FontAtlas::from_raw(vec![0u8; 16], 4, 4, 3.0, -1.0, 4.0, HashMap::new());
        assert_eq!(atlas.width(), 4);
        assert_eq!(atlas.pixels().len(), 16);
    }
}
