//! Stream geometry
//!
//! Eye identity, streaming resolution and the normalised viewport rectangles
//! used to tile several capture sources onto one render surface.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Edge length in pixels of the square tiles used for macroblock priorities.
pub const MACROBLOCK_SIZE: u32 = 16;

/// Which half of a stereo pair a video sender feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl fmt::Display for Eye {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eye::Left => f.write_str("left"),
            Eye::Right => f.write_str("right"),
        }
    }
}

/// Pixel dimensions of an encoded video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StreamingSize {
    pub width: u32,
    pub height: u32,
}

impl StreamingSize {
    pub const fn new(width: u32, height: u32) -> StreamingSize {
        StreamingSize { width, height }
    }

    /// A size with a zero dimension cannot back a render surface.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of whole 16x16 macroblocks covering the frame. Partial tiles at
    /// the right and bottom edges are not counted.
    pub fn macroblock_count(&self) -> usize {
        let columns = (self.width / MACROBLOCK_SIZE) as usize;
        let rows = (self.height / MACROBLOCK_SIZE) as usize;
        columns * rows
    }
}

impl fmt::Display for StreamingSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A rectangle in normalised surface coordinates, `[x_min, x_max) x [y_min, y_max)`.
///
/// Stored by its edges rather than origin and extent so that neighbouring
/// tiles share the exact same boundary value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Viewport {
    pub const FULL: Viewport = Viewport {
        x_min: 0.0,
        x_max: 1.0,
        y_min: 0.0,
        y_max: 1.0,
    };

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Whether the interiors of the two rectangles intersect. Shared edges do
    /// not count as overlap.
    pub fn overlaps(&self, other: &Viewport) -> bool {
        self.x_min < other.x_max
            && other.x_min < self.x_max
            && self.y_min < other.y_max
            && other.y_min < self.y_max
    }
}

/// Split the unit square into `count` equal-width, full-height columns,
/// ordered left to right. Column `i` spans `[i/count, (i+1)/count)`.
pub fn tile_horizontally(count: usize) -> Vec<Viewport> {
    let edge = |i: usize| i as f64 / count as f64;

    (0..count)
        .map(|i| Viewport {
            x_min: edge(i),
            x_max: if i + 1 == count { 1.0 } else { edge(i + 1) },
            y_min: 0.0,
            y_max: 1.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_source_covers_full_surface() {
        assert_eq!(tile_horizontally(1), vec![Viewport::FULL]);
    }

    #[test]
    fn four_sources_get_equal_quarters() {
        let tiles = tile_horizontally(4);
        let starts: Vec<f64> = tiles.iter().map(|t| t.x_min).collect();
        assert_eq!(starts, vec![0.0, 0.25, 0.5, 0.75]);
        assert!(tiles.iter().all(|t| t.width() == 0.25 && t.height() == 1.0));
    }

    #[test]
    fn tiles_abut_without_overlap() {
        for count in 1..=7 {
            let tiles = tile_horizontally(count);
            assert_eq!(tiles.len(), count);
            assert_eq!(tiles[0].x_min, 0.0);
            assert_eq!(tiles[count - 1].x_max, 1.0);

            for pair in tiles.windows(2) {
                assert_eq!(pair[0].x_max, pair[1].x_min);
                assert!(!pair[0].overlaps(&pair[1]));
            }

            let total: f64 = tiles.iter().map(Viewport::width).sum();
            assert!((total - 1.0).abs() < 1e-12, "widths for {count} sum to {total}");
        }
    }

    #[test]
    fn macroblocks_ignore_partial_tiles() {
        assert_eq!(StreamingSize::new(1920, 1080).macroblock_count(), 120 * 67);
        assert_eq!(StreamingSize::new(15, 1080).macroblock_count(), 0);
        assert_eq!(StreamingSize::new(32, 32).macroblock_count(), 4);
    }
}
