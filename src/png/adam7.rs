//! Adam7 interlace pass geometry.
//!
//! The seven passes each sample the image on an 8x8 lattice:
//!
//! ```text
//! 1 6 4 6 2 6 4 6
//! 7 7 7 7 7 7 7 7
//! 5 6 5 6 5 6 5 6
//! 7 7 7 7 7 7 7 7
//! 3 6 4 6 3 6 4 6
//! 7 7 7 7 7 7 7 7
//! 5 6 5 6 5 6 5 6
//! 7 7 7 7 7 7 7 7
//! ```
//!
//! The count tables say how many samples a pass takes from each full
//! 8-pixel block per axis; the "left" tables say how many it takes from
//! a trailing partial block of a given size.

/// Samples per full 8-wide block, per pass.
const X_COUNT: [u32; 7] = [1, 1, 2, 2, 4, 4, 8];
/// Samples per full 8-tall block, per pass.
const Y_COUNT: [u32; 7] = [1, 1, 1, 2, 2, 4, 4];
/// First sampled column within a block, per pass.
const X_OFFSET: [u32; 7] = [0, 4, 0, 2, 0, 1, 0];
/// First sampled row within a block, per pass.
const Y_OFFSET: [u32; 7] = [0, 0, 4, 0, 2, 0, 1];

/// Samples taken from a trailing partial block `1..=8` wide, per pass.
const X_LEFT: [[u32; 8]; 7] = [
  [1, 1, 1, 1, 1, 1, 1, 1],
  [0, 0, 0, 0, 1, 1, 1, 1],
  [1, 1, 1, 1, 2, 2, 2, 2],
  [0, 0, 1, 1, 1, 1, 2, 2],
  [1, 1, 2, 2, 3, 3, 4, 4],
  [0, 1, 1, 2, 2, 3, 3, 4],
  [1, 2, 3, 4, 5, 6, 7, 8],
];

/// Samples taken from a trailing partial block `1..=8` tall, per pass.
const Y_LEFT: [[u32; 8]; 7] = [
  [1, 1, 1, 1, 1, 1, 1, 1],
  [1, 1, 1, 1, 1, 1, 1, 1],
  [0, 0, 0, 0, 1, 1, 1, 1],
  [1, 1, 1, 1, 2, 2, 2, 2],
  [0, 0, 1, 1, 1, 1, 2, 2],
  [1, 1, 2, 2, 3, 3, 4, 4],
  [0, 1, 1, 2, 2, 3, 3, 4],
];

/// The dimensions of reduced image `pass` (0..7) for a full image of
/// `width` by `height`. Either dimension may come out zero, in which
/// case the pass contributes no scanlines at all.
#[inline]
#[must_use]
pub(crate) fn pass_size(pass: usize, width: u32, height: u32) -> (u32, u32) {
  let mut cols = (width / 8) * X_COUNT[pass];
  if width % 8 != 0 {
    cols += X_LEFT[pass][(width % 8 - 1) as usize];
  }
  let mut rows = (height / 8) * Y_COUNT[pass];
  if height % 8 != 0 {
    rows += Y_LEFT[pass][(height % 8 - 1) as usize];
  }
  (cols, rows)
}

/// Maps column `i` of a reduced scanline to a full-image x.
#[inline]
#[must_use]
pub(crate) fn pass_x(pass: usize, i: u32) -> u32 {
  X_OFFSET[pass] + i * (8 / X_COUNT[pass])
}

/// Maps row `i` of a reduced image to a full-image y.
#[inline]
#[must_use]
pub(crate) fn pass_y(pass: usize, i: u32) -> u32 {
  Y_OFFSET[pass] + i * (8 / Y_COUNT[pass])
}

#[test]
fn test_pass_sizes_cover_the_image_exactly() {
  for (w, h) in [(1, 1), (3, 5), (8, 8), (9, 7), (16, 17), (33, 1)] {
    let total: u64 = (0..7)
      .map(|p| {
        let (c, r) = pass_size(p, w, h);
        u64::from(c) * u64::from(r)
      })
      .sum();
    assert_eq!(total, u64::from(w) * u64::from(h), "size {w}x{h}");
  }
}

#[test]
fn test_pass_positions_tile_without_overlap() {
  let (w, h) = (13u32, 11u32);
  let mut seen = vec![false; (w * h) as usize];
  for pass in 0..7 {
    let (cols, rows) = pass_size(pass, w, h);
    for ry in 0..rows {
      for rx in 0..cols {
        let (x, y) = (pass_x(pass, rx), pass_y(pass, ry));
        assert!(x < w && y < h, "pass {pass} went out of bounds at ({x},{y})");
        let i = (y * w + x) as usize;
        assert!(!seen[i], "pixel ({x},{y}) produced twice");
        seen[i] = true;
      }
    }
  }
  assert!(seen.iter().all(|&s| s));
}

#[test]
fn test_eight_by_eight_reference_sizes() {
  let expected = [(1, 1), (1, 1), (2, 1), (2, 2), (4, 2), (4, 4), (8, 4)];
  for (pass, want) in expected.iter().enumerate() {
    assert_eq!(pass_size(pass, 8, 8), *want);
  }
}
