//! Scanline filtering and reconstruction.
//!
//! Filtering is byte-wise: each byte refers to the byte `step` back in
//! the same line (`a`), the byte above (`b`), and the byte above-and-back
//! (`c`), where `step` is whole bytes per pixel, or 1 when several pixels
//! pack into one byte.

use super::{PngError, PngResult};

pub(crate) const FILTER_NONE: u8 = 0;
pub(crate) const FILTER_SUB: u8 = 1;
pub(crate) const FILTER_UP: u8 = 2;
pub(crate) const FILTER_AVG: u8 = 3;
pub(crate) const FILTER_PAETH: u8 = 4;

/// The Paeth predictor: whichever of `a`, `b`, `c` is nearest to
/// `a + b - c`, ties resolved to `a` then `b`. The order of the tests is
/// part of the format; don't rearrange them.
#[inline]
#[must_use]
pub(crate) const fn paeth_predict(a: u8, b: u8, c: u8) -> u8 {
  let p = a as i32 + b as i32 - c as i32;
  let pa = (p - a as i32).abs();
  let pb = (p - b as i32).abs();
  let pc = (p - c as i32).abs();
  if pa <= pb && pa <= pc {
    a
  } else if pb <= pc {
    b
  } else {
    c
  }
}

/// Reconstructs one filtered line in place. `prev` is the reconstructed
/// line above, all zeros for the first line of an image or reduced pass.
pub(crate) fn defilter_line(
  filter: u8, line: &mut [u8], prev: &[u8], step: usize,
) -> PngResult<()> {
  debug_assert_eq!(line.len(), prev.len());
  match filter {
    FILTER_NONE => (),
    FILTER_SUB => {
      for i in step..line.len() {
        line[i] = line[i].wrapping_add(line[i - step]);
      }
    }
    FILTER_UP => {
      for i in 0..line.len() {
        line[i] = line[i].wrapping_add(prev[i]);
      }
    }
    FILTER_AVG => {
      for i in 0..step.min(line.len()) {
        line[i] = line[i].wrapping_add(prev[i] >> 1);
      }
      for i in step..line.len() {
        let avg = (u16::from(line[i - step]) + u16::from(prev[i])) >> 1;
        line[i] = line[i].wrapping_add(avg as u8);
      }
    }
    FILTER_PAETH => {
      for i in 0..step.min(line.len()) {
        line[i] = line[i].wrapping_add(paeth_predict(0, prev[i], 0));
      }
      for i in step..line.len() {
        line[i] = line[i].wrapping_add(paeth_predict(line[i - step], prev[i], prev[i - step]));
      }
    }
    _ => return Err(PngError::BadFilterType),
  }
  Ok(())
}

/// Sub-filters one line into `out` (filter byte not included).
pub(crate) fn filter_sub(line: &[u8], step: usize, out: &mut Vec<u8>) {
  for i in 0..step.min(line.len()) {
    out.push(line[i]);
  }
  for i in step..line.len() {
    out.push(line[i].wrapping_sub(line[i - step]));
  }
}

/// Average-filters one line against the line above into `out`.
pub(crate) fn filter_average(line: &[u8], prev: &[u8], step: usize, out: &mut Vec<u8>) {
  debug_assert_eq!(line.len(), prev.len());
  for i in 0..step.min(line.len()) {
    out.push(line[i].wrapping_sub(prev[i] >> 1));
  }
  for i in step..line.len() {
    let avg = (u16::from(line[i - step]) + u16::from(prev[i])) >> 1;
    out.push(line[i].wrapping_sub(avg as u8));
  }
}

#[test]
fn test_paeth_tie_order() {
  // all equal distances: a wins
  assert_eq!(paeth_predict(1, 1, 1), 1);
  // b beats c on the tie
  assert_eq!(paeth_predict(0, 5, 5), 5);
  assert_eq!(paeth_predict(9, 2, 3), 9);
}

#[test]
fn test_sub_round_trips() {
  let line = [10u8, 30, 20, 250, 5, 17];
  let mut filtered = Vec::new();
  filter_sub(&line, 3, &mut filtered);
  let prev = [0u8; 6];
  defilter_line(FILTER_SUB, &mut filtered, &prev, 3).unwrap();
  assert_eq!(&filtered, &line);
}

#[test]
fn test_average_round_trips() {
  let prev = [7u8, 200, 13, 90, 255, 0];
  let line = [10u8, 30, 20, 250, 5, 17];
  let mut filtered = Vec::new();
  filter_average(&line, &prev, 2, &mut filtered);
  defilter_line(FILTER_AVG, &mut filtered, &prev, 2).unwrap();
  assert_eq!(&filtered, &line);
}

#[test]
fn test_up_and_paeth_reconstruct() {
  let prev = [1u8, 2, 3, 4];
  let mut line = [10u8, 20, 30, 40];
  defilter_line(FILTER_UP, &mut line, &prev, 1).unwrap();
  assert_eq!(line, [11, 22, 33, 44]);

  // paeth on the first line degenerates to sub
  let zeros = [0u8; 4];
  let mut line = [1u8, 1, 1, 1];
  defilter_line(FILTER_PAETH, &mut line, &zeros, 1).unwrap();
  assert_eq!(line, [1, 2, 3, 4]);
}

#[test]
fn test_unknown_filter_type_is_an_error() {
  let prev = [0u8; 2];
  let mut line = [0u8; 2];
  assert!(defilter_line(9, &mut line, &prev, 1).is_err());
}
