//! The image header chunk and the pixel-format facts derived from it.

use super::{PngError, PngResult};

/// The five colour layouts PNG data can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ColorType {
  /// Greyscale.
  Gray = 0,
  /// Red, green, blue.
  Rgb = 2,
  /// Index into a palette of RGB entries.
  Indexed = 3,
  /// Greyscale plus alpha.
  GrayAlpha = 4,
  /// Red, green, blue, alpha.
  Rgba = 6,
}
impl ColorType {
  /// Channels per pixel for this layout.
  #[inline]
  #[must_use]
  pub const fn channel_count(self) -> usize {
    match self {
      Self::Gray | Self::Indexed => 1,
      Self::GrayAlpha => 2,
      Self::Rgb => 3,
      Self::Rgba => 4,
    }
  }
}
impl TryFrom<u8> for ColorType {
  type Error = PngError;
  #[inline]
  fn try_from(value: u8) -> PngResult<Self> {
    Ok(match value {
      0 => ColorType::Gray,
      2 => ColorType::Rgb,
      3 => ColorType::Indexed,
      4 => ColorType::GrayAlpha,
      6 => ColorType::Rgba,
      _ => return Err(PngError::BadHeader),
    })
  }
}

/// A parsed IHDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ihdr {
  pub width: u32,
  pub height: u32,
  /// Bits per channel in the source data stream.
  pub bit_depth: u8,
  pub color_type: ColorType,
  pub interlaced: bool,
}

impl Ihdr {
  /// Parses the 13 payload bytes of an IHDR chunk.
  pub fn parse(data: &[u8]) -> PngResult<Self> {
    let [w0, w1, w2, w3, h0, h1, h2, h3, bit_depth, color_type, compression, filter, interlace] =
      data
    else {
      return Err(PngError::BadHeader);
    };
    let width = u32::from_be_bytes([*w0, *w1, *w2, *w3]);
    let height = u32::from_be_bytes([*h0, *h1, *h2, *h3]);
    if width == 0 || height == 0 {
      return Err(PngError::BadHeader);
    }
    // only compression method 0 (deflate) and filter method 0 exist
    if *compression != 0 || *filter != 0 {
      return Err(PngError::BadHeader);
    }
    let color_type = ColorType::try_from(*color_type)?;
    let depth_ok = match color_type {
      ColorType::Gray => matches!(*bit_depth, 1 | 2 | 4 | 8 | 16),
      ColorType::Indexed => matches!(*bit_depth, 1 | 2 | 4 | 8),
      ColorType::Rgb | ColorType::GrayAlpha | ColorType::Rgba => matches!(*bit_depth, 8 | 16),
    };
    if !depth_ok {
      return Err(PngError::BadHeader);
    }
    let interlaced = match interlace {
      0 => false,
      1 => true,
      _ => return Err(PngError::BadHeader),
    };
    Ok(Self { width, height, bit_depth: *bit_depth, color_type, interlaced })
  }

  /// The 13 payload bytes of an IHDR chunk.
  #[must_use]
  pub fn to_bytes(&self) -> [u8; 13] {
    let w = self.width.to_be_bytes();
    let h = self.height.to_be_bytes();
    [
      w[0],
      w[1],
      w[2],
      w[3],
      h[0],
      h[1],
      h[2],
      h[3],
      self.bit_depth,
      self.color_type as u8,
      0,
      0,
      u8::from(self.interlaced),
    ]
  }

  /// Bits per pixel in the data stream.
  #[inline]
  #[must_use]
  pub const fn bits_per_pixel(&self) -> usize {
    self.color_type.channel_count() * self.bit_depth as usize
  }

  /// Bytes in one scanline of `width` pixels, excluding the filter byte.
  /// Sub-byte depths round up to whole bytes at the line's end.
  #[inline]
  #[must_use]
  pub const fn bytes_per_scanline(&self, width: u32) -> usize {
    (self.bits_per_pixel() * width as usize + 7) / 8
  }

  /// How many bytes back a filter's `a`/`c` neighbours sit: whole bytes
  /// per pixel, or one byte when several pixels share a byte.
  #[inline]
  #[must_use]
  pub const fn filter_step(&self) -> usize {
    let bpp = self.bits_per_pixel();
    if bpp <= 8 {
      1
    } else {
      (bpp + 7) / 8
    }
  }
}

#[test]
fn test_ihdr_round_trips() {
  let ihdr = Ihdr {
    width: 640,
    height: 480,
    bit_depth: 8,
    color_type: ColorType::Rgba,
    interlaced: false,
  };
  assert_eq!(Ihdr::parse(&ihdr.to_bytes()).unwrap(), ihdr);
}

#[test]
fn test_ihdr_rejects_bad_combinations() {
  let mut bytes =
    Ihdr { width: 1, height: 1, bit_depth: 8, color_type: ColorType::Rgb, interlaced: false }
      .to_bytes();
  // indexed color with 16-bit depth doesn't exist
  bytes[8] = 16;
  bytes[9] = 3;
  assert!(Ihdr::parse(&bytes).is_err());
  // zero width
  let bytes =
    Ihdr { width: 0, height: 1, bit_depth: 8, color_type: ColorType::Rgb, interlaced: false }
      .to_bytes();
  assert!(Ihdr::parse(&bytes).is_err());
}

#[test]
fn test_scanline_geometry() {
  let ihdr =
    Ihdr { width: 5, height: 1, bit_depth: 4, color_type: ColorType::Indexed, interlaced: false };
  // 5 pixels at 4 bits each is 20 bits, so 3 bytes
  assert_eq!(ihdr.bytes_per_scanline(5), 3);
  assert_eq!(ihdr.filter_step(), 1);

  let ihdr =
    Ihdr { width: 2, height: 1, bit_depth: 16, color_type: ColorType::Rgb, interlaced: false };
  assert_eq!(ihdr.bytes_per_scanline(2), 12);
  assert_eq!(ihdr.filter_step(), 6);
}
