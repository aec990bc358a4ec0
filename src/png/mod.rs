//! Reading and writing Portable Network Graphics data.
//!
//! Decoding takes the whole PNG byte stream at once and produces a
//! [`Png`]: header facts, palette, transparency and gamma info, plus a
//! [`PixelGrid`] of pixels in a normalised layout (see [`PixelFormat`]
//! for what survives as-is and what gets narrowed). Interlaced sources
//! are de-interlaced during the load; the pixels come out the same as
//! from a progressive file.
//!
//! Encoding always writes progressive (non-interlaced) output, one IDAT
//! chunk, with the simple filter policy of this family of tools: `Sub`
//! on packed or single-byte rows, `Sub` for the first row and `Average`
//! for the rest on multi-byte pixels.
//!
//! ```
//! use squish::png::{Png, PixelFormat, PixelGrid};
//! let mut grid = PixelGrid::new(2, 2, PixelFormat::Rgba, 8);
//! grid.set_pixel(0, 0, &[255, 0, 0, 255]);
//! let bytes = Png::from_grid(grid).encode().unwrap();
//! let back = Png::decode(&bytes).unwrap();
//! assert_eq!(back.grid.pixel(0, 0), &[255, 0, 0, 255]);
//! ```
//!
//! By default decoding is lenient the way long-deployed image pipelines
//! end up being: once the image data has been seen, a checksum mismatch
//! in the remaining chunks keeps the pixels already decoded instead of
//! failing the whole image. [`DecodeConfig::strict`] turns every
//! mismatch into an error.

use crate::{
  util::{u16_be, u32_be},
  zlib::{CompLevel, Compressor, Decompressor, ZlibError},
  ErrorKind,
};

mod adam7;
mod chunk;
mod crc32;
mod filters;
mod grid;
mod ihdr;

pub use chunk::ChunkType;
pub use grid::{PixelFormat, PixelGrid};
pub use ihdr::{ColorType, Ihdr};

use chunk::{write_chunk, ChunkReader};
use filters::{defilter_line, filter_average, filter_sub, FILTER_AVG, FILTER_SUB};
use pixel_formats::{r8g8b8_Unorm, r8g8b8a8_Unorm};

pub type PngResult<T> = Result<T, PngError>;

/// The eight bytes every PNG datastream starts with.
pub const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// An error from the PNG codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PngError {
  /// The data doesn't start with the PNG signature.
  NoSignature,
  /// The data ran out where the format promised more.
  UnexpectedEndOfInput,
  /// Some chunk other than IHDR came first.
  FirstChunkNotIhdr,
  /// The IHDR payload is malformed (size, depth/colour combination,
  /// compression or filter method, interlace type).
  BadHeader,
  /// A chunk's CRC-32 didn't match its contents.
  BadCrc,
  /// A PLTE payload that isn't a whole number of RGB triples, or has
  /// more than 256 of them.
  BadPalette,
  /// An indexed image was encoded without any palette to index.
  MissingPalette,
  /// A chunk arrived somewhere the ordering rules forbid.
  BadChunkOrder,
  /// A tRNS payload too short for the image's colour type.
  BadTransparency,
  /// No IDAT chunk before IEND.
  NoImageData,
  /// IDAT chunks with something else between them.
  SplitImageData,
  /// The decompressed image data isn't the size the header implies.
  WrongDataSize,
  /// A scanline named a filter type that doesn't exist.
  BadFilterType,
  /// The deflate stream inside the IDAT data failed.
  Zlib(ZlibError),
}
impl From<ZlibError> for PngError {
  #[inline]
  fn from(e: ZlibError) -> Self {
    PngError::Zlib(e)
  }
}
impl PngError {
  /// The broad category this error belongs to.
  #[inline]
  #[must_use]
  pub const fn kind(self) -> ErrorKind {
    match self {
      PngError::UnexpectedEndOfInput => ErrorKind::Resource,
      PngError::BadCrc => ErrorKind::Integrity,
      PngError::MissingPalette => ErrorKind::Caller,
      PngError::Zlib(e) => e.kind(),
      _ => ErrorKind::Format,
    }
  }

  /// A stable integer identifier for this error.
  #[inline]
  #[must_use]
  pub const fn id(self) -> u16 {
    match self {
      PngError::NoSignature => 1,
      PngError::UnexpectedEndOfInput => 2,
      PngError::FirstChunkNotIhdr => 3,
      PngError::BadHeader => 4,
      PngError::BadCrc => 5,
      PngError::BadPalette => 6,
      PngError::MissingPalette => 7,
      PngError::BadChunkOrder => 8,
      PngError::BadTransparency => 9,
      PngError::NoImageData => 10,
      PngError::SplitImageData => 11,
      PngError::WrongDataSize => 12,
      PngError::BadFilterType => 13,
      PngError::Zlib(e) => 100 + e.id(),
    }
  }
}
impl core::fmt::Display for PngError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    let msg = match self {
      PngError::NoSignature => "not a png datastream",
      PngError::UnexpectedEndOfInput => "data ended mid-chunk",
      PngError::FirstChunkNotIhdr => "first chunk is not IHDR",
      PngError::BadHeader => "malformed IHDR",
      PngError::BadCrc => "chunk crc mismatch",
      PngError::BadPalette => "malformed PLTE",
      PngError::MissingPalette => "indexed image with no palette",
      PngError::BadChunkOrder => "chunk out of order",
      PngError::BadTransparency => "malformed tRNS",
      PngError::NoImageData => "no IDAT chunks",
      PngError::SplitImageData => "IDAT chunks are not contiguous",
      PngError::WrongDataSize => "image data has the wrong size",
      PngError::BadFilterType => "unknown scanline filter",
      PngError::Zlib(e) => return write!(f, "png error {}: {e}", self.id()),
    };
    write!(f, "png error {}: {}", self.id(), msg)
  }
}
impl std::error::Error for PngError {}

/// Knobs for [`Png::decode_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeConfig {
  /// Fail on any CRC mismatch instead of salvaging pixels already
  /// decoded. Off by default.
  pub strict: bool,
}

/// A background colour from a bKGD chunk, in whatever terms the image's
/// colour type uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
  /// An index into the palette.
  Palette(u8),
  /// An RGB colour, narrowed to 8 bits per channel.
  Rgb(u8, u8, u8),
  /// A grey level at the source depth.
  Gray(u16),
}

/// Header-level facts, available without decoding pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Info {
  pub width: u32,
  pub height: u32,
  pub color_type: ColorType,
  pub bit_depth: u8,
  pub interlaced: bool,
  /// Transparency colour from a `cdBC` chunk, if one appears before the
  /// image data.
  pub trans_color: Option<u32>,
}

/// A decoded (or to-be-encoded) PNG image.
#[derive(Debug, Clone)]
pub struct Png {
  /// The pixels, in the normalised layout.
  pub grid: PixelGrid,
  /// RGB palette entries, for indexed images.
  pub palette: Vec<r8g8b8_Unorm>,
  /// Per-palette-entry alpha from tRNS; shorter than the palette means
  /// the remaining entries are opaque.
  pub palette_alphas: Vec<u8>,
  /// Gamma as an exponent (2.2 when the file said nothing).
  pub gamma: f64,
  /// Background colour from bKGD, if any.
  pub background: Option<Background>,
  /// A single transparency colour, packed 0x00RRGGBB (or replicated
  /// grey), from tRNS or the private `cdBC` chunk.
  pub trans_color: Option<u32>,
  /// Whether the source data was interlaced. Encoding always writes
  /// progressive output regardless.
  pub source_interlaced: bool,
}

#[inline]
#[must_use]
const fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
  ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

impl Png {
  /// Wraps a pixel grid with default metadata, ready to encode.
  #[must_use]
  pub fn from_grid(grid: PixelGrid) -> Self {
    Self {
      grid,
      palette: Vec::new(),
      palette_alphas: Vec::new(),
      gamma: 2.2,
      background: None,
      trans_color: None,
      source_interlaced: false,
    }
  }

  /// Decodes a PNG with the default (lenient) configuration.
  pub fn decode(bytes: &[u8]) -> PngResult<Self> {
    Self::decode_with(bytes, DecodeConfig::default())
  }

  /// Reads the header and pre-data chunks without touching the pixels.
  pub fn read_info(bytes: &[u8]) -> PngResult<Info> {
    let rest = strip_signature(bytes)?;
    let mut reader = ChunkReader::new(rest);
    let first = reader.next_chunk()?.ok_or(PngError::UnexpectedEndOfInput)?;
    if first.ty != ChunkType::IHDR {
      return Err(PngError::FirstChunkNotIhdr);
    }
    let ihdr = Ihdr::parse(first.data)?;
    let mut trans_color = None;
    while let Some(chunk) = reader.next_chunk()? {
      match chunk.ty {
        ChunkType::IDAT | ChunkType::IEND => break,
        ChunkType::cdBC if chunk.data.len() == 4 => {
          trans_color = Some(u32_be(chunk.data));
          break;
        }
        _ => (),
      }
    }
    Ok(Info {
      width: ihdr.width,
      height: ihdr.height,
      color_type: ihdr.color_type,
      bit_depth: ihdr.bit_depth,
      interlaced: ihdr.interlaced,
      trans_color,
    })
  }

  /// Decodes a PNG.
  pub fn decode_with(bytes: &[u8], cfg: DecodeConfig) -> PngResult<Self> {
    let rest = strip_signature(bytes)?;
    let mut reader = ChunkReader::new(rest);

    let first = reader.next_chunk()?.ok_or(PngError::UnexpectedEndOfInput)?;
    if first.ty != ChunkType::IHDR {
      return Err(PngError::FirstChunkNotIhdr);
    }
    if !first.crc_ok {
      return Err(PngError::BadCrc);
    }
    let ihdr = Ihdr::parse(first.data)?;
    trace!("decoding {}x{} {:?}/{}", ihdr.width, ihdr.height, ihdr.color_type, ihdr.bit_depth);

    let (grid_format, grid_depth) = grid_layout(&ihdr);
    let mut png = Self::from_grid(PixelGrid::new(ihdr.width, ihdr.height, grid_format, grid_depth));
    png.source_interlaced = ihdr.interlaced;

    let mut idat_slices: Vec<&[u8]> = Vec::new();
    let mut idat_done = false;
    let mut truncated = false;

    loop {
      let chunk = match reader.next_chunk() {
        Ok(Some(chunk)) => chunk,
        Ok(None) => break,
        Err(e) => {
          if cfg.strict || idat_slices.is_empty() {
            return Err(e);
          }
          truncated = true;
          break;
        }
      };
      if !chunk.crc_ok {
        if !cfg.strict && !idat_slices.is_empty() {
          // data is in hand, salvage it
          truncated = true;
          break;
        }
        return Err(PngError::BadCrc);
      }

      match chunk.ty {
        ChunkType::IHDR => return Err(PngError::BadChunkOrder),
        ChunkType::PLTE => {
          if !idat_slices.is_empty() || !png.palette.is_empty() {
            return Err(PngError::BadChunkOrder);
          }
          png.palette = parse_palette(chunk.data)?;
        }
        ChunkType::tRNS | ChunkType::rRNS => {
          if !idat_slices.is_empty() {
            return Err(PngError::BadChunkOrder);
          }
          if ihdr.color_type == ColorType::Indexed && png.palette.is_empty() {
            return Err(PngError::BadChunkOrder);
          }
          png.parse_transparency(chunk.data, &ihdr)?;
        }
        ChunkType::gAMA => {
          if chunk.data.len() >= 4 {
            png.gamma = gamma_from_stored(u32_be(&chunk.data[..4]));
          }
        }
        ChunkType::bKGD => png.parse_background(chunk.data, &ihdr),
        ChunkType::cdBC => {
          // wrong-sized payloads are skipped, not fatal
          if chunk.data.len() == 4 {
            png.trans_color = Some(u32_be(chunk.data));
          }
        }
        ChunkType::IDAT => {
          if idat_done {
            return Err(PngError::SplitImageData);
          }
          idat_slices.push(chunk.data);
        }
        ChunkType::IEND => break,
        _ => (/* unknown chunk, CRC already checked, skip */),
      }
      if chunk.ty != ChunkType::IDAT && !idat_slices.is_empty() {
        idat_done = true;
      }
    }

    if idat_slices.is_empty() {
      return Err(PngError::NoImageData);
    }

    let expected = expected_filtered_size(&ihdr);
    let mut filtered = Vec::with_capacity(expected);
    let mut decomp = Decompressor::new();
    match decomp.decompress_chunks(idat_slices.iter().copied(), &mut filtered) {
      Ok(_) => (),
      Err(e) => {
        if cfg.strict || !truncated {
          return Err(e.into());
        }
        // keep whatever came out; the rest of the image stays zero
      }
    }
    if filtered.len() != expected {
      if !truncated {
        return Err(PngError::WrongDataSize);
      }
      filtered.resize(expected, 0);
    }

    png.load_pixels(&ihdr, &mut filtered)?;
    Ok(png)
  }

  /// Reconstructs every scanline and distributes the samples into the
  /// grid, de-interlacing as it goes.
  fn load_pixels(&mut self, ihdr: &Ihdr, filtered: &mut [u8]) -> PngResult<()> {
    let step = ihdr.filter_step();
    let mut pos = 0;

    if !ihdr.interlaced {
      let line_bytes = ihdr.bytes_per_scanline(ihdr.width);
      let mut prev = vec![0u8; line_bytes];
      for y in 0..ihdr.height {
        let filter = filtered[pos];
        pos += 1;
        let line = &mut filtered[pos..pos + line_bytes];
        pos += line_bytes;
        defilter_line(filter, line, &prev, step)?;
        self.load_scan_line(ihdr, line, y, None, ihdr.width);
        prev.copy_from_slice(line);
      }
    } else {
      for pass in 0..7 {
        let (cols, rows) = adam7::pass_size(pass, ihdr.width, ihdr.height);
        if cols == 0 || rows == 0 {
          continue;
        }
        let line_bytes = ihdr.bytes_per_scanline(cols);
        // filters reach back only within the pass
        let mut prev = vec![0u8; line_bytes];
        for ry in 0..rows {
          let filter = filtered[pos];
          pos += 1;
          let line = &mut filtered[pos..pos + line_bytes];
          pos += line_bytes;
          defilter_line(filter, line, &prev, step)?;
          self.load_scan_line(ihdr, line, ry, Some(pass), cols);
          prev.copy_from_slice(line);
        }
      }
    }
    Ok(())
  }

  /// Normalises one reconstructed scanline into the grid: sub-byte
  /// samples unpack, 16-bit colour narrows to its high bytes, 16-bit
  /// grey keeps both.
  fn load_scan_line(&mut self, ihdr: &Ihdr, line: &[u8], ry: u32, pass: Option<usize>, cols: u32) {
    for rx in 0..cols {
      let (x, y) = match pass {
        None => (rx, ry),
        Some(p) => (adam7::pass_x(p, rx), adam7::pass_y(p, ry)),
      };
      let rx = rx as usize;
      match (ihdr.color_type, ihdr.bit_depth) {
        (ColorType::Gray | ColorType::Indexed, depth @ (1 | 2 | 4)) => {
          let depth = usize::from(depth);
          let bit = rx * depth;
          let byte = line[bit / 8];
          let shift = 8 - depth - (bit % 8);
          let sample = (byte >> shift) & ((1 << depth) - 1);
          self.grid.set_pixel(x, y, &[sample]);
        }
        (ColorType::Gray | ColorType::Indexed, 8) => {
          self.grid.set_pixel(x, y, &[line[rx]]);
        }
        (ColorType::Gray, 16) => {
          self.grid.set_pixel(x, y, &[line[rx * 2], line[rx * 2 + 1]]);
        }
        (ColorType::GrayAlpha, 8) => {
          self.grid.set_pixel(x, y, &[line[rx * 2], line[rx * 2 + 1]]);
        }
        (ColorType::GrayAlpha, _) => {
          self.grid.set_pixel(x, y, &[line[rx * 4], line[rx * 4 + 2]]);
        }
        (ColorType::Rgb, 8) => {
          self.grid.set_pixel(x, y, &line[rx * 3..rx * 3 + 3]);
        }
        (ColorType::Rgb, _) => {
          self.grid.set_pixel(x, y, &[line[rx * 6], line[rx * 6 + 2], line[rx * 6 + 4]]);
        }
        (ColorType::Rgba, 8) => {
          self.grid.set_pixel(x, y, &line[rx * 4..rx * 4 + 4]);
        }
        (ColorType::Rgba, _) => {
          self.grid.set_pixel(
            x,
            y,
            &[line[rx * 8], line[rx * 8 + 2], line[rx * 8 + 4], line[rx * 8 + 6]],
          );
        }
        _ => unreachable!("depth/colour combinations are validated at parse"),
      }
    }
  }

  fn parse_transparency(&mut self, data: &[u8], ihdr: &Ihdr) -> PngResult<()> {
    match ihdr.color_type {
      ColorType::Indexed => {
        // entries beyond the palette are ignored
        let keep = data.len().min(self.palette.len());
        self.palette_alphas = data[..keep].to_vec();
      }
      ColorType::Rgb => {
        if data.len() < 6 {
          return Err(PngError::BadTransparency);
        }
        let narrow = |v: u16| if ihdr.bit_depth == 16 { (v >> 8) as u8 } else { v as u8 };
        let r = narrow(u16_be(&data[0..2]));
        let g = narrow(u16_be(&data[2..4]));
        let b = narrow(u16_be(&data[4..6]));
        self.trans_color = Some(pack_rgb(r, g, b));
      }
      ColorType::Gray => {
        if data.len() < 2 {
          return Err(PngError::BadTransparency);
        }
        let v = u16_be(&data[0..2]);
        let v = if ihdr.bit_depth == 16 { (v >> 8) as u8 } else { v as u8 };
        self.trans_color = Some(pack_rgb(v, v, v));
      }
      // tRNS is not legal alongside a real alpha channel, skip it
      ColorType::GrayAlpha | ColorType::Rgba => (),
    }
    Ok(())
  }

  fn parse_background(&mut self, data: &[u8], ihdr: &Ihdr) {
    self.background = match ihdr.color_type {
      ColorType::Indexed => data.first().map(|&i| Background::Palette(i)),
      ColorType::Rgb | ColorType::Rgba => {
        if data.len() >= 6 {
          Some(Background::Rgb(
            u16_be(&data[0..2]) as u8,
            u16_be(&data[2..4]) as u8,
            u16_be(&data[4..6]) as u8,
          ))
        } else {
          None
        }
      }
      ColorType::Gray | ColorType::GrayAlpha => {
        if data.len() >= 2 {
          Some(Background::Gray(u16_be(&data[0..2])))
        } else {
          None
        }
      }
    };
  }

  /// Encodes the image as a complete PNG byte stream.
  ///
  /// Output is always progressive; 16-bit grey narrows to 8 bits (take
  /// the high byte), everything else writes out at the depth held.
  pub fn encode(&self) -> PngResult<Vec<u8>> {
    let g = &self.grid;
    let (color_type, bit_depth) = match g.format() {
      PixelFormat::Indexed => (ColorType::Indexed, g.bit_depth()),
      PixelFormat::Gray => (ColorType::Gray, g.bit_depth()),
      PixelFormat::Gray16 => (ColorType::Gray, 8),
      PixelFormat::GrayAlpha => (ColorType::GrayAlpha, 8),
      PixelFormat::Rgb => (ColorType::Rgb, 8),
      PixelFormat::Rgba => (ColorType::Rgba, 8),
    };
    if color_type == ColorType::Indexed && self.palette.is_empty() {
      return Err(PngError::MissingPalette);
    }
    if g.width() == 0 || g.height() == 0 {
      return Err(PngError::BadHeader);
    }
    let ihdr =
      Ihdr { width: g.width(), height: g.height(), bit_depth, color_type, interlaced: false };

    let mut out = Vec::new();
    out.extend_from_slice(&PNG_SIGNATURE);
    write_chunk(&mut out, ChunkType::IHDR, &ihdr.to_bytes());

    // files store the reciprocal exponent, scaled by 1e5
    let gamma_stored = ((1.0 / self.gamma) * 100_000.0) as u32;
    write_chunk(&mut out, ChunkType::gAMA, &gamma_stored.to_be_bytes());

    if color_type == ColorType::Indexed {
      let mut payload = Vec::with_capacity(self.palette.len() * 3);
      for entry in self.palette.iter() {
        payload.extend_from_slice(&[entry.r, entry.g, entry.b]);
      }
      write_chunk(&mut out, ChunkType::PLTE, &payload);
    }

    if self.trans_color.is_some() {
      self.write_transparency(&mut out, color_type);
    }

    let filtered = self.filter_rows(&ihdr);
    let mut compressed = Vec::new();
    Compressor::new(CompLevel::L9).compress(&filtered, &mut compressed)?;
    write_chunk(&mut out, ChunkType::IDAT, &compressed);

    write_chunk(&mut out, ChunkType::IEND, &[]);
    Ok(out)
  }

  /// Writes the standard tRNS (where the colour type allows one) plus
  /// the private `cdBC` chunk carrying the packed colour.
  fn write_transparency(&self, out: &mut Vec<u8>, color_type: ColorType) {
    let tc = self.trans_color.unwrap();
    match color_type {
      ColorType::Indexed => {
        let r = (tc >> 16) as u8;
        let g = (tc >> 8) as u8;
        let b = tc as u8;
        if let Some(idx) =
          self.palette.iter().position(|p| p.r == r && p.g == g && p.b == b)
        {
          // opaque up to the transparent index, then one clear entry
          let mut payload = vec![0xFF; idx];
          payload.push(0x00);
          write_chunk(out, ChunkType::tRNS, &payload);
        }
      }
      ColorType::Rgb => {
        let mut payload = Vec::with_capacity(6);
        payload.extend_from_slice(&u16::from((tc >> 16) as u8).to_be_bytes());
        payload.extend_from_slice(&u16::from((tc >> 8) as u8).to_be_bytes());
        payload.extend_from_slice(&u16::from(tc as u8).to_be_bytes());
        write_chunk(out, ChunkType::tRNS, &payload);
      }
      ColorType::Gray => {
        write_chunk(out, ChunkType::tRNS, &u16::from(tc as u8).to_be_bytes());
      }
      // a real alpha channel leaves no place for tRNS
      ColorType::GrayAlpha | ColorType::Rgba => (),
    }
    write_chunk(out, ChunkType::cdBC, &tc.to_be_bytes());
  }

  /// Produces the filtered scanline stream that goes into the IDAT.
  fn filter_rows(&self, ihdr: &Ihdr) -> Vec<u8> {
    let g = &self.grid;
    let line_bytes = ihdr.bytes_per_scanline(ihdr.width);
    let mut out = Vec::with_capacity((line_bytes + 1) * ihdr.height as usize);

    if ihdr.bits_per_pixel() <= 8 {
      // single-byte (or packed) samples: Sub on every row
      let mut packed = Vec::with_capacity(line_bytes);
      for y in 0..ihdr.height {
        packed.clear();
        self.pack_row(ihdr, y, &mut packed);
        out.push(FILTER_SUB);
        filter_sub(&packed, 1, &mut out);
      }
    } else {
      // whole-byte pixels: Sub for the first row, Average after
      let step = ihdr.filter_step();
      for y in 0..ihdr.height {
        let row = g.row(y);
        if y == 0 {
          out.push(FILTER_SUB);
          filter_sub(row, step, &mut out);
        } else {
          out.push(FILTER_AVG);
          filter_average(row, g.row(y - 1), step, &mut out);
        }
      }
    }
    out
  }

  /// Packs one grid row to stream layout for depths of 8 bits per pixel
  /// or less (several samples per byte below 8).
  fn pack_row(&self, ihdr: &Ihdr, y: u32, out: &mut Vec<u8>) {
    let g = &self.grid;
    if g.format() == PixelFormat::Gray16 {
      // narrowing re-encode: high byte only
      for x in 0..g.width() {
        out.push(g.pixel(x, y)[0]);
      }
    } else if ihdr.bit_depth == 8 {
      out.extend_from_slice(g.row(y));
    } else {
      let depth = u32::from(ihdr.bit_depth);
      let mut acc = 0u8;
      let mut bits = 0u32;
      for x in 0..g.width() {
        acc = (acc << depth) | g.pixel(x, y)[0];
        bits += depth;
        if bits == 8 {
          out.push(acc);
          acc = 0;
          bits = 0;
        }
      }
      if bits != 0 {
        out.push(acc << (8 - bits));
      }
    }
  }

  /// Flattens the image to straight RGBA, applying the palette, the
  /// per-index alphas, and any single transparency colour. Sub-byte grey
  /// widens by bit replication.
  #[must_use]
  pub fn to_rgba(&self) -> Vec<r8g8b8a8_Unorm> {
    let g = &self.grid;
    let mut pixels = Vec::with_capacity(g.width() as usize * g.height() as usize);
    for y in 0..g.height() {
      for x in 0..g.width() {
        let p = g.pixel(x, y);
        let px = match g.format() {
          PixelFormat::Rgba => r8g8b8a8_Unorm { r: p[0], g: p[1], b: p[2], a: p[3] },
          PixelFormat::Rgb => {
            let a = match self.trans_color {
              Some(tc) if tc == pack_rgb(p[0], p[1], p[2]) => 0,
              _ => 255,
            };
            r8g8b8a8_Unorm { r: p[0], g: p[1], b: p[2], a }
          }
          PixelFormat::GrayAlpha => r8g8b8a8_Unorm { r: p[0], g: p[0], b: p[0], a: p[1] },
          PixelFormat::Gray => {
            // the transparency colour is in raw sample terms, compare
            // before widening
            let a = match self.trans_color {
              Some(tc) if tc == pack_rgb(p[0], p[0], p[0]) => 0,
              _ => 255,
            };
            let v = bitfrob::u8_replicate_bits(u32::from(g.bit_depth()), p[0]);
            r8g8b8a8_Unorm { r: v, g: v, b: v, a }
          }
          PixelFormat::Gray16 => {
            let v = p[0];
            r8g8b8a8_Unorm { r: v, g: v, b: v, a: 255 }
          }
          PixelFormat::Indexed => {
            let i = usize::from(p[0]);
            let entry = self.palette.get(i).copied().unwrap_or_default();
            let a = self.palette_alphas.get(i).copied().unwrap_or(255);
            r8g8b8a8_Unorm { r: entry.r, g: entry.g, b: entry.b, a }
          }
        };
        pixels.push(px);
      }
    }
    pixels
  }
}

fn strip_signature(bytes: &[u8]) -> PngResult<&[u8]> {
  match bytes {
    [137, 80, 78, 71, 13, 10, 26, 10, rest @ ..] => Ok(rest),
    _ => Err(PngError::NoSignature),
  }
}

/// The normalised layout a source format decodes into.
fn grid_layout(ihdr: &Ihdr) -> (PixelFormat, u8) {
  match (ihdr.color_type, ihdr.bit_depth) {
    (ColorType::Indexed, d) => (PixelFormat::Indexed, d),
    (ColorType::Gray, 16) => (PixelFormat::Gray16, 16),
    (ColorType::Gray, d) => (PixelFormat::Gray, d),
    (ColorType::GrayAlpha, _) => (PixelFormat::GrayAlpha, 8),
    (ColorType::Rgb, _) => (PixelFormat::Rgb, 8),
    (ColorType::Rgba, _) => (PixelFormat::Rgba, 8),
  }
}

/// Total bytes of filtered scanline data the header implies, across all
/// reduced images for interlaced sources.
fn expected_filtered_size(ihdr: &Ihdr) -> usize {
  if !ihdr.interlaced {
    (ihdr.bytes_per_scanline(ihdr.width) + 1) * ihdr.height as usize
  } else {
    let mut total = 0;
    for pass in 0..7 {
      let (cols, rows) = adam7::pass_size(pass, ihdr.width, ihdr.height);
      if cols == 0 || rows == 0 {
        continue;
      }
      total += (ihdr.bytes_per_scanline(cols) + 1) * rows as usize;
    }
    total
  }
}

/// Stored gAMA values are reciprocal exponents scaled by 1e5; zero is
/// nonsense some writers emit, and absurdly small values clamp to 4.0.
fn gamma_from_stored(stored: u32) -> f64 {
  if stored == 0 {
    2.2
  } else {
    let gamma = 1.0 / (f64::from(stored) / 100_000.0);
    if gamma > 4.0 {
      4.0
    } else {
      gamma
    }
  }
}

fn parse_palette(data: &[u8]) -> PngResult<Vec<r8g8b8_Unorm>> {
  if data.len() % 3 != 0 || data.len() > 256 * 3 {
    return Err(PngError::BadPalette);
  }
  Ok(data.chunks_exact(3).map(|c| r8g8b8_Unorm { r: c[0], g: c[1], b: c[2] }).collect())
}
