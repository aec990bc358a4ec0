use pixel_formats::{r8g8b8_Unorm, r8g8b8a8_Unorm};
use squish::png::{
  Background, ColorType, DecodeConfig, PixelFormat, PixelGrid, Png, PngError, PNG_SIGNATURE,
};

/// Test-side chunk writer so we can hand-assemble streams our encoder
/// would never produce (interlaced data, legacy chunk names, 16-bit
/// color).
fn push_chunk(out: &mut Vec<u8>, ty: &[u8; 4], payload: &[u8]) {
  fn crc32(bytes: impl Iterator<Item = u8>) -> u32 {
    let mut crc = u32::MAX;
    for byte in bytes {
      crc ^= u32::from(byte);
      for _ in 0..8 {
        crc = if crc & 1 != 0 { 0xEDB8_8320 ^ (crc >> 1) } else { crc >> 1 };
      }
    }
    crc ^ u32::MAX
  }
  out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
  out.extend_from_slice(ty);
  out.extend_from_slice(payload);
  out.extend_from_slice(
    &crc32(ty.iter().copied().chain(payload.iter().copied())).to_be_bytes(),
  );
}

fn ihdr_payload(w: u32, h: u32, depth: u8, color: u8, interlace: u8) -> Vec<u8> {
  let mut p = Vec::new();
  p.extend_from_slice(&w.to_be_bytes());
  p.extend_from_slice(&h.to_be_bytes());
  p.extend_from_slice(&[depth, color, 0, 0, interlace]);
  p
}

/// A complete minimal PNG from already-filtered scanline data.
fn assemble(ihdr: Vec<u8>, extra_chunks: &[(&[u8; 4], Vec<u8>)], filtered: &[u8]) -> Vec<u8> {
  let mut out = PNG_SIGNATURE.to_vec();
  push_chunk(&mut out, b"IHDR", &ihdr);
  for (ty, payload) in extra_chunks {
    push_chunk(&mut out, ty, payload);
  }
  let idat = squish::zlib::compress(filtered, squish::zlib::CompLevel::L9).unwrap();
  push_chunk(&mut out, b"IDAT", &idat);
  push_chunk(&mut out, b"IEND", &[]);
  out
}

#[test]
fn test_one_by_one_transparent_rgba() {
  let grid = PixelGrid::new(1, 1, PixelFormat::Rgba, 8);
  let bytes = Png::from_grid(grid).encode().unwrap();

  // IHDR must say 1x1, depth 8, color type 6
  assert!(bytes.starts_with(&PNG_SIGNATURE));
  assert_eq!(&bytes[8..16], &[0, 0, 0, 13, b'I', b'H', b'D', b'R']);
  assert_eq!(&bytes[16..24], &[0, 0, 0, 1, 0, 0, 0, 1]);
  assert_eq!(&bytes[24..26], &[8, 6]);
  // exactly one IDAT
  let idats = bytes.windows(4).filter(|w| w == b"IDAT").count();
  assert_eq!(idats, 1);

  let back = Png::decode(&bytes).unwrap();
  assert_eq!(back.grid.format(), PixelFormat::Rgba);
  assert_eq!(back.grid.pixel(0, 0), &[0, 0, 0, 0]);
  assert_eq!(back.to_rgba(), vec![r8g8b8a8_Unorm { r: 0, g: 0, b: 0, a: 0 }]);
}

#[test]
fn test_four_bit_palette_checkerboard() {
  let mut grid = PixelGrid::new(8, 8, PixelFormat::Indexed, 4);
  for y in 0..8 {
    for x in 0..8 {
      grid.set_pixel(x, y, &[((x + y) % 2) as u8]);
    }
  }
  let mut png = Png::from_grid(grid);
  png.palette = vec![
    r8g8b8_Unorm { r: 10, g: 20, b: 30 },
    r8g8b8_Unorm { r: 200, g: 100, b: 50 },
  ];
  let bytes = png.encode().unwrap();

  let back = Png::decode(&bytes).unwrap();
  assert_eq!(back.grid.format(), PixelFormat::Indexed);
  assert_eq!(back.grid.bit_depth(), 4);
  assert_eq!(back.palette, png.palette);
  for y in 0..8 {
    for x in 0..8 {
      assert_eq!(back.grid.pixel(x, y), &[((x + y) % 2) as u8], "at ({x},{y})");
    }
  }
}

#[test]
fn test_round_trips_across_formats_and_odd_widths() {
  let cases: &[(PixelFormat, u8, u32, u32)] = &[
    (PixelFormat::Gray, 1, 13, 3),
    (PixelFormat::Gray, 2, 5, 5),
    (PixelFormat::Gray, 4, 3, 2),
    (PixelFormat::Gray, 8, 7, 4),
    (PixelFormat::GrayAlpha, 8, 6, 2),
    (PixelFormat::Rgb, 8, 5, 3),
    (PixelFormat::Rgba, 8, 4, 4),
    (PixelFormat::Indexed, 1, 9, 2),
    (PixelFormat::Indexed, 8, 3, 3),
  ];
  for &(format, depth, w, h) in cases {
    let mut grid = PixelGrid::new(w, h, format, depth);
    let max: u8 = if depth >= 8 { 255 } else { ((1u16 << depth) - 1) as u8 };
    let bpp = format.bytes_per_pixel();
    let mut px = vec![0u8; bpp];
    for y in 0..h {
      for x in 0..w {
        for (s, slot) in px.iter_mut().enumerate() {
          *slot = ((x * 7 + y * 31 + s as u32 * 13) % (u32::from(max) + 1)) as u8;
        }
        grid.set_pixel(x, y, &px);
      }
    }
    let mut png = Png::from_grid(grid.clone());
    if format == PixelFormat::Indexed {
      png.palette =
        (0..=max).map(|i| r8g8b8_Unorm { r: i, g: i ^ 0x55, b: 255 - i }).collect();
    }
    let bytes = png.encode().unwrap();
    let back = Png::decode(&bytes).unwrap();
    assert_eq!(back.grid, grid, "{format:?}/{depth} {w}x{h}");
  }
}

#[test]
fn test_gray16_decodes_deep_and_reencodes_narrow() {
  // 2x1, 16-bit grey, both scanlines filter 0
  let filtered = [0u8, 0xAB, 0xCD, 0x12, 0x34];
  let bytes = assemble(ihdr_payload(2, 1, 16, 0, 0), &[], &filtered);

  let png = Png::decode(&bytes).unwrap();
  assert_eq!(png.grid.format(), PixelFormat::Gray16);
  assert_eq!(png.grid.gray16_at(0, 0), 0xABCD);
  assert_eq!(png.grid.gray16_at(1, 0), 0x1234);

  // re-encode truncates to 8-bit grey, keeping the high bytes
  let narrow = Png::decode(&png.encode().unwrap()).unwrap();
  assert_eq!(narrow.grid.format(), PixelFormat::Gray);
  assert_eq!(narrow.grid.pixel(0, 0), &[0xAB]);
  assert_eq!(narrow.grid.pixel(1, 0), &[0x12]);
}

#[test]
fn test_sixteen_bit_color_narrows_on_decode() {
  // 1x1 RGB at 16 bits per channel, high bytes 0x11 0x22 0x33
  let filtered = [0u8, 0x11, 0xFF, 0x22, 0xEE, 0x33, 0xDD];
  let bytes = assemble(ihdr_payload(1, 1, 16, 2, 0), &[], &filtered);
  let png = Png::decode(&bytes).unwrap();
  assert_eq!(png.grid.format(), PixelFormat::Rgb);
  assert_eq!(png.grid.pixel(0, 0), &[0x11, 0x22, 0x33]);
}

#[test]
fn test_adam7_interlaced_decode() {
  // 8x8 grey image, pixel value = y*8 + x, split into the seven passes
  let passes: [(u32, u32, u32, u32); 7] =
    [(0, 0, 8, 8), (4, 0, 8, 8), (0, 4, 4, 8), (2, 0, 4, 4), (0, 2, 2, 4), (1, 0, 2, 2), (0, 1, 1, 2)];
  let mut filtered = Vec::new();
  for (ox, oy, sx, sy) in passes {
    let mut y = oy;
    while y < 8 {
      filtered.push(0); // per-line filter byte
      let mut x = ox;
      while x < 8 {
        filtered.push((y * 8 + x) as u8);
        x += sx;
      }
      y += sy;
    }
  }
  let bytes = assemble(ihdr_payload(8, 8, 8, 0, 1), &[], &filtered);
  let png = Png::decode(&bytes).unwrap();
  assert!(png.source_interlaced);
  for y in 0..8 {
    for x in 0..8 {
      assert_eq!(png.grid.pixel(x, y), &[(y * 8 + x) as u8], "at ({x},{y})");
    }
  }
}

#[test]
fn test_legacy_rrns_chunk_reads_as_transparency() {
  // 8-bit grey with the old mis-typed transparency chunk
  let filtered = [0u8, 0x41, 0x42];
  let bytes =
    assemble(ihdr_payload(2, 1, 8, 0, 0), &[(b"rRNS", vec![0x00, 0x41])], &filtered);
  let png = Png::decode(&bytes).unwrap();
  assert_eq!(png.trans_color, Some(0x0041_4141));

  // and our own output never contains the legacy name
  let reencoded = png.encode().unwrap();
  assert_eq!(reencoded.windows(4).filter(|w| w == b"rRNS").count(), 0);
  assert_eq!(reencoded.windows(4).filter(|w| w == b"tRNS").count(), 1);
}

#[test]
fn test_private_transparency_chunk_round_trips() {
  let mut grid = PixelGrid::new(2, 1, PixelFormat::Rgb, 8);
  grid.set_pixel(0, 0, &[9, 8, 7]);
  let mut png = Png::from_grid(grid);
  png.trans_color = Some(0x0009_0807);
  let bytes = png.encode().unwrap();

  assert_eq!(bytes.windows(4).filter(|w| w == b"cdBC").count(), 1);
  assert_eq!(bytes.windows(4).filter(|w| w == b"tRNS").count(), 1);

  let back = Png::decode(&bytes).unwrap();
  assert_eq!(back.trans_color, Some(0x0009_0807));
  // the transparent pixel flattens to alpha 0
  let rgba = back.to_rgba();
  assert_eq!(rgba[0].a, 0);
  assert_eq!(rgba[1].a, 255);
}

#[test]
fn test_palette_alpha_flattening() {
  let mut grid = PixelGrid::new(2, 1, PixelFormat::Indexed, 8);
  grid.set_pixel(1, 0, &[1]);
  let mut png = Png::from_grid(grid);
  png.palette =
    vec![r8g8b8_Unorm { r: 1, g: 2, b: 3 }, r8g8b8_Unorm { r: 4, g: 5, b: 6 }];
  png.palette_alphas = vec![0x80];
  let rgba = png.to_rgba();
  assert_eq!(rgba[0], r8g8b8a8_Unorm { r: 1, g: 2, b: 3, a: 0x80 });
  // entries past the alpha table are opaque
  assert_eq!(rgba[1], r8g8b8a8_Unorm { r: 4, g: 5, b: 6, a: 255 });
}

#[test]
fn test_low_depth_gray_widens_by_replication() {
  let mut grid = PixelGrid::new(2, 1, PixelFormat::Gray, 1);
  grid.set_pixel(1, 0, &[1]);
  let rgba = Png::from_grid(grid).to_rgba();
  assert_eq!(rgba[0], r8g8b8a8_Unorm { r: 0, g: 0, b: 0, a: 255 });
  assert_eq!(rgba[1], r8g8b8a8_Unorm { r: 255, g: 255, b: 255, a: 255 });
}

#[test]
fn test_gamma_and_background_chunks() {
  let filtered = [0u8, 0x10];
  let bytes = assemble(
    ihdr_payload(1, 1, 8, 0, 0),
    &[(b"gAMA", 45455u32.to_be_bytes().to_vec()), (b"bKGD", vec![0x00, 0x30])],
    &filtered,
  );
  let png = Png::decode(&bytes).unwrap();
  assert!((png.gamma - 2.2).abs() < 0.01);
  assert_eq!(png.background, Some(Background::Gray(0x30)));

  // encoding always writes a gAMA chunk back out
  let out = png.encode().unwrap();
  assert_eq!(out.windows(4).filter(|w| w == b"gAMA").count(), 1);
}

#[test]
fn test_lenient_mode_salvages_after_idat_strict_does_not() {
  let mut grid = PixelGrid::new(2, 2, PixelFormat::Rgba, 8);
  grid.set_pixel(0, 0, &[1, 2, 3, 4]);
  let mut bytes = Png::from_grid(grid).encode().unwrap();
  // corrupt the IEND CRC (the last byte of the stream)
  let last = bytes.len() - 1;
  bytes[last] ^= 0xFF;

  let lenient = Png::decode(&bytes).unwrap();
  assert_eq!(lenient.grid.pixel(0, 0), &[1, 2, 3, 4]);

  let strict = Png::decode_with(&bytes, DecodeConfig { strict: true });
  assert!(matches!(strict, Err(PngError::BadCrc)));
}

#[test]
fn test_corrupt_crc_before_data_always_fails() {
  let grid = PixelGrid::new(1, 1, PixelFormat::Gray, 8);
  let mut bytes = Png::from_grid(grid).encode().unwrap();
  // the gAMA chunk sits right after IHDR; trash its CRC
  let gama_at = bytes.windows(4).position(|w| w == b"gAMA").unwrap();
  bytes[gama_at + 8] ^= 0xFF;
  assert!(matches!(Png::decode(&bytes), Err(PngError::BadCrc)));
}

#[test]
fn test_chunk_order_rules() {
  // tRNS before PLTE on an indexed image is out of order
  let mut out = PNG_SIGNATURE.to_vec();
  push_chunk(&mut out, b"IHDR", &ihdr_payload(1, 1, 8, 3, 0));
  push_chunk(&mut out, b"tRNS", &[0x00]);
  push_chunk(&mut out, b"PLTE", &[1, 2, 3]);
  let idat = squish::zlib::compress(&[0u8, 0u8], squish::zlib::CompLevel::L9).unwrap();
  push_chunk(&mut out, b"IDAT", &idat);
  push_chunk(&mut out, b"IEND", &[]);
  assert!(matches!(Png::decode(&out), Err(PngError::BadChunkOrder)));
}

#[test]
fn test_split_idat_rejected_contiguous_accepted() {
  // contiguous IDATs are one stream
  let filtered = [0u8, 0x11, 0x22];
  let idat = squish::zlib::compress(&filtered, squish::zlib::CompLevel::L9).unwrap();
  let (a, b) = idat.split_at(idat.len() / 2);
  let mut good = PNG_SIGNATURE.to_vec();
  push_chunk(&mut good, b"IHDR", &ihdr_payload(2, 1, 8, 0, 0));
  push_chunk(&mut good, b"IDAT", a);
  push_chunk(&mut good, b"IDAT", b);
  push_chunk(&mut good, b"IEND", &[]);
  let png = Png::decode(&good).unwrap();
  assert_eq!(png.grid.pixel(0, 0), &[0x11]);

  // anything between them is a format error
  let mut bad = PNG_SIGNATURE.to_vec();
  push_chunk(&mut bad, b"IHDR", &ihdr_payload(2, 1, 8, 0, 0));
  push_chunk(&mut bad, b"IDAT", a);
  push_chunk(&mut bad, b"gAMA", &45455u32.to_be_bytes());
  push_chunk(&mut bad, b"IDAT", b);
  push_chunk(&mut bad, b"IEND", &[]);
  assert!(matches!(Png::decode(&bad), Err(PngError::SplitImageData)));
}

#[test]
fn test_read_info_stops_before_pixels() {
  let mut grid = PixelGrid::new(3, 2, PixelFormat::Rgb, 8);
  grid.set_pixel(0, 0, &[1, 1, 1]);
  let mut png = Png::from_grid(grid);
  png.trans_color = Some(0x0000_00FF);
  let bytes = png.encode().unwrap();

  let info = Png::read_info(&bytes).unwrap();
  assert_eq!((info.width, info.height), (3, 2));
  assert_eq!(info.color_type, ColorType::Rgb);
  assert_eq!(info.bit_depth, 8);
  assert!(!info.interlaced);
  assert_eq!(info.trans_color, Some(0x0000_00FF));
}

#[test]
fn test_rgb555_import_encodes() {
  let grid = PixelGrid::from_rgb555(2, 1, &[0x7FFF, 0x0000]);
  let bytes = Png::from_grid(grid).encode().unwrap();
  let back = Png::decode(&bytes).unwrap();
  assert_eq!(back.grid.pixel(0, 0), &[0xF8, 0xF8, 0xF8]);
  assert_eq!(back.grid.pixel(1, 0), &[0, 0, 0]);
}

#[test]
fn test_not_a_png_and_truncation() {
  assert!(matches!(Png::decode(b"definitely not a png"), Err(PngError::NoSignature)));
  let bytes = Png::from_grid(PixelGrid::new(1, 1, PixelFormat::Gray, 8)).encode().unwrap();
  // cutting inside the IHDR chunk can't be salvaged in any mode
  assert!(Png::decode(&bytes[..20]).is_err());
}

#[test]
fn test_paeth_and_up_filters_from_other_encoders() {
  // a vertical gradient compresses to Up/Paeth-ish filters in most
  // encoders; we fake one directly with the Up filter
  let mut filtered = Vec::new();
  filtered.extend_from_slice(&[0u8, 10, 20, 30]); // row 0: none
  filtered.extend_from_slice(&[2u8, 5, 5, 5]); // row 1: up
  filtered.extend_from_slice(&[4u8, 1, 1, 1]); // row 2: paeth
  let bytes = assemble(ihdr_payload(3, 3, 8, 0, 0), &[], &filtered);
  let png = Png::decode(&bytes).unwrap();
  assert_eq!(png.grid.row(0), &[10, 20, 30]);
  assert_eq!(png.grid.row(1), &[15, 25, 35]);
  assert_eq!(png.grid.row(2), &[16, 26, 36]);
}
