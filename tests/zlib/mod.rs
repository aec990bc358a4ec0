use squish::zlib::{compress, decompress, CompLevel, Compressor, Decompressor, Strategy, ZlibError};

/// Decoding with an independent implementation keeps us honest about the
/// wire format, not just about round-tripping with ourselves.
fn miniz_inflate(bytes: &[u8]) -> Vec<u8> {
  miniz_oxide::inflate::decompress_to_vec_zlib(bytes).expect("miniz rejected our stream")
}

fn miniz_deflate(bytes: &[u8]) -> Vec<u8> {
  miniz_oxide::deflate::compress_to_vec_zlib(bytes, 6)
}

#[test]
fn test_empty_input_round_trips() {
  let packed = compress(b"", CompLevel::L9).unwrap();
  // 2-byte header, a tiny final block, then Adler(empty) == 1 big-endian
  assert!(packed.len() <= 11);
  assert_eq!(&packed[packed.len() - 4..], &[0, 0, 0, 1]);
  assert_eq!(decompress(&packed).unwrap(), b"");
  assert_eq!(miniz_inflate(&packed), b"");
}

#[test]
fn test_single_byte_round_trips_small() {
  let packed = compress(b"A", CompLevel::L9).unwrap();
  assert!(packed.len() <= 11, "one byte blew up to {} bytes", packed.len());
  assert_eq!(decompress(&packed).unwrap(), b"A");
  assert_eq!(miniz_inflate(&packed), b"A");
}

#[test]
fn test_run_of_258_zeros_is_one_match() {
  let input = [0u8; 258];
  let packed = compress(&input, CompLevel::L9).unwrap();
  // a literal, one (258, 1) match, end-of-block: just a handful of bytes
  assert!(packed.len() < 16);
  assert_eq!(decompress(&packed).unwrap(), input);
  assert_eq!(miniz_inflate(&packed), input);
}

#[test]
fn test_header_bytes_advertise_level_and_window() {
  let packed = compress(b"anything", CompLevel::L9).unwrap();
  // CMF: deflate, 32K window; FLG: max-compression flavor, valid check
  assert_eq!(packed[0], 0x78);
  assert_eq!(packed[1], 0xDA);
  assert_eq!((u16::from_be_bytes([packed[0], packed[1]])) % 31, 0);
}

#[test]
fn test_text_round_trips_and_shrinks() {
  let text = include_str!("../../Cargo.toml").repeat(40);
  let packed = compress(text.as_bytes(), CompLevel::L9).unwrap();
  assert!(packed.len() < text.len() / 2, "text should compress well");
  assert_eq!(decompress(&packed).unwrap(), text.as_bytes());
  assert_eq!(miniz_inflate(&packed), text.as_bytes());
}

#[test]
fn test_we_can_read_streams_from_other_encoders() {
  for input in [
    Vec::new(),
    b"hello hello hello".to_vec(),
    super::rand_bytes(10_000),
    vec![7u8; 100_000],
    (0..=255u8).collect::<Vec<u8>>().repeat(512),
  ] {
    let packed = miniz_deflate(&input);
    assert_eq!(decompress(&packed).unwrap(), input);
  }
}

#[test]
fn test_multi_block_compressible_data() {
  // way past one accumulator's worth of symbols, so several blocks
  let mut text = Vec::new();
  for i in 0..20_000u32 {
    text.extend_from_slice(format!("line {i}: the quick brown fox jumps over the lazy dog\n").as_bytes());
  }
  for level in [CompLevel::L4, CompLevel::L6, CompLevel::L9] {
    let packed = compress(&text, level).unwrap();
    assert_eq!(decompress(&packed).unwrap(), text, "level {level:?}");
    assert_eq!(miniz_inflate(&packed), text, "level {level:?}");
  }
}

#[test]
fn test_level_zero_stores() {
  let input = super::rand_bytes(200_000);
  let packed = compress(&input, CompLevel::L0).unwrap();
  // stored blocks only: a few bytes of framing per 64K
  assert!(packed.len() >= input.len());
  assert!(packed.len() < input.len() + 64);
  assert_eq!(decompress(&packed).unwrap(), input);
  assert_eq!(miniz_inflate(&packed), input);
}

#[test]
fn test_fast_levels_are_refused_not_substituted() {
  for level in [CompLevel::L1, CompLevel::L2, CompLevel::L3] {
    assert_eq!(compress(b"data", level), Err(ZlibError::FastStrategyUnsupported));
  }
}

#[test]
fn test_incompressible_input_past_the_window_fails_loudly() {
  // once the window slides, a stored block can't be re-read; random
  // data forces exactly that. Callers store such input raw.
  let input = super::rand_bytes(200_000);
  assert_eq!(compress(&input, CompLevel::L9), Err(ZlibError::WindowSlidStored));
}

#[test]
fn test_huffman_only_strategy_round_trips() {
  let input = b"ababababababababab".repeat(100);
  let mut packed = Vec::new();
  Compressor::with_strategy(CompLevel::L9, Strategy::HuffmanOnly)
    .compress(&input, &mut packed)
    .unwrap();
  assert_eq!(decompress(&packed).unwrap(), input);
  assert_eq!(miniz_inflate(&packed), input);
}

#[test]
fn test_compressor_instance_is_reusable() {
  let mut compressor = Compressor::new(CompLevel::L9);
  let mut decompressor = Decompressor::new();
  for input in [b"first stream".to_vec(), vec![3u8; 50_000], super::rand_bytes(999)] {
    let mut packed = Vec::new();
    compressor.compress(&input, &mut packed).unwrap();
    let mut plain = Vec::new();
    decompressor.decompress(&packed, &mut plain).unwrap();
    assert_eq!(plain, input);
  }
}

#[test]
fn test_chunked_input_is_one_stream() {
  let input: Vec<u8> = (0u32..4000).map(|i| (i * i % 251) as u8).collect();
  let packed = compress(&input, CompLevel::L9).unwrap();
  for split_at in [1, 2, 7, packed.len() / 2, packed.len() - 1] {
    let (a, b) = packed.split_at(split_at);
    let mut plain = Vec::new();
    Decompressor::new().decompress_chunks([a, b].into_iter(), &mut plain).unwrap();
    assert_eq!(plain, input);
  }
}

#[test]
fn test_bad_header_is_rejected() {
  // valid pair is (0x78, 0xDA); off-by-one fails the mod-31 check
  assert_eq!(decompress(&[0x78, 0xDB, 0, 0]), Err(ZlibError::BadHeaderCheck));
  // method 7 isn't deflate (0x77 0x85 passes the check sum)
  assert_eq!(decompress(&[0x77, 0x85, 0, 0]), Err(ZlibError::BadCompressionMethod));
}

#[test]
fn test_reserved_block_type_is_rejected() {
  // good header, then BFINAL=1 BTYPE=11
  assert_eq!(decompress(&[0x78, 0xDA, 0b0000_0111, 0, 0]), Err(ZlibError::BadBlockType));
}

#[test]
fn test_truncation_is_a_resource_error() {
  let packed = compress(b"some reasonable amount of data here", CompLevel::L9).unwrap();
  for keep in [2, 3, packed.len() - 5] {
    assert_eq!(decompress(&packed[..keep]), Err(ZlibError::UnexpectedEndOfInput));
  }
}

#[test]
fn test_corrupt_trailer_is_an_integrity_error() {
  let mut packed = compress(b"check me", CompLevel::L9).unwrap();
  let last = packed.len() - 1;
  packed[last] ^= 0xFF;
  assert_eq!(decompress(&packed), Err(ZlibError::AdlerMismatch));
}

#[test]
fn test_stored_blocks_from_other_encoders() {
  // miniz at level 0 emits stored blocks; make it span several
  let input = super::rand_bytes(150_000);
  let packed = miniz_oxide::deflate::compress_to_vec_zlib(&input, 0);
  assert_eq!(decompress(&packed).unwrap(), input);
}

#[test]
fn test_output_not_rolled_back_is_documented_behavior() {
  // a truncated stream still leaves the already-decoded prefix in `out`
  let input = vec![0x55u8; 70_000];
  let packed = compress(&input, CompLevel::L9).unwrap();
  let mut out = Vec::new();
  let r = Decompressor::new().decompress(&packed[..packed.len() - 6], &mut out);
  assert_eq!(r, Err(ZlibError::UnexpectedEndOfInput));
  assert!(input.starts_with(&out));
}
