//! Chunk-level reading and writing: length, 4-byte type code, payload,
//! trailing CRC-32 over (type + payload).

use super::{crc32::Crc32, PngError, PngResult};
use crate::util::{try_pull_byte_array, u32_be};

/// A chunk's 4-byte type code.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ChunkType(pub [u8; 4]);

#[allow(nonstandard_style)]
impl ChunkType {
  pub const IHDR: Self = Self(*b"IHDR");
  pub const PLTE: Self = Self(*b"PLTE");
  pub const IDAT: Self = Self(*b"IDAT");
  pub const IEND: Self = Self(*b"IEND");
  pub const tRNS: Self = Self(*b"tRNS");
  pub const gAMA: Self = Self(*b"gAMA");
  pub const bKGD: Self = Self(*b"bKGD");
  /// Private ancillary chunk: one packed transparency colour.
  pub const cdBC: Self = Self(*b"cdBC");
  /// A mis-spelled tRNS that shipped in some old encoders. Accepted as a
  /// synonym on read, never written.
  pub const rRNS: Self = Self(*b"rRNS");
}
impl core::fmt::Debug for ChunkType {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    for b in self.0 {
      core::fmt::Write::write_char(f, b as char)?;
    }
    Ok(())
  }
}

/// One chunk as pulled off the stream, CRC already compared.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawChunk<'b> {
  pub ty: ChunkType,
  pub data: &'b [u8],
  pub crc_ok: bool,
}

/// Walks the chunk sequence of a PNG, after the 8-byte signature.
pub(crate) struct ChunkReader<'b> {
  rest: &'b [u8],
}

impl<'b> ChunkReader<'b> {
  pub fn new(rest: &'b [u8]) -> Self {
    Self { rest }
  }

  /// Pulls the next chunk, or `None` at a clean end of input.
  pub fn next_chunk(&mut self) -> PngResult<Option<RawChunk<'b>>> {
    if self.rest.is_empty() {
      return Ok(None);
    }
    let (len_bytes, rest) =
      try_pull_byte_array::<4>(self.rest).ok_or(PngError::UnexpectedEndOfInput)?;
    let len = u32_be(&len_bytes) as usize;
    let (ty_bytes, rest) = try_pull_byte_array::<4>(rest).ok_or(PngError::UnexpectedEndOfInput)?;
    if rest.len() < len + 4 {
      return Err(PngError::UnexpectedEndOfInput);
    }
    let (data, rest) = rest.split_at(len);
    let (crc_bytes, rest) = rest.split_at(4);
    self.rest = rest;

    let mut crc = Crc32::new();
    crc.update(&ty_bytes);
    crc.update(data);
    let crc_ok = crc.finish() == u32_be(crc_bytes);

    Ok(Some(RawChunk { ty: ChunkType(ty_bytes), data, crc_ok }))
  }
}

/// Appends one complete chunk: length, type, payload, CRC.
pub(crate) fn write_chunk(out: &mut Vec<u8>, ty: ChunkType, payload: &[u8]) {
  out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
  out.extend_from_slice(&ty.0);
  out.extend_from_slice(payload);
  let mut crc = Crc32::new();
  crc.update(&ty.0);
  crc.update(payload);
  out.extend_from_slice(&crc.finish().to_be_bytes());
}

#[test]
fn test_chunk_round_trip() {
  let mut bytes = Vec::new();
  write_chunk(&mut bytes, ChunkType::gAMA, &45455u32.to_be_bytes());
  write_chunk(&mut bytes, ChunkType::IEND, &[]);

  let mut reader = ChunkReader::new(&bytes);
  let gama = reader.next_chunk().unwrap().unwrap();
  assert_eq!(gama.ty, ChunkType::gAMA);
  assert!(gama.crc_ok);
  assert_eq!(gama.data, &45455u32.to_be_bytes());
  let iend = reader.next_chunk().unwrap().unwrap();
  assert_eq!(iend.ty, ChunkType::IEND);
  assert!(iend.crc_ok);
  assert!(reader.next_chunk().unwrap().is_none());
}

#[test]
fn test_corrupt_crc_is_reported_not_fatal() {
  let mut bytes = Vec::new();
  write_chunk(&mut bytes, ChunkType::IDAT, b"xyz");
  let last = bytes.len() - 1;
  bytes[last] ^= 0xFF;
  let mut reader = ChunkReader::new(&bytes);
  let chunk = reader.next_chunk().unwrap().unwrap();
  assert!(!chunk.crc_ok);
}

#[test]
fn test_truncated_chunk_is_an_error() {
  let mut bytes = Vec::new();
  write_chunk(&mut bytes, ChunkType::IDAT, b"xyz");
  bytes.truncate(bytes.len() - 2);
  let mut reader = ChunkReader::new(&bytes);
  assert!(reader.next_chunk().is_err());
}
