//! The package's wire structures: the one [`PackageHeader`] at the front
//! and a [`FileRecord`] before each payload.
//!
//! Integers are little-endian. Structures are bracketed by one-byte
//! start/end object markers, and strings travel as a `u32` count of
//! UTF-16 code units followed by the units in little-endian order.

use super::{PackageError, PackageResult};
use std::io::Read;

/// The fixed signature at offset zero of every package file.
pub const SIGNATURE: [u8; 12] = *b"(CIDPack) V1";

pub(crate) const START_OBJECT: u8 = 0xEA;
pub(crate) const END_OBJECT: u8 = 0xEB;

const HDR_FMT_VERSION: u8 = 1;
const FILE_FMT_VERSION: u8 = 1;

/// Longest string the reader will believe (in UTF-16 code units); a
/// count beyond this is garbage, not a real package.
const MAX_STRING_UNITS: u32 = 1 << 24;

/// The package-level header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageHeader {
  /// Caller-defined package version.
  pub version: u64,
  /// Number of file records that follow the header.
  pub file_count: u32,
  /// Creation time in 100-nanosecond ticks.
  pub timestamp: u64,
  /// Opaque caller slot.
  pub user_card4: u32,
  /// Opaque caller slot.
  pub user_card8: u64,
  /// Free-form notes, stored uncompressed.
  pub notes: String,
}

impl PackageHeader {
  pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
    out.extend_from_slice(&SIGNATURE);
    out.push(START_OBJECT);
    out.push(HDR_FMT_VERSION);
    out.extend_from_slice(&self.version.to_le_bytes());
    out.extend_from_slice(&self.file_count.to_le_bytes());
    out.extend_from_slice(&self.timestamp.to_le_bytes());
    out.extend_from_slice(&self.user_card4.to_le_bytes());
    out.extend_from_slice(&self.user_card8.to_le_bytes());
    write_string(out, &self.notes);
    out.push(END_OBJECT);
  }

  pub(crate) fn read_from(r: &mut impl Read) -> PackageResult<Self> {
    let sig: [u8; 12] = read_array(r)?;
    if sig != SIGNATURE {
      return Err(PackageError::NotAPackage);
    }
    expect_marker(r, START_OBJECT)?;
    check_format_version(read_u8(r)?, HDR_FMT_VERSION)?;
    let version = read_u64_le(r)?;
    let file_count = read_u32_le(r)?;
    let timestamp = read_u64_le(r)?;
    let user_card4 = read_u32_le(r)?;
    let user_card8 = read_u64_le(r)?;
    let notes = read_string(r)?;
    expect_marker(r, END_OBJECT)?;
    Ok(Self { version, file_count, timestamp, user_card4, user_card8, notes })
  }
}

/// The per-file header; the payload follows it immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileRecord {
  /// Payload bytes on the wire. Equal to `org_bytes` when the payload is
  /// stored raw because deflate couldn't shrink it.
  pub comp_bytes: u32,
  /// Bytes of the original file.
  pub org_bytes: u32,
  /// MD5 of the original bytes.
  pub md5: [u8; 16],
  /// Path relative to the package root, `/`-separated.
  pub rel_path: String,
}

impl FileRecord {
  pub fn write_to(&self, out: &mut Vec<u8>) {
    out.push(START_OBJECT);
    out.push(FILE_FMT_VERSION);
    out.extend_from_slice(&self.comp_bytes.to_le_bytes());
    out.extend_from_slice(&self.org_bytes.to_le_bytes());
    // the sizes repeat inverted so a trashed record is caught before
    // anyone seeks by it
    out.extend_from_slice(&(self.comp_bytes ^ u32::MAX).to_le_bytes());
    out.extend_from_slice(&(self.org_bytes ^ u32::MAX).to_le_bytes());
    out.extend_from_slice(&self.md5);
    write_string(out, &self.rel_path);
    out.push(END_OBJECT);
  }

  pub fn read_from(r: &mut impl Read) -> PackageResult<Self> {
    expect_marker(r, START_OBJECT)?;
    check_format_version(read_u8(r)?, FILE_FMT_VERSION)?;
    let comp_bytes = read_u32_le(r)?;
    let org_bytes = read_u32_le(r)?;
    let x_comp = read_u32_le(r)?;
    let x_org = read_u32_le(r)?;
    if comp_bytes != x_comp ^ u32::MAX || org_bytes != x_org ^ u32::MAX {
      return Err(PackageError::SizeFieldMismatch);
    }
    let md5: [u8; 16] = read_array(r)?;
    let rel_path = read_string(r)?;
    expect_marker(r, END_OBJECT)?;
    Ok(Self { comp_bytes, org_bytes, md5, rel_path })
  }
}

/// Rejects version zero and versions newer than this implementation.
fn check_format_version(found: u8, current: u8) -> PackageResult<()> {
  if found == 0 || found > current {
    Err(PackageError::UnknownFormatVersion)
  } else {
    Ok(())
  }
}

fn expect_marker(r: &mut impl Read, marker: u8) -> PackageResult<()> {
  if read_u8(r)? != marker {
    Err(PackageError::BadObjectMarker)
  } else {
    Ok(())
  }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
  let units: Vec<u16> = s.encode_utf16().collect();
  out.extend_from_slice(&(units.len() as u32).to_le_bytes());
  for unit in units {
    out.extend_from_slice(&unit.to_le_bytes());
  }
}

fn read_string(r: &mut impl Read) -> PackageResult<String> {
  let count = read_u32_le(r)?;
  if count > MAX_STRING_UNITS {
    return Err(PackageError::BadString);
  }
  let mut units = Vec::with_capacity(count as usize);
  for _ in 0..count {
    let b: [u8; 2] = read_array(r)?;
    units.push(u16::from_le_bytes(b));
  }
  char::decode_utf16(units.into_iter())
    .collect::<Result<String, _>>()
    .map_err(|_| PackageError::BadString)
}

fn read_array<const N: usize>(r: &mut impl Read) -> PackageResult<[u8; N]> {
  let mut buf = [0u8; N];
  r.read_exact(&mut buf)?;
  Ok(buf)
}

fn read_u8(r: &mut impl Read) -> PackageResult<u8> {
  Ok(read_array::<1>(r)?[0])
}

fn read_u32_le(r: &mut impl Read) -> PackageResult<u32> {
  Ok(u32::from_le_bytes(read_array(r)?))
}

fn read_u64_le(r: &mut impl Read) -> PackageResult<u64> {
  Ok(u64::from_le_bytes(read_array(r)?))
}
