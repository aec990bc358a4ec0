//! A streaming file-bundle format: one header, then a flat run of
//! deflate-compressed, MD5-checked file records.
//!
//! A package serialises a directory tree. Files appear in a
//! deterministic depth-first walk order; directories are not stored at
//! all and are recovered from path prefixes on extraction. Writing never
//! seeks, so a package can stream straight to a socket or pipe.
//!
//! ```no_run
//! use std::path::Path;
//! use squish::package::{create_package, extract_package, PackOptions};
//!
//! let opts = PackOptions { version: 3, notes: "nightly".into(), ..PackOptions::default() };
//! create_package(Path::new("/tmp/out.pack"), Path::new("./assets"), &opts)?;
//! let header = extract_package(Path::new("/tmp/out.pack"), Path::new("/tmp/assets2"), true)?;
//! assert_eq!(header.version, 3);
//! # Ok::<(), squish::package::PackageError>(())
//! ```
//!
//! Per file, the original bytes are hashed (MD5), deflate-compressed,
//! and written after a small record header. When deflate cannot shrink a
//! file (already-compressed data, mostly) the original bytes are stored
//! verbatim, signalled on the wire by `compressed size == original
//! size`.

use crate::{
  zlib::{CompLevel, Compressor, Decompressor, ZlibError},
  ErrorKind,
};
use std::{
  fs,
  io::{self, Read, Write},
  path::{Component, Path, PathBuf},
  time::SystemTime,
};

mod header;
mod md5;

pub use header::{PackageHeader, SIGNATURE};
use header::FileRecord;

pub type PackageResult<T> = Result<T, PackageError>;

/// An error from the package engine.
#[derive(Debug)]
#[non_exhaustive]
pub enum PackageError {
  /// The input doesn't begin with the package signature.
  NotAPackage,
  /// A structure's format version byte is zero or from the future.
  UnknownFormatVersion,
  /// A start/end object marker was missing.
  BadObjectMarker,
  /// A record's size fields disagree with their inverted copies.
  SizeFieldMismatch,
  /// A string field was malformed.
  BadString,
  /// An extracted file's MD5 doesn't match the stored hash.
  HashMismatch,
  /// A payload inflated to something other than its recorded size.
  WrongExpandedSize,
  /// The package target path sits inside the tree being packaged.
  TargetInsideSource,
  /// A file escaped the declared source root during the walk.
  PathNotInTree,
  /// A file's path relative to the root came out empty.
  EmptyRelativePath,
  /// A stored relative path tries to climb out of the target root.
  UnsafeRelativePath,
  /// The target exists and overwriting wasn't allowed.
  TargetExists,
  /// A file is too large for the format's 32-bit sizes.
  FileTooLarge,
  /// Filesystem trouble.
  Io(io::Error),
  /// The deflate layer failed.
  Zlib(ZlibError),
}
impl From<io::Error> for PackageError {
  fn from(e: io::Error) -> Self {
    if e.kind() == io::ErrorKind::AlreadyExists {
      PackageError::TargetExists
    } else {
      PackageError::Io(e)
    }
  }
}
impl From<ZlibError> for PackageError {
  fn from(e: ZlibError) -> Self {
    PackageError::Zlib(e)
  }
}
impl PackageError {
  /// The broad category this error belongs to.
  #[inline]
  #[must_use]
  pub fn kind(&self) -> ErrorKind {
    use PackageError::*;
    match self {
      NotAPackage | UnknownFormatVersion | BadObjectMarker | SizeFieldMismatch | BadString
      | WrongExpandedSize => ErrorKind::Format,
      HashMismatch => ErrorKind::Integrity,
      TargetInsideSource | PathNotInTree | EmptyRelativePath | UnsafeRelativePath
      | TargetExists | FileTooLarge => ErrorKind::Caller,
      Io(_) => ErrorKind::Resource,
      Zlib(e) => e.kind(),
    }
  }

  /// A stable integer identifier for this error.
  #[inline]
  #[must_use]
  pub fn id(&self) -> u16 {
    use PackageError::*;
    match self {
      NotAPackage => 1,
      UnknownFormatVersion => 2,
      BadObjectMarker => 3,
      SizeFieldMismatch => 4,
      BadString => 5,
      HashMismatch => 6,
      WrongExpandedSize => 7,
      TargetInsideSource => 8,
      PathNotInTree => 9,
      EmptyRelativePath => 10,
      UnsafeRelativePath => 11,
      TargetExists => 12,
      FileTooLarge => 13,
      Io(_) => 14,
      Zlib(e) => 100 + e.id(),
    }
  }
}
impl core::fmt::Display for PackageError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    use PackageError::*;
    let msg = match self {
      NotAPackage => "not a package file",
      UnknownFormatVersion => "unknown structure format version",
      BadObjectMarker => "object marker missing",
      SizeFieldMismatch => "record size fields disagree",
      BadString => "malformed string field",
      HashMismatch => "extracted file hash mismatch",
      WrongExpandedSize => "payload inflated to the wrong size",
      TargetInsideSource => "package target is inside the source tree",
      PathNotInTree => "file is outside the source tree",
      EmptyRelativePath => "file has an empty relative path",
      UnsafeRelativePath => "stored path escapes the target root",
      TargetExists => "target already exists",
      FileTooLarge => "file too large for 32-bit sizes",
      Io(e) => return write!(f, "package error {}: i/o: {e}", self.id()),
      Zlib(e) => return write!(f, "package error {}: {e}", self.id()),
    };
    write!(f, "package error {}: {}", self.id(), msg)
  }
}
impl std::error::Error for PackageError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      PackageError::Io(e) => Some(e),
      PackageError::Zlib(e) => Some(e),
      _ => None,
    }
  }
}

/// Settings for [`create_package`].
#[derive(Debug, Clone)]
pub struct PackOptions {
  /// Caller-defined package version, stored in the header.
  pub version: u64,
  /// Creation stamp in 100-ns ticks; see [`timestamp_now`].
  pub timestamp: u64,
  /// Free-form notes, stored uncompressed in the header.
  pub notes: String,
  /// Opaque caller slot.
  pub user_card4: u32,
  /// Opaque caller slot.
  pub user_card8: u64,
  /// Replace an existing package file instead of refusing.
  pub overwrite: bool,
}
impl Default for PackOptions {
  fn default() -> Self {
    Self {
      version: 0,
      timestamp: timestamp_now(),
      notes: String::new(),
      user_card4: 0,
      user_card8: 0,
      overwrite: false,
    }
  }
}

/// 100-nanosecond ticks since the Unix epoch, the stamp format the
/// package header stores.
#[must_use]
pub fn timestamp_now() -> u64 {
  timestamp_from(SystemTime::now())
}

/// Converts a [`SystemTime`] to header ticks (times before the epoch
/// clamp to zero).
#[must_use]
pub fn timestamp_from(time: SystemTime) -> u64 {
  match time.duration_since(SystemTime::UNIX_EPOCH) {
    Ok(d) => d.as_secs() * 10_000_000 + u64::from(d.subsec_nanos()) / 100,
    Err(_) => 0,
  }
}

/// Packages the tree under `source_root` into the file at `target`.
///
/// Returns the number of files written. The target may not live inside
/// the source tree (the check is path-segment aware, so a sibling like
/// `srcOUT` next to `src` is fine).
pub fn create_package(
  target: &Path, source_root: &Path, options: &PackOptions,
) -> PackageResult<u32> {
  let src_abs = fs::canonicalize(source_root)?;
  if target_is_inside(target, &src_abs) {
    return Err(PackageError::TargetInsideSource);
  }

  // one precursor walk for the count that goes in the header
  let mut files: Vec<PathBuf> = Vec::new();
  for entry in walkdir::WalkDir::new(source_root).sort_by_file_name() {
    let entry = entry.map_err(|e| PackageError::Io(e.into()))?;
    if entry.file_type().is_file() {
      files.push(entry.into_path());
    }
  }
  let file_count = u32::try_from(files.len()).map_err(|_| PackageError::FileTooLarge)?;

  let file = if options.overwrite {
    fs::File::create(target)?
  } else {
    fs::OpenOptions::new().write(true).create_new(true).open(target)?
  };
  let mut out = io::BufWriter::new(file);

  let pkg_header = PackageHeader {
    version: options.version,
    file_count,
    timestamp: options.timestamp,
    user_card4: options.user_card4,
    user_card8: options.user_card8,
    notes: options.notes.clone(),
  };
  let mut scratch = Vec::new();
  pkg_header.write_to(&mut scratch);
  out.write_all(&scratch)?;

  let mut compressor = Compressor::new(CompLevel::L9);
  let mut comp_buf = Vec::new();
  for path in &files {
    pack_file(&mut out, path, source_root, &mut compressor, &mut comp_buf)?;
  }
  out.flush()?;
  Ok(file_count)
}

/// Extracts every file of the package at `source` under `target_root`,
/// returning the package header.
///
/// Intermediate directories are created as needed. Existing files fail
/// with [`PackageError::TargetExists`] unless `overwrite` is set. A
/// hash or size mismatch on any record aborts the extraction.
pub fn extract_package(
  source: &Path, target_root: &Path, overwrite: bool,
) -> PackageResult<PackageHeader> {
  let mut input = io::BufReader::new(fs::File::open(source)?);
  let pkg_header = PackageHeader::read_from(&mut input)?;

  if !target_root.is_dir() {
    fs::create_dir_all(target_root)?;
  }

  let mut decompressor = Decompressor::new();
  for _ in 0..pkg_header.file_count {
    let record = FileRecord::read_from(&mut input)?;
    let rel = sanitize_rel_path(&record.rel_path)?;
    let out_path = target_root.join(rel);

    let mut payload = vec![0u8; record.comp_bytes as usize];
    input.read_exact(&mut payload)?;

    // equal sizes mean the payload is the original, stored raw
    let data = if record.comp_bytes == record.org_bytes {
      payload
    } else {
      let mut plain = Vec::with_capacity(record.org_bytes as usize);
      decompressor.decompress(&payload, &mut plain)?;
      if plain.len() != record.org_bytes as usize {
        return Err(PackageError::WrongExpandedSize);
      }
      plain
    };

    if md5::md5(&data) != record.md5 {
      return Err(PackageError::HashMismatch);
    }

    if let Some(parent) = out_path.parent() {
      if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)?;
      }
    }
    let mut file = if overwrite {
      fs::File::create(&out_path)?
    } else {
      fs::OpenOptions::new().write(true).create_new(true).open(&out_path)?
    };
    file.write_all(&data)?;
  }

  Ok(pkg_header)
}

/// Reads just the header of the package at `source`.
pub fn read_details(source: &Path) -> PackageResult<PackageHeader> {
  let mut input = io::BufReader::new(fs::File::open(source)?);
  PackageHeader::read_from(&mut input)
}

fn pack_file(
  out: &mut impl Write, path: &Path, source_root: &Path, compressor: &mut Compressor,
  comp_buf: &mut Vec<u8>,
) -> PackageResult<()> {
  let rel = path.strip_prefix(source_root).map_err(|_| PackageError::PathNotInTree)?;
  let rel_path = rel_path_to_string(rel)?;
  trace!("packing {rel_path}");

  let data = fs::read(path)?;
  let org_bytes = u32::try_from(data.len()).map_err(|_| PackageError::FileTooLarge)?;
  let digest = md5::md5(&data);

  comp_buf.clear();
  let comp_len = match compressor.compress(&data, comp_buf) {
    Ok(n) => n,
    // the already-compressed-input signal: store it raw
    Err(ZlibError::WindowSlidStored) => data.len(),
    Err(e) => return Err(e.into()),
  };
  let store_raw = comp_len >= data.len();

  let record = FileRecord {
    comp_bytes: if store_raw { org_bytes } else { comp_len as u32 },
    org_bytes,
    md5: digest,
    rel_path,
  };
  let mut rec_bytes = Vec::new();
  record.write_to(&mut rec_bytes);
  out.write_all(&rec_bytes)?;

  if store_raw {
    out.write_all(&data)?;
  } else {
    out.write_all(comp_buf)?;
  }
  Ok(())
}

/// Whether `target` (which may not exist yet) resolves to somewhere
/// under the canonical source root, comparing whole path segments.
fn target_is_inside(target: &Path, src_abs: &Path) -> bool {
  let tar_abs = match fs::canonicalize(target) {
    Ok(p) => p,
    Err(_) => {
      // not there yet: resolve the parent and re-attach the file name
      let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
      };
      match (fs::canonicalize(parent), target.file_name()) {
        (Ok(p), Some(name)) => p.join(name),
        _ => return false,
      }
    }
  };
  tar_abs.starts_with(src_abs)
}

/// Flattens a relative path to the `/`-separated form stored on the
/// wire.
fn rel_path_to_string(rel: &Path) -> PackageResult<String> {
  let mut parts: Vec<&str> = Vec::new();
  for component in rel.components() {
    match component {
      Component::Normal(os) => parts.push(os.to_str().ok_or(PackageError::BadString)?),
      Component::CurDir => (),
      _ => return Err(PackageError::PathNotInTree),
    }
  }
  if parts.is_empty() {
    return Err(PackageError::EmptyRelativePath);
  }
  Ok(parts.join("/"))
}

/// Validates a stored relative path before joining it under the target
/// root. Both separators are accepted (old writers used backslashes); a
/// leading separator is tolerated and dropped; dot and dot-dot segments
/// are not.
fn sanitize_rel_path(stored: &str) -> PackageResult<PathBuf> {
  let mut out = PathBuf::new();
  for (i, segment) in stored.split(|c| c == '/' || c == '\\').enumerate() {
    match segment {
      "" if i == 0 => (),
      "" | "." | ".." => return Err(PackageError::UnsafeRelativePath),
      normal => out.push(normal),
    }
  }
  if out.as_os_str().is_empty() {
    return Err(PackageError::EmptyRelativePath);
  }
  Ok(out)
}
