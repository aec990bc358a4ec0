#![forbid(unsafe_code)]

//! A crate to squish bytes.
//!
//! Three subsystems, layered bottom up:
//!
//! * [`zlib`]: a DEFLATE compressor and decompressor with the RFC 1950
//!   wrapper (header, Adler-32 trailer). This is the crate's core and the
//!   other two subsystems sit on top of it.
//! * [`png`]: a reader and writer for Portable Network Graphics images,
//!   including interlaced input, scanline filtering, and the usual chunk
//!   and CRC handling (`png` cargo feature).
//! * [`package`]: a streaming file-bundle format that serialises a
//!   directory tree as one header plus per-file deflate-compressed,
//!   MD5-checked records (`package` cargo feature).
//!
//! Each subsystem has its own error enum (`ZlibError`, `PngError`,
//! `PackageError`). All of them can report a broad [`ErrorKind`] and a
//! stable integer id, so callers that only care about "what sort of
//! failure" don't have to match every variant.

#[macro_export]
macro_rules! trace {
  ($($arg:tt)*) => {
    #[cfg(feature = "trace")] {
      ::std::print!("{file}:{line}> ", file = file!(), line = line!());
      ::std::println!($($arg)*);
    }
  }
}

mod util;

pub mod zlib;

#[cfg(feature = "png")]
pub mod png;

#[cfg(feature = "package")]
pub mod package;

/// Broad classification of an error from any subsystem.
///
/// Every concrete error variant maps onto exactly one of these. The split
/// follows the protocol/integrity/resource boundaries of the formats
/// themselves rather than where in the code the error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
  /// A protocol violation in the byte stream: bad magic, a malformed
  /// Huffman table, a back-reference past the window, wrong chunk order,
  /// and so on.
  Format,
  /// A checksum disagreed with the data it covers (Adler-32, CRC-32,
  /// MD5).
  Integrity,
  /// The input ran out mid-stream, or the output could not accept bytes.
  Resource,
  /// The stream asked for a feature this implementation does not have.
  Unsupported,
  /// The caller passed an invalid configuration or path.
  Caller,
}
