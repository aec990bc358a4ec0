//! DEFLATE compression and decompression with the RFC 1950 wrapper.
//!
//! The compressed format is the standard one: a two byte zlib header, a
//! series of DEFLATE blocks (stored, fixed-Huffman, or dynamic-Huffman),
//! and a big-endian Adler-32 trailer over the uncompressed bytes.
//!
//! ## One-shot use
//!
//! ```
//! use squish::zlib::{compress, decompress, CompLevel};
//! let packed = compress(b"hello hello hello hello", CompLevel::L9).unwrap();
//! let plain = decompress(&packed).unwrap();
//! assert_eq!(&plain, b"hello hello hello hello");
//! ```
//!
//! ## Reusing the working buffers
//!
//! A [`Compressor`] owns roughly 256 KiB of scratch (sliding window, hash
//! chains, symbol accumulators, Huffman state) and a [`Decompressor`]
//! owns a 64 KiB output window. Both reset themselves at the start of
//! every call, so one instance can serve any number of streams, one at a
//! time. Instances are independent: run one per thread if you want
//! parallelism.

use crate::ErrorKind;

mod adler32;
pub(crate) use adler32::adler32;

mod bit_sink;
use bit_sink::BitSink;

mod bit_source;
use bit_source::BitSource;

mod huffman;
use huffman::{DynTree, STATIC_BIT_LEN_INFO, STATIC_DIST_INFO, STATIC_LIT_INFO};

mod deflate;
mod inflate;

pub type ZlibResult<T> = Result<T, ZlibError>;

/// An error from the DEFLATE codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum ZlibError {
  /// The input stream ended before the format said it should.
  UnexpectedEndOfInput,
  /// The two header bytes fail the mod-31 check.
  BadHeaderCheck,
  /// The header's compression method nibble isn't 8 (deflate).
  BadCompressionMethod,
  /// The header asks for a window larger than 32 KiB.
  BadWindowSize,
  /// The header set FDICT, and no preset dictionary is available here.
  NeedsDictionary,
  /// A block used the reserved block type `0b11`.
  BadBlockType,
  /// A stored block's LEN and NLEN fields are not complements.
  BadStoredLength,
  /// A dynamic block's code lengths oversubscribe the code space.
  OversubscribedTable,
  /// A dynamic block's code lengths leave the code space incomplete.
  IncompleteTable,
  /// A dynamic block's tables exceed the fixed decode-table space.
  TableOverflow,
  /// A repeat symbol (16) appeared before any length to repeat.
  BadCodeLengthRepeat,
  /// A literal/length code decoded to an invalid entry.
  BadLiteralLengthCode,
  /// A distance code decoded to an invalid entry.
  BadDistanceCode,
  /// A back-reference reaches behind the bytes produced so far.
  DistanceTooFar,
  /// The Adler-32 trailer doesn't match the decompressed bytes.
  AdlerMismatch,
  /// Compression levels 1 through 3 select the "fast" deflate strategy,
  /// which this implementation does not carry.
  FastStrategyUnsupported,
  /// A stored block was chosen after the window slid past the block's
  /// start, so its bytes are no longer addressable. Callers that hit
  /// this on already-compressed input generally store the input raw
  /// instead.
  WindowSlidStored,
}
impl ZlibError {
  /// The broad category this error belongs to.
  #[inline]
  #[must_use]
  pub const fn kind(self) -> ErrorKind {
    use ZlibError::*;
    match self {
      UnexpectedEndOfInput | WindowSlidStored => ErrorKind::Resource,
      AdlerMismatch => ErrorKind::Integrity,
      BadCompressionMethod | NeedsDictionary | FastStrategyUnsupported => ErrorKind::Unsupported,
      _ => ErrorKind::Format,
    }
  }

  /// A stable integer identifier for this error.
  #[inline]
  #[must_use]
  pub const fn id(self) -> u16 {
    use ZlibError::*;
    match self {
      UnexpectedEndOfInput => 1,
      BadHeaderCheck => 2,
      BadCompressionMethod => 3,
      BadWindowSize => 4,
      NeedsDictionary => 5,
      BadBlockType => 6,
      BadStoredLength => 7,
      OversubscribedTable => 8,
      IncompleteTable => 9,
      TableOverflow => 10,
      BadCodeLengthRepeat => 11,
      BadLiteralLengthCode => 12,
      BadDistanceCode => 13,
      DistanceTooFar => 14,
      AdlerMismatch => 15,
      FastStrategyUnsupported => 16,
      WindowSlidStored => 17,
    }
  }
}
impl core::fmt::Display for ZlibError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    use ZlibError::*;
    let msg = match self {
      UnexpectedEndOfInput => "input ended mid-stream",
      BadHeaderCheck => "zlib header check failed",
      BadCompressionMethod => "compression method is not deflate",
      BadWindowSize => "window size over 32K",
      NeedsDictionary => "stream wants a preset dictionary",
      BadBlockType => "reserved block type",
      BadStoredLength => "stored block length check failed",
      OversubscribedTable => "code lengths oversubscribe the table",
      IncompleteTable => "code lengths leave the table incomplete",
      TableOverflow => "decode table space exhausted",
      BadCodeLengthRepeat => "length repeat with nothing to repeat",
      BadLiteralLengthCode => "invalid literal/length code",
      BadDistanceCode => "invalid distance code",
      DistanceTooFar => "distance reaches before output start",
      AdlerMismatch => "adler-32 trailer mismatch",
      FastStrategyUnsupported => "fast deflate strategy not implemented",
      WindowSlidStored => "stored block start slid out of the window",
    };
    write!(f, "zlib error {}: {}", self.id(), msg)
  }
}
impl std::error::Error for ZlibError {}

/// Compression aggressiveness, 0 (stored blocks only) through 9.
///
/// Each level selects a row of match-search tuning parameters. Levels 1
/// through 3 select the "fast" greedy strategy, which this implementation
/// does not carry; using them fails with
/// [`ZlibError::FastStrategyUnsupported`] rather than silently picking a
/// different level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum CompLevel {
  L0,
  L1,
  L2,
  L3,
  L4,
  L5,
  L6,
  L7,
  L8,
  L9,
}
impl CompLevel {
  #[inline]
  #[must_use]
  pub(crate) const fn index(self) -> usize {
    self as usize
  }
}
impl Default for CompLevel {
  #[inline]
  fn default() -> Self {
    CompLevel::L9
  }
}

/// How the match finder treats the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strategy {
  /// Normal string matching.
  Default,
  /// For data produced by a predictive filter: short matches at long
  /// distances are dropped because their encoding cost rarely pays.
  Filtered,
  /// No string matching at all, literals only.
  HuffmanOnly,
}
impl Default for Strategy {
  #[inline]
  fn default() -> Self {
    Strategy::Default
  }
}

/// A reusable DEFLATE encoder.
///
/// See the [module docs](self) for the buffer-ownership story.
pub struct Compressor {
  level: CompLevel,
  strategy: Strategy,
  // tuning, looked up from the level
  good_len: usize,
  max_lazy: usize,
  nice_len: usize,
  max_chain: usize,
  // 64 KiB window plus guard bytes so the match scan can overshoot the
  // end by up to MAX_MATCH without bounds trouble.
  window: Vec<u8>,
  hash_head: Vec<u16>,
  hash_prev: Vec<u16>,
  // per-block symbol accumulators: length-or-literal byte plus distance
  // (distance 0 marks a literal)
  ll_accum: Vec<u8>,
  dist_accum: Vec<u16>,
  lit_tree: DynTree,
  dist_tree: DynTree,
  bit_len_tree: DynTree,
  sink: BitSink,
  adler: u32,
  cur_ofs: usize,
  bytes_avail: usize,
  in_pos: usize,
  end_of_input: bool,
}

impl Compressor {
  /// A compressor with the default matching strategy.
  #[must_use]
  pub fn new(level: CompLevel) -> Self {
    Self::with_strategy(level, Strategy::Default)
  }

  /// A compressor with an explicit strategy.
  #[must_use]
  pub fn with_strategy(level: CompLevel, strategy: Strategy) -> Self {
    let params = &deflate::LEVEL_PARAMS[level.index()];
    Self {
      level,
      strategy,
      good_len: params.good_len,
      max_lazy: params.max_lazy,
      nice_len: params.nice_len,
      max_chain: params.max_chain,
      window: vec![0; deflate::WND_BUF_SIZE + deflate::MAX_MATCH],
      hash_head: vec![0; deflate::HASH_SIZE],
      hash_prev: vec![0; deflate::HASH_SIZE],
      ll_accum: vec![0; deflate::WND_SIZE],
      dist_accum: vec![0; deflate::WND_SIZE],
      lit_tree: DynTree::new(huffman::HEAP_SIZE, &STATIC_LIT_INFO),
      dist_tree: DynTree::new(huffman::DIST_CODES * 2 + 1, &STATIC_DIST_INFO),
      bit_len_tree: DynTree::new(huffman::BIT_LEN_CODES * 2 + 1, &STATIC_BIT_LEN_INFO),
      sink: BitSink::new(),
      adler: 1,
      cur_ofs: 0,
      bytes_avail: 0,
      in_pos: 0,
      end_of_input: false,
    }
  }

  /// The level this compressor was built with.
  #[inline]
  #[must_use]
  pub const fn level(&self) -> CompLevel {
    self.level
  }

  /// Compresses `src` as one complete zlib stream appended to `out`.
  ///
  /// Returns the number of bytes appended.
  pub fn compress(&mut self, src: &[u8], out: &mut Vec<u8>) -> ZlibResult<usize> {
    let start = out.len();
    self.reset();
    self.write_header(out);
    match deflate::LEVEL_PARAMS[self.level.index()].func {
      deflate::CompFunc::Store => self.deflate_store(src, out)?,
      deflate::CompFunc::Fast => return Err(ZlibError::FastStrategyUnsupported),
      deflate::CompFunc::Slow => self.deflate_slow(src, out)?,
    }
    self.sink.flush_to_byte(out);
    out.extend_from_slice(&self.adler.to_be_bytes());
    Ok(out.len() - start)
  }

  fn write_header(&mut self, out: &mut Vec<u8>) {
    // CMF: method 8 in the low nibble, window bits minus 8 in the high.
    let mut header = (8u16 + ((15 - 8) << 4)) << 8;
    let lvl_flags: u16 = if self.strategy >= Strategy::HuffmanOnly || self.level < CompLevel::L2 {
      0
    } else if self.level < CompLevel::L6 {
      1
    } else if self.level == CompLevel::L6 {
      2
    } else {
      3
    };
    header |= lvl_flags << 6;
    header += 31 - (header % 31);
    out.extend_from_slice(&header.to_be_bytes());
  }

  fn reset(&mut self) {
    self.adler = 1;
    self.cur_ofs = 0;
    self.bytes_avail = 0;
    self.in_pos = 0;
    self.end_of_input = false;
    self.sink.reset();
    self.per_block_reset();
  }
}

/// A reusable DEFLATE decoder.
///
/// Owns the 64 KiB sliding output window required for back-references;
/// decoded bytes are flushed from it into the caller's `Vec`.
pub struct Decompressor {
  window: Vec<u8>,
  bytes_avail: usize,
  adler: u32,
  total_out: usize,
}

impl Decompressor {
  #[allow(clippy::new_without_default)]
  #[must_use]
  pub fn new() -> Self {
    Self { window: vec![0; inflate::WND_BUF_SIZE], bytes_avail: 0, adler: 1, total_out: 0 }
  }

  /// Decompresses one complete zlib stream, appending the plain bytes to
  /// `out`. Returns the number of bytes appended.
  pub fn decompress(&mut self, src: &[u8], out: &mut Vec<u8>) -> ZlibResult<usize> {
    self.decompress_chunks(core::iter::once(src), out)
  }

  /// Like [`decompress`](Self::decompress), but the stream arrives as a
  /// series of byte slices treated as one contiguous whole. This is the
  /// shape PNG hands us: several IDAT chunks, one deflate stream.
  pub fn decompress_chunks<'b>(
    &mut self, chunks: impl Iterator<Item = &'b [u8]>, out: &mut Vec<u8>,
  ) -> ZlibResult<usize> {
    self.bytes_avail = 0;
    self.adler = 1;
    self.total_out = 0;
    let mut bits = BitSource::new(chunks);
    self.inflate(&mut bits, out)?;
    Ok(self.total_out)
  }
}

/// One-shot compression of `bytes` at the given level.
pub fn compress(bytes: &[u8], level: CompLevel) -> ZlibResult<Vec<u8>> {
  let mut out = Vec::new();
  Compressor::new(level).compress(bytes, &mut out)?;
  Ok(out)
}

/// One-shot decompression of a complete zlib stream.
pub fn decompress(bytes: &[u8]) -> ZlibResult<Vec<u8>> {
  let mut out = Vec::new();
  Decompressor::new().decompress(bytes, &mut out)?;
  Ok(out)
}
