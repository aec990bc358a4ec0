//! The DEFLATE decoder: an explicit state machine driven by a bit
//! accumulator, with table-based Huffman decoding.
//!
//! Decoding tables are the flattened multi-level kind: a root table
//! indexed by the next `root` bits whose entries either resolve a symbol
//! directly or link to a sub-table for longer codes. One fixed-size
//! arena holds every table a block can need; a conforming stream can
//! never overflow it.

use super::{adler32, bit_source::BitSource, huffman::FIXED_LIT_LENS, Decompressor, ZlibError, ZlibResult};

pub(crate) const WND_SIZE: usize = 0x8000;
pub(crate) const WND_BUF_SIZE: usize = 0x10000;

/// Arena entries needed in the worst case for a dynamic block's tables.
const ENOUGH: usize = 1440;
/// Worst-case entries a distance table can take out of [`ENOUGH`].
const MAX_DIST_TABLE: usize = 154;
/// Code-length scratch: up to 288 literal/length plus 32 distance codes.
const MAX_LENS: usize = 320;
const MAX_BITS: usize = 15;

/// The fixed-block tables are built from these at stream start: the
/// RFC 1951 fixed literal lengths plus thirty-two 5-bit distance codes
/// (the two impossible ones decode as invalid).
const FIXED_DIST_LENS: [u16; 32] = [5; 32];
/// Arena slots for the fixed tables: a full 9-bit root for the literals
/// and a 5-bit root for the distances, no sub-tables.
const FIXED_LIT_SPACE: usize = 512;
const FIXED_SPACE: usize = FIXED_LIT_SPACE + 32;

/// One decode-table entry.
///
/// `op` is an operation class: 0 for a literal, low bits 1..15 for a
/// sub-table link (bit count of the link), 16+extra for a base
/// length/distance, 32 for end-of-block, 64 for an invalid code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Code {
  op: u8,
  bits: u8,
  val: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
  Head,
  DictId,
  Dict,
  Type,
  Stored,
  Copy,
  Table,
  LenLens,
  CodeLens,
  Len,
  LenExt,
  Dist,
  DistExt,
  Match,
  Lit,
  Check,
  Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableKind {
  Codes,
  Lens,
  Dists,
}

const LBASE: [u16; 31] = [
  3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
  163, 195, 227, 258, 0, 0,
];
const LEXT: [u16; 31] = [
  16, 16, 16, 16, 16, 16, 16, 16, 17, 17, 17, 17, 18, 18, 18, 18, 19, 19, 19, 19, 20, 20, 20, 20,
  21, 21, 21, 21, 16, 76, 66,
];
const DBASE: [u16; 32] = [
  1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537, 2049,
  3073, 4097, 6145, 8193, 12289, 16385, 24577, 0, 0,
];
const DEXT: [u16; 32] = [
  16, 16, 16, 16, 17, 17, 18, 18, 19, 19, 20, 20, 21, 21, 22, 22, 23, 23, 24, 24, 25, 25, 26, 26,
  27, 27, 28, 28, 29, 29, 64, 64,
];

/// Builds a decode table for one alphabet from its code lengths.
///
/// Entries are written into `arena` starting at `*next`, which advances
/// past everything used. `*bits` is the requested root size going in and
/// the actual root size coming out.
fn build_table(
  kind: TableKind, lens: &[u16], arena: &mut [Code], next: &mut usize, bits: &mut u32,
) -> ZlibResult<()> {
  // histogram of code lengths
  let mut count = [0u16; MAX_BITS + 1];
  for &len in lens {
    count[usize::from(len)] += 1;
  }

  // bound the root size by the lengths actually present
  let mut root = *bits as usize;
  let mut max = MAX_BITS;
  while max >= 1 && count[max] == 0 {
    max -= 1;
  }
  if max == 0 {
    return Err(ZlibError::IncompleteTable);
  }
  if root > max {
    root = max;
  }
  let mut min = 1;
  while min < MAX_BITS && count[min] == 0 {
    min += 1;
  }
  if root < min {
    root = min;
  }

  // the lengths must neither oversubscribe nor (except for a
  // single-code distance table) undersubscribe the code space
  let mut left: i32 = 1;
  for len in 1..=MAX_BITS {
    left <<= 1;
    left -= i32::from(count[len]);
    if left < 0 {
      return Err(ZlibError::OversubscribedTable);
    }
  }
  if left > 0 && (kind == TableKind::Codes || lens.len() - usize::from(count[0]) != 1) {
    return Err(ZlibError::IncompleteTable);
  }

  // sort symbols by code length, then symbol value
  let mut offs = [0u16; MAX_BITS + 1];
  for len in 1..MAX_BITS {
    offs[len + 1] = offs[len] + count[len];
  }
  let mut work = [0u16; 288];
  for (sym, &len) in lens.iter().enumerate() {
    if len != 0 {
      work[usize::from(offs[usize::from(len)])] = sym as u16;
      offs[usize::from(len)] += 1;
    }
  }

  // symbols below `end` are literals, `end` itself is end-of-block, the
  // rest map through the base/extra tables
  let end: i32 = match kind {
    TableKind::Codes => 19,
    TableKind::Lens => 256,
    TableKind::Dists => -1,
  };

  let table = *next;
  let mut cur = root;
  let mut drop_bits = 0usize;
  let mut huff = 0usize;
  let mut len = min;
  let mut sym = 0usize;
  let mut low = usize::MAX;
  let mut used = 1usize << root;
  let mask = used - 1;
  let mut sub = table;

  if kind == TableKind::Lens && used >= ENOUGH - MAX_DIST_TABLE {
    return Err(ZlibError::TableOverflow);
  }

  loop {
    let w = i32::from(work[sym]);
    let here = if w < end {
      Code { op: 0, bits: (len - drop_bits) as u8, val: work[sym] }
    } else if w > end {
      let idx = match kind {
        TableKind::Lens => (w - 257) as usize,
        _ => w as usize,
      };
      let (base, extra) = match kind {
        TableKind::Lens => (&LBASE[..], &LEXT[..]),
        _ => (&DBASE[..], &DEXT[..]),
      };
      Code { op: extra[idx] as u8, bits: (len - drop_bits) as u8, val: base[idx] }
    } else {
      Code { op: 32 + 64, bits: (len - drop_bits) as u8, val: 0 }
    };

    // replicate the entry across every index whose low bits match
    let incr = 1usize << (len - drop_bits);
    let mut fill = 1usize << cur;
    loop {
      fill -= incr;
      arena[sub + (huff >> drop_bits) + fill] = here;
      if fill == 0 {
        break;
      }
    }

    // backwards-increment the `len`-bit code
    let mut step = 1usize << (len - 1);
    while huff & step != 0 {
      step >>= 1;
    }
    huff = if step != 0 { (huff & (step - 1)) + step } else { 0 };

    sym += 1;
    count[len] -= 1;
    if count[len] == 0 {
      if len == max {
        break;
      }
      len = usize::from(lens[usize::from(work[sym])]);
    }

    // codes longer than the root open a sub-table
    if len > root && (huff & mask) != low {
      if drop_bits == 0 {
        drop_bits = root;
      }
      sub += 1usize << cur;

      // size the sub-table to cover the remaining lengths
      cur = len - drop_bits;
      let mut left = 1i32 << cur;
      while cur + drop_bits < max {
        left -= i32::from(count[cur + drop_bits]);
        if left <= 0 {
          break;
        }
        cur += 1;
        left <<= 1;
      }

      used += 1usize << cur;
      if kind == TableKind::Lens && used >= ENOUGH - MAX_DIST_TABLE {
        return Err(ZlibError::TableOverflow);
      }

      // link the root entry to the new sub-table
      low = huff & mask;
      arena[table + low] =
        Code { op: cur as u8, bits: root as u8, val: (sub - table) as u16 };
    }
  }

  // an allowed-incomplete code leaves some patterns invalid
  let mut here = Code { op: 64, bits: (len - drop_bits) as u8, val: 0 };
  while huff != 0 {
    if drop_bits != 0 && (huff & mask) != low {
      drop_bits = 0;
      len = root;
      sub = table;
      cur = root;
      here.bits = len as u8;
    }
    arena[sub + (huff >> drop_bits)] = here;

    let mut step = 1usize << (len - 1);
    while huff & step != 0 {
      step >>= 1;
    }
    huff = if step != 0 { (huff & (step - 1)) + step } else { 0 };
  }

  *next = table + used;
  *bits = root as u32;
  Ok(())
}

/// Reads a table entry from whichever arena the current block uses (the
/// per-stream fixed tables or the per-block dynamic ones).
#[inline]
fn entry(fixed: &[Code], arena: &[Code], from_fixed: bool, at: usize) -> Code {
  if from_fixed {
    fixed[at]
  } else {
    arena[at]
  }
}

#[test]
fn test_build_table_rejects_oversubscription() {
  // five one-bit codes oversubscribe any prefix code
  let lens = [1u16; 5];
  let mut arena = [Code::default(); ENOUGH];
  let mut next = 0;
  let mut bits = 7;
  assert_eq!(
    build_table(TableKind::Codes, &lens, &mut arena, &mut next, &mut bits),
    Err(ZlibError::OversubscribedTable)
  );
}

#[test]
fn test_build_table_allows_a_single_distance_code() {
  // an incomplete code is legal only for a one-code distance table
  let mut lens = [0u16; 30];
  lens[3] = 1;
  let mut arena = [Code::default(); ENOUGH];
  let mut next = 0;
  let mut bits = 6;
  build_table(TableKind::Dists, &lens, &mut arena, &mut next, &mut bits).unwrap();
  assert_eq!(bits, 1);
  // bit pattern 0 resolves the symbol, pattern 1 marks an invalid code
  assert_eq!(arena[0], Code { op: DEXT[3] as u8, bits: 1, val: DBASE[3] });
  assert_eq!(arena[1].op, 64);

  // two codes that still leave code space open are fatal everywhere
  let mut lens = [0u16; 288];
  lens[65] = 2;
  lens[66] = 2;
  let mut next = 0;
  let mut bits = 9;
  assert_eq!(
    build_table(TableKind::Lens, &lens, &mut arena, &mut next, &mut bits),
    Err(ZlibError::IncompleteTable)
  );
}

impl Decompressor {
  fn put_byte(&mut self, out: &mut Vec<u8>, byte: u8) {
    if self.bytes_avail + 1 >= WND_BUF_SIZE {
      self.flush_window(out);
    }
    self.window[self.bytes_avail] = byte;
    self.bytes_avail += 1;
  }

  /// Copies a match forward byte by byte; overlapping source and target
  /// is what makes distance-1 runs work.
  fn copy_match(&mut self, out: &mut Vec<u8>, offset: usize, count: usize) {
    if self.bytes_avail + count >= WND_BUF_SIZE {
      self.flush_window(out);
    }
    let mut tar = self.bytes_avail;
    let mut src = tar - offset;
    for _ in 0..count {
      self.window[tar] = self.window[src];
      tar += 1;
      src += 1;
    }
    self.bytes_avail += count;
  }

  /// Hands everything over a window's worth to the caller, keeping the
  /// last 32 KiB around for back-references.
  fn flush_window(&mut self, out: &mut Vec<u8>) {
    if self.bytes_avail > WND_SIZE {
      let flush = self.bytes_avail - WND_SIZE;
      out.extend_from_slice(&self.window[..flush]);
      self.adler = adler32(self.adler, &self.window[..flush]);
      self.window.copy_within(flush..self.bytes_avail, 0);
      self.bytes_avail -= flush;
      self.total_out += flush;
    }
  }

  pub(super) fn inflate<'b, I: Iterator<Item = &'b [u8]>>(
    &mut self, bits: &mut BitSource<'b, I>, out: &mut Vec<u8>,
  ) -> ZlibResult<()> {
    // the fixed-block tables are rebuilt per stream; it's cheap and it
    // shares the one table builder
    let mut fixed = [Code::default(); FIXED_SPACE];
    {
      let mut next = 0;
      let mut fixed_bits = 9;
      build_table(TableKind::Lens, &FIXED_LIT_LENS, &mut fixed, &mut next, &mut fixed_bits)?;
      debug_assert_eq!(next, FIXED_LIT_SPACE);
      let mut fixed_bits = 5;
      build_table(TableKind::Dists, &FIXED_DIST_LENS, &mut fixed, &mut next, &mut fixed_bits)?;
    }

    let mut arena = [Code::default(); ENOUGH];
    let mut lens = [0u16; MAX_LENS];

    let mut mode = Mode::Head;
    let mut last_block = false;
    let mut use_fixed = false;
    let mut len_off = 0usize;
    let mut dist_off = 0usize;
    let mut len_bits = 0u32;
    let mut dist_bits = 0u32;
    let mut num_lens = 0usize;
    let mut num_dists = 0usize;
    let mut num_codes = 0usize;
    let mut lens_count = 0usize;
    let mut length = 0usize;
    let mut offset = 0usize;
    let mut extra = 0u32;

    loop {
      match mode {
        Mode::Head => {
          bits.reserve(16)?;
          let cmf = bits.peek(8);
          let flg = bits.peek(16) >> 8;
          if ((cmf << 8) | flg) % 31 != 0 {
            return Err(ZlibError::BadHeaderCheck);
          }
          if bits.peek(4) != 8 {
            return Err(ZlibError::BadCompressionMethod);
          }
          bits.drop_bits(4);
          if bits.peek(4) + 8 > 15 {
            return Err(ZlibError::BadWindowSize);
          }
          let fdict = bits.peek(10) & 0x200 != 0;
          mode = if fdict { Mode::DictId } else { Mode::Type };
          bits.clear();
        }

        Mode::DictId => {
          // the preset-dictionary Adler-32, which nothing here can use
          bits.reserve(32)?;
          bits.clear();
          mode = Mode::Dict;
        }

        Mode::Dict => {
          return Err(ZlibError::NeedsDictionary);
        }

        Mode::Type => {
          if last_block {
            bits.byte_align();
            mode = Mode::Check;
            continue;
          }
          bits.reserve(3)?;
          last_block = bits.take(1) != 0;
          match bits.take(2) {
            0 => mode = Mode::Stored,
            1 => {
              use_fixed = true;
              len_off = 0;
              len_bits = 9;
              dist_off = FIXED_LIT_SPACE;
              dist_bits = 5;
              mode = Mode::Len;
            }
            2 => mode = Mode::Table,
            _ => return Err(ZlibError::BadBlockType),
          }
        }

        Mode::Stored => {
          bits.byte_align();
          bits.reserve(32)?;
          let v = bits.take(32);
          if v & 0xFFFF != (v >> 16) ^ 0xFFFF {
            return Err(ZlibError::BadStoredLength);
          }
          length = (v & 0xFFFF) as usize;
          mode = Mode::Copy;
        }

        Mode::Copy => {
          for _ in 0..length {
            bits.reserve(8)?;
            let byte = bits.take(8) as u8;
            self.put_byte(out, byte);
          }
          mode = Mode::Type;
        }

        Mode::Table => {
          bits.reserve(14)?;
          num_lens = bits.take(5) as usize + 257;
          num_dists = bits.take(5) as usize + 1;
          num_codes = bits.take(4) as usize + 4;
          lens_count = 0;
          mode = Mode::LenLens;
        }

        Mode::LenLens => {
          const ORDER: [usize; 19] = [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];
          while lens_count < num_codes {
            bits.reserve(3)?;
            lens[ORDER[lens_count]] = bits.take(3) as u16;
            lens_count += 1;
          }
          while lens_count < 19 {
            lens[ORDER[lens_count]] = 0;
            lens_count += 1;
          }
          let mut next = 0;
          len_bits = 7;
          build_table(TableKind::Codes, &lens[..19], &mut arena, &mut next, &mut len_bits)?;
          use_fixed = false;
          len_off = 0;
          lens_count = 0;
          mode = Mode::CodeLens;
        }

        Mode::CodeLens => {
          while lens_count < num_lens + num_dists {
            let here = loop {
              let c = entry(&fixed, &arena, use_fixed, len_off + bits.peek(len_bits) as usize);
              if u32::from(c.bits) <= bits.available() {
                break c;
              }
              bits.pull_byte()?;
            };

            if here.val < 16 {
              bits.take(u32::from(here.bits));
              lens[lens_count] = here.val;
              lens_count += 1;
            } else {
              let copy;
              let len;
              if here.val == 16 {
                bits.reserve(u32::from(here.bits) + 2)?;
                bits.drop_bits(u32::from(here.bits));
                if lens_count == 0 {
                  return Err(ZlibError::BadCodeLengthRepeat);
                }
                len = lens[lens_count - 1];
                copy = 3 + bits.take(2) as usize;
              } else if here.val == 17 {
                bits.reserve(u32::from(here.bits) + 3)?;
                bits.drop_bits(u32::from(here.bits));
                len = 0;
                copy = 3 + bits.take(3) as usize;
              } else {
                bits.reserve(u32::from(here.bits) + 7)?;
                bits.drop_bits(u32::from(here.bits));
                len = 0;
                copy = 11 + bits.take(7) as usize;
              }
              if lens_count + copy > num_lens + num_dists {
                return Err(ZlibError::BadCodeLengthRepeat);
              }
              for _ in 0..copy {
                lens[lens_count] = len;
                lens_count += 1;
              }
            }
          }

          let mut next = 0;
          len_bits = 9;
          build_table(TableKind::Lens, &lens[..num_lens], &mut arena, &mut next, &mut len_bits)?;
          len_off = 0;
          dist_off = next;
          dist_bits = 6;
          build_table(
            TableKind::Dists,
            &lens[num_lens..num_lens + num_dists],
            &mut arena,
            &mut next,
            &mut dist_bits,
          )?;
          use_fixed = false;
          mode = Mode::Len;
        }

        Mode::Len => {
          let mut here = loop {
            let c = entry(&fixed, &arena, use_fixed, len_off + bits.peek(len_bits) as usize);
            if u32::from(c.bits) <= bits.available() {
              break c;
            }
            bits.pull_byte()?;
          };
          if here.op != 0 && here.op & 0xF0 == 0 {
            // second-level table
            let last = here;
            here = loop {
              let idx = usize::from(last.val)
                + ((bits.peek(u32::from(last.bits) + u32::from(last.op)) >> last.bits) as usize);
              let c = entry(&fixed, &arena, use_fixed, len_off + idx);
              if u32::from(last.bits) + u32::from(c.bits) <= bits.available() {
                break c;
              }
              bits.pull_byte()?;
            };
            bits.drop_bits(u32::from(last.bits));
          }
          bits.drop_bits(u32::from(here.bits));
          length = usize::from(here.val);

          if here.op == 0 {
            mode = Mode::Lit;
          } else if here.op & 32 != 0 {
            mode = Mode::Type;
          } else if here.op & 64 != 0 {
            return Err(ZlibError::BadLiteralLengthCode);
          } else {
            extra = u32::from(here.op & 15);
            mode = Mode::LenExt;
          }
        }

        Mode::LenExt => {
          if extra != 0 {
            bits.reserve(extra)?;
            length += bits.take(extra) as usize;
          }
          mode = Mode::Dist;
        }

        Mode::Dist => {
          let mut here = loop {
            let c = entry(&fixed, &arena, use_fixed, dist_off + bits.peek(dist_bits) as usize);
            if u32::from(c.bits) <= bits.available() {
              break c;
            }
            bits.pull_byte()?;
          };
          if here.op & 0xF0 == 0 {
            let last = here;
            here = loop {
              let idx = usize::from(last.val)
                + ((bits.peek(u32::from(last.bits) + u32::from(last.op)) >> last.bits) as usize);
              let c = entry(&fixed, &arena, use_fixed, dist_off + idx);
              if u32::from(last.bits) + u32::from(c.bits) <= bits.available() {
                break c;
              }
              bits.pull_byte()?;
            };
            bits.drop_bits(u32::from(last.bits));
          }
          bits.drop_bits(u32::from(here.bits));
          if here.op & 64 != 0 {
            return Err(ZlibError::BadDistanceCode);
          }
          offset = usize::from(here.val);
          extra = u32::from(here.op & 15);
          mode = Mode::DistExt;
        }

        Mode::DistExt => {
          if extra != 0 {
            bits.reserve(extra)?;
            offset += bits.take(extra) as usize;
          }
          if offset > self.bytes_avail {
            return Err(ZlibError::DistanceTooFar);
          }
          mode = Mode::Match;
        }

        Mode::Match => {
          self.copy_match(out, offset, length);
          offset = 0;
          length = 0;
          mode = Mode::Len;
        }

        Mode::Lit => {
          self.put_byte(out, length as u8);
          mode = Mode::Len;
        }

        Mode::Check => {
          if self.bytes_avail > 0 {
            out.extend_from_slice(&self.window[..self.bytes_avail]);
            self.adler = adler32(self.adler, &self.window[..self.bytes_avail]);
            self.total_out += self.bytes_avail;
            self.bytes_avail = 0;
          }
          bits.reserve(32)?;
          if bits.take(32).swap_bytes() != self.adler {
            return Err(ZlibError::AdlerMismatch);
          }
          mode = Mode::Done;
        }

        Mode::Done => return Ok(()),
      }
    }
  }
}
