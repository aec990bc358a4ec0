//! The DEFLATE encoder: lazy-match LZ77 over a sliding window, then
//! stored / fixed-Huffman / dynamic-Huffman block emission, whichever
//! estimates smallest.

use super::{
  adler32,
  bit_sink::{put_u16_le, BitSink},
  huffman::{
    dist_code, Tree, BASE_DIST, BASE_LENGTH, BIT_LEN_CODES, BIT_LEN_ORDER, END_BLOCK,
    EXTRA_DIST_BITS, EXTRA_LENGTH_BITS, FIXED_DIST_CODES, FIXED_DIST_LENS, FIXED_LIT_CODES,
    FIXED_LIT_LENS, LENGTH_CODE, LITERALS, REP_3_6, REP_Z_11_138, REP_Z_3_10,
  },
  Compressor, Strategy, ZlibError, ZlibResult,
};

pub(crate) const WND_SIZE: usize = 0x8000;
pub(crate) const WND_MASK: usize = 0x7FFF;
pub(crate) const WND_BUF_SIZE: usize = 0x10000;

pub(crate) const MIN_MATCH: usize = 3;
pub(crate) const MAX_MATCH: usize = 258;
pub(crate) const MIN_LOOKAHEAD: usize = MAX_MATCH - MIN_MATCH + 1;
pub(crate) const MAX_DIST: usize = WND_SIZE - MIN_LOOKAHEAD;

pub(crate) const HASH_BITS: usize = 15;
pub(crate) const HASH_SIZE: usize = 1 << HASH_BITS;
pub(crate) const HASH_MASK: usize = HASH_SIZE - 1;
pub(crate) const HASH_SHIFT: usize = (HASH_BITS + MIN_MATCH - 1) / MIN_MATCH;

/// Length-3 matches further back than this cost more than they save.
const TOO_FAR: usize = 4096;

const BTYPE_STORED: u32 = 0;
const BTYPE_FIXED: u32 = 1;
const BTYPE_DYNAMIC: u32 = 2;

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompFunc {
  Store,
  Fast,
  Slow,
}

/// Match-search tuning for one compression level.
pub(crate) struct LevelParams {
  pub good_len: usize,
  pub max_lazy: usize,
  pub nice_len: usize,
  pub max_chain: usize,
  pub func: CompFunc,
}

#[rustfmt::skip]
pub(crate) const LEVEL_PARAMS: [LevelParams; 10] = [
  LevelParams { good_len:  0, max_lazy:   0, nice_len:   0, max_chain:    0, func: CompFunc::Store },
  LevelParams { good_len:  4, max_lazy:   4, nice_len:   8, max_chain:    4, func: CompFunc::Fast },
  LevelParams { good_len:  4, max_lazy:   5, nice_len:  16, max_chain:    8, func: CompFunc::Fast },
  LevelParams { good_len:  4, max_lazy:   6, nice_len:  32, max_chain:   32, func: CompFunc::Fast },
  LevelParams { good_len:  4, max_lazy:   4, nice_len:  16, max_chain:   16, func: CompFunc::Slow },
  LevelParams { good_len:  8, max_lazy:  16, nice_len:  32, max_chain:   32, func: CompFunc::Slow },
  LevelParams { good_len:  8, max_lazy:  16, nice_len: 128, max_chain:  128, func: CompFunc::Slow },
  LevelParams { good_len:  8, max_lazy:  32, nice_len: 128, max_chain:  256, func: CompFunc::Slow },
  LevelParams { good_len: 32, max_lazy: 128, nice_len: 258, max_chain: 1024, func: CompFunc::Slow },
  LevelParams { good_len: 32, max_lazy: 258, nice_len: 258, max_chain: 4096, func: CompFunc::Slow },
];

/// A (code, length) pair table for one alphabet, either the fixed preset
/// or a freshly built dynamic tree.
struct CodeSet<'a> {
  codes: &'a [u16],
  lens: &'a [u16],
}

#[inline]
fn send_code(sink: &mut BitSink, out: &mut Vec<u8>, sym: usize, set: &CodeSet<'_>) {
  sink.send_bits(out, u32::from(set.codes[sym]), u32::from(set.lens[sym]));
}

/// Emits the accumulated literal and match symbols with the given code
/// tables, then the end-of-block code.
fn compress_block(
  sink: &mut BitSink, out: &mut Vec<u8>, ll_accum: &[u8], dist_accum: &[u16], last_lit: usize,
  lit: &CodeSet<'_>, dist: &CodeSet<'_>,
) {
  for i in 0..last_lit {
    let mut dist_v = dist_accum[i];
    let ll = ll_accum[i];
    if dist_v == 0 {
      send_code(sink, out, usize::from(ll), lit);
    } else {
      let code = usize::from(LENGTH_CODE[usize::from(ll)]);
      send_code(sink, out, code + LITERALS + 1, lit);
      let extra = u32::from(EXTRA_LENGTH_BITS[code]);
      if extra != 0 {
        let len_rest = u16::from(ll) - BASE_LENGTH[code];
        sink.send_bits(out, u32::from(len_rest), extra);
      }

      dist_v -= 1;
      let dcode = usize::from(dist_code(dist_v));
      send_code(sink, out, dcode, dist);
      let extra = u32::from(EXTRA_DIST_BITS[dcode]);
      if extra != 0 {
        let dist_rest = dist_v - BASE_DIST[dcode];
        sink.send_bits(out, u32::from(dist_rest), extra);
      }
    }
  }
  send_code(sink, out, END_BLOCK, lit);
}

/// Counts how the target tree's code lengths will be spelled with the
/// code-length alphabet (literal lengths, repeats, zero runs), bumping
/// the bit-length tree's frequencies to match.
fn scan_tree(target: &mut Tree, max_code: usize, bl: &mut Tree) {
  let mut next_len = target.len(0);
  let mut prev_len = u16::MAX;
  let (mut max_count, mut min_count) = if next_len == 0 { (138, 3) } else { (7, 4) };

  // guard so the final run terminates
  target.set_len(max_code + 1, u16::MAX);

  let mut count: u16 = 0;
  for index in 0..=max_code {
    let cur_len = next_len;
    next_len = target.len(index + 1);
    count += 1;
    if count < max_count && cur_len == next_len {
      continue;
    }

    if count < min_count {
      bl.freq_code[usize::from(cur_len)] += count;
    } else if cur_len != 0 {
      if cur_len != prev_len {
        bl.bump_freq(usize::from(cur_len));
      }
      bl.bump_freq(REP_3_6);
    } else if count <= 10 {
      bl.bump_freq(REP_Z_3_10);
    } else {
      bl.bump_freq(REP_Z_11_138);
    }

    count = 0;
    prev_len = cur_len;
    if next_len == 0 {
      max_count = 138;
      min_count = 3;
    } else if cur_len == next_len {
      max_count = 6;
      min_count = 3;
    } else {
      max_count = 7;
      min_count = 4;
    }
  }
}

/// Emits the target tree's code lengths using the bit-length tree, run
/// for run, mirroring [`scan_tree`]'s segmentation.
fn send_tree(
  sink: &mut BitSink, out: &mut Vec<u8>, target: &Tree, max_code: usize, bl: &CodeSet<'_>,
) {
  let mut next_len = target.len(0);
  let mut prev_len = u16::MAX;
  let (mut max_count, mut min_count) = if next_len == 0 { (138, 3) } else { (7, 4) };

  let mut count: u16 = 0;
  for index in 0..=max_code {
    let cur_len = next_len;
    next_len = target.len(index + 1);
    count += 1;
    if count < max_count && cur_len == next_len {
      continue;
    }

    if count < min_count {
      loop {
        send_code(sink, out, usize::from(cur_len), bl);
        count -= 1;
        if count == 0 {
          break;
        }
      }
    } else if cur_len != 0 {
      if cur_len != prev_len {
        send_code(sink, out, usize::from(cur_len), bl);
        count -= 1;
      }
      send_code(sink, out, REP_3_6, bl);
      sink.send_bits(out, u32::from(count) - 3, 2);
    } else if count <= 10 {
      send_code(sink, out, REP_Z_3_10, bl);
      sink.send_bits(out, u32::from(count) - 3, 3);
    } else {
      send_code(sink, out, REP_Z_11_138, bl);
      sink.send_bits(out, u32::from(count) - 11, 7);
    }

    count = 0;
    prev_len = cur_len;
    if next_len == 0 {
      max_count = 138;
      min_count = 3;
    } else if cur_len == next_len {
      max_count = 6;
      min_count = 3;
    } else {
      max_count = 7;
      min_count = 4;
    }
  }
}

impl Compressor {
  /// Copies more input into the window, sliding the upper half down over
  /// the lower (and rebasing the hash chains) when the write position
  /// nears the end. Returns whether a slide happened so the caller can
  /// rebase its own offsets.
  fn fill_window(&mut self, src: &[u8]) -> bool {
    let mut shifted = false;
    if self.cur_ofs >= WND_BUF_SIZE - MIN_LOOKAHEAD {
      self.window.copy_within(WND_SIZE..WND_BUF_SIZE, 0);
      self.cur_ofs -= WND_SIZE;

      // positions below the slide line have fallen out of reach
      for head in self.hash_head.iter_mut() {
        *head = if *head >= WND_SIZE as u16 { *head - WND_SIZE as u16 } else { 0 };
      }
      for prev in self.hash_prev.iter_mut() {
        *prev = if *prev >= WND_SIZE as u16 { *prev - WND_SIZE as u16 } else { 0 };
      }
      shifted = true;
    }

    let cur_end = self.cur_ofs + self.bytes_avail;
    let to_read = WND_BUF_SIZE - cur_end;
    let got = self.read_buf(src, cur_end, to_read);
    self.bytes_avail += got;
    shifted
  }

  /// Pulls up to `up_to` bytes of input into the window at `dest_ofs`,
  /// keeping the running Adler-32 over everything consumed.
  fn read_buf(&mut self, src: &[u8], dest_ofs: usize, up_to: usize) -> usize {
    if self.end_of_input {
      return 0;
    }
    let got = (src.len() - self.in_pos).min(up_to);
    if got > 0 {
      let taken = &src[self.in_pos..self.in_pos + got];
      self.window[dest_ofs..dest_ofs + got].copy_from_slice(taken);
      self.adler = adler32(self.adler, taken);
      self.in_pos += got;
    }
    if self.in_pos == src.len() {
      self.end_of_input = true;
    }
    got
  }

  /// Walks the hash chain for the longest match at the current position.
  ///
  /// Candidates are pre-screened on the byte that would have to improve
  /// the current best before any full comparison runs. Returns the best
  /// length found (clamped to the real lookahead); `match_start` is only
  /// written when something beat `prev_len`.
  fn longest_match(&self, chain_start: usize, prev_len: usize, match_start: &mut usize) -> usize {
    let window = &self.window;
    let scan = self.cur_ofs;
    let mut chain_len = self.max_chain;
    let mut cur_match = chain_start;
    let mut best_len = prev_len;
    let nice_len = self.nice_len.min(self.bytes_avail);
    let limit = if scan > MAX_DIST { scan - MAX_DIST } else { 0 };

    if prev_len >= self.good_len {
      chain_len >>= 2;
    }

    let mut scan_end1 = window[scan + best_len - 1];
    let mut scan_end = window[scan + best_len];
    loop {
      let m = cur_match;
      if window[m + best_len] == scan_end
        && window[m + best_len - 1] == scan_end1
        && window[m] == window[scan]
        && window[m + 1] == window[scan + 1]
      {
        let mut len = 2;
        while len < MAX_MATCH && window[scan + len] == window[m + len] {
          len += 1;
        }
        if len > best_len {
          *match_start = m;
          best_len = len;
          if len >= nice_len {
            break;
          }
          scan_end1 = window[scan + best_len - 1];
          scan_end = window[scan + best_len];
        }
      }

      cur_match = usize::from(self.hash_prev[cur_match & WND_MASK]);
      if cur_match <= limit {
        break;
      }
      chain_len -= 1;
      if chain_len == 0 {
        break;
      }
    }

    best_len.min(self.bytes_avail)
  }

  /// Level 0: raw input framed as stored blocks, nothing else.
  pub(super) fn deflate_store(&mut self, src: &[u8], out: &mut Vec<u8>) -> ZlibResult<()> {
    loop {
      if !self.end_of_input {
        self.fill_window(src);
      }
      if self.bytes_avail == 0 {
        // empty input still needs one final (empty) block
        self.sink.send_bits(out, 1, 3);
        self.sink.flush_to_byte(out);
        put_u16_le(out, 0);
        put_u16_le(out, 0xFFFF);
        break;
      }

      let n = self.bytes_avail.min(0xFFFF);
      let last = self.end_of_input && n == self.bytes_avail;
      self.sink.send_bits(out, (BTYPE_STORED << 1) | u32::from(last), 3);
      self.sink.flush_to_byte(out);
      put_u16_le(out, n as u16);
      put_u16_le(out, !(n as u16));
      out.extend_from_slice(&self.window[self.cur_ofs..self.cur_ofs + n]);
      self.cur_ofs += n;
      self.bytes_avail -= n;
      if last {
        break;
      }
    }
    Ok(())
  }

  /// The lazy matcher: at each position the match starting there is
  /// compared against the match starting one byte later, and the current
  /// byte becomes a literal whenever deferring wins.
  pub(super) fn deflate_slow(&mut self, src: &[u8], out: &mut Vec<u8>) -> ZlibResult<()> {
    let mut match_avail = false;
    let mut cur_hash: usize = 0;
    let mut ins_hash: usize = 0;
    let mut lit_ind: usize = 0;
    let mut prev_len: usize;
    let mut prev_match: usize = 0;
    let mut match_len: usize = MIN_MATCH - 1;
    let mut match_start: usize = 0;
    let mut last_block: isize = self.cur_ofs as isize;

    loop {
      if self.bytes_avail < MIN_LOOKAHEAD {
        let first_read = self.in_pos == 0;
        if self.fill_window(src) {
          // the window slid, rebase offsets that point into it
          match_start = match_start.wrapping_sub(WND_SIZE);
          last_block -= WND_SIZE as isize;
        }
        if self.bytes_avail == 0 {
          break;
        }
        if first_read && self.bytes_avail > MIN_MATCH {
          ins_hash = usize::from(self.window[0]);
          ins_hash =
            ((ins_hash << HASH_SHIFT) ^ usize::from(self.window[self.cur_ofs + 1])) & HASH_MASK;
        }
      }

      // enter the string at the current position into the hash chains
      if self.bytes_avail >= MIN_MATCH {
        ins_hash = ((ins_hash << HASH_SHIFT)
          ^ usize::from(self.window[self.cur_ofs + MIN_MATCH - 1]))
          & HASH_MASK;
        cur_hash = usize::from(self.hash_head[ins_hash]);
        self.hash_prev[self.cur_ofs & WND_MASK] = cur_hash as u16;
        self.hash_head[ins_hash] = self.cur_ofs as u16;
      }

      prev_len = match_len;
      prev_match = match_start;
      match_len = MIN_MATCH - 1;

      if cur_hash != 0 && prev_len < self.max_lazy && self.cur_ofs - cur_hash < MAX_DIST {
        if self.strategy < Strategy::HuffmanOnly {
          match_len = self.longest_match(cur_hash, prev_len, &mut match_start);
        }
        if match_len <= 5
          && (self.strategy == Strategy::Filtered
            || (match_len == MIN_MATCH && self.cur_ofs - match_start > TOO_FAR))
        {
          match_len = MIN_MATCH - 1;
        }
      }

      if prev_len >= MIN_MATCH && match_len <= prev_len {
        // previous position's match wins: emit it, then re-enter all the
        // covered strings into the hash chains
        let insert_limit = self.cur_ofs + self.bytes_avail - MIN_MATCH;
        let len_code = (prev_len - MIN_MATCH) as u8;
        let dist = ((self.cur_ofs - 1) - prev_match) as u16;

        self.dist_accum[lit_ind] = dist;
        self.ll_accum[lit_ind] = len_code;
        lit_ind += 1;
        self.lit_tree.tree.bump_freq(usize::from(LENGTH_CODE[usize::from(len_code)]) + LITERALS + 1);
        self.dist_tree.tree.bump_freq(usize::from(dist_code(dist - 1)));

        self.bytes_avail -= prev_len - 1;

        let mut insertions = prev_len - 2;
        loop {
          self.cur_ofs += 1;
          if self.cur_ofs <= insert_limit {
            ins_hash = ((ins_hash << HASH_SHIFT)
              ^ usize::from(self.window[self.cur_ofs + MIN_MATCH - 1]))
              & HASH_MASK;
            cur_hash = usize::from(self.hash_head[ins_hash]);
            self.hash_prev[self.cur_ofs & WND_MASK] = cur_hash as u16;
            self.hash_head[ins_hash] = self.cur_ofs as u16;
          }
          insertions -= 1;
          if insertions == 0 {
            break;
          }
        }

        match_avail = false;
        match_len = MIN_MATCH - 1;
        self.cur_ofs += 1;

        if lit_ind == WND_SIZE - 1 {
          self.flush_block(out, last_block, lit_ind, false)?;
          last_block = self.cur_ofs as isize;
          lit_ind = 0;
        }
      } else if match_avail {
        // this position found something better, so the previous byte
        // goes out as a plain literal
        let lit = self.window[self.cur_ofs - 1];
        self.dist_accum[lit_ind] = 0;
        self.ll_accum[lit_ind] = lit;
        lit_ind += 1;
        self.lit_tree.tree.bump_freq(usize::from(lit));

        if lit_ind == WND_SIZE - 1 {
          self.flush_block(out, last_block, lit_ind, false)?;
          last_block = self.cur_ofs as isize;
          lit_ind = 0;
        }
        self.cur_ofs += 1;
        self.bytes_avail -= 1;
      } else {
        match_avail = true;
        self.cur_ofs += 1;
        self.bytes_avail -= 1;
      }
    }

    if match_avail {
      let lit = self.window[self.cur_ofs - 1];
      self.dist_accum[lit_ind] = 0;
      self.ll_accum[lit_ind] = lit;
      lit_ind += 1;
      self.lit_tree.tree.bump_freq(usize::from(lit));
    }

    self.flush_block(out, last_block, lit_ind, true)
  }

  /// Builds the bit-length tree over the two main trees' code lengths
  /// and returns the index of the last code-length code worth sending.
  fn build_bl_tree(&mut self, opt_len: &mut i64, static_len: &mut i64) -> usize {
    scan_tree(&mut self.lit_tree.tree, self.lit_tree.max_code, &mut self.bit_len_tree.tree);
    scan_tree(&mut self.dist_tree.tree, self.dist_tree.max_code, &mut self.bit_len_tree.tree);

    // opt_len now covers the two tree shapes, minus the code-length code
    // lengths and the 5+5+4 count bits added below
    self.bit_len_tree.build(opt_len, static_len);

    let mut max_bl_index = BIT_LEN_CODES - 1;
    while max_bl_index >= 3 {
      if self.bit_len_tree.tree.len(BIT_LEN_ORDER[max_bl_index]) != 0 {
        break;
      }
      max_bl_index -= 1;
    }

    *opt_len += 3 * (max_bl_index as i64 + 1) + (5 + 5 + 4);
    max_bl_index
  }

  /// Sends HLIT/HDIST/HCLEN, the code-length code lengths in wire order,
  /// then both tree shapes.
  fn send_all_trees(&mut self, out: &mut Vec<u8>, max_bl_index: usize) {
    let Self { sink, lit_tree, dist_tree, bit_len_tree, .. } = self;

    sink.send_bits(out, (lit_tree.max_code - 256) as u32, 5);
    sink.send_bits(out, dist_tree.max_code as u32, 5);
    sink.send_bits(out, (max_bl_index - 3) as u32, 4);
    for i in 0..=max_bl_index {
      sink.send_bits(out, u32::from(bit_len_tree.tree.len(BIT_LEN_ORDER[i])), 3);
    }

    let bl_set =
      CodeSet { codes: &bit_len_tree.tree.freq_code, lens: &bit_len_tree.tree.dad_len };
    send_tree(sink, out, &lit_tree.tree, lit_tree.max_code, &bl_set);
    send_tree(sink, out, &dist_tree.tree, dist_tree.max_code, &bl_set);
  }

  /// Ends the current block: estimates the stored, fixed, and dynamic
  /// encodings and emits the smallest, then resets per-block state.
  fn flush_block(
    &mut self, out: &mut Vec<u8>, last_block: isize, last_lit: usize, eof: bool,
  ) -> ZlibResult<()> {
    let in_bytes = (self.cur_ofs as isize - last_block) as usize;

    let mut opt_len = 0i64;
    let mut static_len = 0i64;
    self.lit_tree.build(&mut opt_len, &mut static_len);
    self.dist_tree.build(&mut opt_len, &mut static_len);
    let max_bl_index = self.build_bl_tree(&mut opt_len, &mut static_len);

    let opt_bytes_raw = ((opt_len + 3 + 7) >> 3) as usize;
    let static_bytes = ((static_len + 3 + 7) >> 3) as usize;
    let opt_bytes = if static_bytes <= opt_bytes_raw { static_bytes } else { opt_bytes_raw };

    if in_bytes + 4 <= opt_bytes {
      // nothing gained, store the raw bytes
      self.sink.send_bits(out, (BTYPE_STORED << 1) | u32::from(eof), 3);
      self.sink.flush_to_byte(out);
      if last_block < 0 {
        // the block's bytes slid out of the window, they can't be
        // re-read for storing
        return Err(ZlibError::WindowSlidStored);
      }
      put_u16_le(out, in_bytes as u16);
      put_u16_le(out, !(in_bytes as u16));
      let start = last_block as usize;
      out.extend_from_slice(&self.window[start..start + in_bytes]);
    } else if static_bytes == opt_bytes {
      self.sink.send_bits(out, (BTYPE_FIXED << 1) | u32::from(eof), 3);
      let lit_set = CodeSet { codes: &FIXED_LIT_CODES, lens: &FIXED_LIT_LENS };
      let dist_set = CodeSet { codes: &FIXED_DIST_CODES, lens: &FIXED_DIST_LENS };
      compress_block(
        &mut self.sink,
        out,
        &self.ll_accum,
        &self.dist_accum,
        last_lit,
        &lit_set,
        &dist_set,
      );
    } else {
      self.sink.send_bits(out, (BTYPE_DYNAMIC << 1) | u32::from(eof), 3);
      self.send_all_trees(out, max_bl_index);
      let Self { sink, ll_accum, dist_accum, lit_tree, dist_tree, .. } = self;
      let lit_set = CodeSet { codes: &lit_tree.tree.freq_code, lens: &lit_tree.tree.dad_len };
      let dist_set = CodeSet { codes: &dist_tree.tree.freq_code, lens: &dist_tree.tree.dad_len };
      compress_block(sink, out, ll_accum, dist_accum, last_lit, &lit_set, &dist_set);
    }

    self.per_block_reset();
    if eof {
      self.sink.flush_to_byte(out);
    }
    Ok(())
  }

  pub(super) fn per_block_reset(&mut self) {
    self.hash_head.iter_mut().for_each(|v| *v = 0);
    self.hash_prev.iter_mut().for_each(|v| *v = 0);
    self.ll_accum.iter_mut().for_each(|v| *v = 0);
    self.dist_accum.iter_mut().for_each(|v| *v = 0);

    self.lit_tree.reset();
    self.dist_tree.reset();
    self.bit_len_tree.reset();
    // every block ends with the end-of-block code, count it up front
    self.lit_tree.tree.freq_code[END_BLOCK] = 1;
  }
}
