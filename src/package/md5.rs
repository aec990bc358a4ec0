//! The MD5 message digest (RFC 1321), used to fingerprint each file's
//! original bytes.
//!
//! MD5 is long broken for anything adversarial; here it only has to
//! catch corruption, the same job it has done in this file format since
//! the format existed.

/// Per-round left-rotation amounts.
#[rustfmt::skip]
const S: [u32; 64] = [
  7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22,
  5,  9, 14, 20, 5,  9, 14, 20, 5,  9, 14, 20, 5,  9, 14, 20,
  4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23,
  6, 10, 15, 21, 6, 10, 15, 21, 6, 10, 15, 21, 6, 10, 15, 21,
];

/// The binary integer parts of abs(sin(i+1)), scaled to 32 bits.
#[rustfmt::skip]
const K: [u32; 64] = [
  0xd76aa478, 0xe8c7b756, 0x242070db, 0xc1bdceee,
  0xf57c0faf, 0x4787c62a, 0xa8304613, 0xfd469501,
  0x698098d8, 0x8b44f7af, 0xffff5bb1, 0x895cd7be,
  0x6b901122, 0xfd987193, 0xa679438e, 0x49b40821,
  0xf61e2562, 0xc040b340, 0x265e5a51, 0xe9b6c7aa,
  0xd62f105d, 0x02441453, 0xd8a1e681, 0xe7d3fbc8,
  0x21e1cde6, 0xc33707d6, 0xf4d50d87, 0x455a14ed,
  0xa9e3e905, 0xfcefa3f8, 0x676f02d9, 0x8d2a4c8a,
  0xfffa3942, 0x8771f681, 0x6d9d6122, 0xfde5380c,
  0xa4beea44, 0x4bdecfa9, 0xf6bb4b60, 0xbebfbc70,
  0x289b7ec6, 0xeaa127fa, 0xd4ef3085, 0x04881d05,
  0xd9d4d039, 0xe6db99e5, 0x1fa27cf8, 0xc4ac5665,
  0xf4292244, 0x432aff97, 0xab9423a7, 0xfc93a039,
  0x655b59c3, 0x8f0ccc92, 0xffeff47d, 0x85845dd1,
  0x6fa87e4f, 0xfe2ce6e0, 0xa3014314, 0x4e0811a1,
  0xf7537e82, 0xbd3af235, 0x2ad7d2bb, 0xeb86d391,
];

/// A streaming MD5 digest.
pub(crate) struct Md5 {
  state: [u32; 4],
  len_bytes: u64,
  buf: [u8; 64],
  buf_len: usize,
}

impl Md5 {
  pub const fn new() -> Self {
    Self {
      state: [0x6745_2301, 0xefcd_ab89, 0x98ba_dcfe, 0x1032_5476],
      len_bytes: 0,
      buf: [0; 64],
      buf_len: 0,
    }
  }

  pub fn update(&mut self, mut bytes: &[u8]) {
    self.len_bytes = self.len_bytes.wrapping_add(bytes.len() as u64);

    if self.buf_len > 0 {
      let want = 64 - self.buf_len;
      let take = want.min(bytes.len());
      self.buf[self.buf_len..self.buf_len + take].copy_from_slice(&bytes[..take]);
      self.buf_len += take;
      bytes = &bytes[take..];
      if self.buf_len < 64 {
        return;
      }
      let block = self.buf;
      self.process_block(&block);
      self.buf_len = 0;
    }

    let mut blocks = bytes.chunks_exact(64);
    for block in blocks.by_ref() {
      self.process_block(block.try_into().unwrap());
    }
    let rest = blocks.remainder();
    self.buf[..rest.len()].copy_from_slice(rest);
    self.buf_len = rest.len();
  }

  pub fn finish(mut self) -> [u8; 16] {
    let bit_len = self.len_bytes.wrapping_mul(8);
    let mut pad = [0u8; 72];
    pad[0] = 0x80;
    // pad to 56 mod 64, then the message length in bits, little-endian
    let pad_len = if self.buf_len < 56 { 56 - self.buf_len } else { 120 - self.buf_len };
    self.update(&pad[..pad_len]);
    self.update(&bit_len.to_le_bytes());
    debug_assert_eq!(self.buf_len, 0);

    let mut out = [0u8; 16];
    for (chunk, word) in out.chunks_exact_mut(4).zip(self.state) {
      chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
  }

  fn process_block(&mut self, block: &[u8; 64]) {
    let mut m = [0u32; 16];
    for (word, chunk) in m.iter_mut().zip(block.chunks_exact(4)) {
      *word = u32::from_le_bytes(chunk.try_into().unwrap());
    }

    let [mut a, mut b, mut c, mut d] = self.state;
    for i in 0..64 {
      let (f, g) = match i / 16 {
        0 => ((b & c) | (!b & d), i),
        1 => ((d & b) | (!d & c), (5 * i + 1) % 16),
        2 => (b ^ c ^ d, (3 * i + 5) % 16),
        _ => (c ^ (b | !d), (7 * i) % 16),
      };
      let rotated =
        a.wrapping_add(f).wrapping_add(K[i]).wrapping_add(m[g]).rotate_left(S[i]);
      a = d;
      d = c;
      c = b;
      b = b.wrapping_add(rotated);
    }

    self.state[0] = self.state[0].wrapping_add(a);
    self.state[1] = self.state[1].wrapping_add(b);
    self.state[2] = self.state[2].wrapping_add(c);
    self.state[3] = self.state[3].wrapping_add(d);
  }
}

/// One-shot digest of a byte slice.
#[inline]
#[must_use]
pub(crate) fn md5(bytes: &[u8]) -> [u8; 16] {
  let mut digest = Md5::new();
  digest.update(bytes);
  digest.finish()
}
