//! `simpleboot-inflate` --- module decompression, `no_std`, no allocation.
//!
//! Boot modules may arrive gzip-compressed, or as `GUDT` blobs wrapping a
//! zlib stream. [`probe`] classifies a module from its first 16 bytes,
//! the `*_uncompressed_size` helpers recover the inflated size (needed to
//! reserve the output buffer *before* inflating), and [`gunzip`] /
//! [`unzlib`] / [`inflate`] perform stock RFC 1951 decompression: stored,
//! fixed-Huffman, and dynamic-Huffman blocks.
//!
//! The decompressor works slice-to-slice. The loader arranges the buffers
//! so the compressed image sits above the output region and is simply
//! overwritten by the next module (BIOS/RPi) or freed (UEFI).

#![no_std]
#![warn(missing_docs)]

/// Errors produced while inflating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InflateError {
    /// The gzip/zlib wrapper header is malformed.
    BadHeader,
    /// A block header or stored-block length check failed.
    BadBlock,
    /// A Huffman code table could not be constructed or a code is invalid.
    BadHuffman,
    /// A back-reference points before the start of the output.
    BadDistance,
    /// The output buffer is too small for the inflated data.
    OutputOverflow,
    /// The input ended in the middle of the stream.
    InputUnderflow,
}

/// Module compression kinds recognised by [`probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Not compressed; use the module bytes as they are.
    None,
    /// gzip wrapper (`1F 8B`); uncompressed size in the last 4 file bytes.
    Gzip,
    /// `GUD*` header with a zlib stream at offset 8; uncompressed size
    /// encoded in header bytes 4..8.
    Gudt,
}

/// Classifies a module from its first bytes.
#[must_use]
pub fn probe(prefix: &[u8]) -> Compression {
    if prefix.len() >= 2 && prefix[0] == 0x1F && prefix[1] == 0x8B {
        return Compression::Gzip;
    }
    if prefix.len() >= 9 && &prefix[..3] == b"GUD" && prefix[8] == 0x78 {
        return Compression::Gudt;
    }
    Compression::None
}

/// Recovers the uncompressed size from a gzip file's last four bytes.
///
/// gzip stores `ISIZE`, the input size mod 2^32, little-endian, as the
/// final trailer word.
#[must_use]
pub fn gzip_uncompressed_size(trailer: [u8; 4]) -> u32 {
    u32::from_le_bytes(trailer)
}

/// Recovers the uncompressed size from a `GUDT` blob header.
///
/// The size is split across header bytes 4..8:
/// `((b4 | b5 << 8) + 7 & !7) + ((b6 | b7 << 8) << 4)`.
#[must_use]
pub fn gudt_uncompressed_size(header: &[u8; 16]) -> u32 {
    let low = u32::from(header[4]) | (u32::from(header[5]) << 8);
    let high = u32::from(header[6]) | (u32::from(header[7]) << 8);
    ((low + 7) & !7) + (high << 4)
}

/// Inflates a gzip file into `dst`, returning the inflated length.
///
/// # Errors
///
/// Returns [`InflateError::BadHeader`] if the gzip wrapper is malformed,
/// or any inflation error from the embedded deflate stream. The trailer
/// CRC is not verified; the loader treats the medium as trusted once the
/// filesystem checks pass.
pub fn gunzip(src: &[u8], dst: &mut [u8]) -> Result<usize, InflateError> {
    const FHCRC: u8 = 1 << 1;
    const FEXTRA: u8 = 1 << 2;
    const FNAME: u8 = 1 << 3;
    const FCOMMENT: u8 = 1 << 4;

    if src.len() < 10 || src[0] != 0x1F || src[1] != 0x8B || src[2] != 8 {
        return Err(InflateError::BadHeader);
    }
    let flags = src[3];
    let mut at = 10;

    if flags & FEXTRA != 0 {
        let xlen = src
            .get(at..at + 2)
            .map(|b| usize::from(u16::from_le_bytes([b[0], b[1]])))
            .ok_or(InflateError::BadHeader)?;
        at += 2 + xlen;
    }
    for flag in [FNAME, FCOMMENT] {
        if flags & flag != 0 {
            let rest = src.get(at..).ok_or(InflateError::BadHeader)?;
            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or(InflateError::BadHeader)?;
            at += nul + 1;
        }
    }
    if flags & FHCRC != 0 {
        at += 2;
    }
    let body = src.get(at..).ok_or(InflateError::BadHeader)?;
    inflate(body, dst)
}

/// Inflates a zlib stream (2-byte header, deflate body) into `dst`.
///
/// # Errors
///
/// Returns [`InflateError::BadHeader`] if the zlib header is malformed,
/// or any inflation error from the deflate body. The Adler-32 trailer is
/// not verified.
pub fn unzlib(src: &[u8], dst: &mut [u8]) -> Result<usize, InflateError> {
    if src.len() < 2 || src[0] & 0x0F != 8 {
        return Err(InflateError::BadHeader);
    }
    // The two header bytes form a big-endian value divisible by 31.
    if u32::from(u16::from_be_bytes([src[0], src[1]])) % 31 != 0 {
        return Err(InflateError::BadHeader);
    }
    inflate(&src[2..], dst)
}

/// Inflates a raw deflate stream into `dst`, returning the output length.
///
/// # Errors
///
/// Returns an [`InflateError`] describing the first malformation found.
pub fn inflate(src: &[u8], dst: &mut [u8]) -> Result<usize, InflateError> {
    Inflater::new(src, dst).run()
}

/// Maximum bits in a deflate Huffman code.
const MAX_BITS: usize = 15;
/// Number of literal/length symbols.
const MAX_LCODES: usize = 288;
/// Number of distance symbols.
const MAX_DCODES: usize = 30;
/// Order in which code-length code lengths are stored.
const CLEN_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Length-code base values (codes 257..=285).
const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115,
    131, 163, 195, 227, 258,
];
/// Length-code extra bits (codes 257..=285).
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
/// Distance-code base values.
const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
/// Distance-code extra bits.
const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12,
    13, 13,
];

/// A canonical Huffman decoding table: symbol counts per code length plus
/// the symbols sorted by (length, symbol).
struct Huffman<const N: usize> {
    count: [u16; MAX_BITS + 1],
    symbol: [u16; N],
}

impl<const N: usize> Huffman<N> {
    /// Builds the table from per-symbol code lengths (0 = unused).
    fn build(lengths: &[u8]) -> Result<Self, InflateError> {
        let mut count = [0u16; MAX_BITS + 1];
        for &len in lengths {
            if usize::from(len) > MAX_BITS {
                return Err(InflateError::BadHuffman);
            }
            count[usize::from(len)] += 1;
        }

        // An over-subscribed code is invalid; incomplete codes are allowed
        // (single-symbol distance trees occur in practice).
        let mut left = 1i32;
        for len in 1..=MAX_BITS {
            left <<= 1;
            left -= i32::from(count[len]);
            if left < 0 {
                return Err(InflateError::BadHuffman);
            }
        }

        let mut offsets = [0u16; MAX_BITS + 1];
        for len in 1..MAX_BITS {
            offsets[len + 1] = offsets[len] + count[len];
        }

        let mut symbol = [0u16; N];
        for (sym, &len) in lengths.iter().enumerate() {
            if len != 0 {
                symbol[usize::from(offsets[usize::from(len)])] = sym as u16;
                offsets[usize::from(len)] += 1;
            }
        }
        Ok(Self { count, symbol })
    }
}

/// LSB-first bit reader over the compressed input.
struct Inflater<'a> {
    src: &'a [u8],
    dst: &'a mut [u8],
    /// Next input byte index.
    at: usize,
    /// Bit accumulator, LSB next.
    bitbuf: u32,
    /// Valid bits in `bitbuf`.
    bitcnt: u32,
    /// Bytes written to `dst`.
    out: usize,
}

impl<'a> Inflater<'a> {
    fn new(src: &'a [u8], dst: &'a mut [u8]) -> Self {
        Self {
            src,
            dst,
            at: 0,
            bitbuf: 0,
            bitcnt: 0,
            out: 0,
        }
    }

    fn bits(&mut self, need: u32) -> Result<u32, InflateError> {
        while self.bitcnt < need {
            let byte = *self.src.get(self.at).ok_or(InflateError::InputUnderflow)?;
            self.bitbuf |= u32::from(byte) << self.bitcnt;
            self.bitcnt += 8;
            self.at += 1;
        }
        let value = self.bitbuf & ((1 << need) - 1);
        self.bitbuf >>= need;
        self.bitcnt -= need;
        Ok(value)
    }

    /// Decodes one symbol against a canonical table, MSB-of-code-first.
    fn decode<const N: usize>(&mut self, table: &Huffman<N>) -> Result<u16, InflateError> {
        let mut code = 0i32;
        let mut first = 0i32;
        let mut index = 0i32;
        for len in 1..=MAX_BITS {
            code |= self.bits(1)? as i32;
            let count = i32::from(table.count[len]);
            if code - first < count {
                return Ok(table.symbol[(index + (code - first)) as usize]);
            }
            index += count;
            first = (first + count) << 1;
            code <<= 1;
        }
        Err(InflateError::BadHuffman)
    }

    fn push(&mut self, byte: u8) -> Result<(), InflateError> {
        if self.out >= self.dst.len() {
            return Err(InflateError::OutputOverflow);
        }
        self.dst[self.out] = byte;
        self.out += 1;
        Ok(())
    }

    fn run(mut self) -> Result<usize, InflateError> {
        loop {
            let last = self.bits(1)?;
            match self.bits(2)? {
                0 => self.stored_block()?,
                1 => {
                    let (lit, dist) = fixed_tables()?;
                    self.compressed_block(&lit, &dist)?;
                }
                2 => {
                    let (lit, dist) = self.dynamic_tables()?;
                    self.compressed_block(&lit, &dist)?;
                }
                _ => return Err(InflateError::BadBlock),
            }
            if last != 0 {
                return Ok(self.out);
            }
        }
    }

    fn stored_block(&mut self) -> Result<(), InflateError> {
        // Discard bits to the next byte boundary.
        self.bitbuf = 0;
        self.bitcnt = 0;

        let header = self
            .src
            .get(self.at..self.at + 4)
            .ok_or(InflateError::InputUnderflow)?;
        let len = usize::from(u16::from_le_bytes([header[0], header[1]]));
        let nlen = u16::from_le_bytes([header[2], header[3]]);
        if nlen != !(len as u16) {
            return Err(InflateError::BadBlock);
        }
        self.at += 4;

        let data = self
            .src
            .get(self.at..self.at + len)
            .ok_or(InflateError::InputUnderflow)?;
        if self.out + len > self.dst.len() {
            return Err(InflateError::OutputOverflow);
        }
        self.dst[self.out..self.out + len].copy_from_slice(data);
        self.out += len;
        self.at += len;
        Ok(())
    }

    fn dynamic_tables(
        &mut self,
    ) -> Result<(Huffman<MAX_LCODES>, Huffman<MAX_DCODES>), InflateError> {
        let nlen = self.bits(5)? as usize + 257;
        let ndist = self.bits(5)? as usize + 1;
        let ncode = self.bits(4)? as usize + 4;
        if nlen > MAX_LCODES || ndist > MAX_DCODES {
            return Err(InflateError::BadHuffman);
        }

        let mut clen_lengths = [0u8; 19];
        for &position in CLEN_ORDER.iter().take(ncode) {
            clen_lengths[position] = self.bits(3)? as u8;
        }
        let clen_table = Huffman::<19>::build(&clen_lengths)?;

        let mut lengths = [0u8; MAX_LCODES + MAX_DCODES];
        let mut index = 0;
        while index < nlen + ndist {
            let symbol = self.decode(&clen_table)?;
            match symbol {
                0..=15 => {
                    lengths[index] = symbol as u8;
                    index += 1;
                }
                16 => {
                    if index == 0 {
                        return Err(InflateError::BadHuffman);
                    }
                    let prev = lengths[index - 1];
                    let repeat = self.bits(2)? as usize + 3;
                    if index + repeat > nlen + ndist {
                        return Err(InflateError::BadHuffman);
                    }
                    lengths[index..index + repeat].fill(prev);
                    index += repeat;
                }
                17 | 18 => {
                    let repeat = if symbol == 17 {
                        self.bits(3)? as usize + 3
                    } else {
                        self.bits(7)? as usize + 11
                    };
                    if index + repeat > nlen + ndist {
                        return Err(InflateError::BadHuffman);
                    }
                    index += repeat; // already zero
                }
                _ => return Err(InflateError::BadHuffman),
            }
        }

        // The end-of-block code must exist.
        if lengths[256] == 0 {
            return Err(InflateError::BadHuffman);
        }

        let lit = Huffman::<MAX_LCODES>::build(&lengths[..nlen])?;
        let dist = Huffman::<MAX_DCODES>::build(&lengths[nlen..nlen + ndist])?;
        Ok((lit, dist))
    }

    fn compressed_block(
        &mut self,
        lit: &Huffman<MAX_LCODES>,
        dist: &Huffman<MAX_DCODES>,
    ) -> Result<(), InflateError> {
        loop {
            let symbol = self.decode(lit)?;
            match symbol {
                0..=255 => self.push(symbol as u8)?,
                256 => return Ok(()),
                257..=285 => {
                    let idx = usize::from(symbol - 257);
                    let length = usize::from(LENGTH_BASE[idx])
                        + self.bits(u32::from(LENGTH_EXTRA[idx]))? as usize;

                    let dsym = usize::from(self.decode(dist)?);
                    if dsym >= MAX_DCODES {
                        return Err(InflateError::BadDistance);
                    }
                    let distance = usize::from(DIST_BASE[dsym])
                        + self.bits(u32::from(DIST_EXTRA[dsym]))? as usize;
                    if distance > self.out {
                        return Err(InflateError::BadDistance);
                    }
                    if self.out + length > self.dst.len() {
                        return Err(InflateError::OutputOverflow);
                    }
                    // Byte-by-byte so overlapping copies replicate.
                    for _ in 0..length {
                        self.dst[self.out] = self.dst[self.out - distance];
                        self.out += 1;
                    }
                }
                _ => return Err(InflateError::BadHuffman),
            }
        }
    }
}

/// Builds the fixed-Huffman literal and distance tables (RFC 1951 §3.2.6).
fn fixed_tables() -> Result<(Huffman<MAX_LCODES>, Huffman<MAX_DCODES>), InflateError> {
    let mut lit_lengths = [0u8; MAX_LCODES];
    for (sym, len) in lit_lengths.iter_mut().enumerate() {
        *len = match sym {
            0..=143 => 8,
            144..=255 => 9,
            256..=279 => 7,
            _ => 8,
        };
    }
    let dist_lengths = [5u8; MAX_DCODES];
    Ok((
        Huffman::<MAX_LCODES>::build(&lit_lengths)?,
        Huffman::<MAX_DCODES>::build(&dist_lengths)?,
    ))
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::vec;
    use std::vec::Vec;

    fn deflate(data: &[u8], level: flate2::Compression) -> Vec<u8> {
        let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), level);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn probe_classifies_wrappers() {
        assert_eq!(probe(&[0x1F, 0x8B, 8, 0]), Compression::Gzip);
        let mut gudt = [0u8; 16];
        gudt[..4].copy_from_slice(b"GUDT");
        gudt[8] = 0x78;
        assert_eq!(probe(&gudt), Compression::Gudt);
        assert_eq!(probe(b"\x7fELF"), Compression::None);
        assert_eq!(probe(&[]), Compression::None);
    }

    #[test]
    fn gzip_size_is_the_trailer_word() {
        let compressed = gzip(b"four byte trailer check");
        let trailer: [u8; 4] = compressed[compressed.len() - 4..].try_into().unwrap();
        assert_eq!(gzip_uncompressed_size(trailer) as usize, 23);
    }

    #[test]
    fn gudt_size_formula() {
        let mut header = [0u8; 16];
        header[4] = 0x0A; // low = 10 -> rounded to 16
        header[6] = 0x02; // high = 2 -> 32
        assert_eq!(gudt_uncompressed_size(&header), 16 + 32);
    }

    #[test]
    fn stored_blocks_round_trip() {
        let data = b"stored block payload, no compression at all";
        let compressed = deflate(data, flate2::Compression::none());
        let mut out = vec![0u8; data.len()];
        assert_eq!(inflate(&compressed, &mut out), Ok(data.len()));
        assert_eq!(&out, data);
    }

    #[test]
    fn dynamic_huffman_round_trip() {
        let mut data = Vec::new();
        for i in 0..2000u32 {
            data.extend_from_slice(b"abcabcabc ");
            data.extend_from_slice(&i.to_le_bytes());
        }
        let compressed = deflate(&data, flate2::Compression::default());
        assert!(compressed.len() < data.len() / 2);
        let mut out = vec![0u8; data.len()];
        assert_eq!(inflate(&compressed, &mut out), Ok(data.len()));
        assert_eq!(out, data);
    }

    #[test]
    fn incompressible_data_round_trips() {
        // A simple PRNG stream defeats matching, exercising literal paths.
        let mut state = 0x1234_5678u32;
        let data: Vec<u8> = (0..4096)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect();
        let compressed = deflate(&data, flate2::Compression::best());
        let mut out = vec![0u8; data.len()];
        assert_eq!(inflate(&compressed, &mut out), Ok(data.len()));
        assert_eq!(out, data);
    }

    #[test]
    fn empty_fixed_block() {
        // Final fixed-Huffman block containing only end-of-block.
        let mut out = [0u8; 4];
        assert_eq!(inflate(&[0x03, 0x00], &mut out), Ok(0));
    }

    /// Hand-built fixed-Huffman stream: codes are emitted MSB-first into
    /// an LSB-first bit stream (RFC 1951 §3.1.1).
    struct BitWriter {
        bytes: Vec<u8>,
        bit: u32,
    }

    impl BitWriter {
        fn new() -> Self {
            Self { bytes: Vec::new(), bit: 0 }
        }

        fn push_bit(&mut self, bit: u32) {
            if self.bit == 0 {
                self.bytes.push(0);
            }
            let last = self.bytes.last_mut().unwrap();
            *last |= (bit as u8) << self.bit;
            self.bit = (self.bit + 1) % 8;
        }

        fn code(&mut self, code: u32, len: u32) {
            for i in (0..len).rev() {
                self.push_bit((code >> i) & 1);
            }
        }

        fn fixed_literal(&mut self, sym: u8) {
            if sym < 144 {
                self.code(0x30 + u32::from(sym), 8);
            } else {
                self.code(0x190 + u32::from(sym) - 144, 9);
            }
        }
    }

    #[test]
    fn fixed_huffman_literals() {
        let mut w = BitWriter::new();
        w.push_bit(1); // final
        w.push_bit(1); // fixed
        w.push_bit(0);
        for &b in b"Simpleboot \xFF\x00ok" {
            w.fixed_literal(b);
        }
        w.code(0, 7); // end of block

        let mut out = [0u8; 32];
        let n = inflate(&w.bytes, &mut out).unwrap();
        assert_eq!(&out[..n], b"Simpleboot \xFF\x00ok");
    }

    #[test]
    fn gunzip_skips_filename_header() {
        let data = b"module with a name header";
        let mut encoder = flate2::GzBuilder::new()
            .filename("initrd.img")
            .write(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut out = vec![0u8; data.len()];
        assert_eq!(gunzip(&compressed, &mut out), Ok(data.len()));
        assert_eq!(&out, data);
    }

    #[test]
    fn unzlib_round_trip() {
        let data = b"zlib wrapped GUDT payload";
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(compressed[0] & 0x0F, 8);

        let mut out = vec![0u8; data.len()];
        assert_eq!(unzlib(&compressed, &mut out), Ok(data.len()));
        assert_eq!(&out, data);
    }

    #[test]
    fn truncated_input_is_reported() {
        let compressed = deflate(b"some data to cut short", flate2::Compression::default());
        let mut out = [0u8; 64];
        assert_eq!(
            inflate(&compressed[..compressed.len() / 2], &mut out),
            Err(InflateError::InputUnderflow)
        );
    }

    #[test]
    fn small_output_buffer_is_reported() {
        let data = b"does not fit in eight bytes";
        let compressed = deflate(data, flate2::Compression::default());
        let mut out = [0u8; 8];
        assert_eq!(inflate(&compressed, &mut out), Err(InflateError::OutputOverflow));
    }

    #[test]
    fn stored_length_check() {
        // Stored block with corrupted NLEN.
        let bad = [0x01, 0x03, 0x00, 0x00, 0x00, b'a', b'b', b'c'];
        let mut out = [0u8; 8];
        assert_eq!(inflate(&bad, &mut out), Err(InflateError::BadBlock));
    }

    #[test]
    fn bad_gzip_header() {
        let mut out = [0u8; 8];
        assert_eq!(gunzip(&[0x1F, 0x8B], &mut out), Err(InflateError::BadHeader));
        assert_eq!(gunzip(b"not gzip", &mut out), Err(InflateError::BadHeader));
    }
}
