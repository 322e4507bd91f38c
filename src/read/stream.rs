//! Segment framing and decompression.
//!
//! A boot archive is a concatenation of independent cpio segments, each
//! either plain or compressed, separated by runs of NUL padding. Nothing
//! guarantees a single compression envelope for the whole image, so each
//! segment's format is detected where it starts.

use crate::read::{Error, Result, Sink, Unpacker};

/// A compression method recognizable at the start of a segment.
///
/// Every method the boot protocol allows is detected; only gzip and zstd
/// can be decoded (feature `compression`). The rest are reported as not
/// configured, mirroring a kernel built without the matching decompressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CompressionMethod {
    /// gzip (deflate with a gzip wrapper).
    Gzip,
    /// bzip2.
    Bzip2,
    /// Raw lzma.
    Lzma,
    /// xz.
    Xz,
    /// lzop.
    Lzo,
    /// lz4, in either the legacy or the frame format.
    Lz4,
    /// zstandard.
    Zstd,
}

impl CompressionMethod {
    /// The conventional name of the method.
    pub fn name(self) -> &'static str {
        match self {
            CompressionMethod::Gzip => "gzip",
            CompressionMethod::Bzip2 => "bzip2",
            CompressionMethod::Lzma => "lzma",
            CompressionMethod::Xz => "xz",
            CompressionMethod::Lzo => "lzo",
            CompressionMethod::Lz4 => "lz4",
            CompressionMethod::Zstd => "zstd",
        }
    }

    /// Detect a known compression format from the first bytes of a
    /// segment.
    pub fn detect(data: &[u8]) -> Option<CompressionMethod> {
        if data.len() < 2 {
            return None;
        }
        match data[0] {
            0x1f if data[1] == 0x8b || data[1] == 0x9e => Some(CompressionMethod::Gzip),
            b'B' if data.starts_with(b"BZh") => Some(CompressionMethod::Bzip2),
            0x5d if data[1] == 0x00 => Some(CompressionMethod::Lzma),
            0xfd if data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a]) => {
                Some(CompressionMethod::Xz)
            }
            0x89 if data.starts_with(b"\x89LZO") => Some(CompressionMethod::Lzo),
            0x02 if data.starts_with(&[0x02, 0x21, 0x4c, 0x18]) => Some(CompressionMethod::Lz4),
            0x04 if data.starts_with(&[0x04, 0x22, 0x4d, 0x18]) => Some(CompressionMethod::Lz4),
            0x28 if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) => Some(CompressionMethod::Zstd),
            _ => None,
        }
    }
}

/// Unpack a complete boot archive into `sink`.
///
/// Walks the image segment by segment: a `'0'` at a 4-byte-aligned offset
/// starts a plain cpio stream, NUL bytes between segments are skipped, and
/// anything else must be a recognized compressed segment, which is decoded
/// with its output streamed straight into the state machine. After a
/// compressed segment the machine must rest on an entry boundary.
///
/// Deferred directory timestamps are applied before returning, even when
/// the unpack fails part-way.
pub fn unpack<S: Sink>(data: &[u8], sink: S) -> Result<()> {
    let mut unpacker = Unpacker::new(sink);
    let mut buf = data;
    while !buf.is_empty() && unpacker.error().is_none() {
        if buf[0] == b'0' && unpacker.segment_offset() & 3 == 0 {
            unpacker.restart();
            match unpacker.feed(buf) {
                Ok(consumed) => buf = &buf[consumed..],
                Err(_) => break,
            }
            continue;
        }
        if buf[0] == 0 {
            unpacker.skip_padding_byte();
            buf = &buf[1..];
            continue;
        }
        let saved_offset = unpacker.segment_offset();
        unpacker.rebase(0);
        match CompressionMethod::detect(buf) {
            Some(method) => {
                log::debug!("detected {} compressed data", method.name());
                let consumed = decompress(method, buf, &mut unpacker);
                if !unpacker.at_segment_boundary() {
                    unpacker.set_error(Error::JunkAtEnd);
                }
                unpacker.rebase(saved_offset + consumed as u64);
                buf = &buf[consumed..];
            }
            None => unpacker.set_error(Error::BadCompressedMagic),
        }
    }
    unpacker.finish()
}

/// Decode one compressed segment, streaming output into the unpacker.
/// Returns the number of compressed bytes consumed.
#[cfg(feature = "compression")]
fn decompress<S: Sink>(
    method: CompressionMethod,
    data: &[u8],
    unpacker: &mut Unpacker<S>,
) -> usize {
    match method {
        CompressionMethod::Gzip => gunzip(data, unpacker),
        CompressionMethod::Zstd => unzstd(data, unpacker),
        other => {
            unpacker.set_error(Error::UnsupportedCompressionMethod(other.name()));
            0
        }
    }
}

#[cfg(not(feature = "compression"))]
fn decompress<S: Sink>(
    method: CompressionMethod,
    _data: &[u8],
    unpacker: &mut Unpacker<S>,
) -> usize {
    unpacker.set_error(Error::UnsupportedCompressionMethod(method.name()));
    0
}

#[cfg(feature = "compression")]
fn gunzip<S: Sink>(data: &[u8], unpacker: &mut Unpacker<S>) -> usize {
    use std::io::Read;

    let mut out = alloc::vec![0u8; 64 * 1024];
    let mut rest = data;
    {
        let mut decoder = flate2::bufread::GzDecoder::new(&mut rest);
        loop {
            match decoder.read(&mut out) {
                Ok(0) => break,
                Ok(n) => {
                    if unpacker.flush(&out[..n]).is_err() {
                        unpacker.set_error(Error::DecompressorFailure);
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    unpacker.set_error(Error::DecompressorFailure);
                    break;
                }
            }
        }
    }
    data.len() - rest.len()
}

#[cfg(feature = "compression")]
fn unzstd<S: Sink>(data: &[u8], unpacker: &mut Unpacker<S>) -> usize {
    use std::io::Read;

    let mut out = alloc::vec![0u8; 64 * 1024];
    let mut rest = data;
    {
        let mut decoder = match ruzstd::decoding::StreamingDecoder::new(&mut rest) {
            Ok(decoder) => decoder,
            Err(_) => {
                unpacker.set_error(Error::DecompressorFailure);
                return 0;
            }
        };
        loop {
            match decoder.read(&mut out) {
                Ok(0) => break,
                Ok(n) => {
                    if unpacker.flush(&out[..n]).is_err() {
                        unpacker.set_error(Error::DecompressorFailure);
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    unpacker.set_error(Error::DecompressorFailure);
                    break;
                }
            }
        }
    }
    data.len() - rest.len()
}
