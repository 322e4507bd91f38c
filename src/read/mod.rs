//! Interface for unpacking initramfs archives.
//!
//! An archive is consumed as a byte stream: the [`Unpacker`] state machine
//! accepts arbitrarily-sized chunks and materializes entries through a
//! [`Sink`]. The [`unpack`] driver layers segment framing and decompression
//! on top, matching the boot-archive convention of concatenated plain or
//! compressed cpio streams separated by NUL padding.

use core::fmt;
use core::result;

mod header;
pub use header::*;

mod sink;
pub use sink::*;

mod stream;
pub use stream::*;

mod unpack;
pub use unpack::*;

/// The error type used within the read module.
///
/// These are the structural, terminal failures: the first one raised during
/// an unpack sticks and is the one reported. Per-entry problems (a short
/// write, an oversized name) are warnings that skip the entry and let the
/// rest of the archive proceed; see [`Unpacker::warnings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// An entry header did not start with the newc magic.
    BadMagic,
    /// An entry header carried the legacy "070707" magic.
    UnsupportedLegacyFormat,
    /// The offset was misaligned where inter-entry padding was expected.
    MalformedPadding,
    /// An unexpected byte between entries of a decompressed stream.
    JunkInArchive,
    /// A decompressed segment did not end on an entry boundary.
    JunkAtEnd,
    /// The start of a segment was neither a header, padding, nor a
    /// recognized compression format.
    BadCompressedMagic,
    /// The segment uses a compression method this build cannot decode.
    UnsupportedCompressionMethod(&'static str),
    /// The decompressor reported a failure mid-segment.
    DecompressorFailure,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::BadMagic => f.write_str("no cpio magic"),
            Error::UnsupportedLegacyFormat => {
                f.write_str("incorrect cpio method used: use -H newc option")
            }
            Error::MalformedPadding => f.write_str("broken padding"),
            Error::JunkInArchive => f.write_str("junk within compressed archive"),
            Error::JunkAtEnd => f.write_str("junk at the end of compressed archive"),
            Error::BadCompressedMagic => {
                f.write_str("invalid magic at start of compressed archive")
            }
            Error::UnsupportedCompressionMethod(name) => {
                write!(f, "compression method {} not configured", name)
            }
            Error::DecompressorFailure => f.write_str("decompressor failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// The result type used within the read module.
pub type Result<T> = result::Result<T, Error>;
