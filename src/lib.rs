//! # `initramfs`
//!
//! The `initramfs` crate unpacks the cpio "newc" archives that Linux uses
//! for early-userspace images. The unpacker is a byte-level state machine:
//! input may arrive in arbitrarily-sized chunks (typically from a
//! decompressor), there is no seeking and no lookahead beyond the current
//! chunk, and entries are materialized through a caller-supplied [`Sink`].
//!
//! ## Example
//!
//! ```no_run
//! use initramfs::LocalFs;
//!
//! let data = std::fs::read("initrd.img").unwrap();
//! let mut sink = LocalFs::new("rootfs").unwrap();
//! initramfs::unpack(&data, &mut sink).unwrap();
//! ```
//!
//! The boot-archive framing is handled by [`unpack`]: an image may be a
//! concatenation of plain and compressed cpio segments separated by NUL
//! padding, each segment independently encoded. For feeding bytes by hand,
//! use [`Unpacker`] directly.
//!
//! ## Features
//!
//! - `std`: filesystem sink and `std::error::Error` impls. Without it the
//!   crate is `no_std` + `alloc`; bring your own [`Sink`].
//! - `compression`: gzip and zstd segment decompression. Other methods are
//!   still recognized and rejected with a diagnostic.

#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod newc;

mod read;
pub use read::*;
