//! Readers and writers for two sample container formats used by trackers:
//! AIFF (and its Amiga 8SVX sibling) and FLAC. Decoding produces the
//! canonical [`Sample`] representation; encoding accepts the same, either
//! one-shot or as an incremental export session.
//!
//! All I/O goes through abstract seekable streams ([`ReadSeek`] /
//! [`WriteSeek`]), so the same code paths serve files, memory buffers and
//! anything else implementing the std I/O traits.

pub mod codecs;
pub mod ieee;
pub mod iff;
pub mod sample;

mod prelude;

use std::io::{Read, Seek, Write};

/// Seekable input stream handed to the readers.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// Seekable output stream handed to the writers.
pub trait WriteSeek: Write + Seek {}
impl<T: Write + Seek + ?Sized> WriteSeek for T {}

pub use codecs::{for_extension, AiffCodec, FlacCodec, SampleCodec, SampleExporter};
pub use sample::{FileType, Sample, SampleFlags, SampleInfo};
