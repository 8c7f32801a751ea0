use crate::prelude::*;
use crate::sample::{Sample, SampleInfo};

mod aiff;
mod flac;

pub use aiff::{AiffCodec, AiffExporter};
pub use flac::{FlacCodec, FlacExporter};

/// One import/export adapter per container format.
///
/// The read entry points return `Ok(None)` for the whole "not this format"
/// class (bad signature, missing required chunks, unsupported encodings), so
/// a dispatcher can fall through to the next format; `Err` is reserved for
/// real I/O or internal failures.
pub trait SampleCodec: Send + Sync {
    fn file_extension(&self) -> &'static str;

    /// Metadata-only probe for file browsers; never materializes PCM.
    fn read_info(&self, fp: &mut dyn ReadSeek) -> R<Option<SampleInfo>>;

    /// Full decode, PCM included.
    fn load_sample(&self, fp: &mut dyn ReadSeek) -> R<Option<Sample>>;

    /// One-shot export of a whole sample.
    fn save_sample(&self, fp: &mut dyn WriteSeek, smp: &Sample) -> R<()>;

    /// Opens an incremental export session and writes whatever header the
    /// format needs up front. `bits` must be 8 or 16.
    fn begin_export(
        &self,
        fp: &mut dyn WriteSeek,
        bits: u8,
        channels: u8,
        rate: u32,
    ) -> R<Box<dyn SampleExporter>>;
}

/// Incremental export session state. One session owns one stream; `finish`
/// consumes the session after patching or flushing whatever the container
/// format defers to the end.
pub trait SampleExporter {
    /// Appends interleaved PCM in the session's native width. The byte
    /// length must be a whole number of frames.
    fn body(&mut self, fp: &mut dyn WriteSeek, data: &[u8]) -> R<()>;

    /// Appends `bytes` bytes of silence.
    fn silence(&mut self, fp: &mut dyn WriteSeek, bytes: u64) -> R<()>;

    fn finish(self: Box<Self>, fp: &mut dyn WriteSeek) -> R<()>;
}

pub fn for_extension(ext: &str) -> R<Box<dyn SampleCodec>> {
    match ext.to_ascii_lowercase().as_str() {
        "aif" | "aiff" | "iff" | "8svx" | "svx" => Ok(Box::new(AiffCodec)),
        "flac" => Ok(Box::new(FlacCodec)),
        _ => Err(anyhow!("no codec for extension: {}", ext)),
    }
}
