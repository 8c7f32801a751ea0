//! FLAC import/export. claxon decodes, flacenc encodes, metaflac gives
//! access to the metadata blocks where trackers stash titles, loop points
//! and the legacy "xtra"/"smpl" RIFF chunks.

use crate::codecs::{SampleCodec, SampleExporter};
use crate::prelude::*;
use crate::sample::{FileType, Sample, SampleInfo, DEFAULT_GLOBAL_VOLUME, DEFAULT_VOLUME};
use claxon::FlacReader;
use flacenc::component::BitRepr;
use flacenc::error::Verify;
use metaflac::{Block, Tag};

const FLAC_MARKER: &[u8; 4] = b"fLaC";
const FLAC_MAX_SAMPLE_RATE: u32 = 655_350;

// bounded chunk size for one-shot saves, so huge samples are never
// widened into a second whole-sample buffer at once
const EXPORT_CHUNK: usize = 65_536;

pub struct FlacCodec;

impl SampleCodec for FlacCodec {
    fn file_extension(&self) -> &'static str {
        "flac"
    }

    fn read_info(&self, fp: &mut dyn ReadSeek) -> R<Option<SampleInfo>> {
        let Some(meta) = read_metadata(fp)? else {
            return Ok(None);
        };
        if !meta.geometry_usable() {
            return Ok(None);
        }

        let mut info = SampleInfo {
            speed: meta.speed(),
            length: meta.total_frames as u32,
            loop_start: 0,
            loop_end: 0,
            flags: Default::default(),
            title: meta.title.clone(),
            description: "FLAC Audio File",
            file_type: FileType::SampleCompressed,
        };
        info.flags.bits16 = meta.bits > 8;
        info.flags.stereo = meta.channels == 2;
        if let Some(lp) = &meta.loop_region {
            info.loop_start = lp.start;
            info.loop_end = lp.end + 1;
            info.flags.looped = true;
            info.flags.pingpong = lp.kind != 0;
        }
        Ok(Some(info))
    }

    fn load_sample(&self, fp: &mut dyn ReadSeek) -> R<Option<Sample>> {
        let Some(meta) = read_metadata(fp)? else {
            return Ok(None);
        };
        if !meta.geometry_usable() {
            return Ok(None);
        }

        fp.rewind()?;
        let mut reader = match FlacReader::new(&mut *fp) {
            Ok(reader) => reader,
            Err(e) => {
                warn!("FLAC: {}", e);
                return Ok(None);
            }
        };

        let mut smp = Sample {
            c5speed: meta.speed(),
            length: meta.total_frames as u32,
            volume: DEFAULT_VOLUME,
            global_volume: DEFAULT_GLOBAL_VOLUME,
            ..Default::default()
        };
        if let Some(title) = &meta.title {
            smp.set_name(title.as_bytes());
        }
        smp.flags.bits16 = meta.bits > 8;
        smp.flags.stereo = meta.channels == 2;
        if let Some(lp) = &meta.loop_region {
            smp.loop_start = lp.start;
            smp.loop_end = lp.end + 1;
            smp.flags.looped = true;
            smp.flags.pingpong = lp.kind != 0;
        }
        if let Some(pan) = meta.pan {
            smp.panning = pan;
            smp.flags.panning = true;
        }
        if let Some(vol) = meta.volume {
            smp.volume = vol;
        }

        // the stream-info geometry bounds the buffer; anything the decoder
        // produces past it is discarded
        let bits = u32::from(meta.bits);
        let capacity = meta.total_frames * u64::from(meta.channels);
        smp.data = Vec::with_capacity(capacity as usize * if bits > 8 { 2 } else { 1 });

        let mut decoded: u64 = 0;
        for sample in reader.samples() {
            let sample = match sample {
                Ok(s) => s,
                Err(e) => {
                    warn!("FLAC: {}", e);
                    return Ok(None);
                }
            };
            if decoded >= capacity {
                break;
            }
            // normalize every source depth into an 8- or 16-bit container
            if bits <= 8 {
                smp.data.push(((sample << (8 - bits)) as i8) as u8);
            } else if bits <= 16 {
                let v = (sample << (16 - bits)) as i16;
                smp.data.extend_from_slice(&v.to_ne_bytes());
            } else {
                let v = (sample >> (bits - 16)) as i16;
                smp.data.extend_from_slice(&v.to_ne_bytes());
            }
            decoded += 1;
        }

        if decoded < capacity {
            debug!(
                "FLAC: stream ended after {} of {} samples",
                decoded, capacity
            );
            smp.length = (decoded / u64::from(meta.channels)) as u32;
        }

        Ok(Some(smp))
    }

    fn save_sample(&self, fp: &mut dyn WriteSeek, smp: &Sample) -> R<()> {
        let bits: u8 = if smp.flags.bits16 { 16 } else { 8 };
        let channels: u8 = if smp.flags.stereo { 2 } else { 1 };

        let total = u64::from(smp.length) * u64::from(smp.bytes_per_frame());
        if smp.data.len() as u64 != total {
            return Err(anyhow!("FLAC: unexpected sample data size"));
        }

        let mut session = FlacExporter::new(bits, channels, smp.c5speed)?;
        for chunk in smp.data.chunks(EXPORT_CHUNK) {
            session.body(fp, chunk)?;
        }
        Box::new(session).finish(fp)
    }

    fn begin_export(
        &self,
        _fp: &mut dyn WriteSeek,
        bits: u8,
        channels: u8,
        rate: u32,
    ) -> R<Box<dyn SampleExporter>> {
        Ok(Box::new(FlacExporter::new(bits, channels, rate)?))
    }
}

/* ------------------------------------------------------------------ */
/* metadata */

struct LoopRegion {
    kind: u32,
    start: u32,
    end: u32,
}

#[derive(Default)]
struct FlacMeta {
    channels: u8,
    bits: u8,
    rate: u32,
    total_frames: u64,
    title: Option<String>,
    rate_override: Option<u32>,
    loop_region: Option<LoopRegion>,
    pan: Option<u8>,
    volume: Option<u16>,
}

impl FlacMeta {
    fn geometry_usable(&self) -> bool {
        self.total_frames != 0 && self.channels != 0 && self.channels <= 2
    }

    fn speed(&self) -> u32 {
        self.rate_override.unwrap_or(self.rate)
    }
}

fn le16(d: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([d[at], d[at + 1]])
}

fn le32(d: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([d[at], d[at + 1], d[at + 2], d[at + 3]])
}

/// Metadata pass over the whole block chain. `Ok(None)` covers both
/// not-a-FLAC and unreadable-metadata, letting the dispatcher move on.
fn read_metadata(fp: &mut dyn ReadSeek) -> R<Option<FlacMeta>> {
    fp.rewind()?;
    let mut magic = [0u8; 4];
    match fp.read_exact(&mut magic) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    if &magic != FLAC_MARKER {
        return Ok(None);
    }

    fp.rewind()?;
    let mut reader = &mut *fp;
    let tag = match Tag::read_from(&mut reader) {
        Ok(tag) => tag,
        Err(e) => {
            warn!("FLAC: unreadable metadata: {}", e);
            return Ok(None);
        }
    };

    let Some(si) = tag.get_streaminfo() else {
        return Ok(None);
    };
    let mut meta = FlacMeta {
        channels: si.num_channels,
        bits: si.bits_per_sample,
        rate: si.sample_rate,
        total_frames: si.total_samples,
        ..Default::default()
    };

    for block in tag.blocks() {
        match block {
            Block::VorbisComment(vc) => read_vorbis_comments(vc, &mut meta),
            Block::Application(app) => read_application(&app.data, &mut meta),
            _ => {}
        }
    }

    Ok(Some(meta))
}

fn read_vorbis_comments(vc: &metaflac::block::VorbisComment, meta: &mut FlacMeta) {
    let mut loop_start: i64 = -1;
    let mut loop_length: i64 = -1;

    for (key, values) in &vc.comments {
        let Some(value) = values.first() else {
            continue;
        };
        match key.to_ascii_uppercase().as_str() {
            "TITLE" => meta.title = Some(value.clone()),
            "SAMPLERATE" => {
                if let Ok(rate) = value.trim().parse::<i64>() {
                    if rate > 0 {
                        meta.rate_override = Some(rate as u32);
                    }
                }
            }
            "LOOPSTART" => loop_start = value.trim().parse().unwrap_or(-1),
            "LOOPLENGTH" => loop_length = value.trim().parse().unwrap_or(-1),
            _ => {}
        }
    }

    if loop_start > 0 && loop_length > 1 {
        meta.loop_region = Some(LoopRegion {
            kind: 0,
            start: loop_start as u32,
            end: (loop_start + loop_length - 1) as u32,
        });
    }
}

/// The application payload smuggles a RIFF-style chunk: 4-byte tag, u32
/// little-endian length, then the chunk body at fixed offsets.
fn read_application(d: &[u8], meta: &mut FlacMeta) {
    if d.len() < 8 {
        return;
    }
    let chunk_len = le32(d, 4);

    match &d[0..4] {
        b"xtra" if chunk_len >= 8 && d.len() >= 16 => {
            let xtra_flags = le32(d, 8);

            // panning (0..256)
            if xtra_flags & 0x20 != 0 {
                meta.pan = Some(le16(d, 12).min(255) as u8);
            }

            // volume (0..256)
            meta.volume = Some(le16(d, 14).min(256));
        }
        b"smpl" if chunk_len > 52 && d.len() >= 60 => {
            // 28-byte preamble, then the loop count; the single loop record
            // starts 8 bytes in (identifier and sampler-data fields)
            let num_loops = le32(d, 36);
            if num_loops == 1 {
                meta.loop_region = Some(LoopRegion {
                    kind: le32(d, 48),
                    start: le32(d, 52),
                    end: le32(d, 56),
                });
            }
        }
        _ => {}
    }
}

/* ------------------------------------------------------------------ */
/* writing */

/// Incremental FLAC export. The encoder wants the whole stream at once,
/// so the session widens incoming PCM to i32 as it arrives and encodes
/// everything on finish.
pub struct FlacExporter {
    bits: u8,
    channels: u8,
    rate: u32,
    samples: Vec<i32>,
}

impl FlacExporter {
    pub fn new(bits: u8, channels: u8, rate: u32) -> R<Self> {
        match bits {
            8 | 16 => {}
            other => return Err(anyhow!("FLAC export: unsupported bit width {}", other)),
        }
        if channels == 0 || channels > 2 {
            return Err(anyhow!("FLAC export: unsupported channel count {}", channels));
        }
        Ok(FlacExporter {
            bits,
            channels,
            rate: rate.min(FLAC_MAX_SAMPLE_RATE),
            samples: Vec::new(),
        })
    }
}

impl SampleExporter for FlacExporter {
    fn body(&mut self, _fp: &mut dyn WriteSeek, data: &[u8]) -> R<()> {
        let frame = usize::from(self.bits / 8) * usize::from(self.channels);
        if data.len() % frame != 0 {
            return Err(anyhow!("FLAC export: received uneven length"));
        }

        match self.bits {
            8 => {
                for &b in data {
                    self.samples.push(i32::from(b as i8));
                }
            }
            _ => {
                for pair in data.chunks_exact(2) {
                    self.samples
                        .push(i32::from(i16::from_ne_bytes([pair[0], pair[1]])));
                }
            }
        }
        Ok(())
    }

    fn silence(&mut self, fp: &mut dyn WriteSeek, bytes: u64) -> R<()> {
        // actual zero PCM, through the normal body path
        let zeros = [0u8; 4096];
        let mut left = bytes;
        while left > 0 {
            let n = left.min(zeros.len() as u64) as usize;
            self.body(fp, &zeros[..n])?;
            left -= n as u64;
        }
        Ok(())
    }

    fn finish(self: Box<Self>, fp: &mut dyn WriteSeek) -> R<()> {
        let mut config = flacenc::config::Encoder::default();
        config.block_size = 8192;
        let config = config
            .into_verified()
            .map_err(|e| anyhow!("FLAC encoder configuration rejected: {:?}", e))?;

        let source = flacenc::source::MemSource::from_samples(
            &self.samples,
            usize::from(self.channels),
            usize::from(self.bits),
            self.rate as usize,
        );
        let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
            .map_err(|e| anyhow!("FLAC encoding failed: {:?}", e))?;

        let mut sink = flacenc::bitsink::ByteSink::new();
        sink.reserve(self.samples.len() * usize::from(self.bits / 8) / 2 + 8192);
        stream.write(&mut sink)?;

        fp.write_all(sink.as_slice())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleFlags;

    fn test_sample(bits16: bool, stereo: bool, frames: u32) -> Sample {
        let channels = if stereo { 2 } else { 1 };
        let mut smp = Sample {
            c5speed: 22050,
            length: frames,
            volume: DEFAULT_VOLUME,
            global_volume: DEFAULT_GLOBAL_VOLUME,
            flags: SampleFlags {
                bits16,
                stereo,
                ..Default::default()
            },
            ..Default::default()
        };
        for i in 0..frames * channels {
            if bits16 {
                let v = (i as i16).wrapping_mul(193);
                smp.data.extend_from_slice(&v.to_ne_bytes());
            } else {
                smp.data.push(i as u8);
            }
        }
        smp
    }

    /// Appends raw metadata blocks after the existing chain, fixing up the
    /// last-block flags, and keeps the audio frames untouched.
    fn splice_blocks(flac: &[u8], blocks: &[(u8, Vec<u8>)]) -> Cursor<Vec<u8>> {
        let mut out = flac[..4].to_vec();
        let mut pos = 4;
        loop {
            let header = flac[pos];
            let size =
                u32::from_be_bytes([0, flac[pos + 1], flac[pos + 2], flac[pos + 3]]) as usize;
            out.push(header & 0x7f);
            out.extend_from_slice(&flac[pos + 1..pos + 4 + size]);
            pos += 4 + size;
            if header & 0x80 != 0 {
                break;
            }
        }
        for (i, (block_type, payload)) in blocks.iter().enumerate() {
            let last = i == blocks.len() - 1;
            out.push(block_type | if last { 0x80 } else { 0 });
            let len = payload.len() as u32;
            out.extend_from_slice(&len.to_be_bytes()[1..]);
            out.extend_from_slice(payload);
        }
        out.extend_from_slice(&flac[pos..]);
        Cursor::new(out)
    }

    fn vorbis_block(pairs: &[&str]) -> Vec<u8> {
        let mut v = Cursor::new(Vec::new());
        v.write_u32::<LittleEndian>(0).unwrap();
        v.write_u32::<LittleEndian>(pairs.len() as u32).unwrap();
        for pair in pairs {
            v.write_u32::<LittleEndian>(pair.len() as u32).unwrap();
            v.write_all(pair.as_bytes()).unwrap();
        }
        v.into_inner()
    }

    fn xtra_block(flags: u32, pan: u16, vol: u16) -> Vec<u8> {
        let mut v = Cursor::new(Vec::new());
        v.write_all(b"riff").unwrap(); // application id
        v.write_all(b"xtra").unwrap();
        v.write_u32::<LittleEndian>(8).unwrap();
        v.write_u32::<LittleEndian>(flags).unwrap();
        v.write_u16::<LittleEndian>(pan).unwrap();
        v.write_u16::<LittleEndian>(vol).unwrap();
        v.into_inner()
    }

    fn smpl_block(kind: u32, start: u32, end: u32) -> Vec<u8> {
        let mut v = Cursor::new(Vec::new());
        v.write_all(b"riff").unwrap(); // application id
        v.write_all(b"smpl").unwrap();
        v.write_u32::<LittleEndian>(56).unwrap();
        v.write_all(&[0u8; 28]).unwrap(); // preamble
        v.write_u32::<LittleEndian>(1).unwrap(); // one loop
        v.write_all(&[0u8; 8]).unwrap(); // identifier + sampler data
        v.write_u32::<LittleEndian>(kind).unwrap();
        v.write_u32::<LittleEndian>(start).unwrap();
        v.write_u32::<LittleEndian>(end).unwrap();
        v.write_all(&[0u8; 4]).unwrap();
        v.into_inner()
    }

    /// fLaC marker plus a lone STREAMINFO block with the given geometry.
    fn streaminfo_only(channels: u8, bits: u8, rate: u32, total: u64) -> Cursor<Vec<u8>> {
        let mut v = b"fLaC".to_vec();
        v.push(0x80);
        v.extend_from_slice(&[0, 0, 34]);
        let mut body = Cursor::new(Vec::new());
        body.write_u16::<BigEndian>(4096).unwrap();
        body.write_u16::<BigEndian>(4096).unwrap();
        body.write_all(&[0u8; 6]).unwrap(); // frame size bounds
        let packed: u64 = (u64::from(rate) << 44)
            | (u64::from(channels - 1) << 41)
            | (u64::from(bits - 1) << 36)
            | (total & 0xF_FFFF_FFFF);
        body.write_u64::<BigEndian>(packed).unwrap();
        body.write_all(&[0u8; 16]).unwrap(); // md5
        v.extend_from_slice(&body.into_inner());
        Cursor::new(v)
    }

    fn encode(smp: &Sample) -> Vec<u8> {
        let mut fp = Cursor::new(Vec::new());
        FlacCodec.save_sample(&mut fp, smp).unwrap();
        fp.into_inner()
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let smp = test_sample(true, true, 500);
        let mut fp = Cursor::new(encode(&smp));

        let info = FlacCodec.read_info(&mut fp).unwrap().unwrap();
        assert_eq!(info.speed, 22050);
        assert_eq!(info.length, 500);
        assert!(info.flags.bits16 && info.flags.stereo);
        assert_eq!(info.file_type, FileType::SampleCompressed);
        assert_eq!(info.description, "FLAC Audio File");

        let loaded = FlacCodec.load_sample(&mut fp).unwrap().unwrap();
        assert_eq!(loaded.c5speed, 22050);
        assert_eq!(loaded.length, 500);
        assert_eq!(loaded.data, smp.data);
    }

    #[test]
    fn eight_bit_mono_round_trips() {
        let smp = test_sample(false, false, 300);
        let mut fp = Cursor::new(encode(&smp));
        let loaded = FlacCodec.load_sample(&mut fp).unwrap().unwrap();
        assert!(!loaded.flags.bits16 && !loaded.flags.stereo);
        assert_eq!(loaded.data, smp.data);
    }

    #[test]
    fn rejects_non_flac_input() {
        let mut fp = Cursor::new(b"OggS\x00\x00\x00\x00".to_vec());
        assert!(FlacCodec.read_info(&mut fp).unwrap().is_none());
        assert!(FlacCodec.load_sample(&mut fp).unwrap().is_none());
    }

    #[test]
    fn rejects_unusable_geometry() {
        let mut fp = streaminfo_only(3, 16, 44100, 1000);
        assert!(FlacCodec.read_info(&mut fp).unwrap().is_none());
        let mut fp = streaminfo_only(1, 16, 44100, 0);
        assert!(FlacCodec.read_info(&mut fp).unwrap().is_none());
    }

    #[test]
    fn vorbis_comments_set_title_rate_and_loop() {
        let smp = test_sample(true, false, 200);
        let flac = encode(&smp);
        let mut fp = splice_blocks(
            &flac,
            &[(
                4,
                vorbis_block(&["title=Loopy", "SampleRate=32000", "LOOPSTART=10", "LOOPLENGTH=20"]),
            )],
        );

        let info = FlacCodec.read_info(&mut fp).unwrap().unwrap();
        assert_eq!(info.title.as_deref(), Some("Loopy"));
        assert_eq!(info.speed, 32000);
        assert_eq!(info.loop_start, 10);
        assert_eq!(info.loop_end, 30);
        assert!(info.flags.looped && !info.flags.pingpong);
    }

    #[test]
    fn degenerate_vorbis_loop_is_ignored() {
        let smp = test_sample(true, false, 200);
        let flac = encode(&smp);
        let mut fp = splice_blocks(
            &flac,
            &[(4, vorbis_block(&["LOOPSTART=0", "LOOPLENGTH=1"]))],
        );
        let info = FlacCodec.read_info(&mut fp).unwrap().unwrap();
        assert!(!info.flags.looped);
    }

    #[test]
    fn smpl_and_xtra_chunks_are_applied() {
        let smp = test_sample(true, false, 200);
        let flac = encode(&smp);
        let mut fp = splice_blocks(
            &flac,
            &[
                (2, smpl_block(1, 5, 50)),
                (2, xtra_block(0x20, 300, 300)),
            ],
        );

        let loaded = FlacCodec.load_sample(&mut fp).unwrap().unwrap();
        assert_eq!(loaded.loop_start, 5);
        assert_eq!(loaded.loop_end, 51);
        assert!(loaded.flags.looped && loaded.flags.pingpong);
        assert_eq!(loaded.panning, 255); // clamped
        assert!(loaded.flags.panning);
        assert_eq!(loaded.volume, 256); // clamped
    }

    #[test]
    fn streaming_export_matches_one_shot() {
        let smp = test_sample(true, false, 400);
        let whole = encode(&smp);

        let mut streamed = Cursor::new(Vec::new());
        let mut session = FlacExporter::new(16, 1, smp.c5speed).unwrap();
        for part in [&smp.data[..26], &smp.data[26..400], &smp.data[400..]] {
            session.body(&mut streamed, part).unwrap();
        }
        Box::new(session).finish(&mut streamed).unwrap();

        assert_eq!(whole, streamed.into_inner());
    }

    #[test]
    fn silence_becomes_zero_samples() {
        let mut fp = Cursor::new(Vec::new());
        let mut session = FlacExporter::new(16, 1, 22050).unwrap();
        session.body(&mut fp, &100i16.to_ne_bytes()).unwrap();
        session.silence(&mut fp, 6).unwrap();
        Box::new(session).finish(&mut fp).unwrap();

        let loaded = FlacCodec.load_sample(&mut fp).unwrap().unwrap();
        assert_eq!(loaded.length, 4);
        let mut expect = 100i16.to_ne_bytes().to_vec();
        expect.extend_from_slice(&[0u8; 6]);
        assert_eq!(loaded.data, expect);
    }

    #[test]
    fn export_rejects_unsupported_widths() {
        assert!(FlacExporter::new(24, 1, 44100).is_err());
        assert!(FlacExporter::new(16, 3, 44100).is_err());

        let mut fp = Cursor::new(Vec::new());
        let mut session = FlacExporter::new(16, 2, 44100).unwrap();
        assert!(session.body(&mut fp, &[0, 1, 2]).is_err());
    }
}
