//! AIFF and 8SVX: two sibling formats sharing the IFF chunking convention.
//! Reading walks the FORM container once, collects the chunks it knows, then
//! decodes; writing emits FORM/COMM/SSND with deferred length patching for
//! the streaming export path.

use crate::codecs::{SampleCodec, SampleExporter};
use crate::ieee::{from_extended, to_extended};
use crate::iff::{self, Chunk};
use crate::prelude::*;
use crate::sample::{
    read_pcm_chunk, write_pcm, Endian, FileType, PcmFormat, Sample, SampleInfo,
    DEFAULT_GLOBAL_VOLUME, DEFAULT_VOLUME,
};

const FORM_ID: &[u8; 4] = b"FORM";
const AIFF_ID: &[u8; 4] = b"AIFF";
const SVX8_ID: &[u8; 4] = b"8SVX";
const COMM_ID: &[u8; 4] = b"COMM";
const SSND_ID: &[u8; 4] = b"SSND";
const VHDR_ID: &[u8; 4] = b"VHDR";
const BODY_ID: &[u8; 4] = b"BODY";
const NAME_ID: &[u8; 4] = b"NAME";
const AUTH_ID: &[u8; 4] = b"AUTH";
const ANNO_ID: &[u8; 4] = b"ANNO";

// guards against absurd declared sizes in title chunks
const MAX_TITLE_BYTES: u32 = 1024;

pub struct AiffCodec;

impl SampleCodec for AiffCodec {
    fn file_extension(&self) -> &'static str {
        "aiff"
    }

    fn read_info(&self, fp: &mut dyn ReadSeek) -> R<Option<SampleInfo>> {
        Ok(read_iff(fp, false)?.map(|(info, _)| info))
    }

    fn load_sample(&self, fp: &mut dyn ReadSeek) -> R<Option<Sample>> {
        Ok(read_iff(fp, true)?.and_then(|(_, smp)| smp))
    }

    fn save_sample(&self, fp: &mut dyn WriteSeek, smp: &Sample) -> R<()> {
        save_sample(fp, smp)
    }

    fn begin_export(
        &self,
        fp: &mut dyn WriteSeek,
        bits: u8,
        channels: u8,
        rate: u32,
    ) -> R<Box<dyn SampleExporter>> {
        Ok(Box::new(AiffExporter::new(fp, bits, channels, rate)?))
    }
}

/* ------------------------------------------------------------------ */
/* reading */

/// Voice8Header, the 8SVX instrument header (20 bytes).
struct Vhdr {
    oneshot_hi: u32,
    repeat_hi: u32,
    per_sec: u16,
    octaves: u8,
    compression: u8,
}

fn parse_vhdr(buf: &[u8; 20]) -> R<Vhdr> {
    let mut cur = Cursor::new(&buf[..]);
    let oneshot_hi = cur.read_u32::<BigEndian>()?;
    let repeat_hi = cur.read_u32::<BigEndian>()?;
    let _cycle_hi = cur.read_u32::<BigEndian>()?;
    let per_sec = cur.read_u16::<BigEndian>()?;
    let octaves = cur.read_u8()?;
    let compression = cur.read_u8()?;
    // trailing field: playback volume (fixed point), unused here
    Ok(Vhdr {
        oneshot_hi,
        repeat_hi,
        per_sec,
        octaves,
        compression,
    })
}

fn read_title(chunk: &Chunk, fp: &mut dyn ReadSeek) -> R<Option<String>> {
    let mut buf = vec![0u8; chunk.size.min(MAX_TITLE_BYTES) as usize];
    let n = iff::read_chunk(chunk, fp, 0, &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    let raw = &buf[..n];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(Some(String::from_utf8_lossy(&raw[..end]).into_owned()))
}

/// Shared walk for both form types. Returns the metadata summary, plus the
/// fully decoded sample when `load` is set.
fn read_iff(fp: &mut dyn ReadSeek, load: bool) -> R<Option<(SampleInfo, Option<Sample>)>> {
    fp.rewind()?;
    let Some(form) = iff::peek_chunk(fp)? else {
        return Ok(None);
    };
    if &form.id != FORM_ID {
        return Ok(None);
    }

    let mut form_type = [0u8; 4];
    if iff::read_chunk(&form, fp, 0, &mut form_type)? != form_type.len() {
        return Ok(None);
    }
    // jump "into" the FORM chunk: the walk starts right after the type field
    fp.seek(SeekFrom::Start(form.offset + 4))?;

    match &form_type {
        SVX8_ID => read_8svx(fp, load),
        AIFF_ID => read_aiff(fp, load),
        _ => Ok(None),
    }
}

fn read_8svx(fp: &mut dyn ReadSeek, load: bool) -> R<Option<(SampleInfo, Option<Sample>)>> {
    let mut vhdr = None;
    let mut body = None;
    let mut name = None;
    let mut auth = None;
    let mut anno = None;

    while let Some(chunk) = iff::peek_chunk(fp)? {
        match &chunk.id {
            VHDR_ID => vhdr = Some(chunk),
            BODY_ID => body = Some(chunk),
            NAME_ID => name = Some(chunk),
            AUTH_ID => auth = Some(chunk),
            ANNO_ID => anno = Some(chunk),
            _ => {}
        }
    }
    let (Some(vhdr_chunk), Some(body)) = (vhdr, body) else {
        return Ok(None);
    };

    let mut raw = [0u8; 20];
    if iff::read_chunk(&vhdr_chunk, fp, 0, &mut raw)? != raw.len() {
        return Ok(None);
    }
    let vhdr = parse_vhdr(&raw)?;

    if vhdr.compression != 0 {
        warn!("8SVX: compressed (fibonacci-delta) samples are unsupported");
        return Ok(None);
    }
    if vhdr.octaves != 1 {
        warn!("8SVX: file contains {} octaves", vhdr.octaves);
    }

    let title = match name.or(auth).or(anno) {
        Some(chunk) => read_title(&chunk, fp)?,
        None => None,
    };

    let mut smp = None;
    if load {
        let mut s = Sample {
            c5speed: u32::from(vhdr.per_sec),
            length: body.size,
            volume: DEFAULT_VOLUME,
            global_volume: DEFAULT_GLOBAL_VOLUME,
            ..Default::default()
        };
        if let Some(t) = &title {
            s.set_name(t.as_bytes());
        }
        read_pcm_chunk(
            &body,
            fp,
            &mut s,
            PcmFormat {
                bits: 8,
                endian: Endian::Big,
                signed: true,
                stereo: false,
            },
            0,
        )?;

        // the header's repeat field is a length, not an absolute end
        if vhdr.repeat_hi != 0 {
            let mut start = vhdr.oneshot_hi;
            let mut end = start.saturating_add(vhdr.repeat_hi);
            if start > s.length {
                start = 0;
            }
            if end > s.length {
                end = s.length;
            }
            s.loop_start = start;
            s.loop_end = end;
            if start + 2 < end {
                s.flags.looped = true;
            }
        }
        smp = Some(s);
    }

    let info = SampleInfo {
        speed: u32::from(vhdr.per_sec),
        length: body.size,
        loop_start: 0,
        loop_end: 0,
        flags: Default::default(),
        title,
        description: "8SVX sample",
        file_type: FileType::SamplePlain,
    };
    Ok(Some((info, smp)))
}

fn read_aiff(fp: &mut dyn ReadSeek, load: bool) -> R<Option<(SampleInfo, Option<Sample>)>> {
    let mut comm = None;
    let mut ssnd = None;
    let mut name = None;

    while let Some(chunk) = iff::peek_chunk(fp)? {
        match &chunk.id {
            COMM_ID => comm = Some(chunk),
            SSND_ID => ssnd = Some(chunk),
            NAME_ID => name = Some(chunk),
            _ => {}
        }
    }
    let (Some(comm), Some(ssnd)) = (comm, ssnd) else {
        return Ok(None);
    };

    let mut raw = [0u8; 18];
    if iff::read_chunk(&comm, fp, 0, &mut raw)? != raw.len() {
        return Ok(None);
    }
    let mut cur = Cursor::new(&raw[..]);
    let num_channels = cur.read_u16::<BigEndian>()?;
    let num_frames = cur.read_u32::<BigEndian>()?;
    let sample_size = cur.read_u16::<BigEndian>()?;
    let mut rate_bytes = [0u8; 10];
    cur.read_exact(&mut rate_bytes)?;
    let rate = from_extended(&rate_bytes);

    let title = match name {
        Some(chunk) => read_title(&chunk, fp)?,
        None => None,
    };

    let mut smp = None;
    if load {
        let stereo = match num_channels {
            1 => false,
            2 => true,
            n => {
                warn!("AIFF: multichannel ({} channels) is unsupported, loading as mono", n);
                false
            }
        };
        // best effort: round odd widths up, fall back to 8-bit
        let bits = match (sample_size + 7) & !7 {
            8 => 8,
            16 => 16,
            24 => 24,
            32 => 32,
            other => {
                warn!("AIFF: unsupported bit width {}, loading as 8-bit", other);
                8
            }
        };

        let mut s = Sample {
            c5speed: rate as u32,
            length: num_frames,
            volume: DEFAULT_VOLUME,
            global_volume: DEFAULT_GLOBAL_VOLUME,
            ..Default::default()
        };
        if let Some(t) = &title {
            s.set_name(t.as_bytes());
        }
        // the payload starts 8 bytes in; offset and blockSize are skipped
        read_pcm_chunk(
            &ssnd,
            fp,
            &mut s,
            PcmFormat {
                bits,
                endian: Endian::Big,
                signed: true,
                stereo,
            },
            8,
        )?;
        smp = Some(s);
    }

    let info = SampleInfo {
        speed: rate as u32,
        length: num_frames,
        loop_start: 0,
        loop_end: 0,
        flags: Default::default(),
        title,
        description: "Audio IFF sample",
        file_type: FileType::SamplePlain,
    };
    Ok(Some((info, smp)))
}

/* ------------------------------------------------------------------ */
/* writing */

/// Stream offsets of the two length fields that cannot be known until all
/// PCM has been written, plus the running byte count.
struct AiffWriteState {
    comm_frames_pos: u64,
    ssnd_size_pos: u64,
    num_bytes: u64,
    bytes_per_frame: u32,
    /// 16-bit PCM is byte-swapped before writing on little-endian hosts.
    swap: bool,
}

/// Writes the FORM/NAME/COMM/SSND header shape. The FORM size is a 0xFF
/// placeholder patched at the end; when `state` is given, the COMM frame
/// count and SSND size fields are placeholders too and their offsets are
/// recorded for the final patch. Returns bytes per frame.
fn write_header(
    fp: &mut dyn WriteSeek,
    bits: u8,
    channels: u8,
    rate: u32,
    name: &str,
    frames: u32,
    mut state: Option<&mut AiffWriteState>,
) -> R<u32> {
    let width = u32::from(bits + 7) / 8;

    fp.write_all(b"FORM\xff\xff\xff\xffAIFF")?;

    if !name.is_empty() {
        fp.write_all(NAME_ID)?;
        // chunk length is rounded up to even, with a pad byte
        fp.write_u32::<BigEndian>((name.len() as u32 + 1) & !1)?;
        fp.write_all(name.as_bytes())?;
        if name.len() & 1 != 0 {
            fp.write_u8(0)?;
        }
    }

    fp.write_all(COMM_ID)?;
    fp.write_u32::<BigEndian>(18)?;
    fp.write_u16::<BigEndian>(u16::from(channels))?;
    if let Some(state) = state.as_deref_mut() {
        state.comm_frames_pos = fp.stream_position()?;
    }
    fp.write_u32::<BigEndian>(frames)?;
    fp.write_u16::<BigEndian>(u16::from(bits))?;
    fp.write_all(&to_extended(f64::from(rate)))?;

    // sample size in COMM is per channel; the frame width is not
    let bytes_per_frame = width * u32::from(channels);

    fp.write_all(SSND_ID)?;
    if let Some(state) = state.as_deref_mut() {
        state.ssnd_size_pos = fp.stream_position()?;
    }
    fp.write_u32::<BigEndian>(frames.wrapping_mul(bytes_per_frame).wrapping_add(8))?;
    fp.write_u32::<BigEndian>(0)?; // offset
    fp.write_u32::<BigEndian>(0)?; // blockSize

    Ok(bytes_per_frame)
}

fn patch_form_size(fp: &mut dyn WriteSeek) -> R<()> {
    let end = fp.stream_position()?;
    fp.seek(SeekFrom::Start(4))?;
    fp.write_u32::<BigEndian>((end - 8) as u32)?;
    Ok(())
}

fn save_sample(fp: &mut dyn WriteSeek, smp: &Sample) -> R<()> {
    let bits: u8 = if smp.flags.bits16 { 16 } else { 8 };
    let channels: u8 = if smp.flags.stereo { 2 } else { 1 };

    let bytes_per_frame = write_header(fp, bits, channels, smp.c5speed, &smp.name, smp.length, None)?;

    let fmt = PcmFormat {
        bits,
        endian: Endian::Big,
        signed: true,
        stereo: smp.flags.stereo,
    };
    let written = write_pcm(fp, smp, fmt)?;
    if written != u64::from(smp.length) * u64::from(bytes_per_frame) {
        return Err(anyhow!("AIFF: unexpected data size written"));
    }

    patch_form_size(fp)
}

/// Incremental AIFF export: header up front, PCM appended in arbitrary
/// slices, all deferred length fields patched on finish.
pub struct AiffExporter {
    state: AiffWriteState,
}

impl AiffExporter {
    pub fn new(fp: &mut dyn WriteSeek, bits: u8, channels: u8, rate: u32) -> R<Self> {
        match bits {
            8 | 16 => {}
            other => return Err(anyhow!("AIFF export: unsupported bit width {}", other)),
        }
        let mut state = AiffWriteState {
            comm_frames_pos: 0,
            ssnd_size_pos: 0,
            num_bytes: 0,
            bytes_per_frame: 0,
            swap: cfg!(target_endian = "little") && bits > 8,
        };
        state.bytes_per_frame =
            write_header(fp, bits, channels, rate, "", u32::MAX, Some(&mut state))?;
        Ok(AiffExporter { state })
    }
}

impl SampleExporter for AiffExporter {
    fn body(&mut self, fp: &mut dyn WriteSeek, data: &[u8]) -> R<()> {
        if data.len() % self.state.bytes_per_frame as usize != 0 {
            return Err(anyhow!("AIFF export: received uneven length"));
        }
        self.state.num_bytes += data.len() as u64;

        if self.state.swap {
            // AIFF is big-endian on disk
            for pair in data.chunks_exact(2) {
                fp.write_u16::<BigEndian>(u16::from_ne_bytes([pair[0], pair[1]]))?;
            }
        } else {
            fp.write_all(data)?;
        }
        Ok(())
    }

    fn silence(&mut self, fp: &mut dyn WriteSeek, bytes: u64) -> R<()> {
        self.state.num_bytes += bytes;
        let zeros = [0u8; 4096];
        let mut left = bytes;
        while left > 0 {
            let n = left.min(zeros.len() as u64) as usize;
            fp.write_all(&zeros[..n])?;
            left -= n as u64;
        }
        Ok(())
    }

    fn finish(self: Box<Self>, fp: &mut dyn WriteSeek) -> R<()> {
        patch_form_size(fp)?;

        let state = &self.state;
        fp.seek(SeekFrom::Start(state.comm_frames_pos))?;
        fp.write_u32::<BigEndian>((state.num_bytes / u64::from(state.bytes_per_frame)) as u32)?;
        fp.seek(SeekFrom::Start(state.ssnd_size_pos))?;
        fp.write_u32::<BigEndian>((state.num_bytes + 8) as u32)?;
        Ok(())
    }
}
