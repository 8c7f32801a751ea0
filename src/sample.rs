//! The canonical in-memory sample representation the codecs decode into and
//! encode from, plus the PCM transcoding between on-disk layouts and the
//! internal one. Internally PCM is held host-endian and signed, in 8- or
//! 16-bit containers, interleaved when stereo.

use crate::iff::Chunk;
use crate::prelude::*;

pub const MAX_NAME_LENGTH: usize = 32;

/// Import defaults: full sample volume (0..256) and global volume (0..64).
pub const DEFAULT_VOLUME: u16 = 64 * 4;
pub const DEFAULT_GLOBAL_VOLUME: u8 = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub bits16: bool,
    pub stereo: bool,
    pub looped: bool,
    pub pingpong: bool,
    pub panning: bool,
}

/// Full decode target: geometry, playback parameters and raw PCM.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub name: String,
    /// Playback rate in Hz; metadata overrides may differ from the
    /// stream-native rate.
    pub c5speed: u32,
    /// Length in frames, not bytes.
    pub length: u32,
    pub loop_start: u32,
    pub loop_end: u32,
    pub volume: u16,
    pub global_volume: u8,
    pub panning: u8,
    pub flags: SampleFlags,
    /// Host-endian signed PCM in 8- or 16-bit containers, interleaved when
    /// stereo.
    pub data: Vec<u8>,
}

impl Sample {
    pub fn bytes_per_frame(&self) -> u32 {
        let width = if self.flags.bits16 { 2 } else { 1 };
        let channels = if self.flags.stereo { 2 } else { 1 };
        width * channels
    }

    /// Copies a raw title into the bounded name field, stopping at the first
    /// NUL byte.
    pub fn set_name(&mut self, raw: &[u8]) {
        let end = raw
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(raw.len())
            .min(MAX_NAME_LENGTH);
        self.name = String::from_utf8_lossy(&raw[..end]).into_owned();
    }
}

/// Type tag for browser listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    SamplePlain,
    SampleCompressed,
}

/// Metadata-only projection of a sample file, derivable without touching the
/// PCM payload.
#[derive(Debug, Clone)]
pub struct SampleInfo {
    pub speed: u32,
    pub length: u32,
    pub loop_start: u32,
    pub loop_end: u32,
    pub flags: SampleFlags,
    pub title: Option<String>,
    pub description: &'static str,
    pub file_type: FileType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// On-disk PCM layout for [`read_pcm`] / [`write_pcm`].
#[derive(Debug, Clone, Copy)]
pub struct PcmFormat {
    /// Source sample width: 8, 16, 24 or 32 bits.
    pub bits: u8,
    pub endian: Endian,
    pub signed: bool,
    /// Stereo sources are interleaved.
    pub stereo: bool,
}

impl PcmFormat {
    pub fn channels(&self) -> u32 {
        if self.stereo {
            2
        } else {
            1
        }
    }
}

/// Decodes `frames` frames of disk-layout PCM into the sample's internal
/// containers: 8-bit sources stay 8-bit, anything wider lands in 16-bit
/// containers (24/32-bit sources are shifted down). A short read truncates
/// the sample rather than failing.
pub fn read_pcm(fp: &mut dyn Read, smp: &mut Sample, fmt: PcmFormat, frames: u32) -> R<()> {
    smp.flags.bits16 = fmt.bits > 8;
    smp.flags.stereo = fmt.stereo;

    let samples = u64::from(frames) * u64::from(fmt.channels());
    let container = if fmt.bits > 8 { 2usize } else { 1 };
    let mut data = Vec::with_capacity(samples as usize * container);

    'outer: for _ in 0..samples {
        match fmt.bits {
            8 => {
                let Ok(raw) = fp.read_u8() else { break 'outer };
                let v = if fmt.signed { raw } else { raw ^ 0x80 };
                data.push(v);
            }
            16 => {
                let raw = match fmt.endian {
                    Endian::Big => fp.read_u16::<BigEndian>(),
                    Endian::Little => fp.read_u16::<LittleEndian>(),
                };
                let Ok(raw) = raw else { break 'outer };
                let v = (if fmt.signed { raw } else { raw ^ 0x8000 }) as i16;
                data.extend_from_slice(&v.to_ne_bytes());
            }
            24 | 32 => {
                let wide = fmt.bits / 8;
                let mut b = [0u8; 4];
                if fp.read_exact(&mut b[..wide as usize]).is_err() {
                    break 'outer;
                }
                let mut v: i32 = 0;
                match fmt.endian {
                    Endian::Big => {
                        for &byte in &b[..wide as usize] {
                            v = v << 8 | i32::from(byte);
                        }
                    }
                    Endian::Little => {
                        for &byte in b[..wide as usize].iter().rev() {
                            v = v << 8 | i32::from(byte);
                        }
                    }
                }
                // sign-extend, then keep the top 16 bits
                let shift = 32 - i32::from(fmt.bits);
                let mut v = (v << shift) >> shift;
                if !fmt.signed {
                    v ^= 1 << (fmt.bits - 1);
                }
                let v = (v >> (fmt.bits - 16)) as i16;
                data.extend_from_slice(&v.to_ne_bytes());
            }
            other => return Err(anyhow!("unsupported PCM bit width: {}", other)),
        }
    }

    let decoded_frames = (data.len() / container) as u32 / fmt.channels();
    if decoded_frames < frames {
        debug!("PCM payload shorter than declared: {} < {} frames", decoded_frames, frames);
        smp.length = decoded_frames;
        data.truncate(decoded_frames as usize * fmt.channels() as usize * container);
    }
    smp.data = data;
    Ok(())
}

/// [`read_pcm`] over a previously peeked chunk's payload, starting `skip`
/// bytes in and bounded by the chunk size.
pub fn read_pcm_chunk(
    chunk: &Chunk,
    fp: &mut dyn ReadSeek,
    smp: &mut Sample,
    fmt: PcmFormat,
    skip: u32,
) -> R<()> {
    fp.seek(SeekFrom::Start(chunk.offset + u64::from(skip)))?;
    let avail = u64::from(chunk.size.saturating_sub(skip));
    let mut limited = Read::take(fp, avail);
    let frames = smp.length;
    read_pcm(&mut limited, smp, fmt, frames)
}

/// Encodes the sample's internal PCM in the given disk layout and returns
/// the byte count written. Only the internal widths (8/16 bit) are valid
/// targets.
pub fn write_pcm(out: &mut dyn Write, smp: &Sample, fmt: PcmFormat) -> R<u64> {
    if (fmt.bits > 8) != smp.flags.bits16 || fmt.stereo != smp.flags.stereo {
        return Err(anyhow!("PCM export layout does not match the sample"));
    }
    let mut written = 0u64;
    if smp.flags.bits16 {
        if fmt.bits != 16 {
            return Err(anyhow!("unsupported PCM export width: {}", fmt.bits));
        }
        for pair in smp.data.chunks_exact(2) {
            let mut v = i16::from_ne_bytes([pair[0], pair[1]]) as u16;
            if !fmt.signed {
                v ^= 0x8000;
            }
            match fmt.endian {
                Endian::Big => out.write_u16::<BigEndian>(v)?,
                Endian::Little => out.write_u16::<LittleEndian>(v)?,
            }
            written += 2;
        }
    } else {
        for &b in &smp.data {
            out.write_u8(if fmt.signed { b } else { b ^ 0x80 })?;
            written += 1;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(bits: u8, endian: Endian, stereo: bool) -> PcmFormat {
        PcmFormat {
            bits,
            endian,
            signed: true,
            stereo,
        }
    }

    #[test]
    fn reads_16bit_big_endian() {
        let mut src = Cursor::new(vec![0x12, 0x34, 0xff, 0x00]);
        let mut smp = Sample::default();
        smp.length = 2;
        read_pcm(&mut src, &mut smp, fmt(16, Endian::Big, false), 2).unwrap();
        assert!(smp.flags.bits16 && !smp.flags.stereo);
        let v: Vec<i16> = smp
            .data
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(v, vec![0x1234, -256]);
    }

    #[test]
    fn narrows_24bit_to_16bit_containers() {
        let mut src = Cursor::new(vec![0x12, 0x34, 0x56, 0xff, 0x00, 0x00]);
        let mut smp = Sample::default();
        read_pcm(&mut src, &mut smp, fmt(24, Endian::Big, false), 2).unwrap();
        let v: Vec<i16> = smp
            .data
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(v, vec![0x1234, -256]);
    }

    #[test]
    fn short_payload_truncates_length() {
        let mut src = Cursor::new(vec![1, 2, 3]);
        let mut smp = Sample::default();
        smp.length = 4;
        read_pcm(&mut src, &mut smp, fmt(8, Endian::Big, false), 4).unwrap();
        assert_eq!(smp.length, 3);
        assert_eq!(smp.data, vec![1, 2, 3]);
    }

    #[test]
    fn write_pcm_reports_byte_count() {
        let mut smp = Sample::default();
        smp.flags.bits16 = true;
        smp.data = 100i16.to_ne_bytes().iter().chain(&(-100i16).to_ne_bytes()).copied().collect();
        smp.length = 2;
        let mut out = Cursor::new(Vec::new());
        let n = write_pcm(&mut out, &smp, fmt(16, Endian::Big, false)).unwrap();
        assert_eq!(n, 4);
        assert_eq!(out.into_inner(), vec![0x00, 0x64, 0xff, 0x9c]);
    }

    #[test]
    fn name_is_bounded_and_nul_terminated() {
        let mut smp = Sample::default();
        smp.set_name(b"hello\0junk");
        assert_eq!(smp.name, "hello");
        smp.set_name(&[b'a'; 64]);
        assert_eq!(smp.name.len(), MAX_NAME_LENGTH);
    }
}
