//! Minimal IFF chunk walker: peek one chunk header at a time, remember where
//! its payload lives, and re-read payloads by name later. Chunk offsets are
//! absolute stream positions, not relative to any parent chunk.

use crate::prelude::*;

/// One tagged region inside a chunked container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub id: [u8; 4],
    pub size: u32,
    /// Payload start, measured from the beginning of the stream.
    pub offset: u64,
}

/// Reads the chunk header at the current position and advances past the
/// even-padded payload. Returns `Ok(None)` on end of stream or a truncated
/// header, so a walk can simply loop until `None`.
pub fn peek_chunk(fp: &mut dyn ReadSeek) -> R<Option<Chunk>> {
    let mut id = [0u8; 4];
    match fp.read_exact(&mut id) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let size = match fp.read_u32::<BigEndian>() {
        Ok(n) => n,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let offset = fp.stream_position()?;
    // payloads are padded to an even length
    fp.seek(SeekFrom::Start(offset + u64::from(size) + u64::from(size & 1)))?;
    Ok(Some(Chunk { id, size, offset }))
}

/// Reads up to `buf.len()` bytes of a previously peeked chunk's payload,
/// starting `skip` bytes in. Returns the byte count actually read, bounded
/// by the chunk size and the stream length.
pub fn read_chunk(chunk: &Chunk, fp: &mut dyn ReadSeek, skip: u32, buf: &mut [u8]) -> R<usize> {
    if skip >= chunk.size {
        return Ok(0);
    }
    let want = buf.len().min((chunk.size - skip) as usize);
    fp.seek(SeekFrom::Start(chunk.offset + u64::from(skip)))?;
    let mut done = 0;
    while done < want {
        let n = fp.read(&mut buf[done..want])?;
        if n == 0 {
            break;
        }
        done += n;
    }
    Ok(done)
}
