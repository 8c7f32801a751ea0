pub use crate::{ReadSeek, WriteSeek};

pub use anyhow::{anyhow, Result as R};
pub use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
pub use log::{debug, warn};

pub use std::io::{Cursor, Read, Seek, SeekFrom, Write};
