//! Fixed-width structures and block reads.
//!
//! Everything in an OPUS file is little-endian.
use std::io::{Read, Seek, SeekFrom};

#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::trace;

use crate::category::DirectoryEntry;
use crate::parameter::{Block, BlockKind, DataBlock, ParameterBlock};
use crate::{Error, Result};

/// Magic sequence at the start of every OPUS file.
pub const MAGIC: [u8; 4] = [0x0a, 0x0a, 0xfe, 0xfe];

/// OPUS file header.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileHeader {
    /// File version
    pub version: f64,
    /// Byte offset of the start of the directory
    pub directory_pointer: u32,
    /// Maximum number of directory entries
    pub max_directory_entries: u32,
    /// Used number of directory entries
    pub used_directory_entries: u32,
}

impl FileHeader {
    /// Size of the header including the magic sequence.
    pub const LEN: usize = 24;

    /// Read the header from the current position of `r`.
    ///
    /// # Errors
    /// [Error::Format] if the magic sequence does not match, otherwise any
    /// ``std::io::Error`` reading.
    pub fn read<R>(mut r: R) -> Result<Self>
    where
        R: Read,
    {
        let mut buf = [0u8; Self::LEN];
        r.read_exact(&mut buf[..MAGIC.len()])?;
        if buf[..MAGIC.len()] != MAGIC {
            return Err(Error::Format(format!(
                "magic sequence not found, got {:02x?}",
                &buf[..MAGIC.len()]
            )));
        }
        r.read_exact(&mut buf[MAGIC.len()..])?;

        Ok(Self::decode(&buf))
    }

    // `buf` must hold at least `LEN` bytes
    fn decode(buf: &[u8; Self::LEN]) -> Self {
        let version = f64::from_le_bytes([
            buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
        ]);
        FileHeader {
            version,
            directory_pointer: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            max_directory_entries: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            used_directory_entries: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
        }
    }
}

/// Read a raw directory triple `(block_type, length_words, offset)` from the current
/// position of `r`.
///
/// # Errors
/// Any ``std::io::Error`` reading
pub fn read_directory_entry<R>(mut r: R) -> Result<(u32, u32, u32)>
where
    R: Read,
{
    let mut buf = [0u8; DirectoryEntry::LEN];
    r.read_exact(&mut buf)?;
    Ok((
        u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
    ))
}

/// Read the `header.used_directory_entries` directory entries, classified, in file order.
///
/// # Errors
/// Any ``std::io::Error`` seeking or reading
pub fn read_directory<R>(mut r: R, header: &FileHeader) -> Result<Vec<DirectoryEntry>>
where
    R: Read + Seek,
{
    r.seek(SeekFrom::Start(u64::from(header.directory_pointer)))?;
    let mut entries = Vec::default();
    for _ in 0..header.used_directory_entries {
        let (block_type, length_words, offset) = read_directory_entry(&mut r)?;
        let entry = DirectoryEntry::new(block_type, length_words, offset);
        trace!(?entry, "directory entry");
        entries.push(entry);
    }
    Ok(entries)
}

/// Read the block described by `entry`.
///
/// Data categories produce a [Block::Data] holding the bytes unchanged, all others
/// are decoded as a [ParameterBlock].
///
/// # Errors
/// [Error::TypeMismatch] if the block is not of the `expected` kind,
/// [Error::Format] if a parameter block cannot be decoded, or any
/// ``std::io::Error`` seeking or reading. A block extending past the end of the
/// file is an ``UnexpectedEof`` error.
pub fn read_block<R>(mut r: R, entry: &DirectoryEntry, expected: BlockKind) -> Result<Block>
where
    R: Read + Seek,
{
    r.seek(SeekFrom::Start(u64::from(entry.offset)))?;
    // the declared length is untrusted, only allocate what is actually there
    let len = entry.byte_len();
    let mut raw = Vec::default();
    r.by_ref().take(len as u64).read_to_end(&mut raw)?;
    if raw.len() < len {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "{} block at offset {} needs {len} bytes, only {} available",
                entry.category,
                entry.offset,
                raw.len()
            ),
        )));
    }

    let block = if entry.category.is_data() {
        Block::Data(DataBlock { raw })
    } else {
        Block::Parameter(ParameterBlock::decode(raw)?)
    };
    if block.kind() != expected {
        return Err(Error::TypeMismatch {
            expected,
            actual: block.kind(),
        });
    }
    Ok(block)
}

/// Read the parameter block described by `entry`.
///
/// # Errors
/// See [read_block].
pub fn read_parameter_block<R>(r: R, entry: &DirectoryEntry) -> Result<ParameterBlock>
where
    R: Read + Seek,
{
    match read_block(r, entry, BlockKind::Parameter)? {
        Block::Parameter(block) => Ok(block),
        Block::Data(_) => Err(Error::TypeMismatch {
            expected: BlockKind::Parameter,
            actual: BlockKind::Data,
        }),
    }
}

/// Read the data block described by `entry`.
///
/// # Errors
/// See [read_block].
pub fn read_data_block<R>(r: R, entry: &DirectoryEntry) -> Result<DataBlock>
where
    R: Read + Seek,
{
    match read_block(r, entry, BlockKind::Data)? {
        Block::Data(block) => Ok(block),
        Block::Parameter(_) => Err(Error::TypeMismatch {
            expected: BlockKind::Data,
            actual: BlockKind::Parameter,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::category::BlockCategory;
    use crate::parameter::tests::record;

    fn header_bytes(dir_pointer: u32, max: u32, used: u32) -> Vec<u8> {
        let mut buf = MAGIC.to_vec();
        buf.extend_from_slice(&920_622.0f64.to_le_bytes());
        buf.extend_from_slice(&dir_pointer.to_le_bytes());
        buf.extend_from_slice(&max.to_le_bytes());
        buf.extend_from_slice(&used.to_le_bytes());
        buf
    }

    #[test]
    fn test_read_header() {
        let dat = header_bytes(24, 40, 2);
        let header = FileHeader::read(Cursor::new(dat)).unwrap();

        assert_eq!(header.version, 920_622.0);
        assert_eq!(header.directory_pointer, 24);
        assert_eq!(header.max_directory_entries, 40);
        assert_eq!(header.used_directory_entries, 2);
    }

    #[test]
    fn test_read_header_bad_magic() {
        let mut dat = header_bytes(24, 40, 2);
        dat[0] = b'c';

        let zult = FileHeader::read(Cursor::new(dat));

        match zult {
            Err(Error::Format(msg)) => assert!(msg.contains("magic"), "got {msg}"),
            _ => panic!("expected format error, got {zult:?}"),
        }
    }

    #[test]
    fn test_read_header_truncated() {
        let dat = header_bytes(24, 40, 2);
        let zult = FileHeader::read(Cursor::new(&dat[..10]));

        assert!(matches!(zult, Err(Error::Io(_))), "got {zult:?}");
    }

    #[test]
    fn test_read_directory() {
        let mut dat = header_bytes(24, 40, 2);
        for v in [2071u32, 3, 48, 2055, 2, 60] {
            dat.extend_from_slice(&v.to_le_bytes());
        }
        let mut r = Cursor::new(dat);
        let header = FileHeader::read(&mut r).unwrap();

        let entries = read_directory(&mut r, &header).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].category, BlockCategory::DataStatus);
        assert_eq!(entries[0].length_words, 3);
        assert_eq!(entries[0].offset, 48);
        assert_eq!(entries[1].category, BlockCategory::Anonymous);
        assert_eq!(entries[1].offset, 60);
    }

    #[test]
    fn test_read_block_kinds() {
        let params = record("NPT", 0, &4i32.to_le_bytes());
        let mut dat = vec![0u8; 8];
        dat.extend_from_slice(&params);
        dat.extend_from_slice(&1.0f32.to_le_bytes());

        let param_entry = DirectoryEntry::new(2071, 3, 8);
        let data_entry = DirectoryEntry::new(2055, 1, 20);
        let mut r = Cursor::new(dat);

        let block = read_parameter_block(&mut r, &param_entry).unwrap();
        assert_eq!(block.get_i32("spectrum", "NPT").unwrap(), 4);

        let block = read_data_block(&mut r, &data_entry).unwrap();
        assert_eq!(block.raw, 1.0f32.to_le_bytes());

        let zult = read_block(&mut r, &data_entry, BlockKind::Parameter);
        assert!(
            matches!(
                zult,
                Err(Error::TypeMismatch {
                    expected: BlockKind::Parameter,
                    actual: BlockKind::Data
                })
            ),
            "got {zult:?}"
        );
    }

    #[test]
    fn test_read_block_past_end() {
        let entry = DirectoryEntry::new(2055, 10, 0);
        let zult = read_data_block(Cursor::new(vec![0u8; 12]), &entry);

        match zult {
            Err(Error::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof),
            _ => panic!("expected io error, got {zult:?}"),
        }
    }

    #[test]
    fn test_read_block_oversized_length() {
        let params = record("NPT", 0, &4i32.to_le_bytes());
        let entry = DirectoryEntry::new(2071, u32::MAX, 0);

        let zult = read_parameter_block(Cursor::new(params), &entry);

        match zult {
            Err(Error::Io(err)) => {
                assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
                assert!(err.to_string().contains("DBTDSTAT"), "got {err}");
            }
            _ => panic!("expected io error, got {zult:?}"),
        }
    }

    #[test]
    fn test_read_directory_oversized_count() {
        let mut dat = header_bytes(24, u32::MAX, u32::MAX);
        for v in [2071u32, 3, 48] {
            dat.extend_from_slice(&v.to_le_bytes());
        }
        let mut r = Cursor::new(dat);
        let header = FileHeader::read(&mut r).unwrap();

        let zult = read_directory(&mut r, &header);

        assert!(matches!(zult, Err(Error::Io(_))), "got {zult:?}");
    }
}
