//! Superblock binary layout
//!
//! Layout (all integers little-endian):
//! ```text
//! +----------------------+
//! | magic "MTFSSUPR" (8) |
//! | version u32          |
//! | inode cache u64      |
//! | directory cache u64  |
//! | block cache u64      |
//! | block size u64       |
//! | redundancy u64       |
//! | migration u32        |
//! | pool count u32       |  per pool: id u32, migration u32, volume count u32
//! |   pools...           |  per volume: id u32, plugin str, param count u32,
//! |                      |    (key str, value str)*
//! | root count u32       |
//! |   roots...           |  pool u32, volume u32, id u64
//! | crc32c u32           |  over every preceding byte
//! +----------------------+
//! ```
//! A `str` is a u32 byte length followed by UTF-8 bytes.

use crate::error::{Error, Result};
use crate::structures::{Pool, Superblock, Volume};
use crate::types::Identifier;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// Magic number for the superblock record
pub const MAGIC: [u8; 8] = *b"MTFSSUPR";

/// Current superblock format version
pub const FORMAT_VERSION: u32 = 1;

/// Smallest possible record: magic, version, fixed fields, two counts, checksum
const MIN_SIZE: usize = 8 + 4 + 5 * 8 + 4 + 4 + 4 + 4;

fn len_u32(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::encode(format!("too many {what}: {len}")))
}

fn put_str(buf: &mut BytesMut, s: &str) -> Result<()> {
    buf.put_u32_le(len_u32(s.len(), "string bytes")?);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Bounds-checked reader over the record body
struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::decode("superblock record is truncated"));
        }
        Ok(())
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        self.need(len)?;
        let s = std::str::from_utf8(&self.buf[..len])
            .map_err(|e| Error::decode(format!("invalid string in superblock: {e}")))?
            .to_owned();
        self.buf.advance(len);
        Ok(s)
    }
}

impl Superblock {
    /// Serialize to the binary record
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(MIN_SIZE);

        buf.put_slice(&MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u64_le(self.inode_cache_size);
        buf.put_u64_le(self.directory_cache_size);
        buf.put_u64_le(self.block_cache_size);
        buf.put_u64_le(self.block_size);
        buf.put_u64_le(self.redundancy);
        buf.put_u32_le(self.migration);

        buf.put_u32_le(len_u32(self.pools.len(), "pools")?);
        for (pool_id, pool) in &self.pools {
            buf.put_u32_le(*pool_id);
            buf.put_u32_le(pool.migration);
            buf.put_u32_le(len_u32(pool.volumes.len(), "volumes")?);
            for (volume_id, volume) in &pool.volumes {
                buf.put_u32_le(*volume_id);
                put_str(&mut buf, &volume.plugin)?;
                buf.put_u32_le(len_u32(volume.params.len(), "volume parameters")?);
                for (key, value) in &volume.params {
                    put_str(&mut buf, key)?;
                    put_str(&mut buf, value)?;
                }
            }
        }

        buf.put_u32_le(len_u32(self.root_inodes.len(), "root inodes")?);
        for root in &self.root_inodes {
            buf.put_u32_le(root.pool);
            buf.put_u32_le(root.volume);
            buf.put_u64_le(root.id);
        }

        let checksum = crc32c::crc32c(&buf);
        buf.put_u32_le(checksum);

        Ok(buf.freeze())
    }

    /// Parse the binary record
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_SIZE {
            return Err(Error::decode("superblock record too small"));
        }
        if data[..MAGIC.len()] != MAGIC {
            return Err(Error::decode("invalid superblock magic"));
        }

        let (body, mut trailer) = data.split_at(data.len() - 4);
        let checksum = trailer.get_u32_le();
        if crc32c::crc32c(body) != checksum {
            return Err(Error::decode("superblock checksum mismatch"));
        }

        let mut r = Reader {
            buf: &body[MAGIC.len()..],
        };

        let version = r.u32()?;
        if version != FORMAT_VERSION {
            return Err(Error::decode(format!(
                "unsupported superblock version: {version}"
            )));
        }

        let mut sb = Self {
            inode_cache_size: r.u64()?,
            directory_cache_size: r.u64()?,
            block_cache_size: r.u64()?,
            block_size: r.u64()?,
            redundancy: r.u64()?,
            migration: r.u32()?,
            ..Self::default()
        };

        for _ in 0..r.u32()? {
            let pool_id = r.u32()?;
            let mut pool = Pool {
                migration: r.u32()?,
                volumes: BTreeMap::new(),
            };
            for _ in 0..r.u32()? {
                let volume_id = r.u32()?;
                let plugin = r.string()?;
                let mut params = BTreeMap::new();
                for _ in 0..r.u32()? {
                    let key = r.string()?;
                    params.insert(key, r.string()?);
                }
                pool.volumes.insert(volume_id, Volume { plugin, params });
            }
            sb.pools.insert(pool_id, pool);
        }

        for _ in 0..r.u32()? {
            let pool = r.u32()?;
            let volume = r.u32()?;
            sb.root_inodes.push(Identifier::new(pool, volume, r.u64()?));
        }

        if r.buf.has_remaining() {
            return Err(Error::decode(format!(
                "{} trailing bytes after superblock",
                r.buf.remaining()
            )));
        }

        Ok(sb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Superblock {
        let mut sb = Superblock {
            inode_cache_size: 4096,
            directory_cache_size: 4096,
            block_cache_size: 4096,
            block_size: 4096,
            redundancy: 2,
            migration: 1,
            ..Superblock::default()
        };
        for i in 0..5u32 {
            let mut pool = Pool {
                migration: i % 2,
                volumes: BTreeMap::new(),
            };
            let params = [
                ("bucket".to_string(), format!("mtfs-{i}")),
                ("region".to_string(), "eu-central-1".to_string()),
            ]
            .into();
            pool.volumes.insert(i, Volume::new("s3", params));
            sb.pools.insert(i, pool);
        }
        sb.root_inodes = vec![Identifier::new(0, 0, 0), Identifier::new(1, 1, 0)];
        sb
    }

    #[test]
    fn test_superblock_roundtrip() {
        let sb = sample();
        let bytes = sb.to_bytes().unwrap();
        assert_eq!(&bytes[..8], b"MTFSSUPR");
        assert_eq!(Superblock::from_bytes(&bytes).unwrap(), sb);
    }

    #[test]
    fn test_empty_superblock_roundtrip() {
        let sb = Superblock::default();
        let bytes = sb.to_bytes().unwrap();
        assert_eq!(bytes.len(), MIN_SIZE);
        assert_eq!(Superblock::from_bytes(&bytes).unwrap(), sb);
    }

    #[test]
    fn test_superblock_checksum_mismatch() {
        let mut bytes = sample().to_bytes().unwrap().to_vec();
        bytes[20] ^= 0xff;
        let err = Superblock::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_superblock_bad_magic() {
        let mut bytes = sample().to_bytes().unwrap().to_vec();
        bytes[0] = b'X';
        assert!(Superblock::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_superblock_truncated() {
        let bytes = sample().to_bytes().unwrap();
        assert!(Superblock::from_bytes(&bytes[..bytes.len() / 2]).is_err());
        assert!(Superblock::from_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn test_superblock_unknown_version() {
        let mut bytes = sample().to_bytes().unwrap().to_vec();
        bytes[8..12].copy_from_slice(&7u32.to_le_bytes());
        let body_len = bytes.len() - 4;
        let checksum = crc32c::crc32c(&bytes[..body_len]);
        bytes[body_len..].copy_from_slice(&checksum.to_le_bytes());

        let err = Superblock::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("version"));
    }
}
