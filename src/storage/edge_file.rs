//! Binary edge files (`<host>.data`)
//!
//! Layout, little-endian:
//!
//! ```text
//! [magic "RWEF"][version u16][edge_count u64]
//! edge_count x [src u32][dst u32][dst_owner 4 octets]
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use memmap2::Mmap;

use super::EdgeRecord;
use crate::error::{FleetError, Result};

pub const MAGIC: [u8; 4] = *b"RWEF";

pub const FORMAT_VERSION: u16 = 1;

pub const HEADER_SIZE: usize = 4 + 2 + 8;

pub const RECORD_SIZE: usize = 4 + 4 + 4;

/// Path of the edge file for `host_label` inside `dir`
pub fn edge_file_path<P: AsRef<Path>>(dir: P, host_label: &str) -> PathBuf {
    dir.as_ref().join(format!("{}.data", host_label))
}

/// Memory-mapped, validated edge file
pub struct EdgeFile {
    mmap: Mmap,
    edge_count: usize,
}

impl EdgeFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_SIZE {
            return Err(FleetError::InvalidFormat(format!(
                "{:?}: file too small ({} bytes)",
                path.as_ref(),
                mmap.len()
            )));
        }
        if mmap[0..4] != MAGIC {
            return Err(FleetError::InvalidFormat(format!(
                "{:?}: bad magic {:?}",
                path.as_ref(),
                &mmap[0..4]
            )));
        }
        let version = LittleEndian::read_u16(&mmap[4..6]);
        if version != FORMAT_VERSION {
            return Err(FleetError::InvalidFormat(format!(
                "{:?}: unsupported version {}",
                path.as_ref(),
                version
            )));
        }

        let edge_count = LittleEndian::read_u64(&mmap[6..14]) as usize;
        let expected = edge_count
            .checked_mul(RECORD_SIZE)
            .and_then(|body| body.checked_add(HEADER_SIZE));
        if expected != Some(mmap.len()) {
            return Err(FleetError::InvalidFormat(format!(
                "{:?}: header declares {} edges but file is {} bytes",
                path.as_ref(),
                edge_count,
                mmap.len()
            )));
        }

        Ok(Self { mmap, edge_count })
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn get(&self, idx: usize) -> Option<EdgeRecord> {
        if idx >= self.edge_count {
            return None;
        }
        let at = HEADER_SIZE + idx * RECORD_SIZE;
        let raw = &self.mmap[at..at + RECORD_SIZE];
        Some(EdgeRecord {
            src: LittleEndian::read_u32(&raw[0..4]),
            dst: LittleEndian::read_u32(&raw[4..8]),
            dst_owner: Ipv4Addr::new(raw[8], raw[9], raw[10], raw[11]),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = EdgeRecord> + '_ {
        (0..self.edge_count).filter_map(move |idx| self.get(idx))
    }
}

/// Writes edge files in the format [`EdgeFile`] reads
pub struct EdgeFileWriter {
    path: PathBuf,
}

impl EdgeFileWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn write(&self, edges: &[EdgeRecord]) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(&MAGIC)?;
        writer.write_u16::<LittleEndian>(FORMAT_VERSION)?;
        writer.write_u64::<LittleEndian>(edges.len() as u64)?;
        for edge in edges {
            writer.write_u32::<LittleEndian>(edge.src)?;
            writer.write_u32::<LittleEndian>(edge.dst)?;
            writer.write_all(&edge.dst_owner.octets())?;
        }
        writer.flush()?;

        tracing::info!("Written {} edges to {:?}", edges.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_open() {
        let dir = TempDir::new().unwrap();
        let path = edge_file_path(dir.path(), "10.0.0.1");
        let host_b = Ipv4Addr::new(10, 0, 0, 2);

        let edges = vec![
            EdgeRecord::new(5, 9, host_b),
            EdgeRecord::new(5, 3, Ipv4Addr::new(10, 0, 0, 1)),
        ];
        EdgeFileWriter::new(&path).write(&edges).unwrap();

        let file = EdgeFile::open(&path).unwrap();
        assert_eq!(file.edge_count(), 2);
        assert_eq!(file.get(0), Some(edges[0]));
        assert_eq!(file.get(2), None);
        assert_eq!(file.iter().collect::<Vec<_>>(), edges);
    }

    #[test]
    fn test_empty_file_is_valid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.data");
        EdgeFileWriter::new(&path).write(&[]).unwrap();

        let file = EdgeFile::open(&path).unwrap();
        assert_eq!(file.edge_count(), 0);
        assert_eq!(file.iter().count(), 0);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.data");
        std::fs::write(&path, b"NOPE\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00").unwrap();

        match EdgeFile::open(&path) {
            Err(FleetError::InvalidFormat(msg)) => assert!(msg.contains("magic")),
            other => panic!("expected InvalidFormat, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_rejects_truncated_body() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.data");
        EdgeFileWriter::new(&path)
            .write(&[EdgeRecord::new(1, 2, Ipv4Addr::LOCALHOST)])
            .unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes.pop();
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(EdgeFile::open(&path), Err(FleetError::InvalidFormat(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.data");
        assert!(matches!(EdgeFile::open(&path), Err(FleetError::Io(_))));
    }
}
