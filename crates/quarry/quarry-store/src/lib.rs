//! Node state persistence for processed packets.
//!
//! Every UNI coordinate owns one fixed-size record in a memory-mapped file,
//! at `node_index(uni) * state_size`:
//!
//! ```text
//! 0      16          24               state_size
//! | uni  | seq (le)  | fill: seq as u8 ... |
//! ```
//!
//! `seq` is the store's own save counter, so the most recently touched node
//! has the highest sequence. Handlers each open their own file
//! (`<root>/<file>.<lane>`) and never share a mapping.

use quarry_mmap::MmapFileMut;
use quarry_wire::{Uni, UniShape};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Smallest record that fits the UNI and the sequence number.
pub const MIN_STATE_SIZE: usize = 24;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store I/O on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("node {uni} is outside the configured address space")]
    OutOfRange { uni: Uni },
}

/// Persists the identity of a processed packet.
pub trait StateStore: Send {
    fn save(&mut self, uni: &Uni) -> Result<(), StoreError>;
}

impl<S: StateStore + ?Sized> StateStore for Box<S> {
    fn save(&mut self, uni: &Uni) -> Result<(), StoreError> {
        (**self).save(uni)
    }
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub root: PathBuf,
    pub file: String,
    pub state_size: usize,
    pub shape: UniShape,
    /// Flush each record to disk before `save` returns.
    pub sync: bool,
}

impl StoreOptions {
    pub fn path_for_lane(&self, lane: usize) -> PathBuf {
        self.root.join(format!("{}.{lane}", self.file))
    }

    pub fn file_size(&self) -> u64 {
        self.shape.nodes() * self.state_size as u64
    }
}

pub struct MmapStateStore {
    map: MmapFileMut,
    path: PathBuf,
    shape: UniShape,
    state_size: usize,
    sync: bool,
    seq: u64,
}

impl MmapStateStore {
    pub fn open(opts: &StoreOptions, lane: usize) -> Result<Self, StoreError> {
        assert!(opts.state_size >= MIN_STATE_SIZE, "state record too small");
        let path = opts.path_for_lane(lane);
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&opts.root).map_err(io_err)?;
        let map = MmapFileMut::open_or_create(&path, opts.file_size()).map_err(io_err)?;
        debug!(path = %path.display(), bytes = map.len(), "state store mapped");
        Ok(Self {
            map,
            path,
            shape: opts.shape,
            state_size: opts.state_size,
            sync: opts.sync,
            seq: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn saves(&self) -> u64 {
        self.seq
    }
}

impl StateStore for MmapStateStore {
    fn save(&mut self, uni: &Uni) -> Result<(), StoreError> {
        let index = self
            .shape
            .node_index(uni)
            .ok_or(StoreError::OutOfRange { uni: *uni })?;
        self.seq += 1;

        let at = index as usize * self.state_size;
        let record = &mut self.map.as_mut_slice()[at..at + self.state_size];
        record[..16].copy_from_slice(&uni.0);
        record[16..24].copy_from_slice(&self.seq.to_le_bytes());
        record[24..].fill(self.seq as u8);

        if self.sync {
            self.map
                .flush_range(at, self.state_size)
                .map_err(|source| StoreError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

impl Drop for MmapStateStore {
    fn drop(&mut self) {
        let _ = self.map.flush_async();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_mmap::MmapFile;

    fn opts(dir: &Path, sync: bool) -> StoreOptions {
        StoreOptions {
            root: dir.to_path_buf(),
            file: "cim.dat".into(),
            state_size: 32,
            shape: UniShape::new(2, 2, 10),
            sync,
        }
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("quarry-store-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn save_writes_record_at_node_index() {
        let dir = scratch("record");
        let o = opts(&dir, true);
        let uni = Uni::new(1, 0, 3);
        {
            let mut store = MmapStateStore::open(&o, 2).unwrap();
            assert_eq!(store.path(), dir.join("cim.dat.2"));
            store.save(&Uni::new(0, 0, 1)).unwrap();
            store.save(&uni).unwrap();
            assert_eq!(store.saves(), 2);
        }

        let ro = MmapFile::open_ro(dir.join("cim.dat.2")).unwrap();
        assert_eq!(ro.len() as u64, o.file_size());
        let at = o.shape.node_index(&uni).unwrap() as usize * 32;
        let rec = &ro.as_slice()[at..at + 32];
        assert_eq!(&rec[..16], &uni.0);
        assert_eq!(u64::from_le_bytes(rec[16..24].try_into().unwrap()), 2);
        assert!(rec[24..].iter().all(|b| *b == 2));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn coordinate_outside_shape_is_rejected() {
        let dir = scratch("range");
        let mut store = MmapStateStore::open(&opts(&dir, false), 0).unwrap();
        let err = store.save(&Uni::new(2, 0, 1)).unwrap_err();
        assert!(matches!(err, StoreError::OutOfRange { .. }));
        assert_eq!(store.saves(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
