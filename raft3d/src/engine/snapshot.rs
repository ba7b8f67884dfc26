//! Snapshot / Restore
//!
//! An [`InventorySnapshot`] is a deep, point-in-time copy of the store. Its
//! collections are ordered by id, so two replicas holding the same state
//! encode to the same bytes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::engine::entry::{Filament, PrintJob, Printer};
use crate::engine::error::SnapshotError;
use crate::engine::store::Inventory;

pub const SNAPSHOT_VERSION: u32 = 1;

const SNAPSHOT_FILE: &str = "snapshot";
const SNAPSHOT_TEMP_FILE: &str = "snapshot.tmp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    version: u32,
    pub printers: BTreeMap<String, Printer>,
    pub filaments: BTreeMap<String, Filament>,
    pub print_jobs: BTreeMap<String, PrintJob>,
}

impl Default for InventorySnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            printers: BTreeMap::new(),
            filaments: BTreeMap::new(),
            print_jobs: BTreeMap::new(),
        }
    }
}

impl InventorySnapshot {
    pub(crate) fn capture(inventory: &Inventory) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            printers: inventory.printers.clone(),
            filaments: inventory.filaments.clone(),
            print_jobs: inventory.print_jobs.clone(),
        }
    }

    pub(crate) fn into_inventory(self) -> Inventory {
        Inventory {
            printers: self.printers,
            filaments: self.filaments,
            print_jobs: self.print_jobs,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(SnapshotError::Encode)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: Self = bincode::deserialize(data).map_err(SnapshotError::Decode)?;
        snapshot.check()?;
        Ok(snapshot)
    }

    /// Reads the whole stream first; length prefixes are then checked
    /// against the bytes actually received.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, SnapshotError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    /// Serialises the snapshot into `sink`. On failure the sink is cancelled.
    pub fn persist<S: SnapshotSink>(&self, sink: &mut S) -> Result<(), SnapshotError> {
        match self.to_bytes() {
            Ok(data) => persist_bytes(&data, sink),
            Err(e) => {
                if let Err(cancel) = sink.cancel() {
                    log::warn!("failed to cancel snapshot sink: {}", cancel);
                }
                Err(e)
            }
        }
    }

    fn check(&self) -> Result<(), SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version(self.version));
        }
        check_keys("printer", &self.printers, |p| &p.id)?;
        check_keys("filament", &self.filaments, |f| &f.id)?;
        check_keys("print job", &self.print_jobs, |j| &j.id)?;
        Ok(())
    }
}

fn check_keys<T>(
    what: &str,
    map: &BTreeMap<String, T>,
    id: impl Fn(&T) -> &String,
) -> Result<(), SnapshotError> {
    for (key, value) in map {
        if key != id(value) {
            return Err(SnapshotError::Corrupt(format!(
                "{} stored under key {} has id {}",
                what,
                key,
                id(value)
            )));
        }
    }
    Ok(())
}

/// Destination of a serialised snapshot.
///
/// `close` commits what was written; `cancel` discards a partial write.
pub trait SnapshotSink: Write {
    fn cancel(&mut self) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
}

impl SnapshotSink for Vec<u8> {
    fn cancel(&mut self) -> io::Result<()> {
        self.clear();
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes already-serialised snapshot bytes into `sink`.
pub fn persist_bytes<S: SnapshotSink>(data: &[u8], sink: &mut S) -> Result<(), SnapshotError> {
    if let Err(e) = sink.write_all(data).and_then(|_| sink.flush()) {
        if let Err(cancel) = sink.cancel() {
            log::warn!("failed to cancel snapshot sink: {}", cancel);
        }
        return Err(SnapshotError::Io(e));
    }
    sink.close()?;
    Ok(())
}

/// Snapshot sink backed by `<dir>/snapshot`.
///
/// Bytes go to `<dir>/snapshot.tmp` first; `close` renames it over the
/// previous snapshot, `cancel` removes it.
#[derive(Debug)]
pub struct FileSnapshotSink {
    file: Option<File>,
    temp_path: PathBuf,
    snapshot_path: PathBuf,
}

impl FileSnapshotSink {
    pub fn create<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let temp_path = dir.join(SNAPSHOT_TEMP_FILE);
        let file = File::create(&temp_path)?;
        Ok(Self {
            file: Some(file),
            temp_path,
            snapshot_path: dir.join(SNAPSHOT_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.snapshot_path
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "snapshot sink already finished"))
    }
}

impl Write for FileSnapshotSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn cancel(&mut self) -> io::Result<()> {
        if self.file.take().is_some() {
            fs::remove_file(&self.temp_path)?;
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let file = self.file.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "snapshot sink already finished")
        })?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.temp_path, &self.snapshot_path)
    }
}

impl Drop for FileSnapshotSink {
    fn drop(&mut self) {
        if self.file.is_some() {
            let _ = self.cancel();
        }
    }
}
