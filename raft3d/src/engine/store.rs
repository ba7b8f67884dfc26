//! State Store
//!
//! [`Inventory`] holds the three keyed collections. [`Store`] guards one
//! inventory behind a read/write lock: the apply engine takes the write side
//! for the whole of one command, readers share the read side and only ever
//! receive clones or a borrowed view.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::engine::apply::{self, ApplyResult};
use crate::engine::command::Command;
use crate::engine::entry::{Filament, PrintJob, Printer};
use crate::engine::error::SnapshotError;
use crate::engine::snapshot::InventorySnapshot;

/// Printers, filaments and print jobs keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    pub(crate) printers: BTreeMap<String, Printer>,
    pub(crate) filaments: BTreeMap<String, Filament>,
    pub(crate) print_jobs: BTreeMap<String, PrintJob>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn printer(&self, id: &str) -> Option<&Printer> {
        self.printers.get(id)
    }

    pub fn filament(&self, id: &str) -> Option<&Filament> {
        self.filaments.get(id)
    }

    pub fn print_job(&self, id: &str) -> Option<&PrintJob> {
        self.print_jobs.get(id)
    }

    /// Iterates in id order.
    pub fn printers(&self) -> impl Iterator<Item = &Printer> {
        self.printers.values()
    }

    pub fn filaments(&self) -> impl Iterator<Item = &Filament> {
        self.filaments.values()
    }

    pub fn print_jobs(&self) -> impl Iterator<Item = &PrintJob> {
        self.print_jobs.values()
    }

    pub fn is_empty(&self) -> bool {
        self.printers.is_empty() && self.filaments.is_empty() && self.print_jobs.is_empty()
    }

    pub(crate) fn put_printer(&mut self, printer: Printer) {
        self.printers.insert(printer.id.clone(), printer);
    }

    pub(crate) fn remove_printer(&mut self, id: &str) -> Option<Printer> {
        self.printers.remove(id)
    }

    pub(crate) fn put_filament(&mut self, filament: Filament) {
        self.filaments.insert(filament.id.clone(), filament);
    }

    pub(crate) fn filament_mut(&mut self, id: &str) -> Option<&mut Filament> {
        self.filaments.get_mut(id)
    }

    pub(crate) fn remove_filament(&mut self, id: &str) -> Option<Filament> {
        self.filaments.remove(id)
    }

    pub(crate) fn put_print_job(&mut self, job: PrintJob) {
        self.print_jobs.insert(job.id.clone(), job);
    }

    pub(crate) fn print_job_mut(&mut self, id: &str) -> Option<&mut PrintJob> {
        self.print_jobs.get_mut(id)
    }

    pub(crate) fn remove_print_job(&mut self, id: &str) -> Option<PrintJob> {
        self.print_jobs.remove(id)
    }
}

/// Lock-guarded inventory shared between the apply path and readers.
#[derive(Debug, Default)]
pub struct Store {
    inventory: RwLock<Inventory>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inventory> {
        self.inventory.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inventory> {
        self.inventory.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` against one consistent view of the whole inventory.
    pub fn view<R>(&self, f: impl FnOnce(&Inventory) -> R) -> R {
        f(&self.read())
    }

    /// Copies of every printer, sorted by id.
    pub fn printers(&self) -> Vec<Printer> {
        self.read().printers().cloned().collect()
    }

    pub fn printer(&self, id: &str) -> Option<Printer> {
        self.read().printer(id).cloned()
    }

    pub fn filaments(&self) -> Vec<Filament> {
        self.read().filaments().cloned().collect()
    }

    pub fn filament(&self, id: &str) -> Option<Filament> {
        self.read().filament(id).cloned()
    }

    pub fn print_jobs(&self) -> Vec<PrintJob> {
        self.read().print_jobs().cloned().collect()
    }

    pub fn print_job(&self, id: &str) -> Option<PrintJob> {
        self.read().print_job(id).cloned()
    }

    /// Applies one committed command while holding the write lock.
    pub fn apply(&self, cmd: &Command) -> ApplyResult {
        let mut inventory = self.write();
        apply::apply(&mut inventory, cmd)
    }

    /// Deep copy of the current state. Excludes in-flight applies.
    pub fn snapshot(&self) -> InventorySnapshot {
        InventorySnapshot::capture(&self.read())
    }

    /// Replaces the whole inventory with the snapshot's contents.
    pub fn restore(&self, snapshot: InventorySnapshot) {
        let inventory = snapshot.into_inventory();
        *self.write() = inventory;
    }

    /// Decodes a snapshot from `reader` and restores it. On a decode failure
    /// the current inventory is kept.
    pub fn restore_from<R: Read>(&self, reader: R) -> Result<(), SnapshotError> {
        let snapshot = InventorySnapshot::read_from(reader)?;
        self.restore(snapshot);
        Ok(())
    }
}
