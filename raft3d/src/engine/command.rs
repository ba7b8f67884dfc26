//! Command Model
//!
//! A [`Command`] is the unit of replication: an operation, the kind of
//! entity it targets and an opaque bincode payload whose shape depends on
//! both:
//!
//! | operation | printer / filament | print job            |
//! |-----------|--------------------|----------------------|
//! | Create    | full record        | full record          |
//! | Update    | full record        | `PrintJobStatusChange` |
//! | Delete    | bare id            | bare id              |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::entry::{Filament, PrintJob, PrintJobStatus, PrintJobStatusChange, Printer};
use crate::engine::error::CodecError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operation {
    #[default]
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntityKind {
    #[default]
    Printer,
    Filament,
    PrintJob,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Printer => "printer",
            EntityKind::Filament => "filament",
            EntityKind::PrintJob => "print_job",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Printer => "printer",
            EntityKind::Filament => "filament",
            EntityKind::PrintJob => "print job",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Command {
    pub op: Operation,
    pub kind: EntityKind,
    pub payload: Vec<u8>,
}

impl Command {
    pub fn new(op: Operation, kind: EntityKind, payload: Vec<u8>) -> Self {
        Self { op, kind, payload }
    }

    fn with_payload<T: Serialize>(
        op: Operation,
        kind: EntityKind,
        payload: &T,
    ) -> Result<Self, CodecError> {
        let payload = bincode::serialize(payload).map_err(|source| CodecError::Encode {
            what: "payload",
            source,
        })?;
        Ok(Self::new(op, kind, payload))
    }

    pub fn create_printer(printer: &Printer) -> Result<Self, CodecError> {
        Self::with_payload(Operation::Create, EntityKind::Printer, printer)
    }

    pub fn update_printer(printer: &Printer) -> Result<Self, CodecError> {
        Self::with_payload(Operation::Update, EntityKind::Printer, printer)
    }

    pub fn create_filament(filament: &Filament) -> Result<Self, CodecError> {
        Self::with_payload(Operation::Create, EntityKind::Filament, filament)
    }

    pub fn update_filament(filament: &Filament) -> Result<Self, CodecError> {
        Self::with_payload(Operation::Update, EntityKind::Filament, filament)
    }

    pub fn create_print_job(job: &PrintJob) -> Result<Self, CodecError> {
        Self::with_payload(Operation::Create, EntityKind::PrintJob, job)
    }

    pub fn update_print_job_status(
        id: impl Into<String>,
        status: PrintJobStatus,
    ) -> Result<Self, CodecError> {
        let change = PrintJobStatusChange {
            id: id.into(),
            status,
        };
        Self::with_payload(Operation::Update, EntityKind::PrintJob, &change)
    }

    pub fn delete(kind: EntityKind, id: &str) -> Result<Self, CodecError> {
        Self::with_payload(Operation::Delete, kind, &id)
    }

    /// Decodes the payload into the record expected for this command.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        bincode::deserialize(&self.payload).map_err(|source| CodecError::Decode {
            what: "payload",
            source,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|source| CodecError::Encode {
            what: "command",
            source,
        })
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(data).map_err(|source| CodecError::Decode {
            what: "command",
            source,
        })
    }
}
