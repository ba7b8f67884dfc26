//! Print Job Types
//!
//! A print job ties one printer to one filament spool and moves through a
//! small status machine:
//!
//! ```text
//! Queued ──> Running ──> Done
//!   │           │
//!   └───────────┴──────> Cancelled
//! ```
//!
//! Done and Cancelled are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::command::EntityKind;
use crate::engine::error::ValidationError;

/// Lifecycle status of a print job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PrintJobStatus {
    /// Accepted and waiting for the printer
    #[default]
    Queued,
    /// Currently printing
    Running,
    /// Finished; its weight has been taken from the filament
    Done,
    /// Abandoned before completion
    Cancelled,
}

impl PrintJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PrintJobStatus::Done | PrintJobStatus::Cancelled)
    }

    /// Whether a job in this status may move to `next`.
    pub fn can_transition_to(self, next: PrintJobStatus) -> bool {
        use PrintJobStatus::*;
        matches!(
            (self, next),
            (Queued, Running) | (Queued, Cancelled) | (Running, Done) | (Running, Cancelled)
        )
    }
}

impl fmt::Display for PrintJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrintJobStatus::Queued => "Queued",
            PrintJobStatus::Running => "Running",
            PrintJobStatus::Done => "Done",
            PrintJobStatus::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PrintJob {
    pub id: String,
    pub printer_id: String,
    pub filament_id: String,
    pub filepath: String,
    pub print_weight_grams: i64,
    #[serde(default)]
    pub status: PrintJobStatus,
}

impl PrintJob {
    /// Creates a queued job
    pub fn new(
        id: impl Into<String>,
        printer_id: impl Into<String>,
        filament_id: impl Into<String>,
        filepath: impl Into<String>,
        print_weight_grams: i64,
    ) -> Self {
        Self {
            id: id.into(),
            printer_id: printer_id.into(),
            filament_id: filament_id.into(),
            filepath: filepath.into(),
            print_weight_grams,
            status: PrintJobStatus::Queued,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("id", &self.id),
            ("printer_id", &self.printer_id),
            ("filament_id", &self.filament_id),
            ("filepath", &self.filepath),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(ValidationError::EmptyField {
                    kind: EntityKind::PrintJob,
                    field,
                });
            }
        }
        if self.print_weight_grams <= 0 {
            return Err(ValidationError::NotPositive {
                kind: EntityKind::PrintJob,
                field: "print_weight_grams",
                value: self.print_weight_grams,
            });
        }
        Ok(())
    }
}

/// Payload of a print job update: the only way a job changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintJobStatusChange {
    pub id: String,
    pub status: PrintJobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use PrintJobStatus::*;

    #[test]
    fn test_status_transitions() {
        let all = [Queued, Running, Done, Cancelled];
        let allowed = [
            (Queued, Running),
            (Queued, Cancelled),
            (Running, Done),
            (Running, Cancelled),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
        assert!(Done.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Queued.is_terminal());
    }

    #[test]
    fn test_print_job_validate() {
        let job = PrintJob::new("j1", "p1", "f1", "/models/benchy.gcode", 400);
        assert!(job.validate().is_ok());
        assert_eq!(job.status, Queued);

        let mut no_path = job.clone();
        no_path.filepath.clear();
        assert_eq!(
            no_path.validate().unwrap_err().to_string(),
            "print job filepath cannot be empty"
        );

        let mut weightless = job;
        weightless.print_weight_grams = 0;
        assert!(matches!(
            weightless.validate(),
            Err(ValidationError::NotPositive { .. })
        ));
    }

    #[test]
    fn test_status_defaults_to_queued_in_json() {
        let job: PrintJob = serde_json::from_str(
            r#"{"id":"j1","printer_id":"p1","filament_id":"f1","filepath":"a.gcode","print_weight_grams":5}"#,
        )
        .unwrap();
        assert_eq!(job.status, Queued);
    }
}
