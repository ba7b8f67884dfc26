//! Apply Engine
//!
//! Interprets one committed [`Command`] against an [`Inventory`]. The
//! outcome depends only on the inventory and the command, so replicas fed
//! the same log end in the same state. Each handler runs every check before
//! its first mutation: a rejected command leaves the inventory untouched.

use crate::engine::command::{Command, EntityKind, Operation};
use crate::engine::entry::{Filament, PrintJob, PrintJobStatus, PrintJobStatusChange, Printer};
use crate::engine::error::ApplyError;
use crate::engine::store::Inventory;

/// Value produced by a successfully applied command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Printer(Printer),
    Filament(Filament),
    PrintJob(PrintJob),
    Deleted { kind: EntityKind, id: String },
}

pub type ApplyResult = Result<Applied, ApplyError>;

/// Applies `cmd` to `inventory`, dispatching on entity kind then operation.
pub fn apply(inventory: &mut Inventory, cmd: &Command) -> ApplyResult {
    match cmd.kind {
        EntityKind::Printer => apply_printer(inventory, cmd),
        EntityKind::Filament => apply_filament(inventory, cmd),
        EntityKind::PrintJob => apply_print_job(inventory, cmd),
    }
}

fn apply_printer(inventory: &mut Inventory, cmd: &Command) -> ApplyResult {
    match cmd.op {
        Operation::Create => {
            let printer: Printer = cmd.decode_payload()?;
            printer.validate()?;
            if inventory.printer(&printer.id).is_some() {
                return Err(ApplyError::AlreadyExists {
                    kind: EntityKind::Printer,
                    id: printer.id,
                });
            }
            inventory.put_printer(printer.clone());
            Ok(Applied::Printer(printer))
        }
        Operation::Update => {
            let printer: Printer = cmd.decode_payload()?;
            printer.validate()?;
            if inventory.printer(&printer.id).is_none() {
                return Err(ApplyError::not_found(EntityKind::Printer, &printer.id));
            }
            inventory.put_printer(printer.clone());
            Ok(Applied::Printer(printer))
        }
        Operation::Delete => {
            let id: String = cmd.decode_payload()?;
            inventory
                .remove_printer(&id)
                .ok_or_else(|| ApplyError::not_found(EntityKind::Printer, &id))?;
            Ok(Applied::Deleted {
                kind: EntityKind::Printer,
                id,
            })
        }
    }
}

fn apply_filament(inventory: &mut Inventory, cmd: &Command) -> ApplyResult {
    match cmd.op {
        Operation::Create => {
            let filament: Filament = cmd.decode_payload()?;
            filament.validate()?;
            if inventory.filament(&filament.id).is_some() {
                return Err(ApplyError::AlreadyExists {
                    kind: EntityKind::Filament,
                    id: filament.id,
                });
            }
            inventory.put_filament(filament.clone());
            Ok(Applied::Filament(filament))
        }
        Operation::Update => {
            let filament: Filament = cmd.decode_payload()?;
            filament.validate()?;
            if inventory.filament(&filament.id).is_none() {
                return Err(ApplyError::not_found(EntityKind::Filament, &filament.id));
            }
            inventory.put_filament(filament.clone());
            Ok(Applied::Filament(filament))
        }
        Operation::Delete => {
            let id: String = cmd.decode_payload()?;
            inventory
                .remove_filament(&id)
                .ok_or_else(|| ApplyError::not_found(EntityKind::Filament, &id))?;
            Ok(Applied::Deleted {
                kind: EntityKind::Filament,
                id,
            })
        }
    }
}

fn apply_print_job(inventory: &mut Inventory, cmd: &Command) -> ApplyResult {
    match cmd.op {
        Operation::Create => {
            let mut job: PrintJob = cmd.decode_payload()?;
            job.status = PrintJobStatus::Queued;
            create_print_job(inventory, job)
        }
        Operation::Update => {
            let change: PrintJobStatusChange = cmd.decode_payload()?;
            change_print_job_status(inventory, change)
        }
        Operation::Delete => {
            // Consumed filament is not given back.
            let id: String = cmd.decode_payload()?;
            inventory
                .remove_print_job(&id)
                .ok_or_else(|| ApplyError::not_found(EntityKind::PrintJob, &id))?;
            Ok(Applied::Deleted {
                kind: EntityKind::PrintJob,
                id,
            })
        }
    }
}

fn create_print_job(inventory: &mut Inventory, job: PrintJob) -> ApplyResult {
    job.validate()?;
    if inventory.print_job(&job.id).is_some() {
        return Err(ApplyError::AlreadyExists {
            kind: EntityKind::PrintJob,
            id: job.id,
        });
    }
    if inventory.printer(&job.printer_id).is_none() {
        return Err(ApplyError::not_found(EntityKind::Printer, &job.printer_id));
    }
    let filament = inventory
        .filament(&job.filament_id)
        .ok_or_else(|| ApplyError::not_found(EntityKind::Filament, &job.filament_id))?;
    if job.print_weight_grams > filament.remaining_weight_grams {
        return Err(ApplyError::InsufficientFilament {
            required: job.print_weight_grams,
            available: filament.remaining_weight_grams,
        });
    }

    inventory.put_print_job(job.clone());
    Ok(Applied::PrintJob(job))
}

fn change_print_job_status(inventory: &mut Inventory, change: PrintJobStatusChange) -> ApplyResult {
    let job = inventory
        .print_job(&change.id)
        .ok_or_else(|| ApplyError::not_found(EntityKind::PrintJob, &change.id))?;
    if !job.status.can_transition_to(change.status) {
        return Err(ApplyError::InvalidTransition {
            from: job.status,
            to: change.status,
        });
    }
    let filament_id = job.filament_id.clone();
    let print_weight = job.print_weight_grams;

    // The only place filament is consumed: the single Running -> Done step.
    if change.status == PrintJobStatus::Done {
        let filament = inventory
            .filament_mut(&filament_id)
            .ok_or_else(|| ApplyError::not_found(EntityKind::Filament, &filament_id))?;
        filament.consume(print_weight);
    }

    let job = inventory
        .print_job_mut(&change.id)
        .ok_or_else(|| ApplyError::not_found(EntityKind::PrintJob, &change.id))?;
    job.status = change.status;
    Ok(Applied::PrintJob(job.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entry::FilamentType;
    use crate::engine::error::{ErrorKind, ValidationError};

    fn printer() -> Printer {
        Printer::new("p1", "Prusa", "MK4")
    }

    fn filament(remaining: i64) -> Filament {
        Filament::new("f1", FilamentType::PLA, "Red", 1000, remaining)
    }

    fn job(weight: i64) -> PrintJob {
        PrintJob::new("j1", "p1", "f1", "/gcode/benchy.gcode", weight)
    }

    fn status(id: &str, status: PrintJobStatus) -> Command {
        Command::update_print_job_status(id, status).unwrap()
    }

    fn seeded(remaining: i64) -> Inventory {
        let mut inventory = Inventory::new();
        apply(&mut inventory, &Command::create_printer(&printer()).unwrap()).unwrap();
        apply(
            &mut inventory,
            &Command::create_filament(&filament(remaining)).unwrap(),
        )
        .unwrap();
        inventory
    }

    #[test]
    fn test_print_lifecycle_deducts_filament() {
        let mut inventory = seeded(1000);
        apply(&mut inventory, &Command::create_print_job(&job(400)).unwrap()).unwrap();
        assert_eq!(inventory.filament("f1").unwrap().remaining_weight_grams, 1000);

        apply(&mut inventory, &status("j1", PrintJobStatus::Running)).unwrap();
        assert_eq!(inventory.filament("f1").unwrap().remaining_weight_grams, 1000);

        let applied = apply(&mut inventory, &status("j1", PrintJobStatus::Done)).unwrap();
        match applied {
            Applied::PrintJob(job) => assert_eq!(job.status, PrintJobStatus::Done),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(inventory.filament("f1").unwrap().remaining_weight_grams, 600);
    }

    #[test]
    fn test_create_forces_queued() {
        let mut inventory = seeded(1000);
        let mut running = job(10);
        running.status = PrintJobStatus::Done;
        apply(&mut inventory, &Command::create_print_job(&running).unwrap()).unwrap();
        assert_eq!(
            inventory.print_job("j1").unwrap().status,
            PrintJobStatus::Queued
        );
    }

    #[test]
    fn test_insufficient_filament_leaves_state_unchanged() {
        let mut inventory = seeded(300);
        let before = inventory.clone();

        let err = apply(&mut inventory, &Command::create_print_job(&job(400)).unwrap()).unwrap_err();
        assert_eq!(
            err,
            ApplyError::InsufficientFilament {
                required: 400,
                available: 300
            }
        );
        assert_eq!(
            err.to_string(),
            "insufficient filament: required 400 g, available 300 g"
        );
        assert_eq!(err.kind(), ErrorKind::Invariant);
        assert!(inventory.print_job("j1").is_none());
        assert_eq!(inventory, before);
    }

    #[test]
    fn test_print_job_requires_references() {
        let mut inventory = Inventory::new();
        apply(
            &mut inventory,
            &Command::create_filament(&filament(1000)).unwrap(),
        )
        .unwrap();

        let err = apply(&mut inventory, &Command::create_print_job(&job(10)).unwrap()).unwrap_err();
        assert_eq!(err, ApplyError::not_found(EntityKind::Printer, "p1"));

        apply(&mut inventory, &Command::create_printer(&printer()).unwrap()).unwrap();
        apply(
            &mut inventory,
            &Command::delete(EntityKind::Filament, "f1").unwrap(),
        )
        .unwrap();
        let err = apply(&mut inventory, &Command::create_print_job(&job(10)).unwrap()).unwrap_err();
        assert_eq!(err, ApplyError::not_found(EntityKind::Filament, "f1"));
        assert_eq!(err.to_string(), "filament not found: f1");
    }

    #[test]
    fn test_queued_to_done_is_rejected() {
        let mut inventory = seeded(1000);
        apply(&mut inventory, &Command::create_print_job(&job(400)).unwrap()).unwrap();

        let err = apply(&mut inventory, &status("j1", PrintJobStatus::Done)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid status transition from Queued to Done"
        );
        assert_eq!(
            inventory.print_job("j1").unwrap().status,
            PrintJobStatus::Queued
        );
        assert_eq!(inventory.filament("f1").unwrap().remaining_weight_grams, 1000);
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut inventory = seeded(1000);
        apply(&mut inventory, &Command::create_print_job(&job(100)).unwrap()).unwrap();
        apply(&mut inventory, &status("j1", PrintJobStatus::Running)).unwrap();
        apply(&mut inventory, &status("j1", PrintJobStatus::Done)).unwrap();

        for next in [
            PrintJobStatus::Queued,
            PrintJobStatus::Running,
            PrintJobStatus::Done,
            PrintJobStatus::Cancelled,
        ] {
            let err = apply(&mut inventory, &status("j1", next)).unwrap_err();
            assert!(matches!(err, ApplyError::InvalidTransition { .. }));
        }
        // Deducted exactly once.
        assert_eq!(inventory.filament("f1").unwrap().remaining_weight_grams, 900);
    }

    #[test]
    fn test_done_clamps_at_zero() {
        let mut inventory = seeded(1000);
        apply(&mut inventory, &Command::create_print_job(&job(100)).unwrap()).unwrap();
        apply(&mut inventory, &status("j1", PrintJobStatus::Running)).unwrap();

        // Spool shrinks while the job is running.
        apply(&mut inventory, &Command::update_filament(&filament(50)).unwrap()).unwrap();

        apply(&mut inventory, &status("j1", PrintJobStatus::Done)).unwrap();
        assert_eq!(inventory.filament("f1").unwrap().remaining_weight_grams, 0);
    }

    #[test]
    fn test_done_with_missing_filament_is_rejected_atomically() {
        let mut inventory = seeded(1000);
        apply(&mut inventory, &Command::create_print_job(&job(100)).unwrap()).unwrap();
        apply(&mut inventory, &status("j1", PrintJobStatus::Running)).unwrap();
        apply(
            &mut inventory,
            &Command::delete(EntityKind::Filament, "f1").unwrap(),
        )
        .unwrap();

        let err = apply(&mut inventory, &status("j1", PrintJobStatus::Done)).unwrap_err();
        assert_eq!(err, ApplyError::not_found(EntityKind::Filament, "f1"));
        assert_eq!(
            inventory.print_job("j1").unwrap().status,
            PrintJobStatus::Running
        );
    }

    #[test]
    fn test_cancel_and_delete_do_not_restore_weight() {
        let mut inventory = seeded(1000);
        apply(&mut inventory, &Command::create_print_job(&job(100)).unwrap()).unwrap();
        apply(&mut inventory, &status("j1", PrintJobStatus::Running)).unwrap();
        apply(&mut inventory, &status("j1", PrintJobStatus::Done)).unwrap();
        apply(
            &mut inventory,
            &Command::delete(EntityKind::PrintJob, "j1").unwrap(),
        )
        .unwrap();
        assert_eq!(inventory.filament("f1").unwrap().remaining_weight_grams, 900);

        let mut second = job(100);
        second.id = "j2".to_string();
        apply(&mut inventory, &Command::create_print_job(&second).unwrap()).unwrap();
        apply(&mut inventory, &status("j2", PrintJobStatus::Cancelled)).unwrap();
        assert_eq!(inventory.filament("f1").unwrap().remaining_weight_grams, 900);
    }

    #[test]
    fn test_update_and_delete_require_existing() {
        let mut inventory = Inventory::new();
        let err = apply(&mut inventory, &Command::update_printer(&printer()).unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "printer not found: p1");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = apply(
            &mut inventory,
            &Command::delete(EntityKind::PrintJob, "j9").unwrap(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "print job not found: j9");

        let err = apply(&mut inventory, &status("j9", PrintJobStatus::Running)).unwrap_err();
        assert_eq!(err, ApplyError::not_found(EntityKind::PrintJob, "j9"));
    }

    #[test]
    fn test_update_replaces_record() {
        let mut inventory = seeded(1000);
        let renamed = Printer::new("p1", "Bambu Lab", "X1C");
        apply(&mut inventory, &Command::update_printer(&renamed).unwrap()).unwrap();
        assert_eq!(inventory.printer("p1"), Some(&renamed));

        let mut invalid = filament(1000);
        invalid.remaining_weight_grams = 2000;
        let err = apply(&mut inventory, &Command::update_filament(&invalid).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            ApplyError::Validation(ValidationError::RemainingOutOfRange { .. })
        ));
        assert_eq!(inventory.filament("f1").unwrap().remaining_weight_grams, 1000);
    }

    #[test]
    fn test_duplicate_create_is_rejected() {
        let mut inventory = seeded(1000);
        let err = apply(
            &mut inventory,
            &Command::create_printer(&Printer::new("p1", "Other", "Model")).unwrap(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ApplyError::AlreadyExists {
                kind: EntityKind::Printer,
                id: "p1".to_string()
            }
        );
        assert_eq!(inventory.printer("p1").unwrap().company, "Prusa");
    }

    #[test]
    fn test_validation_error_on_create() {
        let mut inventory = Inventory::new();
        let err = apply(
            &mut inventory,
            &Command::create_printer(&Printer::new("p1", "", "MK4")).unwrap(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(inventory.is_empty());
    }

    #[test]
    fn test_malformed_payload_is_reported() {
        let mut inventory = seeded(1000);
        let before = inventory.clone();
        let cmd = Command::new(Operation::Create, EntityKind::Filament, vec![7]);
        let err = apply(&mut inventory, &cmd).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(inventory, before);
    }

    #[test]
    fn test_same_log_same_state() {
        let mut second_job = job(700);
        second_job.id = "j2".to_string();
        let log = vec![
            Command::create_printer(&printer()).unwrap(),
            Command::create_filament(&filament(1000)).unwrap(),
            Command::create_print_job(&job(400)).unwrap(),
            status("j1", PrintJobStatus::Done),
            status("j1", PrintJobStatus::Running),
            status("j1", PrintJobStatus::Done),
            Command::create_print_job(&second_job).unwrap(),
            Command::delete(EntityKind::Printer, "p1").unwrap(),
            Command::new(Operation::Delete, EntityKind::Printer, vec![]),
        ];

        let mut first = Inventory::new();
        let mut second = Inventory::new();
        let first_results: Vec<_> = log.iter().map(|cmd| apply(&mut first, cmd)).collect();
        let second_results: Vec<_> = log.iter().map(|cmd| apply(&mut second, cmd)).collect();

        assert_eq!(first, second);
        assert_eq!(first_results, second_results);
        assert_eq!(first.filament("f1").unwrap().remaining_weight_grams, 600);
        assert!(first.print_job("j2").is_none());
        assert!(first.printer("p1").is_none());
    }
}
