//! Inventory service
//!
//! Reads are served from the local store and may lag the leader. Writes are
//! accepted only on the leader: they are validated, encoded into a
//! [`Command`], proposed and answered with the result of applying the
//! committed entry.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc::Sender, watch};

use crate::engine::entry::{Filament, PrintJob, PrintJobStatus, Printer};
use crate::engine::{Applied, ApplyError, CodecError, Command, EntityKind, Store};
use crate::raft::node::{NodeHandle, NodeStatus};
use crate::raft::proposal::{ProposeError, Proposal};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("node is not the leader, leader is {leader:?}")]
    NotLeader { leader: Option<u64> },

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error(transparent)]
    Rejected(ApplyError),

    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error("command was not applied within {0:?}")]
    Timeout(Duration),

    #[error("proposal dropped: {0}")]
    Dropped(String),

    #[error("raft node unavailable")]
    Unavailable,

    #[error("unexpected apply result {0:?}")]
    UnexpectedResult(Option<Applied>),
}

impl From<ProposeError> for ServiceError {
    fn from(e: ProposeError) -> Self {
        match e {
            ProposeError::NotLeader { leader } => ServiceError::NotLeader { leader },
            ProposeError::Dropped(reason) => ServiceError::Dropped(reason),
            ProposeError::Rejected(ApplyError::NotFound { kind, id }) => {
                ServiceError::NotFound { kind, id }
            }
            ProposeError::Rejected(e) => ServiceError::Rejected(e),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone)]
pub struct InventoryService {
    id: u64,
    store: Arc<Store>,
    proposals: Sender<Proposal>,
    status: watch::Receiver<NodeStatus>,
    propose_timeout: Duration,
}

impl InventoryService {
    pub fn new(
        id: u64,
        store: Arc<Store>,
        proposals: Sender<Proposal>,
        status: watch::Receiver<NodeStatus>,
        propose_timeout: Duration,
    ) -> Self {
        InventoryService {
            id,
            store,
            proposals,
            status,
            propose_timeout,
        }
    }

    pub fn for_node(node: &NodeHandle, store: Arc<Store>, propose_timeout: Duration) -> Self {
        Self::new(
            node.id,
            store,
            node.proposals.clone(),
            node.status.clone(),
            propose_timeout,
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> NodeStatus {
        self.status.borrow().clone()
    }

    pub fn list_printers(&self) -> Vec<Printer> {
        self.store.printers()
    }

    pub fn get_printer(&self, id: &str) -> ServiceResult<Printer> {
        self.store
            .printer(id)
            .ok_or_else(|| not_found(EntityKind::Printer, id))
    }

    pub fn list_filaments(&self) -> Vec<Filament> {
        self.store.filaments()
    }

    pub fn get_filament(&self, id: &str) -> ServiceResult<Filament> {
        self.store
            .filament(id)
            .ok_or_else(|| not_found(EntityKind::Filament, id))
    }

    pub fn list_print_jobs(&self) -> Vec<PrintJob> {
        self.store.print_jobs()
    }

    pub fn get_print_job(&self, id: &str) -> ServiceResult<PrintJob> {
        self.store
            .print_job(id)
            .ok_or_else(|| not_found(EntityKind::PrintJob, id))
    }

    pub async fn create_printer(&self, printer: Printer) -> ServiceResult<Printer> {
        self.check_leader()?;
        printer.validate().map_err(reject)?;
        match self.submit(Command::create_printer(&printer)?).await? {
            Applied::Printer(printer) => Ok(printer),
            other => Err(ServiceError::UnexpectedResult(Some(other))),
        }
    }

    pub async fn update_printer(&self, printer: Printer) -> ServiceResult<Printer> {
        self.check_leader()?;
        printer.validate().map_err(reject)?;
        match self.submit(Command::update_printer(&printer)?).await? {
            Applied::Printer(printer) => Ok(printer),
            other => Err(ServiceError::UnexpectedResult(Some(other))),
        }
    }

    pub async fn create_filament(&self, filament: Filament) -> ServiceResult<Filament> {
        self.check_leader()?;
        filament.validate().map_err(reject)?;
        match self.submit(Command::create_filament(&filament)?).await? {
            Applied::Filament(filament) => Ok(filament),
            other => Err(ServiceError::UnexpectedResult(Some(other))),
        }
    }

    pub async fn update_filament(&self, filament: Filament) -> ServiceResult<Filament> {
        self.check_leader()?;
        filament.validate().map_err(reject)?;
        match self.submit(Command::update_filament(&filament)?).await? {
            Applied::Filament(filament) => Ok(filament),
            other => Err(ServiceError::UnexpectedResult(Some(other))),
        }
    }

    /// New jobs always start queued, whatever status the caller sent.
    pub async fn create_print_job(&self, mut job: PrintJob) -> ServiceResult<PrintJob> {
        self.check_leader()?;
        job.status = PrintJobStatus::Queued;
        job.validate().map_err(reject)?;
        match self.submit(Command::create_print_job(&job)?).await? {
            Applied::PrintJob(job) => Ok(job),
            other => Err(ServiceError::UnexpectedResult(Some(other))),
        }
    }

    pub async fn update_print_job_status(
        &self,
        id: &str,
        status: PrintJobStatus,
    ) -> ServiceResult<PrintJob> {
        self.check_leader()?;
        match self.submit(Command::update_print_job_status(id, status)?).await? {
            Applied::PrintJob(job) => Ok(job),
            other => Err(ServiceError::UnexpectedResult(Some(other))),
        }
    }

    pub async fn delete(&self, kind: EntityKind, id: &str) -> ServiceResult<()> {
        self.check_leader()?;
        match self.submit(Command::delete(kind, id)?).await? {
            Applied::Deleted { .. } => Ok(()),
            other => Err(ServiceError::UnexpectedResult(Some(other))),
        }
    }

    fn check_leader(&self) -> ServiceResult<()> {
        let status = self.status.borrow();
        if status.is_leader() {
            Ok(())
        } else {
            Err(ServiceError::NotLeader {
                leader: status.leader_id,
            })
        }
    }

    /// Proposes `cmd` and waits for the result of applying it.
    async fn submit(&self, cmd: Command) -> ServiceResult<Applied> {
        let (proposal, rx) = Proposal::normal(cmd.encode()?);
        self.proposals
            .send(proposal)
            .await
            .map_err(|_| ServiceError::Unavailable)?;

        match tokio::time::timeout(self.propose_timeout, rx).await {
            Err(_) => Err(ServiceError::Timeout(self.propose_timeout)),
            Ok(Err(_)) => Err(ServiceError::Unavailable),
            Ok(Ok(result)) => match result? {
                Some(applied) => Ok(applied),
                None => Err(ServiceError::UnexpectedResult(None)),
            },
        }
    }
}

fn not_found(kind: EntityKind, id: &str) -> ServiceError {
    ServiceError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn reject(e: crate::engine::ValidationError) -> ServiceError {
    ServiceError::Rejected(ApplyError::Validation(e))
}
