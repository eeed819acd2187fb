use tracing::{error, warn};
use ulid::Ulid;

use crate::model::{Day, Event};
use crate::observability::{COMPENSATIONS_TOTAL, COMPENSATION_FAILURES_TOTAL};

use super::{Engine, EngineError};

/// Inverse of one completed transaction step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Compensation {
    /// Undo a ledger adjustment by applying `-delta`.
    Adjustment {
        resource_id: Ulid,
        date: Day,
        delta: i64,
    },
    DeleteHold {
        id: Ulid,
    },
    DeleteAllocation {
        id: Ulid,
    },
}

impl Compensation {
    fn step(&self) -> &'static str {
        match self {
            Compensation::Adjustment { delta, .. } if *delta < 0 => "restore_capacity",
            Compensation::Adjustment { .. } => "redebit_capacity",
            Compensation::DeleteHold { .. } => "delete_hold",
            Compensation::DeleteAllocation { .. } => "delete_allocation",
        }
    }
}

/// Completed steps of one multi-step transaction, in execution order.
/// A transaction either commits or hands the saga to `Engine::unwind`.
#[derive(Debug)]
pub(super) struct Saga {
    name: &'static str,
    done: Vec<Compensation>,
}

impl Saga {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            done: Vec::new(),
        }
    }

    pub fn record(&mut self, compensation: Compensation) {
        self.done.push(compensation);
    }

    #[cfg(test)]
    pub fn pending(&self) -> &[Compensation] {
        &self.done
    }
}

impl Engine {
    /// Run the compensations of every completed step, newest first. A failing
    /// compensation is logged and counted; the remaining ones still run.
    pub(super) async fn unwind(&self, saga: Saga, cause: &EngineError) {
        warn!(
            "{}: rolling back {} step(s) after: {cause}",
            saga.name,
            saga.done.len()
        );
        for compensation in saga.done.into_iter().rev() {
            let step = compensation.step();
            match self.compensate(&compensation).await {
                Ok(()) => {
                    metrics::counter!(COMPENSATIONS_TOTAL, "saga" => saga.name, "step" => step)
                        .increment(1);
                }
                Err(e) => {
                    metrics::counter!(COMPENSATION_FAILURES_TOTAL, "saga" => saga.name, "step" => step)
                        .increment(1);
                    error!("{}: compensation {step} failed for {compensation:?}: {e}", saga.name);
                }
            }
        }
    }

    async fn compensate(&self, compensation: &Compensation) -> Result<(), EngineError> {
        match *compensation {
            Compensation::Adjustment {
                resource_id,
                date,
                delta,
            } => self.adjust_row(resource_id, date, -delta).await.map(|_| ()),
            Compensation::DeleteHold { id } => {
                self.wal_append(&Event::HoldDeleted { id }).await?;
                self.holds.remove(&id);
                Ok(())
            }
            Compensation::DeleteAllocation { id } => {
                self.wal_append(&Event::AllocationDeleted { id }).await?;
                self.allocations.remove(&id);
                Ok(())
            }
        }
    }
}
