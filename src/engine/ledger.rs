use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::MAX_DATE_RANGE_DAYS;
use crate::model::*;

use super::{Engine, EngineError, SharedCapacity};

pub(super) const NO_CAPACITY_MSG: &str = "No capacity configured for this date";
pub(super) const INSUFFICIENT_MSG: &str = "Insufficient capacity";

/// Every date in `[start, end]`, bounded by `MAX_DATE_RANGE_DAYS`.
pub(super) fn date_range(start: Day, end: Day) -> Result<Vec<Day>, EngineError> {
    let span = (end - start).num_days();
    if span < 0 {
        return Err(EngineError::invalid("end_date must not be before start_date"));
    }
    if span > MAX_DATE_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range longer than 365 days"));
    }
    Ok(start.iter_days().take(span as usize + 1).collect())
}

impl Engine {
    pub(super) fn capacity_row(&self, resource_id: Ulid, date: Day) -> Option<SharedCapacity> {
        self.ledger.get(&(resource_id, date)).map(|e| e.value().clone())
    }

    pub async fn capacity(&self, resource_id: Ulid, date: Day) -> Option<CapacityRecord> {
        let row = self.capacity_row(resource_id, date)?;
        let record = row.read().await.clone();
        Some(record)
    }

    /// Atomically apply `delta` to one ledger row.
    pub async fn adjust_capacity(
        &self,
        resource_id: Ulid,
        date: Day,
        delta: i64,
    ) -> Result<CapacityRecord, EngineError> {
        let _gate = self.commit_gate.read().await;
        self.adjust_row(resource_id, date, delta).await
    }

    /// The only write path to `available_capacity`: the row's write lock spans
    /// the range check, the WAL append and the update.
    pub(super) async fn adjust_row(
        &self,
        resource_id: Ulid,
        date: Day,
        delta: i64,
    ) -> Result<CapacityRecord, EngineError> {
        let row = self
            .capacity_row(resource_id, date)
            .ok_or_else(|| EngineError::not_found("capacity record", format!("{resource_id}/{date}")))?;
        let mut record = row.write().await;
        if record.checked_delta(delta).is_none() {
            return Err(EngineError::OutOfRange {
                resource_id,
                date,
                available: record.available_capacity,
                max: record.max_capacity,
                delta,
            });
        }
        self.wal_append(&Event::CapacityAdjusted {
            resource_id,
            date,
            delta,
        })
        .await?;
        record.apply_delta(delta);
        Ok(record.clone())
    }

    /// Create ledger rows for `dates`. Dates that already have a row keep it untouched.
    /// Returns the row for every requested date.
    pub async fn initialize_capacity(
        &self,
        resource_id: Ulid,
        dates: &[Day],
        max_capacity: u32,
    ) -> Result<Vec<CapacityRecord>, EngineError> {
        let _gate = self.commit_gate.read().await;
        self.live_resource(resource_id)?;
        self.init_rows(resource_id, dates, max_capacity).await
    }

    pub async fn initialize_capacity_range(
        &self,
        resource_id: Ulid,
        start: Day,
        end: Day,
        max_capacity: u32,
    ) -> Result<Vec<CapacityRecord>, EngineError> {
        let dates = date_range(start, end)?;
        self.initialize_capacity(resource_id, &dates, max_capacity).await
    }

    pub(super) async fn init_rows(
        &self,
        resource_id: Ulid,
        dates: &[Day],
        max_capacity: u32,
    ) -> Result<Vec<CapacityRecord>, EngineError> {
        let _init = self.ledger_init_lock.lock().await;
        let mut rows = Vec::with_capacity(dates.len());
        let mut created = 0usize;
        for &date in dates {
            let key = (resource_id, date);
            let existing = self.ledger.get(&key).map(|row| row.clone());
            let row = match existing {
                Some(row) => row,
                None => {
                    self.wal_append(&Event::CapacityInitialized {
                        resource_id,
                        date,
                        max_capacity,
                    })
                    .await?;
                    created += 1;
                    let row = Arc::new(RwLock::new(CapacityRecord::new(
                        resource_id,
                        date,
                        max_capacity,
                    )));
                    self.ledger.insert(key, row.clone());
                    row
                }
            };
            rows.push(row.read().await.clone());
        }
        if created > 0 {
            tracing::info!("initialized {created} capacity rows for {resource_id} at {max_capacity}/day");
        }
        Ok(rows)
    }

    pub(super) fn blackout_on(&self, resource_id: Ulid, date: Day) -> Option<Blackout> {
        self.blackouts
            .iter()
            .find(|b| b.resource_id == resource_id && b.covers(date))
            .map(|b| b.value().clone())
    }

    /// Availability of one date. Blackouts take precedence over the ledger.
    pub(super) async fn date_availability(
        &self,
        resource_id: Ulid,
        date: Day,
        quantity: u32,
    ) -> DateAvailability {
        let unavailable = |available_capacity, reason, message: String| DateAvailability {
            date,
            requested: quantity,
            is_available: false,
            available_capacity,
            reason: Some(reason),
            message: Some(message),
        };

        if let Some(blackout) = self.blackout_on(resource_id, date) {
            return unavailable(0, UnavailableReason::Blackout, blackout.reason);
        }
        let Some(record) = self.capacity(resource_id, date).await else {
            return unavailable(
                0,
                UnavailableReason::NoCapacityConfigured,
                NO_CAPACITY_MSG.to_string(),
            );
        };
        if record.available_capacity < quantity {
            return unavailable(
                record.available_capacity,
                UnavailableReason::InsufficientCapacity,
                INSUFFICIENT_MSG.to_string(),
            );
        }
        DateAvailability {
            date,
            requested: quantity,
            is_available: true,
            available_capacity: record.available_capacity,
            reason: None,
            message: None,
        }
    }

    /// Per-date answer to "are `quantity` units free?". Not atomic with any later
    /// decrement; CreateHold re-checks through `adjust_row`.
    pub async fn check_availability(
        &self,
        resource_id: Ulid,
        dates: &[Day],
        quantity: u32,
    ) -> Result<Vec<DateAvailability>, EngineError> {
        if quantity == 0 {
            return Err(EngineError::invalid("quantity must be greater than 0"));
        }
        if dates.is_empty() {
            return Err(EngineError::invalid("at least one date is required"));
        }
        self.live_resource(resource_id)?;
        let mut out = Vec::with_capacity(dates.len());
        for &date in dates {
            out.push(self.date_availability(resource_id, date, quantity).await);
        }
        Ok(out)
    }

    /// Dates in `[start, end]` with a ledger row, no blackout and at least `min_capacity` free.
    pub async fn available_dates(
        &self,
        resource_id: Ulid,
        start: Day,
        end: Day,
        min_capacity: u32,
    ) -> Result<Vec<AvailableDate>, EngineError> {
        let dates = date_range(start, end)?;
        self.live_resource(resource_id)?;
        let mut out = Vec::new();
        for date in dates {
            if self.blackout_on(resource_id, date).is_some() {
                continue;
            }
            if let Some(record) = self.capacity(resource_id, date).await
                && record.available_capacity >= min_capacity.max(1)
            {
                out.push(AvailableDate {
                    date,
                    available_capacity: record.available_capacity,
                    max_capacity: record.max_capacity,
                });
            }
        }
        Ok(out)
    }

    /// Ledger rows for a resource in `[start, end]`, date-ordered.
    pub async fn list_capacity(
        &self,
        resource_id: Ulid,
        start: Day,
        end: Day,
    ) -> Result<Vec<CapacityRecord>, EngineError> {
        let dates = date_range(start, end)?;
        self.live_resource(resource_id)?;
        let mut out = Vec::new();
        for date in dates {
            if let Some(record) = self.capacity(resource_id, date).await {
                out.push(record);
            }
        }
        Ok(out)
    }
}
