use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::*;

use super::error::{BlackedOutDate, Shortfall};
use super::ledger::{INSUFFICIENT_MSG, NO_CAPACITY_MSG};
use super::saga::{Compensation, Saga};
use super::{Engine, EngineError, Page};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateHold {
    pub resource_id: Ulid,
    pub dates: Vec<Day>,
    pub quantity: u32,
    #[serde(default, alias = "customer_email")]
    pub customer: Option<String>,
    pub idempotency_token: String,
}

/// Result of CreateHold: the first hold, every per-date sibling, and whether
/// this call created them or matched an earlier request.
#[derive(Debug, Clone)]
pub struct HoldOutcome {
    pub hold: Hold,
    pub holds: Vec<Hold>,
    pub created: bool,
}

/// Sorted, de-duplicated dates of a valid request.
fn validate_create(req: &CreateHold) -> Result<Vec<Day>, EngineError> {
    if req.quantity == 0 {
        return Err(EngineError::invalid("quantity must be greater than 0"));
    }
    let token = req.idempotency_token.trim();
    if token.is_empty() {
        return Err(EngineError::invalid("idempotency_token is required"));
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(EngineError::LimitExceeded("idempotency_token too long"));
    }
    if let Some(customer) = &req.customer
        && customer.len() > MAX_CUSTOMER_LEN
    {
        return Err(EngineError::LimitExceeded("customer too long"));
    }
    let mut dates = req.dates.clone();
    dates.sort();
    dates.dedup();
    if dates.is_empty() {
        return Err(EngineError::invalid("at least one date is required"));
    }
    if dates.len() > MAX_DATES_PER_HOLD {
        return Err(EngineError::LimitExceeded("too many dates in one hold"));
    }
    Ok(dates)
}

fn validate_order_ref(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::invalid(format!("{field} is required")));
    }
    if value.len() > MAX_ORDER_REF_LEN {
        return Err(EngineError::invalid(format!("{field} too long")));
    }
    Ok(())
}

/// Refuse unless every date can take the hold. Any blackout outranks a shortfall.
fn reject_unavailable(checks: &[DateAvailability]) -> Result<(), EngineError> {
    let blacked_out: Vec<BlackedOutDate> = checks
        .iter()
        .filter(|c| c.reason == Some(UnavailableReason::Blackout))
        .map(|c| BlackedOutDate {
            date: c.date,
            reason: c.message.clone().unwrap_or_default(),
        })
        .collect();
    if !blacked_out.is_empty() {
        return Err(EngineError::BlackoutConflict(blacked_out));
    }

    let shortfalls: Vec<Shortfall> = checks
        .iter()
        .filter(|c| !c.is_available)
        .map(|c| Shortfall {
            date: c.date,
            requested: c.requested,
            available: c.available_capacity,
            reason: c.message.clone().unwrap_or_default(),
        })
        .collect();
    if !shortfalls.is_empty() {
        return Err(EngineError::InsufficientCapacity(shortfalls));
    }
    Ok(())
}

/// A decrement refused after the availability check passed means another
/// request took the units in between; report it as the shortfall it is.
fn lost_race(err: EngineError, date: Day, requested: u32) -> EngineError {
    match err {
        EngineError::OutOfRange { available, .. } => EngineError::InsufficientCapacity(vec![Shortfall {
            date,
            requested,
            available,
            reason: INSUFFICIENT_MSG.to_string(),
        }]),
        EngineError::NotFound { .. } => EngineError::InsufficientCapacity(vec![Shortfall {
            date,
            requested,
            available: 0,
            reason: NO_CAPACITY_MSG.to_string(),
        }]),
        other => other,
    }
}

/// ACTIVE and not overdue, or the error the caller must see.
fn ensure_live(hold: &Hold, attempted: HoldStatus, now: Ms) -> Result<(), EngineError> {
    if hold.status != HoldStatus::Active {
        return Err(EngineError::InvalidState {
            id: hold.id,
            current: hold.status,
            attempted,
        });
    }
    if is_expired(hold, now) {
        return Err(EngineError::HoldExpired {
            id: hold.id,
            expired_at: hold.expires_at,
        });
    }
    Ok(())
}

/// Copy of `hold` with the status a reader should see.
fn project(hold: &Hold, now: Ms) -> Hold {
    let mut view = hold.clone();
    view.status = hold.effective_status(now);
    view
}

impl Engine {
    /// Reserve `quantity` units on every requested date, or nothing at all.
    pub async fn create_hold(&self, req: CreateHold) -> Result<HoldOutcome, EngineError> {
        let dates = validate_create(&req)?;
        let token = req.idempotency_token.trim().to_string();
        let _gate = self.commit_gate.read().await;

        // Requests sharing a token queue here; later ones find the first one's holds.
        let slot_handle = self.tokens.entry(token.clone()).or_default().clone();
        let mut slot = slot_handle.lock().await;
        if let Some(ids) = slot.as_ref() {
            metrics::counter!(HOLDS_IDEMPOTENT_REPLAYS_TOTAL).increment(1);
            debug!("idempotent replay of token {token}");
            return self.replayed_outcome(ids).await;
        }

        let holds = match self.reserve(&req, &dates, &token).await {
            Ok(holds) => holds,
            Err(err) => {
                // Drop the empty slot unless another request with this token is queued on it.
                self.tokens.remove_if(&token, |_, s| {
                    Arc::ptr_eq(s, &slot_handle) && Arc::strong_count(s) == 2
                });
                return Err(err);
            }
        };

        *slot = Some(holds.iter().map(|h| h.id).collect());
        metrics::counter!(HOLDS_CREATED_TOTAL).increment(holds.len() as u64);
        info!(
            "hold {} created: {} x{} on {} date(s), token {token}",
            holds[0].id,
            req.resource_id,
            req.quantity,
            holds.len()
        );
        Ok(HoldOutcome {
            hold: holds[0].clone(),
            holds,
            created: true,
        })
    }

    /// Availability check, debits and hold rows for one new token, rolled back on failure.
    async fn reserve(
        &self,
        req: &CreateHold,
        dates: &[Day],
        token: &str,
    ) -> Result<Vec<Hold>, EngineError> {
        let resource_id = req.resource_id;
        let resource = self.live_resource(resource_id)?;
        if !resource.is_bookable() {
            return Err(EngineError::not_found("resource", resource_id));
        }

        let mut checks = Vec::with_capacity(dates.len());
        for &date in dates {
            checks.push(self.date_availability(resource_id, date, req.quantity).await);
        }
        if let Err(err) = reject_unavailable(&checks) {
            let reason = match err {
                EngineError::BlackoutConflict(_) => "blackout",
                _ => "insufficient_capacity",
            };
            metrics::counter!(HOLDS_REJECTED_TOTAL, "reason" => reason).increment(1);
            return Err(err);
        }

        let now = self.now();
        let quantity = req.quantity;
        let delta = -i64::from(quantity);
        let mut saga = Saga::new("create_hold");
        let result = async {
            for &date in dates {
                self.adjust_row(resource_id, date, delta)
                    .await
                    .map_err(|e| lost_race(e, date, quantity))?;
                saga.record(Compensation::Adjustment {
                    resource_id,
                    date,
                    delta,
                });
            }

            let mut holds = Vec::with_capacity(dates.len());
            for &date in dates {
                self.failpoint("create_hold.insert_hold")?;
                let hold = Hold {
                    id: Ulid::new(),
                    resource_id,
                    date,
                    quantity,
                    customer: req.customer.clone(),
                    expires_at: now + self.settings.hold_ttl_ms,
                    idempotency_token: date_token(token, date),
                    status: HoldStatus::Active,
                    created_at: now,
                    updated_at: now,
                };
                self.wal_append(&Event::HoldCreated { hold: hold.clone() })
                    .await?;
                self.holds.insert(hold.id, Arc::new(RwLock::new(hold.clone())));
                saga.record(Compensation::DeleteHold { id: hold.id });
                holds.push(hold);
            }
            Ok::<_, EngineError>(holds)
        }
        .await;

        if let Err(err) = &result {
            if matches!(err, EngineError::InsufficientCapacity(_)) {
                metrics::counter!(HOLDS_REJECTED_TOTAL, "reason" => "lost_race").increment(1);
            }
            self.unwind(saga, err).await;
        }
        result
    }

    async fn replayed_outcome(&self, ids: &[Ulid]) -> Result<HoldOutcome, EngineError> {
        let now = self.now();
        let mut holds = Vec::with_capacity(ids.len());
        for &id in ids {
            let hold = self.hold_handle(id)?;
            let hold = hold.read().await;
            holds.push(project(&hold, now));
        }
        let first = holds
            .first()
            .cloned()
            .ok_or_else(|| EngineError::not_found("hold", "(empty token)"))?;
        Ok(HoldOutcome {
            hold: first,
            holds,
            created: false,
        })
    }

    /// Turn an ACTIVE hold into a permanent allocation. Capacity stays debited.
    pub async fn confirm_hold(
        &self,
        hold_id: Ulid,
        order_id: &str,
        line_item_id: &str,
    ) -> Result<Allocation, EngineError> {
        validate_order_ref("order_id", order_id)?;
        validate_order_ref("line_item_id", line_item_id)?;
        let _gate = self.commit_gate.read().await;
        let shared = self.hold_handle(hold_id)?;
        let mut hold = shared.write().await;
        let now = self.now();
        ensure_live(&hold, HoldStatus::Confirmed, now)?;

        let allocation = Allocation {
            id: Ulid::new(),
            hold_id,
            resource_id: hold.resource_id,
            date: hold.date,
            quantity: hold.quantity,
            order_id: order_id.to_string(),
            line_item_id: line_item_id.to_string(),
            created_at: now,
        };

        let mut saga = Saga::new("confirm_hold");
        let result = async {
            self.wal_append(&Event::AllocationCreated {
                allocation: allocation.clone(),
            })
            .await?;
            self.allocations.insert(allocation.id, allocation.clone());
            saga.record(Compensation::DeleteAllocation { id: allocation.id });

            self.failpoint("confirm_hold.set_status")?;
            self.persist_status(&mut hold, HoldStatus::Confirmed, now).await
        }
        .await;
        if let Err(err) = result {
            self.unwind(saga, &err).await;
            return Err(err);
        }

        metrics::counter!(HOLDS_CONFIRMED_TOTAL).increment(1);
        info!("hold {hold_id} confirmed as allocation {} for order {order_id}", allocation.id);
        Ok(allocation)
    }

    /// Cancel an ACTIVE hold and return its units to the ledger.
    pub async fn release_hold(&self, hold_id: Ulid) -> Result<Hold, EngineError> {
        let _gate = self.commit_gate.read().await;
        let shared = self.hold_handle(hold_id)?;
        let mut hold = shared.write().await;
        let now = self.now();
        ensure_live(&hold, HoldStatus::Released, now)?;

        self.restore_and_close(&mut hold, HoldStatus::Released, now, "release_hold")
            .await?;
        metrics::counter!(HOLDS_RELEASED_TOTAL).increment(1);
        metrics::counter!(CAPACITY_RESTORED_UNITS_TOTAL, "source" => "release")
            .increment(u64::from(hold.quantity));
        info!("hold {hold_id} released, {} unit(s) restored", hold.quantity);
        Ok(hold.clone())
    }

    /// Expire one overdue hold. `Ok(None)` if it is ACTIVE but no longer overdue
    /// (extended since it was collected); InvalidState if it already left ACTIVE.
    pub async fn expire_hold(&self, hold_id: Ulid) -> Result<Option<u32>, EngineError> {
        let _gate = self.commit_gate.read().await;
        let shared = self.hold_handle(hold_id)?;
        let mut hold = shared.write().await;
        if hold.status.is_terminal() {
            return Err(EngineError::InvalidState {
                id: hold_id,
                current: hold.status,
                attempted: HoldStatus::Expired,
            });
        }
        let now = self.now();
        if !is_expired(&hold, now) {
            return Ok(None);
        }

        self.restore_and_close(&mut hold, HoldStatus::Expired, now, "expire_hold")
            .await?;
        metrics::counter!(HOLDS_EXPIRED_TOTAL).increment(1);
        metrics::counter!(CAPACITY_RESTORED_UNITS_TOTAL, "source" => "expire")
            .increment(u64::from(hold.quantity));
        Ok(Some(hold.quantity))
    }

    /// Shared release/expire steps: credit the ledger, then close the hold.
    /// Caller holds the hold's write lock and has validated the transition.
    async fn restore_and_close(
        &self,
        hold: &mut Hold,
        status: HoldStatus,
        now: Ms,
        saga_name: &'static str,
    ) -> Result<(), EngineError> {
        let credit = i64::from(hold.quantity);
        let mut saga = Saga::new(saga_name);
        let result = async {
            self.adjust_row(hold.resource_id, hold.date, credit).await?;
            saga.record(Compensation::Adjustment {
                resource_id: hold.resource_id,
                date: hold.date,
                delta: credit,
            });

            self.failpoint("restore_and_close.set_status")?;
            self.persist_status(hold, status, now).await
        }
        .await;
        if let Err(err) = result {
            if matches!(err, EngineError::OutOfRange { .. }) {
                tracing::error!("ledger invariant breach while closing hold {}: {err}", hold.id);
            }
            self.unwind(saga, &err).await;
            return Err(err);
        }
        Ok(())
    }

    async fn persist_status(
        &self,
        hold: &mut Hold,
        status: HoldStatus,
        at: Ms,
    ) -> Result<(), EngineError> {
        if !hold.status.can_transition_to(status) {
            return Err(EngineError::InvalidState {
                id: hold.id,
                current: hold.status,
                attempted: status,
            });
        }
        self.wal_append(&Event::HoldStatusChanged {
            id: hold.id,
            status,
            at,
        })
        .await?;
        hold.set_status(status, at);
        Ok(())
    }

    /// Push an ACTIVE hold's deadline back by `minutes` (default 30).
    pub async fn extend_hold(
        &self,
        hold_id: Ulid,
        minutes: Option<i64>,
    ) -> Result<Hold, EngineError> {
        let minutes = minutes.unwrap_or(DEFAULT_EXTENSION_MINUTES);
        if minutes <= 0 {
            return Err(EngineError::invalid("additional_minutes must be positive"));
        }
        if minutes > MAX_EXTENSION_MINUTES {
            return Err(EngineError::LimitExceeded("extension longer than 24 hours"));
        }
        let _gate = self.commit_gate.read().await;
        let shared = self.hold_handle(hold_id)?;
        let mut hold = shared.write().await;
        let now = self.now();
        ensure_live(&hold, HoldStatus::Active, now)?;

        let expires_at = hold.expires_at + minutes * MINUTE_MS;
        self.wal_append(&Event::HoldExtended {
            id: hold_id,
            expires_at,
            at: now,
        })
        .await?;
        hold.expires_at = expires_at;
        hold.updated_at = now;
        info!("hold {hold_id} extended by {minutes}m");
        Ok(hold.clone())
    }

    /// The hold as a reader sees it: an overdue ACTIVE hold reads as EXPIRED.
    pub async fn get_hold(&self, hold_id: Ulid) -> Result<Hold, EngineError> {
        let shared = self.hold_handle(hold_id)?;
        let hold = shared.read().await;
        Ok(project(&hold, self.now()))
    }

    async fn snapshot_holds(&self) -> Vec<Hold> {
        let handles: Vec<_> = self.holds.iter().map(|e| e.value().clone()).collect();
        let now = self.now();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(project(&*handle.read().await, now));
        }
        out
    }

    /// A customer's holds, newest first, optionally filtered by effective status.
    pub async fn list_holds_for_customer(
        &self,
        customer: &str,
        status: Option<HoldStatus>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Page<Hold> {
        let mut holds: Vec<Hold> = self
            .snapshot_holds()
            .await
            .into_iter()
            .filter(|h| h.customer.as_deref() == Some(customer))
            .filter(|h| status.is_none_or(|s| h.status == s))
            .collect();
        holds.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Page::slice(holds, limit, offset)
    }

    /// ACTIVE, non-overdue holds on one ledger row.
    pub async fn list_active_holds(&self, resource_id: Ulid, date: Day) -> Vec<Hold> {
        let mut holds: Vec<Hold> = self
            .snapshot_holds()
            .await
            .into_iter()
            .filter(|h| h.resource_id == resource_id && h.date == date)
            .filter(|h| h.status == HoldStatus::Active)
            .collect();
        holds.sort_by_key(|h| (h.created_at, h.id));
        holds
    }

    /// ACTIVE holds whose deadline passed before `now`. Holds locked by an
    /// in-flight transaction are skipped; the next sweep sees them.
    pub fn collect_expired_holds(&self, now: Ms) -> Vec<Ulid> {
        self.holds
            .iter()
            .filter_map(|entry| {
                let hold = entry.value().try_read().ok()?;
                is_expired(&hold, now).then_some(hold.id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(day: u32) -> Day {
        NaiveDate::from_ymd_opt(2025, 7, day).unwrap()
    }

    fn request(dates: Vec<Day>, quantity: u32) -> CreateHold {
        CreateHold {
            resource_id: Ulid::new(),
            dates,
            quantity,
            customer: None,
            idempotency_token: "tok".into(),
        }
    }

    fn check(date: Day, reason: Option<UnavailableReason>, available: u32) -> DateAvailability {
        DateAvailability {
            date,
            requested: 3,
            is_available: reason.is_none(),
            available_capacity: available,
            reason,
            message: reason.map(|_| "closed".to_string()),
        }
    }

    #[test]
    fn create_validation() {
        assert!(matches!(
            validate_create(&request(vec![d(1)], 0)),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_create(&request(vec![], 1)),
            Err(EngineError::Validation(_))
        ));
        let mut blank = request(vec![d(1)], 1);
        blank.idempotency_token = "  ".into();
        assert!(matches!(validate_create(&blank), Err(EngineError::Validation(_))));

        let dates = validate_create(&request(vec![d(3), d(1), d(3)], 1)).unwrap();
        assert_eq!(dates, vec![d(1), d(3)]);
    }

    #[test]
    fn blackout_outranks_shortfall() {
        let checks = vec![
            check(d(1), Some(UnavailableReason::InsufficientCapacity), 1),
            check(d(2), Some(UnavailableReason::Blackout), 0),
            check(d(3), None, 9),
        ];
        match reject_unavailable(&checks) {
            Err(EngineError::BlackoutConflict(dates)) => {
                assert_eq!(dates.len(), 1);
                assert_eq!(dates[0].date, d(2));
            }
            other => panic!("expected blackout conflict, got {other:?}"),
        }
    }

    #[test]
    fn shortfalls_name_every_date() {
        let checks = vec![
            check(d(1), Some(UnavailableReason::InsufficientCapacity), 1),
            check(d(2), None, 9),
            check(d(3), Some(UnavailableReason::NoCapacityConfigured), 0),
        ];
        match reject_unavailable(&checks) {
            Err(EngineError::InsufficientCapacity(s)) => {
                assert_eq!(s.iter().map(|s| s.date).collect::<Vec<_>>(), vec![d(1), d(3)]);
                assert_eq!(s[0].available, 1);
            }
            other => panic!("expected shortfall, got {other:?}"),
        }
        assert!(reject_unavailable(&[check(d(4), None, 3)]).is_ok());
    }
}
