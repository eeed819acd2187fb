use serde::Serialize;
use ulid::Ulid;

use crate::limits::{DEFAULT_PAGE_LIMIT, HEALTH_OVERDUE_CRITICAL, MAX_PAGE_LIMIT};
use crate::model::*;

use super::Engine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl<T> Page<T> {
    /// Cut one page out of an already ordered list.
    pub fn slice(all: Vec<T>, limit: Option<usize>, offset: Option<usize>) -> Self {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let offset = offset.unwrap_or(0);
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).collect();
        Self {
            items,
            total,
            limit,
            offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HoldCounts {
    pub active: usize,
    pub confirmed: usize,
    pub released: usize,
    pub expired: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweeperHealth {
    pub overdue_holds: usize,
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapacitySummary {
    pub total_max: u64,
    pub total_available: u64,
    pub total_reserved: u64,
    pub utilization_percent: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: Ms,
    pub holds: HoldCounts,
    pub sweeper: SweeperHealth,
    pub active_resources: usize,
    pub capacity_records: usize,
    pub capacity: CapacitySummary,
    pub warnings: Vec<String>,
}

/// `(max - available) / max` as a rounded percentage; 0 when nothing is configured.
pub(super) fn utilization_percent(total_max: u64, total_available: u64) -> u32 {
    if total_max == 0 {
        return 0;
    }
    let reserved = total_max.saturating_sub(total_available);
    ((reserved as f64 / total_max as f64) * 100.0).round() as u32
}

impl Engine {
    pub async fn health(&self) -> HealthReport {
        let now = self.now();

        let handles: Vec<_> = self.holds.iter().map(|e| e.value().clone()).collect();
        let mut counts = HoldCounts::default();
        let mut overdue = 0usize;
        for handle in handles {
            let hold = handle.read().await;
            match hold.status {
                HoldStatus::Active => counts.active += 1,
                HoldStatus::Confirmed => counts.confirmed += 1,
                HoldStatus::Released => counts.released += 1,
                HoldStatus::Expired => counts.expired += 1,
            }
            if is_expired(&hold, now) {
                overdue += 1;
            }
        }
        counts.total = counts.active + counts.confirmed + counts.released + counts.expired;

        let rows: Vec<_> = self.ledger.iter().map(|e| e.value().clone()).collect();
        let mut capacity = CapacitySummary::default();
        for row in &rows {
            let record = row.read().await;
            capacity.total_max += u64::from(record.max_capacity);
            capacity.total_available += u64::from(record.available_capacity);
        }
        capacity.total_reserved = capacity.total_max - capacity.total_available;
        capacity.utilization_percent =
            utilization_percent(capacity.total_max, capacity.total_available);

        let active_resources = self
            .resources
            .iter()
            .filter(|r| r.is_bookable())
            .count();

        let mut warnings = Vec::new();
        if overdue > 0 {
            warnings.push(format!(
                "{overdue} holds are past expiration and should be cleaned up"
            ));
        }
        if overdue > HEALTH_OVERDUE_CRITICAL {
            warnings.push("Large number of overdue holds detected - sweeper may be failing".into());
        }
        if active_resources == 0 {
            warnings.push("No active resources configured".into());
        }

        let status = if overdue == 0 && active_resources > 0 {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        let sweeper = SweeperHealth {
            overdue_holds: overdue,
            status: if overdue == 0 { "ok" } else { "warning" },
            message: if overdue == 0 {
                "No overdue holds".into()
            } else {
                format!("{overdue} holds are past expiration and awaiting cleanup")
            },
        };

        HealthReport {
            status,
            timestamp: now,
            holds: counts,
            sweeper,
            active_resources,
            capacity_records: rows.len(),
            capacity,
            warnings,
        }
    }

    pub fn allocation(&self, id: Ulid) -> Option<Allocation> {
        self.allocations.get(&id).map(|a| a.value().clone())
    }

    /// Allocations linked to an order, oldest first.
    pub fn allocations_for_order(&self, order_id: &str) -> Vec<Allocation> {
        let mut out: Vec<Allocation> = self
            .allocations
            .iter()
            .filter(|a| a.order_id == order_id)
            .map(|a| a.value().clone())
            .collect();
        out.sort_by_key(|a| (a.created_at, a.id));
        out
    }

    /// Allocations on one resource, optionally narrowed to a date.
    pub fn allocations_for_resource(&self, resource_id: Ulid, date: Option<Day>) -> Vec<Allocation> {
        let mut out: Vec<Allocation> = self
            .allocations
            .iter()
            .filter(|a| a.resource_id == resource_id)
            .filter(|a| date.is_none_or(|d| a.date == d))
            .map(|a| a.value().clone())
            .collect();
        out.sort_by_key(|a| (a.date, a.created_at, a.id));
        out
    }
}
