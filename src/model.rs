use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

/// Calendar date. The capacity ledger is keyed per resource per `Day`.
pub type Day = NaiveDate;

pub const MINUTE_MS: Ms = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Vehicle,
    Tour,
    Guide,
}

/// A bookable unit. Owned by the catalog; the booking core only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub name: String,
    pub description: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub active: bool,
    pub deleted_at: Option<Ms>,
}

impl Resource {
    /// Holds may only be placed on active, non-deleted resources.
    pub fn is_bookable(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }
}

/// One ledger row. `0 <= available_capacity <= max_capacity` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityRecord {
    pub resource_id: Ulid,
    pub date: Day,
    pub max_capacity: u32,
    pub available_capacity: u32,
}

impl CapacityRecord {
    pub fn new(resource_id: Ulid, date: Day, max_capacity: u32) -> Self {
        Self {
            resource_id,
            date,
            max_capacity,
            available_capacity: max_capacity,
        }
    }

    pub fn reserved(&self) -> u32 {
        self.max_capacity - self.available_capacity
    }

    /// Value `available_capacity` would take after `delta`, if still in `[0, max]`.
    pub fn checked_delta(&self, delta: i64) -> Option<u32> {
        let next = i64::from(self.available_capacity) + delta;
        if (0..=i64::from(self.max_capacity)).contains(&next) {
            Some(next as u32)
        } else {
            None
        }
    }

    /// Apply `delta` in place. Leaves the record untouched and returns None if out of range.
    pub fn apply_delta(&mut self, delta: i64) -> Option<u32> {
        let next = self.checked_delta(delta)?;
        self.available_capacity = next;
        Some(next)
    }
}

/// Inclusive date range during which a resource cannot be held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blackout {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub start_date: Day,
    pub end_date: Day,
    pub reason: String,
}

impl Blackout {
    pub fn covers(&self, date: Day) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn overlaps(&self, from: Day, to: Day) -> bool {
        self.start_date <= to && from <= self.end_date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldStatus {
    Active,
    Confirmed,
    Released,
    Expired,
}

impl HoldStatus {
    pub const ALL: [HoldStatus; 4] = [
        HoldStatus::Active,
        HoldStatus::Confirmed,
        HoldStatus::Released,
        HoldStatus::Expired,
    ];

    pub fn is_terminal(self) -> bool {
        !matches!(self, HoldStatus::Active)
    }

    /// ACTIVE → {CONFIRMED, RELEASED, EXPIRED}; terminal states absorb.
    pub fn can_transition_to(self, next: HoldStatus) -> bool {
        self == HoldStatus::Active && next.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HoldStatus::Active => "ACTIVE",
            HoldStatus::Confirmed => "CONFIRMED",
            HoldStatus::Released => "RELEASED",
            HoldStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisional claim of `quantity` units on one ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub date: Day,
    pub quantity: u32,
    pub customer: Option<String>,
    pub expires_at: Ms,
    /// Globally unique: the client token suffixed with the hold's date.
    pub idempotency_token: String,
    pub status: HoldStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Hold {
    /// The client-supplied token this hold was created under.
    pub fn request_token(&self) -> &str {
        self.idempotency_token
            .rsplit_once(':')
            .map_or(self.idempotency_token.as_str(), |(base, _)| base)
    }

    /// Status as seen by readers: an overdue ACTIVE hold reads as EXPIRED.
    pub fn effective_status(&self, now: Ms) -> HoldStatus {
        if is_expired(self, now) {
            HoldStatus::Expired
        } else {
            self.status
        }
    }

    pub fn set_status(&mut self, status: HoldStatus, at: Ms) {
        self.status = status;
        self.updated_at = at;
    }
}

/// Per-date token stored on each hold row.
pub fn date_token(request_token: &str, date: Day) -> String {
    format!("{request_token}:{date}")
}

/// A hold is overdue once it is still ACTIVE and `now` has passed `expires_at`.
/// Shared by the sweeper and by every confirm/release/extend path.
pub fn is_expired(hold: &Hold, now: Ms) -> bool {
    hold.status == HoldStatus::Active && now > hold.expires_at
}

/// Permanent, order-linked capacity commitment created on confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Ulid,
    pub hold_id: Ulid,
    pub resource_id: Ulid,
    pub date: Day,
    pub quantity: u32,
    pub order_id: String,
    pub line_item_id: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnavailableReason {
    Blackout,
    NoCapacityConfigured,
    InsufficientCapacity,
}

/// Per-date answer of `check_availability`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateAvailability {
    pub date: Day,
    pub requested: u32,
    pub is_available: bool,
    pub available_capacity: u32,
    pub reason: Option<UnavailableReason>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableDate {
    pub date: Day,
    pub available_capacity: u32,
    pub max_capacity: u32,
}

/// WAL event — one per state change, appended before the change is visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Create, update, soft-delete and restore all write the full resource.
    ResourceUpserted {
        resource: Resource,
    },
    CapacityInitialized {
        resource_id: Ulid,
        date: Day,
        max_capacity: u32,
    },
    CapacityAdjusted {
        resource_id: Ulid,
        date: Day,
        delta: i64,
    },
    /// Compaction only: a ledger row with its current counters.
    CapacitySnapshot {
        record: CapacityRecord,
    },
    BlackoutAdded {
        blackout: Blackout,
    },
    BlackoutRemoved {
        id: Ulid,
    },
    HoldCreated {
        hold: Hold,
    },
    HoldStatusChanged {
        id: Ulid,
        status: HoldStatus,
        at: Ms,
    },
    HoldExtended {
        id: Ulid,
        expires_at: Ms,
        at: Ms,
    },
    /// Compensation for `HoldCreated`.
    HoldDeleted {
        id: Ulid,
    },
    AllocationCreated {
        allocation: Allocation,
    },
    /// Compensation for `AllocationCreated`.
    AllocationDeleted {
        id: Ulid,
    },
}
