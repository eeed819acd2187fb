use std::collections::{BTreeMap, HashMap};

use ulid::Ulid;

use crate::model::*;

/// Plain, lock-free image of engine state. Built from the WAL at startup and
/// captured from live state for compaction.
#[derive(Debug, Default, Clone, PartialEq)]
pub(super) struct Snapshot {
    pub resources: HashMap<Ulid, Resource>,
    pub ledger: BTreeMap<(Ulid, Day), CapacityRecord>,
    pub blackouts: HashMap<Ulid, Blackout>,
    pub holds: HashMap<Ulid, Hold>,
    pub allocations: HashMap<Ulid, Allocation>,
}

impl Snapshot {
    pub fn from_events(events: &[Event]) -> Self {
        let mut snapshot = Self::default();
        for event in events {
            snapshot.apply(event);
        }
        snapshot
    }

    /// Replay one event. Mirrors what the live write paths do after their WAL append.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::ResourceUpserted { resource } => {
                self.resources.insert(resource.id, resource.clone());
            }
            Event::CapacityInitialized {
                resource_id,
                date,
                max_capacity,
            } => {
                self.ledger
                    .entry((*resource_id, *date))
                    .or_insert_with(|| CapacityRecord::new(*resource_id, *date, *max_capacity));
            }
            Event::CapacityAdjusted {
                resource_id,
                date,
                delta,
            } => {
                if let Some(record) = self.ledger.get_mut(&(*resource_id, *date))
                    && record.apply_delta(*delta).is_none()
                {
                    tracing::warn!("replay: skipping out-of-range delta {delta} on {resource_id}/{date}");
                }
            }
            Event::CapacitySnapshot { record } => {
                self.ledger
                    .insert((record.resource_id, record.date), record.clone());
            }
            Event::BlackoutAdded { blackout } => {
                self.blackouts.insert(blackout.id, blackout.clone());
            }
            Event::BlackoutRemoved { id } => {
                self.blackouts.remove(id);
            }
            Event::HoldCreated { hold } => {
                self.holds.insert(hold.id, hold.clone());
            }
            Event::HoldStatusChanged { id, status, at } => {
                if let Some(hold) = self.holds.get_mut(id) {
                    hold.set_status(*status, *at);
                }
            }
            Event::HoldExtended { id, expires_at, at } => {
                if let Some(hold) = self.holds.get_mut(id) {
                    hold.expires_at = *expires_at;
                    hold.updated_at = *at;
                }
            }
            Event::HoldDeleted { id } => {
                self.holds.remove(id);
            }
            Event::AllocationCreated { allocation } => {
                self.allocations.insert(allocation.id, allocation.clone());
            }
            Event::AllocationDeleted { id } => {
                self.allocations.remove(id);
            }
        }
    }

    /// Minimal event sequence that recreates this state, in a stable order.
    pub fn into_events(self) -> Vec<Event> {
        let mut events = Vec::with_capacity(
            self.resources.len()
                + self.ledger.len()
                + self.blackouts.len()
                + self.holds.len()
                + self.allocations.len(),
        );

        let mut resources: Vec<_> = self.resources.into_values().collect();
        resources.sort_by_key(|r| r.id);
        events.extend(resources.into_iter().map(|resource| Event::ResourceUpserted { resource }));

        events.extend(
            self.ledger
                .into_values()
                .map(|record| Event::CapacitySnapshot { record }),
        );

        let mut blackouts: Vec<_> = self.blackouts.into_values().collect();
        blackouts.sort_by_key(|b| b.id);
        events.extend(blackouts.into_iter().map(|blackout| Event::BlackoutAdded { blackout }));

        let mut holds: Vec<_> = self.holds.into_values().collect();
        holds.sort_by_key(|h| h.id);
        events.extend(holds.into_iter().map(|hold| Event::HoldCreated { hold }));

        let mut allocations: Vec<_> = self.allocations.into_values().collect();
        allocations.sort_by_key(|a| a.id);
        events.extend(
            allocations
                .into_iter()
                .map(|allocation| Event::AllocationCreated { allocation }),
        );

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day() -> Day {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    fn hold(resource_id: Ulid, quantity: u32) -> Hold {
        Hold {
            id: Ulid::new(),
            resource_id,
            date: day(),
            quantity,
            customer: Some("a@example.com".into()),
            expires_at: 1_000,
            idempotency_token: date_token("t", day()),
            status: HoldStatus::Active,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn reinitializing_a_row_keeps_its_counters() {
        let rid = Ulid::new();
        let snapshot = Snapshot::from_events(&[
            Event::CapacityInitialized {
                resource_id: rid,
                date: day(),
                max_capacity: 10,
            },
            Event::CapacityAdjusted {
                resource_id: rid,
                date: day(),
                delta: -4,
            },
            Event::CapacityInitialized {
                resource_id: rid,
                date: day(),
                max_capacity: 50,
            },
        ]);
        let row = &snapshot.ledger[&(rid, day())];
        assert_eq!(row.max_capacity, 10);
        assert_eq!(row.available_capacity, 6);
    }

    #[test]
    fn compensated_create_replays_to_nothing() {
        let rid = Ulid::new();
        let h = hold(rid, 3);
        let snapshot = Snapshot::from_events(&[
            Event::CapacityInitialized {
                resource_id: rid,
                date: day(),
                max_capacity: 5,
            },
            Event::CapacityAdjusted {
                resource_id: rid,
                date: day(),
                delta: -3,
            },
            Event::HoldCreated { hold: h.clone() },
            Event::HoldDeleted { id: h.id },
            Event::CapacityAdjusted {
                resource_id: rid,
                date: day(),
                delta: 3,
            },
        ]);
        assert!(snapshot.holds.is_empty());
        assert_eq!(snapshot.ledger[&(rid, day())].available_capacity, 5);
    }

    #[test]
    fn status_and_extension_apply_to_existing_hold() {
        let rid = Ulid::new();
        let h = hold(rid, 1);
        let snapshot = Snapshot::from_events(&[
            Event::HoldCreated { hold: h.clone() },
            Event::HoldExtended {
                id: h.id,
                expires_at: 9_000,
                at: 50,
            },
            Event::HoldStatusChanged {
                id: h.id,
                status: HoldStatus::Confirmed,
                at: 60,
            },
        ]);
        let replayed = &snapshot.holds[&h.id];
        assert_eq!(replayed.expires_at, 9_000);
        assert_eq!(replayed.status, HoldStatus::Confirmed);
        assert_eq!(replayed.updated_at, 60);
    }

    #[test]
    fn into_events_rebuilds_identical_state() {
        let rid = Ulid::new();
        let h = hold(rid, 2);
        let original = Snapshot::from_events(&[
            Event::ResourceUpserted {
                resource: Resource {
                    id: rid,
                    kind: ResourceType::Tour,
                    name: "Reef tour".into(),
                    description: None,
                    attributes: Default::default(),
                    active: true,
                    deleted_at: None,
                },
            },
            Event::CapacityInitialized {
                resource_id: rid,
                date: day(),
                max_capacity: 12,
            },
            Event::CapacityAdjusted {
                resource_id: rid,
                date: day(),
                delta: -2,
            },
            Event::HoldCreated { hold: h.clone() },
            Event::HoldStatusChanged {
                id: h.id,
                status: HoldStatus::Confirmed,
                at: 5,
            },
            Event::AllocationCreated {
                allocation: Allocation {
                    id: Ulid::new(),
                    hold_id: h.id,
                    resource_id: rid,
                    date: day(),
                    quantity: 2,
                    order_id: "order_1".into(),
                    line_item_id: "item_1".into(),
                    created_at: 5,
                },
            },
        ]);

        let events = Snapshot::from_events(&[]).into_events();
        assert!(events.is_empty());

        let compacted = Snapshot::from_events(&original.clone().into_events());
        assert_eq!(compacted, original);
    }
}
