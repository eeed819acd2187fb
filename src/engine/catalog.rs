use std::collections::BTreeMap;

use chrono::Days;
use serde::Deserialize;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, Page};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewResource {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Per-day capacity for the onboarding window, starting today.
    #[serde(default)]
    pub initial_capacity: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourcePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub attributes: Option<BTreeMap<String, String>>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceFilter {
    #[serde(rename = "type")]
    pub kind: Option<ResourceType>,
    pub active: Option<bool>,
    #[serde(default)]
    pub include_deleted: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBlackout {
    pub resource_id: Ulid,
    pub start_date: Day,
    pub end_date: Day,
    #[serde(default)]
    pub reason: Option<String>,
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::invalid("name is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_details(
    description: Option<&str>,
    attributes: Option<&BTreeMap<String, String>>,
) -> Result<(), EngineError> {
    if description.is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    if let Some(attributes) = attributes {
        if attributes.len() > MAX_ATTRIBUTES {
            return Err(EngineError::LimitExceeded("too many attributes"));
        }
        if attributes
            .iter()
            .any(|(k, v)| k.len() > MAX_ATTRIBUTE_LEN || v.len() > MAX_ATTRIBUTE_LEN)
        {
            return Err(EngineError::LimitExceeded("attribute too long"));
        }
    }
    Ok(())
}

impl Engine {
    pub async fn create_resource(&self, new: NewResource) -> Result<Resource, EngineError> {
        validate_name(&new.name)?;
        validate_details(new.description.as_deref(), Some(&new.attributes))?;
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }

        let _gate = self.commit_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        let resource = Resource {
            id: Ulid::new(),
            kind: new.kind,
            name: new.name.trim().to_string(),
            description: new.description,
            attributes: new.attributes,
            active: new.active,
            deleted_at: None,
        };
        self.wal_append(&Event::ResourceUpserted {
            resource: resource.clone(),
        })
        .await?;
        self.resources.insert(resource.id, resource.clone());
        info!("resource {} created: {:?} {:?}", resource.id, resource.kind, resource.name);

        if let Some(per_day) = new.initial_capacity {
            let today = self.today();
            let window = u64::from(self.settings.capacity_window_days.max(1));
            let dates: Vec<Day> = (0..window)
                .filter_map(|offset| today.checked_add_days(Days::new(offset)))
                .collect();
            self.init_rows(resource.id, &dates, per_day).await?;
        }
        Ok(resource)
    }

    /// Read-modify-write of a live resource under the catalog lock.
    async fn modify_resource(
        &self,
        id: Ulid,
        change: impl FnOnce(&mut Resource) -> Result<(), EngineError>,
    ) -> Result<Resource, EngineError> {
        let _gate = self.commit_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        let mut resource = self
            .resources
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| EngineError::not_found("resource", id))?;
        change(&mut resource)?;
        self.wal_append(&Event::ResourceUpserted {
            resource: resource.clone(),
        })
        .await?;
        self.resources.insert(id, resource.clone());
        Ok(resource)
    }

    pub async fn update_resource(
        &self,
        id: Ulid,
        patch: ResourcePatch,
    ) -> Result<Resource, EngineError> {
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        validate_details(patch.description.as_deref(), patch.attributes.as_ref())?;
        self.modify_resource(id, |resource| {
            if resource.deleted_at.is_some() {
                return Err(EngineError::not_found("resource", id));
            }
            if let Some(name) = patch.name {
                resource.name = name.trim().to_string();
            }
            if let Some(description) = patch.description {
                resource.description = Some(description);
            }
            if let Some(attributes) = patch.attributes {
                resource.attributes = attributes;
            }
            if let Some(active) = patch.active {
                resource.active = active;
            }
            Ok(())
        })
        .await
    }

    /// Soft delete. Holds and allocations already on the resource are untouched.
    pub async fn delete_resource(&self, id: Ulid) -> Result<Resource, EngineError> {
        let now = self.now();
        let resource = self
            .modify_resource(id, |resource| {
                if resource.deleted_at.is_some() {
                    return Err(EngineError::not_found("resource", id));
                }
                resource.deleted_at = Some(now);
                Ok(())
            })
            .await?;
        info!("resource {id} deleted");
        Ok(resource)
    }

    pub async fn restore_resource(&self, id: Ulid) -> Result<Resource, EngineError> {
        let resource = self
            .modify_resource(id, |resource| {
                resource.deleted_at = None;
                Ok(())
            })
            .await?;
        info!("resource {id} restored");
        Ok(resource)
    }

    pub fn get_resource(&self, id: Ulid) -> Result<Resource, EngineError> {
        self.live_resource(id)
    }

    pub fn list_resources(&self, filter: &ResourceFilter) -> Page<Resource> {
        let mut resources: Vec<Resource> = self
            .resources
            .iter()
            .filter(|r| filter.include_deleted || r.deleted_at.is_none())
            .filter(|r| filter.kind.is_none_or(|k| r.kind == k))
            .filter(|r| filter.active.is_none_or(|a| r.active == a))
            .map(|r| r.value().clone())
            .collect();
        resources.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Page::slice(resources, filter.limit, filter.offset)
    }

    pub async fn add_blackout(&self, new: NewBlackout) -> Result<Blackout, EngineError> {
        if new.end_date < new.start_date {
            return Err(EngineError::invalid("end_date must not be before start_date"));
        }
        let reason = new
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_BLACKOUT_REASON.to_string());
        if reason.len() > MAX_BLACKOUT_REASON_LEN {
            return Err(EngineError::LimitExceeded("blackout reason too long"));
        }

        let _gate = self.commit_gate.read().await;
        self.live_resource(new.resource_id)?;
        let blackout = Blackout {
            id: Ulid::new(),
            resource_id: new.resource_id,
            start_date: new.start_date,
            end_date: new.end_date,
            reason,
        };
        self.wal_append(&Event::BlackoutAdded {
            blackout: blackout.clone(),
        })
        .await?;
        self.blackouts.insert(blackout.id, blackout.clone());
        info!(
            "blackout {} on {} from {} to {}",
            blackout.id, blackout.resource_id, blackout.start_date, blackout.end_date
        );
        Ok(blackout)
    }

    pub async fn remove_blackout(&self, id: Ulid) -> Result<Blackout, EngineError> {
        let _gate = self.commit_gate.read().await;
        let blackout = self
            .blackouts
            .get(&id)
            .map(|b| b.value().clone())
            .ok_or_else(|| EngineError::not_found("blackout", id))?;
        self.wal_append(&Event::BlackoutRemoved { id }).await?;
        self.blackouts.remove(&id);
        Ok(blackout)
    }

    /// Blackouts overlapping `[from, to]` (either end open), start-date ordered.
    pub fn list_blackouts(
        &self,
        resource_id: Option<Ulid>,
        from: Option<Day>,
        to: Option<Day>,
    ) -> Vec<Blackout> {
        let mut out: Vec<Blackout> = self
            .blackouts
            .iter()
            .filter(|b| resource_id.is_none_or(|id| b.resource_id == id))
            .filter(|b| b.overlaps(from.unwrap_or(Day::MIN), to.unwrap_or(Day::MAX)))
            .map(|b| b.value().clone())
            .collect();
        out.sort_by_key(|b| (b.start_date, b.id));
        out
    }
}
