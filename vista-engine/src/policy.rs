//! Entity change to invalidation request mapping.
//!
//! Small edits to a restaurant or an order patch the one summary view that
//! shows them; anything else cascades from the entity key. Owned entities
//! also refresh their owner's views.

use crate::invalidator::InvalidationRequest;
use vista_core::{EntityChange, EntityKind, EntityRef, VistaResult};

/// Restaurant attributes that only show up on the dashboard.
pub const RESTAURANT_MINOR_FIELDS: &[&str] = &[
    "updated_at",
    "description",
    "image_url",
    "phone",
    "opening_hours",
];

/// Order attributes that only show up on the order summary.
pub const ORDER_MINOR_FIELDS: &[&str] = &["status", "updated_at", "tip"];

fn owner_view(owner: &str, kind: EntityKind, view: &str) -> VistaResult<String> {
    Ok(EntityRef::new(kind, owner).view_key(view)?.into_string())
}

/// Requests to execute, in order, for one entity change.
pub fn requests_for(change: &EntityChange) -> VistaResult<Vec<InvalidationRequest>> {
    let entity = &change.entity;
    let root = entity.key()?.into_string();
    let owner = change.owner.as_deref();
    let mut requests = Vec::new();

    match entity.kind {
        EntityKind::Restaurant => {
            if change.only_touches(RESTAURANT_MINOR_FIELDS) {
                requests.push(InvalidationRequest::update(
                    entity.view_key("dashboard")?.into_string(),
                ));
            } else {
                requests.push(InvalidationRequest::cascade(root));
            }
        }
        EntityKind::Menu => {
            requests.push(InvalidationRequest::cascade(root));
            if let Some(owner) = owner {
                requests.push(InvalidationRequest::update(owner_view(
                    owner,
                    EntityKind::Restaurant,
                    "dashboard",
                )?));
            }
        }
        EntityKind::MenuItem => {
            requests.push(InvalidationRequest::cascade(root));
            if let Some(owner) = owner {
                requests.push(InvalidationRequest::selective(
                    EntityRef::new(EntityKind::Menu, owner).key()?.into_string(),
                ));
            }
        }
        EntityKind::Order => {
            if change.only_touches(ORDER_MINOR_FIELDS) {
                requests.push(InvalidationRequest::update(
                    entity.view_key("summary")?.into_string(),
                ));
            } else {
                requests.push(InvalidationRequest::cascade(root));
            }
            if let Some(owner) = owner {
                requests.push(InvalidationRequest::update(owner_view(
                    owner,
                    EntityKind::Restaurant,
                    "dashboard",
                )?));
                requests.push(InvalidationRequest::selective(owner_view(
                    owner,
                    EntityKind::Restaurant,
                    "orders",
                )?));
            }
        }
        EntityKind::Employee => {
            requests.push(InvalidationRequest::cascade(root));
            if let Some(owner) = owner {
                requests.push(InvalidationRequest::update(owner_view(
                    owner,
                    EntityKind::Restaurant,
                    "dashboard",
                )?));
            }
        }
        EntityKind::User => requests.push(InvalidationRequest::cascade(root)),
    }
    Ok(requests)
}
