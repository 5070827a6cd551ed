//! Domain entities that drive invalidation and warming.

use crate::key::CacheKey;
use crate::VistaResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Entity kinds the cache knows how to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Restaurant,
    Menu,
    MenuItem,
    Order,
    Employee,
    User,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        Self::Restaurant,
        Self::Menu,
        Self::MenuItem,
        Self::Order,
        Self::Employee,
        Self::User,
    ];

    /// Key domain (first segment) for this kind.
    pub fn domain(self) -> &'static str {
        match self {
            Self::Restaurant => "restaurant",
            Self::Menu => "menu",
            Self::MenuItem => "menuitem",
            Self::Order => "order",
            Self::Employee => "employee",
            Self::User => "user",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.domain())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "restaurant" => Ok(Self::Restaurant),
            "menu" => Ok(Self::Menu),
            "menuitem" | "menu_item" => Ok(Self::MenuItem),
            "order" => Ok(Self::Order),
            "employee" => Ok(Self::Employee),
            "user" => Ok(Self::User),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}

/// Reference to a single entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl fmt::Display) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }

    /// Bare entity key, e.g. `restaurant:7`.
    pub fn key(&self) -> VistaResult<CacheKey> {
        CacheKey::entity(self.kind.domain(), &self.id)
    }

    /// Key of one of this entity's views, e.g. `restaurant:7:dashboard`.
    pub fn view_key(&self, view: &str) -> VistaResult<CacheKey> {
        CacheKey::builder(self.kind.domain())
            .id(&self.id)
            .view(view)
            .build()
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Kind of write that happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityOperation {
    Create,
    Update,
    Destroy,
}

/// A domain write, as reported by the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityChange {
    pub entity: EntityRef,
    pub operation: EntityOperation,
    /// Attributes touched by an update. Empty means unknown.
    pub changed_fields: BTreeSet<String>,
    /// Owning entity id (restaurant for menus and orders, menu for items).
    pub owner: Option<String>,
}

impl EntityChange {
    pub fn new(kind: EntityKind, id: impl fmt::Display, operation: EntityOperation) -> Self {
        Self {
            entity: EntityRef::new(kind, id),
            operation,
            changed_fields: BTreeSet::new(),
            owner: None,
        }
    }

    pub fn created(kind: EntityKind, id: impl fmt::Display) -> Self {
        Self::new(kind, id, EntityOperation::Create)
    }

    pub fn updated(kind: EntityKind, id: impl fmt::Display) -> Self {
        Self::new(kind, id, EntityOperation::Update)
    }

    pub fn destroyed(kind: EntityKind, id: impl fmt::Display) -> Self {
        Self::new(kind, id, EntityOperation::Destroy)
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.changed_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn owned_by(mut self, owner: impl fmt::Display) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    /// An update whose known fields are all within `minor`.
    pub fn only_touches(&self, minor: &[&str]) -> bool {
        self.operation == EntityOperation::Update
            && !self.changed_fields.is_empty()
            && self
                .changed_fields
                .iter()
                .all(|f| minor.contains(&f.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_keys() {
        let r = EntityRef::new(EntityKind::Restaurant, 7);
        assert_eq!(r.key().unwrap().as_str(), "restaurant:7");
        assert_eq!(r.view_key("dashboard").unwrap().as_str(), "restaurant:7:dashboard");
        assert_eq!(r.to_string(), "restaurant#7");
    }

    #[test]
    fn test_only_touches() {
        let minor = ["updated_at", "phone"];
        let change = EntityChange::updated(EntityKind::Restaurant, 7).with_fields(["phone"]);
        assert!(change.only_touches(&minor));

        let change = EntityChange::updated(EntityKind::Restaurant, 7).with_fields(["phone", "name"]);
        assert!(!change.only_touches(&minor));

        // Unknown field set is never treated as minor.
        assert!(!EntityChange::updated(EntityKind::Restaurant, 7).only_touches(&minor));
        assert!(!EntityChange::destroyed(EntityKind::Restaurant, 7)
            .with_fields(["phone"])
            .only_touches(&minor));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("menu_item".parse::<EntityKind>().unwrap(), EntityKind::MenuItem);
        assert_eq!(EntityKind::MenuItem.domain(), "menuitem");
        assert!("invoice".parse::<EntityKind>().is_err());
    }
}
