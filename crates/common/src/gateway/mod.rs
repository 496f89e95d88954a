//! Repository gateway
//!
//! Thin facade over the remote metadata repository's create, read, update and
//! find-by-attribute operations. Searches are point-in-time against an index
//! that may lag writes made moments earlier by this same process.

mod http;
mod memory;

pub use http::HttpGateway;
pub use memory::{InMemoryGateway, IndexLag};

use crate::errors::{AppError, Result};
use crate::models::{Entity, EntityId, EntityKind, Resource};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;

/// Operations the loader needs from the remote repository
#[async_trait]
pub trait RepositoryGateway: Send + Sync {
    /// Create a resource and return the identifier the repository assigned
    async fn create(&self, resource: &Resource) -> Result<EntityId>;

    /// Read a resource, `None` if the identifier does not exist
    async fn read(&self, id: &EntityId, kind: EntityKind) -> Result<Option<Resource>>;

    /// Replace a resource; it must carry its identifier
    async fn update(&self, resource: &Resource) -> Result<()>;

    /// Identifiers of every resource of `kind` matching all attributes.
    /// List-valued fields match when they contain the value.
    async fn find_all_by_attributes(
        &self,
        kind: EntityKind,
        attributes: &[(&str, Value)],
    ) -> Result<HashSet<EntityId>>;

    async fn find_all_by_attribute(
        &self,
        kind: EntityKind,
        field: &str,
        value: &Value,
    ) -> Result<HashSet<EntityId>> {
        self.find_all_by_attributes(kind, &[(field, value.clone())])
            .await
    }

    /// The single match for an attribute. More than one match breaks the
    /// uniqueness the caller relies on and is reported as corruption.
    async fn find_one_by_attribute(
        &self,
        kind: EntityKind,
        field: &str,
        value: &Value,
    ) -> Result<Option<EntityId>> {
        let matches = self.find_all_by_attribute(kind, field, value).await?;
        if matches.len() > 1 {
            return Err(AppError::DataCorruption {
                resource_type: kind.name().to_string(),
                key: format!("{}={}", field, value),
                count: matches.len(),
            });
        }
        Ok(matches.into_iter().next())
    }
}

/// Typed helpers on top of any gateway
#[async_trait]
pub trait GatewayExt: RepositoryGateway {
    /// Read and downcast; `None` if the identifier does not exist
    async fn read_entity<E: Entity>(&self, id: &EntityId) -> Result<Option<E>> {
        match self.read(id, E::KIND).await? {
            None => Ok(None),
            Some(resource) => {
                let kind = resource.kind();
                E::from_resource(resource).map(Some).ok_or_else(|| AppError::Internal {
                    message: format!("{} returned a {} when a {} was requested", id, kind, E::KIND),
                })
            }
        }
    }

    /// Read an entity that must exist
    async fn fetch_entity<E: Entity>(&self, id: &EntityId) -> Result<E> {
        self.read_entity(id).await?.ok_or_else(|| AppError::NotFound {
            resource_type: E::KIND.name().to_string(),
            id: id.to_string(),
        })
    }

    async fn create_entity<E: Entity>(&self, entity: &E) -> Result<EntityId> {
        self.create(&entity.clone().into_resource()).await
    }

    /// Write the entity only when its values differ from the stored copy.
    /// Returns whether a write happened.
    async fn update_if_changed<E: Entity>(&self, entity: &E) -> Result<bool> {
        let id = entity.id().ok_or_else(|| {
            AppError::invalid_argument(format!("{} cannot be updated without an id", E::KIND))
        })?;
        let current: E = self.fetch_entity(id).await?;
        if current.has_same_values(entity) {
            return Ok(false);
        }
        self.update(&entity.clone().into_resource()).await?;
        Ok(true)
    }
}

impl<G: RepositoryGateway + ?Sized> GatewayExt for G {}

/// Wraps a string attribute value
pub fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

/// Wraps an identifier attribute value
pub fn reference(id: &EntityId) -> Value {
    Value::String(id.as_str().to_string())
}
