//! RepositoryCopy entity

use super::{same_members, CopyStatus, EntityId};
use serde::{Deserialize, Serialize};

/// The copy of a publication held by one target repository.
/// At most one exists per (publication, repository).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryCopy {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,

    pub publication: EntityId,

    pub repository: EntityId,

    /// Identifiers assigned by the target repository
    #[serde(default)]
    pub external_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_status: Option<CopyStatus>,
}

impl RepositoryCopy {
    pub fn new(publication: EntityId, repository: EntityId) -> Self {
        Self {
            id: None,
            publication,
            repository,
            external_ids: Vec::new(),
            access_url: None,
            copy_status: None,
        }
    }

    /// Returns true if the identifier was not already present
    pub fn add_external_id(&mut self, external_id: &str) -> bool {
        if self.external_ids.iter().any(|e| e == external_id) {
            return false;
        }
        self.external_ids.push(external_id.to_string());
        true
    }

    pub(crate) fn values_eq(&self, other: &Self) -> bool {
        self.publication == other.publication
            && self.repository == other.repository
            && same_members(&self.external_ids, &other.external_ids)
            && self.access_url == other.access_url
            && self.copy_status == other.copy_status
    }
}
