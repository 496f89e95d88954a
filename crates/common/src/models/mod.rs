//! Repository entity models
//!
//! Entities held by the remote metadata repository. Every entity is
//! identified by an opaque `EntityId` assigned by the repository on creation.

mod deposit;
mod grant;
mod journal;
mod publication;
mod repository_copy;
mod status;
mod submission;

pub use deposit::Deposit;
pub use grant::Grant;
pub use journal::Journal;
pub use publication::Publication;
pub use repository_copy::RepositoryCopy;
pub use status::{ComplianceStatus, CopyStatus, DepositStatus};
pub use submission::{Submission, SubmissionSource};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute names as they appear in the repository's search index
pub mod fields {
    pub const ID: &str = "@id";
    pub const PMID: &str = "pmid";
    pub const DOI: &str = "doi";
    pub const AWARD_NUMBER: &str = "awardNumber";
    pub const PUBLICATION: &str = "publication";
    pub const SUBMITTER: &str = "submitter";
    pub const REPOSITORY: &str = "repository";
    pub const REPOSITORIES: &str = "repositories";
    pub const SUBMISSION: &str = "submission";
    pub const EXTERNAL_IDS: &str = "externalIds";
    pub const ISSNS: &str = "issns";
}

/// Opaque identifier assigned by the repository
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Entity types known to the repository
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Publication,
    Grant,
    Submission,
    RepositoryCopy,
    Deposit,
    Journal,
}

impl EntityKind {
    /// Type name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Publication => "Publication",
            EntityKind::Grant => "Grant",
            EntityKind::Submission => "Submission",
            EntityKind::RepositoryCopy => "RepositoryCopy",
            EntityKind::Deposit => "Deposit",
            EntityKind::Journal => "Journal",
        }
    }

    /// Container path segment on the repository
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Publication => "publications",
            EntityKind::Grant => "grants",
            EntityKind::Submission => "submissions",
            EntityKind::RepositoryCopy => "repositoryCopies",
            EntityKind::Deposit => "deposits",
            EntityKind::Journal => "journals",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Any entity, as exchanged with the gateway
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    Publication(Publication),
    Grant(Grant),
    Submission(Submission),
    RepositoryCopy(RepositoryCopy),
    Deposit(Deposit),
    Journal(Journal),
}

impl Resource {
    pub fn kind(&self) -> EntityKind {
        match self {
            Resource::Publication(_) => EntityKind::Publication,
            Resource::Grant(_) => EntityKind::Grant,
            Resource::Submission(_) => EntityKind::Submission,
            Resource::RepositoryCopy(_) => EntityKind::RepositoryCopy,
            Resource::Deposit(_) => EntityKind::Deposit,
            Resource::Journal(_) => EntityKind::Journal,
        }
    }

    pub fn id(&self) -> Option<&EntityId> {
        match self {
            Resource::Publication(e) => e.id.as_ref(),
            Resource::Grant(e) => e.id.as_ref(),
            Resource::Submission(e) => e.id.as_ref(),
            Resource::RepositoryCopy(e) => e.id.as_ref(),
            Resource::Deposit(e) => e.id.as_ref(),
            Resource::Journal(e) => e.id.as_ref(),
        }
    }

    pub fn set_id(&mut self, id: EntityId) {
        let slot = match self {
            Resource::Publication(e) => &mut e.id,
            Resource::Grant(e) => &mut e.id,
            Resource::Submission(e) => &mut e.id,
            Resource::RepositoryCopy(e) => &mut e.id,
            Resource::Deposit(e) => &mut e.id,
            Resource::Journal(e) => &mut e.id,
        };
        *slot = Some(id);
    }

    /// JSON body as stored by the repository
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Resource::Publication(e) => serde_json::to_value(e),
            Resource::Grant(e) => serde_json::to_value(e),
            Resource::Submission(e) => serde_json::to_value(e),
            Resource::RepositoryCopy(e) => serde_json::to_value(e),
            Resource::Deposit(e) => serde_json::to_value(e),
            Resource::Journal(e) => serde_json::to_value(e),
        }
    }

    /// Parse a JSON body of the given kind
    pub fn from_value(kind: EntityKind, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            EntityKind::Publication => Resource::Publication(serde_json::from_value(value)?),
            EntityKind::Grant => Resource::Grant(serde_json::from_value(value)?),
            EntityKind::Submission => Resource::Submission(serde_json::from_value(value)?),
            EntityKind::RepositoryCopy => Resource::RepositoryCopy(serde_json::from_value(value)?),
            EntityKind::Deposit => Resource::Deposit(serde_json::from_value(value)?),
            EntityKind::Journal => Resource::Journal(serde_json::from_value(value)?),
        })
    }
}

/// Typed view over `Resource`
pub trait Entity: Clone + Send + Sync + Sized + 'static {
    const KIND: EntityKind;

    fn id(&self) -> Option<&EntityId>;

    fn into_resource(self) -> Resource;

    fn from_resource(resource: Resource) -> Option<Self>;

    /// Compares every field except the identifier. Drives the
    /// "skip the write when nothing changed" rule.
    fn has_same_values(&self, other: &Self) -> bool;
}

macro_rules! impl_entity {
    ($ty:ident) => {
        impl Entity for $ty {
            const KIND: EntityKind = EntityKind::$ty;

            fn id(&self) -> Option<&EntityId> {
                self.id.as_ref()
            }

            fn into_resource(self) -> Resource {
                Resource::$ty(self)
            }

            fn from_resource(resource: Resource) -> Option<Self> {
                match resource {
                    Resource::$ty(e) => Some(e),
                    _ => None,
                }
            }

            fn has_same_values(&self, other: &Self) -> bool {
                self.values_eq(other)
            }
        }
    };
}

impl_entity!(Publication);
impl_entity!(Grant);
impl_entity!(Submission);
impl_entity!(RepositoryCopy);
impl_entity!(Deposit);
impl_entity!(Journal);

/// Order-insensitive comparison for list fields with set semantics
pub(crate) fn same_members<T: Ord + Clone>(a: &[T], b: &[T]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}
