//! Submission entity
//!
//! One user's intent to deposit one publication into a set of repositories
//! for a set of grants. `grants` and `repositories` are lists on the wire but
//! carry set semantics: no duplicates, order is irrelevant.

use super::{same_members, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which system a submission originated in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionSource {
    /// Created directly in the target system by a user
    Pass,
    /// Created by an ingest pipeline such as this one
    #[default]
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,

    pub publication: EntityId,

    pub submitter: EntityId,

    #[serde(default)]
    pub grants: Vec<EntityId>,

    #[serde(default)]
    pub repositories: Vec<EntityId>,

    #[serde(default)]
    pub submitted: bool,

    #[serde(default)]
    pub source: SubmissionSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_date: Option<DateTime<Utc>>,
}

impl Submission {
    /// A fresh, unsubmitted submission created by this pipeline
    pub fn new(publication: EntityId, submitter: EntityId) -> Self {
        Self {
            id: None,
            publication,
            submitter,
            grants: Vec::new(),
            repositories: Vec::new(),
            submitted: false,
            source: SubmissionSource::Other,
            submitted_date: None,
        }
    }

    pub fn has_grant(&self, grant: &EntityId) -> bool {
        self.grants.contains(grant)
    }

    pub fn has_repository(&self, repository: &EntityId) -> bool {
        self.repositories.contains(repository)
    }

    /// Returns true if the grant was not already present
    pub fn add_grant(&mut self, grant: &EntityId) -> bool {
        if self.has_grant(grant) {
            return false;
        }
        self.grants.push(grant.clone());
        true
    }

    /// Returns true if the repository was not already present
    pub fn add_repository(&mut self, repository: &EntityId) -> bool {
        if self.has_repository(repository) {
            return false;
        }
        self.repositories.push(repository.clone());
        true
    }

    pub(crate) fn values_eq(&self, other: &Self) -> bool {
        self.publication == other.publication
            && self.submitter == other.submitter
            && same_members(&self.grants, &other.grants)
            && same_members(&self.repositories, &other.repositories)
            && self.submitted == other.submitted
            && self.source == other.source
            && self.submitted_date == other.submitted_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Entity;

    #[test]
    fn test_add_grant_is_idempotent() {
        let mut submission = Submission::new("pub:1".into(), "user:55".into());
        assert!(submission.add_grant(&"grant:1".into()));
        assert!(!submission.add_grant(&"grant:1".into()));
        assert_eq!(submission.grants.len(), 1);
    }

    #[test]
    fn test_values_ignore_order_and_identity() {
        let mut a = Submission::new("pub:1".into(), "user:55".into());
        a.add_repository(&"repo:a".into());
        a.add_repository(&"repo:b".into());

        let mut b = a.clone();
        b.id = Some("sub:9".into());
        b.repositories.reverse();
        assert!(a.has_same_values(&b));

        b.submitted = true;
        assert!(!a.has_same_values(&b));
    }

    #[test]
    fn test_defaults_when_fields_missing() {
        let json = serde_json::json!({
            "@id": "sub:1",
            "publication": "pub:1",
            "submitter": "user:55"
        });
        let submission: Submission = serde_json::from_value(json).unwrap();
        assert!(!submission.submitted);
        assert_eq!(submission.source, SubmissionSource::Other);
        assert!(submission.grants.is_empty());
    }
}
