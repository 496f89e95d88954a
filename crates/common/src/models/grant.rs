//! Grant entity (read-only for the loader)

use super::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,

    pub award_number: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    /// Principal investigator, the user who submits on behalf of the grant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pi: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
}

impl Grant {
    pub(crate) fn values_eq(&self, other: &Self) -> bool {
        self.award_number == other.award_number
            && self.project_name == other.project_name
            && self.pi == other.pi
            && self.start_date == other.start_date
    }
}
