//! Journal entity (read-only for the loader)

use super::{same_members, EntityId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Journal {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_name: Option<String>,

    #[serde(default)]
    pub issns: Vec<String>,
}

impl Journal {
    pub(crate) fn values_eq(&self, other: &Self) -> bool {
        self.journal_name == other.journal_name && same_members(&self.issns, &other.issns)
    }
}
