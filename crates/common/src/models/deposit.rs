//! Deposit entity
//!
//! Owned by the deposit service. The loader only ever sets `repository_copy`.

use super::{DepositStatus, EntityId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,

    pub submission: EntityId,

    pub repository: EntityId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_copy: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_status: Option<DepositStatus>,
}

impl Deposit {
    pub(crate) fn values_eq(&self, other: &Self) -> bool {
        self.submission == other.submission
            && self.repository == other.repository
            && self.repository_copy == other.repository_copy
            && self.deposit_status == other.deposit_status
    }
}
