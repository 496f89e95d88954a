//! Publication entity

use super::EntityId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Publication {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,

    /// PubMed identifier, the preferred natural key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<EntityId>,
}

impl Publication {
    pub(crate) fn values_eq(&self, other: &Self) -> bool {
        self.doi == other.doi
            && self.pmid == other.pmid
            && self.title == other.title
            && self.issue == other.issue
            && self.volume == other.volume
            && self.journal == other.journal
    }
}
