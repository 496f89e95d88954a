//! Status vocabularies shared by the harvested feed and the repository

use serde::{Deserialize, Serialize};
use std::fmt;

/// Public-access compliance state reported by the submission tracking feed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    NonCompliant,
    InProcess,
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComplianceStatus::Compliant => "compliant",
            ComplianceStatus::NonCompliant => "non_compliant",
            ComplianceStatus::InProcess => "in_process",
        })
    }
}

/// State of a manuscript copy held by a target repository
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    Accepted,
    InProgress,
    Stalled,
    Complete,
    Rejected,
}

/// Transfer state of a deposit, owned by the deposit service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Submitted,
    Accepted,
    Rejected,
    Failed,
}
