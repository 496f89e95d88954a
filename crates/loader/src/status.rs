//! Compliance status → repository copy status table
//!
//! Only the non-compliant rows are built in. Every other combination comes
//! from configuration; a combination nobody configured is reported as
//! unmapped and leaves repository copies alone.

use crate::record::HarvestedRecord;
use compliance_common::config::StatusMappingEntry;
use compliance_common::models::{ComplianceStatus, CopyStatus};
use std::collections::HashMap;

/// What to do with the repository copy for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDecision {
    /// No copy is created or changed
    NoCopy,
    /// Create or update the copy with this status
    Copy(CopyStatus),
    /// Nobody configured this combination
    Unmapped,
}

#[derive(Debug, Clone)]
pub struct StatusMapping {
    table: HashMap<(ComplianceStatus, bool), Option<CopyStatus>>,
}

impl StatusMapping {
    /// Non-compliant without an identifier: no copy.
    /// Non-compliant with an identifier: the copy is stalled.
    pub fn builtin() -> Self {
        let mut table = HashMap::new();
        table.insert((ComplianceStatus::NonCompliant, false), None);
        table.insert((ComplianceStatus::NonCompliant, true), Some(CopyStatus::Stalled));
        Self { table }
    }

    /// Built-in rows plus configured ones; configured rows win
    pub fn with_entries(entries: &[StatusMappingEntry]) -> Self {
        let mut mapping = Self::builtin();
        for entry in entries {
            mapping
                .table
                .insert((entry.status, entry.repository_id), entry.copy_status);
        }
        mapping
    }

    pub fn decide(&self, record: &HarvestedRecord) -> CopyDecision {
        let has_identifier = record.repository_id().is_some();
        match self.table.get(&(record.status, has_identifier)) {
            Some(Some(status)) => CopyDecision::Copy(*status),
            Some(None) => CopyDecision::NoCopy,
            None => CopyDecision::Unmapped,
        }
    }
}

impl Default for StatusMapping {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: ComplianceStatus, repository_id: Option<&str>) -> HarvestedRecord {
        let mut record = HarvestedRecord::new(status, "9999999999", "R01 AB123456");
        record.repository_id = repository_id.map(str::to_string);
        record
    }

    #[test]
    fn test_builtin_non_compliant_rows() {
        let mapping = StatusMapping::builtin();
        assert_eq!(
            mapping.decide(&record(ComplianceStatus::NonCompliant, None)),
            CopyDecision::NoCopy
        );
        assert_eq!(
            mapping.decide(&record(ComplianceStatus::NonCompliant, Some("NIHMS987654321"))),
            CopyDecision::Copy(CopyStatus::Stalled)
        );
    }

    #[test]
    fn test_other_statuses_unmapped_by_default() {
        let mapping = StatusMapping::builtin();
        assert_eq!(
            mapping.decide(&record(ComplianceStatus::Compliant, Some("NIHMS1"))),
            CopyDecision::Unmapped
        );
        assert_eq!(
            mapping.decide(&record(ComplianceStatus::InProcess, None)),
            CopyDecision::Unmapped
        );
    }

    #[test]
    fn test_configured_rows_extend_and_override() {
        let mapping = StatusMapping::with_entries(&[
            StatusMappingEntry {
                status: ComplianceStatus::Compliant,
                repository_id: true,
                copy_status: Some(CopyStatus::Complete),
            },
            StatusMappingEntry {
                status: ComplianceStatus::NonCompliant,
                repository_id: true,
                copy_status: Some(CopyStatus::Rejected),
            },
        ]);
        assert_eq!(
            mapping.decide(&record(ComplianceStatus::Compliant, Some("NIHMS1"))),
            CopyDecision::Copy(CopyStatus::Complete)
        );
        assert_eq!(
            mapping.decide(&record(ComplianceStatus::NonCompliant, Some("NIHMS1"))),
            CopyDecision::Copy(CopyStatus::Rejected)
        );
    }
}
