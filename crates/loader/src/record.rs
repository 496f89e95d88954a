//! Harvested compliance record
//!
//! One row of the submission tracking feed, already parsed. The feed's file
//! format is handled upstream.

use chrono::NaiveDate;
use compliance_common::errors::{AppError, Result};
use compliance_common::models::ComplianceStatus;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct HarvestedRecord {
    pub status: ComplianceStatus,

    /// PubMed identifier of the article
    #[validate(length(min = 1, message = "pmid cannot be empty"))]
    pub pmid: String,

    /// Award numbers as written in the feed, spacing variants included
    #[validate(length(min = 1, message = "at least one award number is required"))]
    pub award_numbers: Vec<String>,

    /// Identifier the target repository assigned to the manuscript
    #[serde(default)]
    pub repository_id: Option<String>,

    #[serde(default)]
    pub pmcid: Option<String>,

    #[serde(default)]
    pub file_deposited_date: Option<NaiveDate>,

    #[serde(default)]
    pub initial_approval_date: Option<NaiveDate>,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub doi: Option<String>,

    #[serde(default)]
    pub issue: Option<String>,

    #[serde(default)]
    pub volume: Option<String>,

    #[serde(default)]
    pub issn: Option<String>,
}

/// Blank strings from the feed mean "no value"
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl HarvestedRecord {
    /// A record with only the required fields set
    pub fn new(status: ComplianceStatus, pmid: impl Into<String>, award_number: impl Into<String>) -> Self {
        Self {
            status,
            pmid: pmid.into(),
            award_numbers: vec![award_number.into()],
            repository_id: None,
            pmcid: None,
            file_deposited_date: None,
            initial_approval_date: None,
            title: String::new(),
            doi: None,
            issue: None,
            volume: None,
            issn: None,
        }
    }

    /// Reject records whose natural keys are unusable
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.pmid.trim().is_empty() {
            return Err(AppError::invalid_argument("pmid cannot be blank"));
        }
        if self.award_numbers.iter().any(|a| a.trim().is_empty()) {
            return Err(AppError::invalid_argument("award numbers cannot be blank"));
        }
        Ok(())
    }

    pub fn pmid(&self) -> &str {
        self.pmid.trim()
    }

    pub fn repository_id(&self) -> Option<&str> {
        present(&self.repository_id)
    }

    pub fn pmcid(&self) -> Option<&str> {
        present(&self.pmcid)
    }

    pub fn title(&self) -> Option<&str> {
        Some(self.title.trim()).filter(|t| !t.is_empty())
    }

    pub fn doi(&self) -> Option<&str> {
        present(&self.doi)
    }

    pub fn issue(&self) -> Option<&str> {
        present(&self.issue)
    }

    pub fn volume(&self) -> Option<&str> {
        present(&self.volume)
    }

    pub fn issn(&self) -> Option<&str> {
        present(&self.issn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_common::errors::ErrorClass;

    #[test]
    fn test_blank_optional_fields_are_absent() {
        let mut record = HarvestedRecord::new(ComplianceStatus::NonCompliant, "9999999999", "R01 AB123456");
        record.repository_id = Some("  ".into());
        record.doi = Some("10.1000/a.abcd.1234".into());

        assert_eq!(record.repository_id(), None);
        assert_eq!(record.doi(), Some("10.1000/a.abcd.1234"));
        assert_eq!(record.title(), None);
    }

    #[test]
    fn test_empty_pmid_is_invalid_input() {
        let record = HarvestedRecord::new(ComplianceStatus::Compliant, "", "R01 AB123456");
        let err = record.check().unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidInput);
    }

    #[test]
    fn test_missing_award_numbers_is_invalid_input() {
        let mut record = HarvestedRecord::new(ComplianceStatus::Compliant, "9999999999", "x");
        record.award_numbers.clear();
        assert_eq!(record.check().unwrap_err().class(), ErrorClass::InvalidInput);

        record.award_numbers.push("   ".into());
        assert_eq!(record.check().unwrap_err().class(), ErrorClass::InvalidInput);
    }

    #[test]
    fn test_deserialize_feed_row() {
        let json = serde_json::json!({
            "status": "non_compliant",
            "pmid": "9999999999",
            "award_numbers": ["R01 AB123456"],
            "repository_id": "NIHMS987654321",
            "file_deposited_date": "2017-12-12",
            "initial_approval_date": "2017-12-12",
            "title": "Article A"
        });
        let record: HarvestedRecord = serde_json::from_value(json).unwrap();
        assert!(record.check().is_ok());
        assert_eq!(record.file_deposited_date, NaiveDate::from_ymd_opt(2017, 12, 12));
        assert_eq!(record.repository_id(), Some("NIHMS987654321"));
    }
}
