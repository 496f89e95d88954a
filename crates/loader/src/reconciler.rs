//! Record reconciliation
//!
//! Brings the repository in line with one harvested record:
//! 1. resolve every award number to its most recent grant
//! 2. find or create the publication, refreshing bibliographic fields
//! 3. find or create the submitter's submission and grow its grant and
//!    repository sets
//! 4. apply the status table to the target repository's copy
//! 5. point the submission's deposit at that copy
//!
//! Every step is compare-then-write, so reconciling the same record twice
//! performs no writes the second time. Steps run one after another; a
//! failure leaves earlier writes in place and a later run picks up from them.

use crate::record::HarvestedRecord;
use crate::resolver::EntityResolver;
use crate::status::{CopyDecision, StatusMapping};
use compliance_common::cache::{KeyedLocks, LookupCaches};
use compliance_common::config::AppConfig;
use compliance_common::errors::{AppError, ErrorClass, Result};
use compliance_common::gateway::RepositoryGateway;
use compliance_common::metrics;
use compliance_common::models::{
    EntityId, Grant, Journal, Publication, RepositoryCopy, Submission,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// What happened to one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Created,
    Updated,
    Unchanged,
}

impl Change {
    fn from_written(written: bool) -> Self {
        if written {
            Change::Updated
        } else {
            Change::Unchanged
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityChange {
    pub id: EntityId,
    pub change: Change,
}

impl EntityChange {
    fn new(id: EntityId, change: Change) -> Self {
        Self { id, change }
    }
}

/// Report of one reconciled record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub pmid: String,
    pub grants: Vec<EntityId>,
    pub publication: EntityChange,
    pub submission: EntityChange,
    /// `None` when the status table produced no copy
    pub repository_copy: Option<EntityChange>,
    /// `None` when no copy was touched or no deposit exists yet
    pub deposit: Option<EntityChange>,
}

impl ReconcileOutcome {
    fn changes(&self) -> impl Iterator<Item = &EntityChange> {
        [Some(&self.publication), Some(&self.submission)]
            .into_iter()
            .chain([self.repository_copy.as_ref(), self.deposit.as_ref()])
            .flatten()
    }

    /// Number of creates and updates performed
    pub fn writes(&self) -> usize {
        self.changes()
            .filter(|c| c.change != Change::Unchanged)
            .count()
    }

    pub fn is_unchanged(&self) -> bool {
        self.writes() == 0
    }
}

/// Reconciles harvested records against the repository
pub struct Reconciler {
    resolver: EntityResolver,
    mapping: StatusMapping,
    locks: KeyedLocks,
}

impl Reconciler {
    pub fn new(resolver: EntityResolver, mapping: StatusMapping) -> Self {
        Self {
            resolver,
            mapping,
            locks: KeyedLocks::new(),
        }
    }

    /// Resolver, caches and status table as configured
    pub fn from_config(gateway: Arc<dyn RepositoryGateway>, config: &AppConfig) -> Self {
        let resolver = EntityResolver::from_config(gateway, Arc::new(LookupCaches::new()), config);
        Self::new(
            resolver,
            StatusMapping::with_entries(&config.reconcile.status_mapping),
        )
    }

    /// Drop cached lookups, e.g. between batches
    pub async fn clear_caches(&self) {
        self.resolver.clear_caches().await;
        self.prune_locks().await;
    }

    /// Drop per-PMID locks no record is holding or waiting on
    pub async fn prune_locks(&self) {
        self.locks.prune().await;
    }

    #[cfg(test)]
    pub(crate) async fn lock_count(&self) -> usize {
        self.locks.len().await
    }

    /// Reconcile one record.
    ///
    /// Records sharing a PMID are serialized; others run concurrently.
    #[instrument(skip(self, record), fields(pmid = %record.pmid, status = %record.status))]
    pub async fn reconcile(&self, record: &HarvestedRecord) -> Result<ReconcileOutcome> {
        record.check()?;

        let _guard = self.locks.lock(record.pmid()).await;
        let start = Instant::now();
        let result = self.reconcile_locked(record).await;

        let label = match &result {
            Ok(outcome) if outcome.is_unchanged() => "unchanged",
            Ok(_) => "changed",
            Err(_) => "failed",
        };
        metrics::record_reconcile(start.elapsed().as_secs_f64(), label);

        match &result {
            Ok(outcome) => info!(writes = outcome.writes(), "Record reconciled"),
            Err(e) if e.class() == ErrorClass::DataCorruption => {
                error!(error = %e, code = e.code().as_code(), "Record failed on corrupt data")
            }
            Err(e) => warn!(error = %e, code = e.code().as_code(), "Record failed"),
        }
        result
    }

    async fn reconcile_locked(&self, record: &HarvestedRecord) -> Result<ReconcileOutcome> {
        // Grants first, so an unknown award leaves nothing behind
        let grants = self.resolve_grants(record).await?;
        let submitter = grants
            .first()
            .and_then(|g| g.pi.clone())
            .ok_or_else(|| AppError::MissingField {
                field: "pi of the record's first grant".to_string(),
            })?;
        let grant_ids: Vec<EntityId> = grants.iter().filter_map(|g| g.id.clone()).collect();

        let publication = self.reconcile_publication(record).await?;
        let submission = self
            .reconcile_submission(&publication.id, &submitter, &grant_ids)
            .await?;
        let repository_copy = self.reconcile_repository_copy(record, &publication.id).await?;
        let deposit = match &repository_copy {
            Some(copy) => self.link_deposit(&submission.id, &copy.id).await?,
            None => None,
        };

        Ok(ReconcileOutcome {
            pmid: record.pmid().to_string(),
            grants: grant_ids,
            publication,
            submission,
            repository_copy,
            deposit,
        })
    }

    /// Most recent grant per award number, in record order, without repeats
    async fn resolve_grants(&self, record: &HarvestedRecord) -> Result<Vec<Grant>> {
        let mut grants: Vec<Grant> = Vec::with_capacity(record.award_numbers.len());
        for award_number in &record.award_numbers {
            let grant = self
                .resolver
                .find_most_recent_grant(award_number)
                .await?
                .ok_or_else(|| AppError::GrantNotFound {
                    award_number: award_number.clone(),
                })?;
            if !grants.iter().any(|g| g.id == grant.id) {
                grants.push(grant);
            }
        }
        Ok(grants)
    }

    async fn reconcile_publication(&self, record: &HarvestedRecord) -> Result<EntityChange> {
        let pmid = record.pmid();
        let mut existing = self.resolver.find_publication_by_pmid(pmid).await?;
        if existing.is_none() {
            if let Some(doi) = record.doi() {
                existing = self.resolver.find_publication_by_doi(doi, pmid).await?;
            }
        }

        let journal = match record.issn() {
            Some(issn) => self.resolver.find_journal_by_issn(issn).await?,
            None => None,
        };

        match existing {
            None => {
                let mut publication = Publication::default();
                merge_bibliographic(&mut publication, record, journal.as_ref());
                let id = self.resolver.create_publication(&publication).await?;
                Ok(EntityChange::new(id, Change::Created))
            }
            Some(current) => {
                let id = current.id.clone().ok_or_else(|| AppError::Internal {
                    message: "publication read without an id".to_string(),
                })?;
                let mut desired = current;
                merge_bibliographic(&mut desired, record, journal.as_ref());
                let written = self.resolver.update_publication(&desired).await?;
                Ok(EntityChange::new(id, Change::from_written(written)))
            }
        }
    }

    async fn reconcile_submission(
        &self,
        publication: &EntityId,
        submitter: &EntityId,
        grants: &[EntityId],
    ) -> Result<EntityChange> {
        let target = self.resolver.target_repository();
        let candidates = self.resolver.find_submissions(publication, submitter).await?;

        let Some(existing) = select_submission(&candidates, target, grants) else {
            let mut submission = Submission::new(publication.clone(), submitter.clone());
            submission.add_repository(target);
            for grant in grants {
                submission.add_grant(grant);
            }
            let id = self.resolver.create_submission(&submission).await?;
            return Ok(EntityChange::new(id, Change::Created));
        };

        let id = existing.id.clone().ok_or_else(|| AppError::Internal {
            message: "submission read without an id".to_string(),
        })?;
        if existing.submitted {
            debug!(submission = %id, "Submission already submitted, left as is");
            return Ok(EntityChange::new(id, Change::Unchanged));
        }

        let mut desired = existing.clone();
        let mut grew = desired.add_repository(target);
        for grant in grants {
            grew |= desired.add_grant(grant);
        }
        if !grew {
            return Ok(EntityChange::new(id, Change::Unchanged));
        }
        let written = self.resolver.update_submission(&desired).await?;
        Ok(EntityChange::new(id, Change::from_written(written)))
    }

    async fn reconcile_repository_copy(
        &self,
        record: &HarvestedRecord,
        publication: &EntityId,
    ) -> Result<Option<EntityChange>> {
        let copy_status = match self.mapping.decide(record) {
            CopyDecision::Copy(status) => status,
            CopyDecision::NoCopy => {
                debug!("Status produces no repository copy");
                return Ok(None);
            }
            CopyDecision::Unmapped => {
                warn!(
                    status = %record.status,
                    has_repository_id = record.repository_id().is_some(),
                    file_deposited = ?record.file_deposited_date,
                    initial_approval = ?record.initial_approval_date,
                    "No copy status configured for this record, repository copy skipped"
                );
                return Ok(None);
            }
        };

        let by_key = self.resolver.find_repository_copy(publication).await?;
        let by_external_id = match record.repository_id() {
            Some(external_id) => {
                self.resolver
                    .find_repository_copy_by_external_id(external_id)
                    .await?
            }
            None => None,
        };

        let existing = match (by_key, by_external_id) {
            (Some(a), Some(b)) if a.id != b.id => {
                return Err(AppError::DataCorruption {
                    resource_type: "RepositoryCopy".to_string(),
                    key: format!(
                        "publication={} and externalIds={}",
                        publication,
                        record.repository_id().unwrap_or_default()
                    ),
                    count: 2,
                });
            }
            (Some(copy), _) | (None, Some(copy)) => Some(copy),
            (None, None) => None,
        };

        if let Some(previous) = existing
            .as_ref()
            .map(|c| &c.publication)
            .filter(|p| *p != publication)
        {
            debug!(from = %previous, to = %publication, "Relinking repository copy");
            self.resolver.forget_repository_copy(previous).await;
        }

        let target = self.resolver.target_repository();
        let mut desired = existing
            .clone()
            .unwrap_or_else(|| RepositoryCopy::new(publication.clone(), target.clone()));
        desired.publication = publication.clone();
        desired.repository = target.clone();
        if let Some(external_id) = record.repository_id() {
            desired.add_external_id(external_id);
        }
        if let Some(pmcid) = record.pmcid() {
            desired.add_external_id(pmcid);
        }
        desired.copy_status = Some(copy_status);

        match existing.and_then(|c| c.id) {
            None => {
                let id = self.resolver.create_repository_copy(&desired).await?;
                Ok(Some(EntityChange::new(id, Change::Created)))
            }
            Some(id) => {
                let written = self.resolver.update_repository_copy(&desired).await?;
                Ok(Some(EntityChange::new(id, Change::from_written(written))))
            }
        }
    }

    async fn link_deposit(
        &self,
        submission: &EntityId,
        repository_copy: &EntityId,
    ) -> Result<Option<EntityChange>> {
        let Some(deposit) = self.resolver.find_deposit(submission).await? else {
            debug!(submission = %submission, "No deposit to link");
            return Ok(None);
        };
        let id = deposit.id.clone().ok_or_else(|| AppError::Internal {
            message: "deposit read without an id".to_string(),
        })?;

        if deposit.repository_copy.as_ref() == Some(repository_copy) {
            return Ok(Some(EntityChange::new(id, Change::Unchanged)));
        }
        let mut desired = deposit;
        desired.repository_copy = Some(repository_copy.clone());
        let written = self.resolver.update_deposit(&desired).await?;
        Ok(Some(EntityChange::new(id, Change::from_written(written))))
    }
}

/// Copy record values onto a publication. Absent record values never clear
/// stored ones, and an existing PMID is kept.
fn merge_bibliographic(publication: &mut Publication, record: &HarvestedRecord, journal: Option<&Journal>) {
    fn set(slot: &mut Option<String>, value: Option<&str>) {
        if let Some(value) = value {
            *slot = Some(value.to_string());
        }
    }

    if publication.pmid.is_none() {
        publication.pmid = Some(record.pmid().to_string());
    }
    set(&mut publication.doi, record.doi());
    set(&mut publication.title, record.title());
    set(&mut publication.issue, record.issue());
    set(&mut publication.volume, record.volume());
    if let Some(id) = journal.and_then(|j| j.id.clone()) {
        publication.journal = Some(id);
    }
}

/// Pick the submission to extend, preferring in order:
/// - one for the target repository that already has every grant
/// - one for the target repository sharing a grant
/// - an unsubmitted one for the target repository
/// - any unsubmitted one
fn select_submission<'a>(
    candidates: &'a [Submission],
    target: &EntityId,
    grants: &[EntityId],
) -> Option<&'a Submission> {
    let for_target = |s: &&Submission| s.has_repository(target);
    let unsubmitted = |s: &&Submission| !s.submitted;

    candidates
        .iter()
        .filter(for_target)
        .find(|s| grants.iter().all(|g| s.has_grant(g)))
        .or_else(|| {
            candidates
                .iter()
                .filter(for_target)
                .find(|s| grants.iter().any(|g| s.has_grant(g)))
        })
        .or_else(|| candidates.iter().filter(for_target).find(unsubmitted))
        .or_else(|| candidates.iter().find(unsubmitted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::IndexBarrier;
    use chrono::{NaiveDate, TimeZone, Utc};
    use compliance_common::cache::RepositoryCopyKey;
    use compliance_common::config::{ConsistencyMode, StatusMappingEntry};
    use compliance_common::gateway::{GatewayExt, InMemoryGateway, IndexLag};
    use compliance_common::models::{
        ComplianceStatus, CopyStatus, Deposit, EntityKind, Resource, SubmissionSource,
    };
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const TARGET: &str = "mem://repository/repositories/pmc";
    const PI: &str = "mem://repository/users/55";

    struct Fixture {
        gateway: Arc<InMemoryGateway>,
        caches: Arc<LookupCaches>,
        reconciler: Reconciler,
    }

    impl Fixture {
        fn new(gateway: InMemoryGateway) -> Self {
            Self::with_mapping(gateway, StatusMapping::builtin())
        }

        fn with_mapping(gateway: InMemoryGateway, mapping: StatusMapping) -> Self {
            let gateway = Arc::new(gateway);
            let caches = Arc::new(LookupCaches::new());
            let resolver = EntityResolver::new(gateway.clone(), caches.clone(), EntityId::from(TARGET));
            Self {
                gateway,
                caches,
                reconciler: Reconciler::new(resolver, mapping),
            }
        }

        async fn grant(&self, award: &str, year: i32) -> EntityId {
            let grant = Grant {
                award_number: award.to_string(),
                pi: Some(PI.into()),
                start_date: Some(Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap()),
                ..Default::default()
            };
            let id = self.gateway.create_entity(&grant).await.unwrap();
            self.gateway.refresh_index().await;
            id
        }

        async fn all<E: compliance_common::models::Entity>(&self, kind: EntityKind) -> Vec<E> {
            self.gateway
                .all_of_kind(kind)
                .await
                .into_iter()
                .filter_map(E::from_resource)
                .collect()
        }
    }

    fn non_compliant(repository_id: Option<&str>) -> HarvestedRecord {
        let mut record = HarvestedRecord::new(ComplianceStatus::NonCompliant, "9999999999", "R01 AB123456");
        record.repository_id = repository_id.map(str::to_string);
        record.title = "Article A".to_string();
        record
    }

    #[tokio::test]
    async fn test_stalled_copy_scenario() {
        let fx = Fixture::new(InMemoryGateway::new());
        let grant = fx.grant("R01AB123456", 2015).await;

        let mut record = non_compliant(Some("NIHMS987654321"));
        record.file_deposited_date = NaiveDate::from_ymd_opt(2017, 12, 12);
        record.initial_approval_date = NaiveDate::from_ymd_opt(2017, 12, 12);

        let outcome = fx.reconciler.reconcile(&record).await.unwrap();
        assert_eq!(outcome.publication.change, Change::Created);
        assert_eq!(outcome.submission.change, Change::Created);
        assert_eq!(outcome.repository_copy.as_ref().map(|c| c.change), Some(Change::Created));
        assert!(outcome.deposit.is_none());

        let publication: Publication = fx.gateway.fetch_entity(&outcome.publication.id).await.unwrap();
        assert_eq!(publication.pmid.as_deref(), Some("9999999999"));
        assert_eq!(publication.title.as_deref(), Some("Article A"));

        let submission: Submission = fx.gateway.fetch_entity(&outcome.submission.id).await.unwrap();
        assert_eq!(submission.submitter, EntityId::from(PI));
        assert_eq!(submission.grants, vec![grant]);
        assert_eq!(submission.repositories, vec![EntityId::from(TARGET)]);
        assert!(!submission.submitted);

        let copies: Vec<RepositoryCopy> = fx.all(EntityKind::RepositoryCopy).await;
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].copy_status, Some(CopyStatus::Stalled));
        assert_eq!(copies[0].external_ids, vec!["NIHMS987654321".to_string()]);
        assert_eq!(copies[0].publication, outcome.publication.id);
        assert!(copies[0].access_url.is_none());
    }

    #[tokio::test]
    async fn test_non_compliant_without_id_creates_no_copy() {
        let fx = Fixture::new(InMemoryGateway::new());
        let grant = fx.grant("R01AB123456", 2015).await;

        let outcome = fx.reconciler.reconcile(&non_compliant(None)).await.unwrap();
        assert!(outcome.repository_copy.is_none());
        assert!(fx.all::<RepositoryCopy>(EntityKind::RepositoryCopy).await.is_empty());
        assert_eq!(fx.all::<Publication>(EntityKind::Publication).await.len(), 1);

        let submissions: Vec<Submission> = fx.all(EntityKind::Submission).await;
        assert_eq!(submissions.len(), 1);
        assert!(!submissions[0].submitted);
        assert_eq!(submissions[0].source, SubmissionSource::Other);
        assert_eq!(submissions[0].repositories, vec![EntityId::from(TARGET)]);
        assert_eq!(submissions[0].grants, vec![grant]);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let fx = Fixture::new(InMemoryGateway::new());
        fx.grant("R01AB123456", 2015).await;
        let record = non_compliant(Some("NIHMS987654321"));

        let first = fx.reconciler.reconcile(&record).await.unwrap();
        let creates = fx.gateway.create_count().await;
        let updates = fx.gateway.update_count().await;

        let second = fx.reconciler.reconcile(&record).await.unwrap();
        assert!(second.is_unchanged());
        assert_eq!(second.publication.id, first.publication.id);
        assert_eq!(second.submission.id, first.submission.id);
        assert_eq!(fx.gateway.create_count().await, creates);
        assert_eq!(fx.gateway.update_count().await, updates);
    }

    #[tokio::test]
    async fn test_second_grant_extends_existing_submission() {
        let fx = Fixture::new(InMemoryGateway::new());
        let first_grant = fx.grant("R01AB123456", 2015).await;
        let second_grant = fx.grant("R01CD654321", 2016).await;

        let record = non_compliant(None);
        fx.reconciler.reconcile(&record).await.unwrap();

        let mut record = non_compliant(None);
        record.award_numbers = vec!["R01 AB123456".into(), "R01 CD654321".into()];
        let outcome = fx.reconciler.reconcile(&record).await.unwrap();
        assert_eq!(outcome.submission.change, Change::Updated);

        let submissions: Vec<Submission> = fx.all(EntityKind::Submission).await;
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0].has_grant(&first_grant));
        assert!(submissions[0].has_grant(&second_grant));
    }

    #[tokio::test]
    async fn test_submitted_submission_is_never_modified() {
        let fx = Fixture::new(InMemoryGateway::new());
        let first_grant = fx.grant("R01AB123456", 2015).await;
        fx.grant("R01CD654321", 2016).await;

        let publication = Publication {
            pmid: Some("9999999999".into()),
            title: Some("Article A".into()),
            ..Default::default()
        };
        let publication_id = fx.gateway.create_entity(&publication).await.unwrap();
        let mut submitted = Submission::new(publication_id, PI.into());
        submitted.add_repository(&TARGET.into());
        submitted.add_grant(&first_grant);
        submitted.submitted = true;
        let submitted_id = fx.gateway.create_entity(&submitted).await.unwrap();

        let mut record = non_compliant(None);
        record.award_numbers = vec!["R01 AB123456".into(), "R01 CD654321".into()];
        let outcome = fx.reconciler.reconcile(&record).await.unwrap();

        assert_eq!(outcome.submission.id, submitted_id);
        assert_eq!(outcome.submission.change, Change::Unchanged);
        let stored: Submission = fx.gateway.fetch_entity(&submitted_id).await.unwrap();
        assert_eq!(stored.grants, vec![first_grant]);
    }

    #[tokio::test]
    async fn test_unsubmitted_submission_elsewhere_gains_target_and_grant() {
        let fx = Fixture::new(InMemoryGateway::new());
        let other_grant = fx.grant("R01ZZ000001", 2014).await;
        let record_grant = fx.grant("R01AB123456", 2015).await;

        let publication = Publication {
            pmid: Some("9999999999".into()),
            title: Some("Article A".into()),
            ..Default::default()
        };
        let publication_id = fx.gateway.create_entity(&publication).await.unwrap();
        let mut draft = Submission::new(publication_id, PI.into());
        draft.add_repository(&"fake:repo".into());
        draft.add_grant(&other_grant);
        let draft_id = fx.gateway.create_entity(&draft).await.unwrap();
        fx.gateway.refresh_index().await;

        let outcome = assert_ok!(fx.reconciler.reconcile(&non_compliant(None)).await);
        assert_eq!(outcome.submission, EntityChange::new(draft_id.clone(), Change::Updated));

        let submissions: Vec<Submission> = fx.all(EntityKind::Submission).await;
        assert_eq!(submissions.len(), 1);
        let stored = &submissions[0];
        assert_eq!(stored.id, Some(draft_id));
        assert!(stored.has_repository(&"fake:repo".into()));
        assert!(stored.has_repository(&TARGET.into()));
        assert_eq!(stored.repositories.len(), 2);
        assert!(stored.has_grant(&other_grant));
        assert!(stored.has_grant(&record_grant));
        assert_eq!(stored.grants.len(), 2);
    }

    #[tokio::test]
    async fn test_submitted_pass_submission_with_deposit_stays_intact() {
        let fx = Fixture::new(InMemoryGateway::new());
        let grant = fx.grant("R01AB123456", 2015).await;

        let publication = Publication {
            pmid: Some("9999999999".into()),
            title: Some("Article A".into()),
            ..Default::default()
        };
        let publication_id = fx.gateway.create_entity(&publication).await.unwrap();
        let mut submitted = Submission::new(publication_id, PI.into());
        submitted.source = SubmissionSource::Pass;
        submitted.add_repository(&TARGET.into());
        submitted.add_grant(&grant);
        submitted.submitted = true;
        let submitted_id = fx.gateway.create_entity(&submitted).await.unwrap();
        let before: Submission = fx.gateway.fetch_entity(&submitted_id).await.unwrap();

        let deposit = Deposit {
            id: None,
            submission: submitted_id.clone(),
            repository: TARGET.into(),
            repository_copy: None,
            deposit_status: Some(compliance_common::models::DepositStatus::Accepted),
        };
        let deposit_id = fx.gateway.create_entity(&deposit).await.unwrap();
        fx.gateway.refresh_index().await;

        let mut record = non_compliant(Some("NIHMS987654321"));
        record.file_deposited_date = NaiveDate::from_ymd_opt(2017, 12, 12);
        record.initial_approval_date = NaiveDate::from_ymd_opt(2017, 12, 12);
        let outcome = assert_ok!(fx.reconciler.reconcile(&record).await);

        assert_eq!(outcome.submission, EntityChange::new(submitted_id.clone(), Change::Unchanged));
        let after: Submission = fx.gateway.fetch_entity(&submitted_id).await.unwrap();
        assert_eq!(after, before);

        let copies: Vec<RepositoryCopy> = fx.all(EntityKind::RepositoryCopy).await;
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].copy_status, Some(CopyStatus::Stalled));

        let stored: Deposit = fx.gateway.fetch_entity(&deposit_id).await.unwrap();
        assert_eq!(stored.repository_copy, copies[0].id);
        assert_eq!(
            stored.deposit_status,
            Some(compliance_common::models::DepositStatus::Accepted)
        );
    }

    #[tokio::test]
    async fn test_deposit_is_linked_to_copy() {
        let fx = Fixture::new(InMemoryGateway::new());
        fx.grant("R01AB123456", 2015).await;
        let record = non_compliant(Some("NIHMS987654321"));

        let outcome = fx.reconciler.reconcile(&record).await.unwrap();
        let deposit = Deposit {
            id: None,
            submission: outcome.submission.id.clone(),
            repository: TARGET.into(),
            repository_copy: None,
            deposit_status: Some(compliance_common::models::DepositStatus::Submitted),
        };
        let deposit_id = fx.gateway.create_entity(&deposit).await.unwrap();

        let outcome = fx.reconciler.reconcile(&record).await.unwrap();
        assert_eq!(
            outcome.deposit,
            Some(EntityChange::new(deposit_id.clone(), Change::Updated))
        );

        let stored: Deposit = fx.gateway.fetch_entity(&deposit_id).await.unwrap();
        assert_eq!(
            stored.repository_copy,
            outcome.repository_copy.map(|c| c.id)
        );
        assert_eq!(
            stored.deposit_status,
            Some(compliance_common::models::DepositStatus::Submitted)
        );
    }

    #[tokio::test]
    async fn test_copy_found_by_external_id_is_reused() {
        let fx = Fixture::new(InMemoryGateway::new());
        fx.grant("R01AB123456", 2015).await;

        let mut earlier = RepositoryCopy::new("mem://repository/publications/old".into(), TARGET.into());
        earlier.add_external_id("NIHMS987654321");
        let copy_id = fx.gateway.create_entity(&earlier).await.unwrap();

        let outcome = fx
            .reconciler
            .reconcile(&non_compliant(Some("NIHMS987654321")))
            .await
            .unwrap();
        let copy = outcome.repository_copy.unwrap();
        assert_eq!(copy.id, copy_id);
        assert_eq!(copy.change, Change::Updated);
        assert_eq!(fx.all::<RepositoryCopy>(EntityKind::RepositoryCopy).await.len(), 1);
    }

    #[tokio::test]
    async fn test_relinked_copy_leaves_no_stale_cache_key() {
        let fx = Fixture::new(InMemoryGateway::new());
        fx.grant("R01AB123456", 2015).await;

        let old_publication = EntityId::from("mem://repository/publications/old");
        let mut earlier = RepositoryCopy::new(old_publication.clone(), TARGET.into());
        earlier.add_external_id("NIHMS987654321");
        let copy_id = fx.gateway.create_entity(&earlier).await.unwrap();
        fx.caches
            .repository_copies
            .put(
                RepositoryCopyKey {
                    publication: old_publication.clone(),
                    repository: TARGET.into(),
                },
                copy_id.clone(),
            )
            .await;

        let outcome = assert_ok!(
            fx.reconciler
                .reconcile(&non_compliant(Some("NIHMS987654321")))
                .await
        );
        let stored: RepositoryCopy = fx.gateway.fetch_entity(&copy_id).await.unwrap();
        assert_eq!(stored.publication, outcome.publication.id);

        let old_key = RepositoryCopyKey {
            publication: old_publication,
            repository: TARGET.into(),
        };
        assert!(fx.caches.repository_copies.get(&old_key).await.is_none());
        let new_key = RepositoryCopyKey {
            publication: outcome.publication.id,
            repository: TARGET.into(),
        };
        assert_eq!(fx.caches.repository_copies.get(&new_key).await, Some(copy_id));
    }

    #[tokio::test]
    async fn test_conflicting_copies_are_corruption() {
        let fx = Fixture::new(InMemoryGateway::new());
        fx.grant("R01AB123456", 2015).await;

        let publication = Publication {
            pmid: Some("9999999999".into()),
            ..Default::default()
        };
        let publication_id = fx.gateway.create_entity(&publication).await.unwrap();
        fx.gateway
            .create_entity(&RepositoryCopy::new(publication_id, TARGET.into()))
            .await
            .unwrap();
        let mut other = RepositoryCopy::new("mem://repository/publications/old".into(), TARGET.into());
        other.add_external_id("NIHMS987654321");
        fx.gateway.create_entity(&other).await.unwrap();

        let err = assert_err!(
            fx.reconciler
                .reconcile(&non_compliant(Some("NIHMS987654321")))
                .await
        );
        assert_eq!(err.class(), ErrorClass::DataCorruption);
    }

    #[tokio::test]
    async fn test_unknown_award_halts_before_writes() {
        let fx = Fixture::new(InMemoryGateway::new());
        let err = assert_err!(fx.reconciler.reconcile(&non_compliant(None)).await);
        assert!(matches!(err, AppError::GrantNotFound { .. }));
        assert_eq!(fx.gateway.create_count().await, 0);
    }

    #[tokio::test]
    async fn test_grant_without_pi_is_invalid_input() {
        let fx = Fixture::new(InMemoryGateway::new());
        let grant = Grant {
            award_number: "R01AB123456".into(),
            ..Default::default()
        };
        fx.gateway.create_entity(&grant).await.unwrap();

        let err = assert_err!(fx.reconciler.reconcile(&non_compliant(None)).await);
        assert_eq!(err.class(), ErrorClass::InvalidInput);
    }

    #[tokio::test]
    async fn test_publication_fields_refreshed_without_clearing() {
        let fx = Fixture::new(InMemoryGateway::new());
        fx.grant("R01AB123456", 2015).await;

        let mut record = non_compliant(None);
        record.volume = Some("12".into());
        let first = fx.reconciler.reconcile(&record).await.unwrap();

        let mut record = non_compliant(None);
        record.issue = Some("3".into());
        let second = fx.reconciler.reconcile(&record).await.unwrap();
        assert_eq!(second.publication.change, Change::Updated);

        let stored: Publication = fx.gateway.fetch_entity(&first.publication.id).await.unwrap();
        assert_eq!(stored.volume.as_deref(), Some("12"));
        assert_eq!(stored.issue.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_publication_found_by_doi() {
        let fx = Fixture::new(InMemoryGateway::new());
        fx.grant("R01AB123456", 2015).await;
        let publication = Publication {
            doi: Some("10.1000/a.abcd.1234".into()),
            ..Default::default()
        };
        let id = fx.gateway.create_entity(&publication).await.unwrap();

        let mut record = non_compliant(None);
        record.doi = Some("10.1000/a.abcd.1234".into());
        let outcome = fx.reconciler.reconcile(&record).await.unwrap();

        assert_eq!(outcome.publication, EntityChange::new(id.clone(), Change::Updated));
        let stored: Publication = fx.gateway.fetch_entity(&id).await.unwrap();
        assert_eq!(stored.pmid.as_deref(), Some("9999999999"));
    }

    #[tokio::test]
    async fn test_cache_union_masks_index_lag() {
        let fx = Fixture::new(InMemoryGateway::with_index_lag(IndexLag::Manual));
        fx.grant("R01AB123456", 2015).await;
        fx.grant("R01CD654321", 2016).await;

        fx.reconciler.reconcile(&non_compliant(None)).await.unwrap();

        // Nothing written above is searchable yet
        let mut record = non_compliant(Some("NIHMS987654321"));
        record.award_numbers = vec!["R01 CD654321".into()];
        let outcome = fx.reconciler.reconcile(&record).await.unwrap();
        assert_eq!(outcome.publication.change, Change::Unchanged);
        assert_eq!(outcome.submission.change, Change::Updated);

        assert_eq!(fx.all::<Publication>(EntityKind::Publication).await.len(), 1);
        assert_eq!(fx.all::<Submission>(EntityKind::Submission).await.len(), 1);
    }

    #[tokio::test]
    async fn test_read_after_write_without_cache_union() {
        let gateway = Arc::new(InMemoryGateway::with_index_lag(IndexLag::Searches(1)));
        let resolver = EntityResolver::new(
            gateway.clone(),
            Arc::new(LookupCaches::new()),
            EntityId::from(TARGET),
        )
        .with_consistency(
            ConsistencyMode::ReadAfterWrite,
            IndexBarrier {
                attempts: 5,
                interval: Duration::from_millis(1),
            },
        );
        let reconciler = Reconciler::new(resolver, StatusMapping::builtin());

        let grant = Grant {
            award_number: "R01AB123456".into(),
            pi: Some(PI.into()),
            ..Default::default()
        };
        gateway.create_entity(&grant).await.unwrap();
        gateway.refresh_index().await;

        let record = non_compliant(Some("NIHMS987654321"));
        assert_ok!(reconciler.reconcile(&record).await);
        let second = reconciler.reconcile(&record).await.unwrap();
        assert!(second.is_unchanged());

        let submissions = gateway.all_of_kind(EntityKind::Submission).await;
        assert_eq!(submissions.len(), 1);
        assert!(matches!(submissions[0], Resource::Submission(_)));
    }

    #[tokio::test]
    async fn test_configured_mapping_for_compliant_records() {
        let mapping = StatusMapping::with_entries(&[StatusMappingEntry {
            status: ComplianceStatus::Compliant,
            repository_id: true,
            copy_status: Some(CopyStatus::Complete),
        }]);
        let fx = Fixture::with_mapping(InMemoryGateway::new(), mapping);
        fx.grant("R01AB123456", 2015).await;

        let mut record = HarvestedRecord::new(ComplianceStatus::Compliant, "9999999999", "R01 AB123456");
        record.repository_id = Some("NIHMS987654321".into());
        record.pmcid = Some("PMC1234567".into());
        fx.reconciler.reconcile(&record).await.unwrap();

        let copies: Vec<RepositoryCopy> = fx.all(EntityKind::RepositoryCopy).await;
        assert_eq!(copies[0].copy_status, Some(CopyStatus::Complete));
        assert_eq!(copies[0].external_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_unmapped_status_skips_copy() {
        let fx = Fixture::new(InMemoryGateway::new());
        fx.grant("R01AB123456", 2015).await;

        let mut record = HarvestedRecord::new(ComplianceStatus::InProcess, "9999999999", "R01 AB123456");
        record.repository_id = Some("NIHMS987654321".into());
        let outcome = fx.reconciler.reconcile(&record).await.unwrap();

        assert!(outcome.repository_copy.is_none());
        assert_eq!(outcome.submission.change, Change::Created);
    }

    #[tokio::test]
    async fn test_concurrent_records_for_same_pmid_do_not_duplicate() {
        let fx = Arc::new(Fixture::new(InMemoryGateway::with_index_lag(IndexLag::Manual)));
        fx.grant("R01AB123456", 2015).await;

        let record = non_compliant(Some("NIHMS987654321"));
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let fx = fx.clone();
                let record = record.clone();
                tokio::spawn(async move { fx.reconciler.reconcile(&record).await })
            })
            .collect();
        for task in tasks {
            assert_ok!(task.await.unwrap());
        }

        assert_eq!(fx.all::<Publication>(EntityKind::Publication).await.len(), 1);
        assert_eq!(fx.all::<Submission>(EntityKind::Submission).await.len(), 1);
        assert_eq!(fx.all::<RepositoryCopy>(EntityKind::RepositoryCopy).await.len(), 1);
    }

    #[test]
    fn test_select_prefers_submission_with_all_grants() {
        let target: EntityId = TARGET.into();
        let grant: EntityId = "grant:1".into();

        let mut partial = Submission::new("pub:1".into(), PI.into());
        partial.id = Some("sub:a".into());
        partial.add_repository(&target);

        let mut complete = partial.clone();
        complete.id = Some("sub:b".into());
        complete.add_grant(&grant);

        let candidates = vec![partial, complete];
        let chosen = select_submission(&candidates, &target, &[grant]).unwrap();
        assert_eq!(chosen.id, Some("sub:b".into()));
    }

    #[test]
    fn test_select_skips_submitted_without_target() {
        let target: EntityId = TARGET.into();
        let mut submitted = Submission::new("pub:1".into(), PI.into());
        submitted.submitted = true;

        assert!(select_submission(&[submitted], &target, &["grant:1".into()]).is_none());
    }
}
