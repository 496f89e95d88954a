//! Entity resolution
//!
//! Finds the existing repository entity for a natural key, going to the
//! lookup caches first and the gateway's search index second. Creates go
//! through here too so every new identifier lands in the caches before the
//! index can see it.

use compliance_common::cache::{LookupCaches, RepositoryCopyKey, SetCache, UserPublicationKey};
use compliance_common::config::{AppConfig, ConsistencyMode};
use compliance_common::errors::{AppError, Result};
use compliance_common::gateway::{reference, text, GatewayExt, RepositoryGateway};
use compliance_common::metrics;
use compliance_common::models::{
    fields, Deposit, Entity, EntityId, EntityKind, Grant, Journal, Publication, RepositoryCopy,
    Submission,
};
use regex_lite::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Award numbers longer than this before a '-' carry a suffix the grant
/// records do not
const AWARD_SUFFIX_MIN_PREFIX: usize = 10;

fn whitespace() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace pattern"))
}

/// Spellings of an award number to try, in order: as given, without
/// whitespace, and without whitespace or a trailing `-suffix`.
pub fn award_number_variants(award_number: &str) -> Vec<String> {
    let given = award_number.trim().to_string();
    let compact = whitespace().replace_all(&given, "").into_owned();

    let mut variants = vec![given];
    if !variants.contains(&compact) {
        variants.push(compact.clone());
    }
    if let Some(dash) = compact.find('-') {
        if dash >= AWARD_SUFFIX_MIN_PREFIX {
            let stripped = compact[..dash].to_string();
            if !variants.contains(&stripped) {
                variants.push(stripped);
            }
        }
    }
    variants
}

/// Settings for the read-after-write barrier
#[derive(Debug, Clone, Copy)]
pub struct IndexBarrier {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for IndexBarrier {
    fn default() -> Self {
        Self {
            attempts: 20,
            interval: Duration::from_millis(250),
        }
    }
}

/// Resolves and writes entities on behalf of the reconciler
pub struct EntityResolver {
    gateway: Arc<dyn RepositoryGateway>,
    caches: Arc<LookupCaches>,
    target_repository: EntityId,
    consistency: ConsistencyMode,
    barrier: IndexBarrier,
    /// Submissions created here that the index barrier never saw
    unindexed_submissions: SetCache<UserPublicationKey>,
}

impl EntityResolver {
    pub fn new(
        gateway: Arc<dyn RepositoryGateway>,
        caches: Arc<LookupCaches>,
        target_repository: EntityId,
    ) -> Self {
        Self {
            gateway,
            caches,
            target_repository,
            consistency: ConsistencyMode::default(),
            barrier: IndexBarrier::default(),
            unindexed_submissions: SetCache::new("unindexed_submissions"),
        }
    }

    pub fn from_config(
        gateway: Arc<dyn RepositoryGateway>,
        caches: Arc<LookupCaches>,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            gateway,
            caches,
            EntityId::new(config.repository.target_repository_id.clone()),
        )
        .with_consistency(
            config.reconcile.consistency,
            IndexBarrier {
                attempts: config.reconcile.index_poll_attempts,
                interval: config.reconcile.index_poll_interval(),
            },
        )
    }

    pub fn with_consistency(mut self, consistency: ConsistencyMode, barrier: IndexBarrier) -> Self {
        self.consistency = consistency;
        self.barrier = barrier;
        self
    }

    pub fn target_repository(&self) -> &EntityId {
        &self.target_repository
    }

    /// Forget everything the caches learned
    pub async fn clear_caches(&self) {
        self.caches.clear_all().await;
        self.unindexed_submissions.clear().await;
    }

    // ---- finders ----

    /// The grant with the latest start date for an award number.
    ///
    /// Candidates are the union of the matches for every spelling from
    /// `award_number_variants`. The winner is cached under the award number
    /// as given.
    #[instrument(skip(self))]
    pub async fn find_most_recent_grant(&self, award_number: &str) -> Result<Option<Grant>> {
        require(fields::AWARD_NUMBER, award_number)?;
        if let Some(id) = self.caches.grants.get(&award_number.to_string()).await {
            return self.gateway.fetch_entity::<Grant>(&id).await.map(Some);
        }

        let mut matches = HashSet::new();
        for variant in award_number_variants(award_number) {
            let found = self
                .gateway
                .find_all_by_attribute(EntityKind::Grant, fields::AWARD_NUMBER, &text(&variant))
                .await?;
            if !found.is_empty() {
                debug!(variant = %variant, matches = found.len(), "Award number matched");
            }
            matches.extend(found);
        }

        let mut ids: Vec<EntityId> = matches.into_iter().collect();
        ids.sort();

        let mut winner: Option<Grant> = None;
        for id in &ids {
            let grant: Grant = self.gateway.fetch_entity(id).await?;
            // Later candidates win ties; a missing start date is the earliest
            let newer = winner
                .as_ref()
                .map_or(true, |best| grant.start_date >= best.start_date);
            if newer {
                winner = Some(grant);
            }
        }

        if let Some(id) = winner.as_ref().and_then(|g| g.id.clone()) {
            self.caches.grants.put(award_number.to_string(), id).await;
        }
        Ok(winner)
    }

    #[instrument(skip(self))]
    pub async fn find_publication_by_pmid(&self, pmid: &str) -> Result<Option<Publication>> {
        require(fields::PMID, pmid)?;
        let id = match self.caches.publications.get(&pmid.to_string()).await {
            Some(id) => Some(id),
            None => {
                self.gateway
                    .find_one_by_attribute(EntityKind::Publication, fields::PMID, &text(pmid))
                    .await?
            }
        };
        let Some(id) = id else {
            return Ok(None);
        };

        let publication: Publication = self.gateway.fetch_entity(&id).await?;
        self.caches.publications.put(pmid.to_string(), id).await;
        Ok(Some(publication))
    }

    /// Lookup by DOI for articles first registered without a PMID.
    /// A hit is cached under `pmid`.
    #[instrument(skip(self))]
    pub async fn find_publication_by_doi(&self, doi: &str, pmid: &str) -> Result<Option<Publication>> {
        require(fields::DOI, doi)?;
        let found = self
            .gateway
            .find_one_by_attribute(EntityKind::Publication, fields::DOI, &text(doi))
            .await?;
        let Some(id) = found else {
            return Ok(None);
        };

        let publication: Publication = self.gateway.fetch_entity(&id).await?;
        self.caches.publications.put(pmid.to_string(), id).await;
        Ok(Some(publication))
    }

    /// The copy of a publication held by the target repository
    #[instrument(skip(self))]
    pub async fn find_repository_copy(&self, publication: &EntityId) -> Result<Option<RepositoryCopy>> {
        let key = RepositoryCopyKey {
            publication: publication.clone(),
            repository: self.target_repository.clone(),
        };

        let id = match self.caches.repository_copies.get(&key).await {
            Some(id) => Some(id),
            None => {
                let attributes = [
                    (fields::PUBLICATION, reference(publication)),
                    (fields::REPOSITORY, reference(&self.target_repository)),
                ];
                let matches = self
                    .gateway
                    .find_all_by_attributes(EntityKind::RepositoryCopy, &attributes)
                    .await?;
                single(EntityKind::RepositoryCopy, &key_label(&attributes), matches)?
            }
        };
        let Some(id) = id else {
            return Ok(None);
        };

        let copy: RepositoryCopy = self.gateway.fetch_entity(&id).await?;
        self.caches.repository_copies.put(key, id).await;
        Ok(Some(copy))
    }

    /// The target repository's copy carrying an external identifier
    #[instrument(skip(self))]
    pub async fn find_repository_copy_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<RepositoryCopy>> {
        require(fields::EXTERNAL_IDS, external_id)?;
        let attributes = [
            (fields::EXTERNAL_IDS, text(external_id)),
            (fields::REPOSITORY, reference(&self.target_repository)),
        ];
        let matches = self
            .gateway
            .find_all_by_attributes(EntityKind::RepositoryCopy, &attributes)
            .await?;
        match single(EntityKind::RepositoryCopy, &key_label(&attributes), matches)? {
            Some(id) => self.gateway.fetch_entity(&id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Every submission by `submitter` for `publication`.
    ///
    /// With `ConsistencyMode::CacheUnion` the search result is unioned with
    /// the identifiers this process already knows, so a submission created a
    /// moment ago is found even before the index catches up. With
    /// `ConsistencyMode::ReadAfterWrite` only submissions whose index barrier
    /// timed out are added, so a retry never creates a second one.
    #[instrument(skip(self))]
    pub async fn find_submissions(
        &self,
        publication: &EntityId,
        submitter: &EntityId,
    ) -> Result<Vec<Submission>> {
        let key = UserPublicationKey {
            user: submitter.clone(),
            publication: publication.clone(),
        };

        let attributes = [
            (fields::PUBLICATION, reference(publication)),
            (fields::SUBMITTER, reference(submitter)),
        ];
        let mut ids = self
            .gateway
            .find_all_by_attributes(EntityKind::Submission, &attributes)
            .await?;

        let known = match self.consistency {
            ConsistencyMode::CacheUnion => self.caches.user_pub_submissions.get(&key).await,
            ConsistencyMode::ReadAfterWrite => self.unindexed_submissions.get(&key).await,
        };
        if let Some(known) = known {
            ids.extend(known);
        }

        let mut sorted: Vec<EntityId> = ids.iter().cloned().collect();
        sorted.sort();

        let mut submissions = Vec::with_capacity(sorted.len());
        for id in &sorted {
            match self.gateway.read_entity::<Submission>(id).await? {
                Some(submission) => submissions.push(submission),
                None => warn!(id = %id, "Submission listed but no longer readable"),
            }
        }

        self.caches.user_pub_submissions.put(key, ids).await;
        Ok(submissions)
    }

    /// The deposit linking a submission to the target repository
    #[instrument(skip(self))]
    pub async fn find_deposit(&self, submission: &EntityId) -> Result<Option<Deposit>> {
        let id = match self.caches.deposits.get(submission).await {
            Some(id) => Some(id),
            None => {
                let attributes = [
                    (fields::SUBMISSION, reference(submission)),
                    (fields::REPOSITORY, reference(&self.target_repository)),
                ];
                let matches = self
                    .gateway
                    .find_all_by_attributes(EntityKind::Deposit, &attributes)
                    .await?;
                single(EntityKind::Deposit, &key_label(&attributes), matches)?
            }
        };
        let Some(id) = id else {
            return Ok(None);
        };

        let deposit: Deposit = self.gateway.fetch_entity(&id).await?;
        self.caches.deposits.put(submission.clone(), id).await;
        Ok(Some(deposit))
    }

    #[instrument(skip(self))]
    pub async fn find_journal_by_issn(&self, issn: &str) -> Result<Option<Journal>> {
        require(fields::ISSNS, issn)?;
        let found = self
            .gateway
            .find_one_by_attribute(EntityKind::Journal, fields::ISSNS, &text(issn))
            .await?;
        match found {
            Some(id) => self.gateway.read_entity(&id).await,
            None => Ok(None),
        }
    }

    // ---- writes ----

    /// Create a publication. PMID or DOI is required.
    #[instrument(skip(self, publication))]
    pub async fn create_publication(&self, publication: &Publication) -> Result<EntityId> {
        let key = match (&publication.pmid, &publication.doi) {
            (Some(pmid), _) => (fields::PMID, text(pmid)),
            (None, Some(doi)) => (fields::DOI, text(doi)),
            (None, None) => {
                return Err(AppError::MissingField {
                    field: "pmid or doi".to_string(),
                })
            }
        };

        let id = self.create(publication).await?;
        if let Some(pmid) = &publication.pmid {
            self.caches.publications.put(pmid.clone(), id.clone()).await;
        }
        self.await_indexed(EntityKind::Publication, &[key], &id).await?;
        Ok(id)
    }

    #[instrument(skip(self, submission))]
    pub async fn create_submission(&self, submission: &Submission) -> Result<EntityId> {
        let id = self.create(submission).await?;
        let key = UserPublicationKey {
            user: submission.submitter.clone(),
            publication: submission.publication.clone(),
        };
        self.caches
            .user_pub_submissions
            .add_to_or_create_entry(key.clone(), id.clone())
            .await;

        let attributes = [
            (fields::PUBLICATION, reference(&submission.publication)),
            (fields::SUBMITTER, reference(&submission.submitter)),
        ];
        if let Err(e) = self.await_indexed(EntityKind::Submission, &attributes, &id).await {
            self.unindexed_submissions.add_to_or_create_entry(key, id).await;
            return Err(e);
        }
        Ok(id)
    }

    #[instrument(skip(self, copy))]
    pub async fn create_repository_copy(&self, copy: &RepositoryCopy) -> Result<EntityId> {
        let id = self.create(copy).await?;
        self.caches
            .repository_copies
            .put(
                RepositoryCopyKey {
                    publication: copy.publication.clone(),
                    repository: copy.repository.clone(),
                },
                id.clone(),
            )
            .await;

        let attributes = [
            (fields::PUBLICATION, reference(&copy.publication)),
            (fields::REPOSITORY, reference(&copy.repository)),
        ];
        self.await_indexed(EntityKind::RepositoryCopy, &attributes, &id).await?;
        Ok(id)
    }

    /// Returns whether a write happened
    pub async fn update_publication(&self, publication: &Publication) -> Result<bool> {
        let written = self.update(publication).await?;
        if let (Some(pmid), Some(id)) = (&publication.pmid, &publication.id) {
            self.caches.publications.put(pmid.clone(), id.clone()).await;
        }
        Ok(written)
    }

    /// Returns whether a write happened
    pub async fn update_submission(&self, submission: &Submission) -> Result<bool> {
        let written = self.update(submission).await?;
        if let Some(id) = &submission.id {
            self.caches
                .user_pub_submissions
                .add_to_or_create_entry(
                    UserPublicationKey {
                        user: submission.submitter.clone(),
                        publication: submission.publication.clone(),
                    },
                    id.clone(),
                )
                .await;
        }
        Ok(written)
    }

    /// Returns whether a write happened
    pub async fn update_repository_copy(&self, copy: &RepositoryCopy) -> Result<bool> {
        let written = self.update(copy).await?;
        if let Some(id) = &copy.id {
            self.caches
                .repository_copies
                .put(
                    RepositoryCopyKey {
                        publication: copy.publication.clone(),
                        repository: copy.repository.clone(),
                    },
                    id.clone(),
                )
                .await;
        }
        Ok(written)
    }

    /// Drop the cached target copy of a publication, e.g. after the copy was
    /// relinked to another publication
    pub async fn forget_repository_copy(&self, publication: &EntityId) {
        let key = RepositoryCopyKey {
            publication: publication.clone(),
            repository: self.target_repository.clone(),
        };
        self.caches.repository_copies.remove(&key).await;
    }

    /// Returns whether a write happened
    pub async fn update_deposit(&self, deposit: &Deposit) -> Result<bool> {
        let written = self.update(deposit).await?;
        if let Some(id) = &deposit.id {
            self.caches.deposits.put(deposit.submission.clone(), id.clone()).await;
        }
        Ok(written)
    }

    async fn create<E: Entity>(&self, entity: &E) -> Result<EntityId> {
        let id = self.gateway.create_entity(entity).await?;
        metrics::record_write(E::KIND.name(), "create");
        info!(kind = %E::KIND, id = %id, "Created");
        Ok(id)
    }

    async fn update<E: Entity>(&self, entity: &E) -> Result<bool> {
        let written = self.gateway.update_if_changed(entity).await?;
        if written {
            metrics::record_write(E::KIND.name(), "update");
            info!(kind = %E::KIND, id = ?entity.id(), "Updated");
        } else {
            debug!(kind = %E::KIND, id = ?entity.id(), "Unchanged, write skipped");
        }
        Ok(written)
    }

    /// In read-after-write mode, poll the index until a search on the new
    /// entity's natural key returns it
    async fn await_indexed(
        &self,
        kind: EntityKind,
        attributes: &[(&str, Value)],
        id: &EntityId,
    ) -> Result<()> {
        if self.consistency != ConsistencyMode::ReadAfterWrite {
            return Ok(());
        }

        for attempt in 1..=self.barrier.attempts {
            let found = self.gateway.find_all_by_attributes(kind, attributes).await?;
            if found.contains(id) {
                debug!(kind = %kind, id = %id, attempt, "Index caught up");
                return Ok(());
            }
            tokio::time::sleep(self.barrier.interval).await;
        }

        Err(AppError::IndexTimeout {
            id: id.to_string(),
            attempts: self.barrier.attempts,
        })
    }
}

/// At most one match, otherwise the natural key is no longer unique
fn single(kind: EntityKind, key: &str, matches: HashSet<EntityId>) -> Result<Option<EntityId>> {
    if matches.len() > 1 {
        return Err(AppError::DataCorruption {
            resource_type: kind.name().to_string(),
            key: key.to_string(),
            count: matches.len(),
        });
    }
    Ok(matches.into_iter().next())
}

/// Natural keys must be non-blank
fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::invalid_argument(format!("{} cannot be empty", field)));
    }
    Ok(())
}

fn key_label(attributes: &[(&str, Value)]) -> String {
    attributes
        .iter()
        .map(|(field, value)| format!("{}={}", field, value))
        .collect::<Vec<_>>()
        .join(", ")
}
