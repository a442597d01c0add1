//! Paged consistency audit between the hot and durable stores.
//!
//! Each pass takes one page of entity ids of one data class from the durable
//! store, audits every entity concurrently, and repairs drift toward the
//! authoritative side:
//!
//! - relation sets are hot-authoritative: missing durable rows are inserted
//!   and durable rows with no hot member are deleted;
//! - aggregate counters are durable-authoritative: the hot ranking score is
//!   overwritten with the recomputed durable count.
//!
//! Per-class offsets persist across passes and wrap to 0 when a page comes
//! back empty. When an aggregate class wraps, ranked entities with no durable
//! count are audited too, so their stale hot counters drop back to 0.
//! A failure on one entity never affects the rest of its page.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use hotsync_core::keys::relation_set_key;
use hotsync_core::{
    AggregateKind, Authority, ConsistencyReport, DataClass, EdgeKey, EntityId, ReconcileSummary,
    RelationKind,
};
use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::diff::{diff_sets, SetDiff};
use crate::config::ReconcileConfig;
use crate::storage::{DurableStore, HotStore};

#[allow(clippy::cast_possible_truncation)]
fn count_of(score: f64) -> i64 {
    score.round() as i64
}

#[allow(clippy::cast_precision_loss)]
fn score_of(count: i64) -> f64 {
    count as f64
}

fn len_of(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

/// One entity's audit: the report, plus the repair error if a repair was
/// attempted and failed.
struct Audit {
    report: ConsistencyReport,
    repair_error: Option<anyhow::Error>,
}

impl Audit {
    fn unrepaired(report: ConsistencyReport) -> Self {
        Self {
            report,
            repair_error: None,
        }
    }

    fn outcome(&self) -> &'static str {
        if self.repair_error.is_some() {
            "failed"
        } else if self.report.fixed {
            "fixed"
        } else if self.report.is_consistent() {
            "consistent"
        } else {
            "drift"
        }
    }
}

fn record_outcome(class: DataClass, outcome: &'static str) {
    counter!(
        "hotsync_reconcile_entities_total",
        "class" => class.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Audits and repairs drift between the hot and durable stores.
pub struct Reconciler {
    hot: Arc<dyn HotStore>,
    durable: Arc<dyn DurableStore>,
    config: ReconcileConfig,
    offsets: Mutex<HashMap<DataClass, usize>>,
    cursor: AtomicUsize,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        hot: Arc<dyn HotStore>,
        durable: Arc<dyn DurableStore>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            hot,
            durable,
            config,
            offsets: Mutex::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Offset the next page of `class` starts at.
    #[must_use]
    pub fn offset(&self, class: DataClass) -> usize {
        self.offsets.lock().get(&class).copied().unwrap_or(0)
    }

    /// Audits one page of the next configured class, rotating through the
    /// classes on each call. With no classes configured the summary is empty
    /// and carries no data type.
    pub async fn run_next(&self) -> ReconcileSummary {
        let classes = &self.config.classes;
        if classes.is_empty() {
            debug!("no data classes enabled for reconciliation");
            return ReconcileSummary::default();
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % classes.len();
        self.reconcile_page(classes[index]).await
    }

    /// Audits the page of `class` at its current offset and advances the
    /// offset, or resets it to 0 when the listing is exhausted.
    pub async fn reconcile_page(&self, class: DataClass) -> ReconcileSummary {
        let offset = self.offset(class);
        let mut summary = ReconcileSummary {
            data_type: Some(class),
            offset,
            ..ReconcileSummary::default()
        };

        let ids = match self
            .durable
            .distinct_owner_ids(class, offset, self.config.page_size)
            .await
        {
            Ok(ids) => ids,
            Err(err) => {
                error!(class = %class, offset, error = %err, "listing entities failed");
                summary.failures = 1;
                return summary;
            }
        };
        if ids.is_empty() {
            self.offsets.lock().insert(class, 0);
            summary.cycle_completed = true;
            debug!(class = %class, offset, "reconcile cycle completed; offset reset");
            if class.authority() == Authority::Durable {
                self.sweep_ranking(class, &mut summary).await;
            }
            return summary;
        }

        let page_len = ids.len();
        self.audit_all(class, ids, &mut summary).await;
        self.offsets.lock().insert(class, offset + page_len);

        info!(
            class = %class,
            offset,
            audited = summary.audited,
            inconsistent = summary.inconsistent,
            fixed = summary.fixed,
            failures = summary.failures,
            "reconcile page finished"
        );
        summary
    }

    /// Audits a single entity on demand, repairing drift when fixing is
    /// enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if either side could not be read. A failed repair is
    /// logged and reported as `fixed = false`.
    pub async fn reconcile_entity(
        &self,
        class: DataClass,
        entity: EntityId,
    ) -> anyhow::Result<ConsistencyReport> {
        match self.audit(class, entity).await {
            Ok(audit) => {
                record_outcome(class, audit.outcome());
                Ok(audit.report)
            }
            Err(err) => {
                record_outcome(class, "failed");
                Err(err)
            }
        }
    }

    /// Rewrites the hot ranking of `kind` from the durable aggregates.
    /// Ranked entities with no durable count are reset to 0.
    ///
    /// Returns the number of ranking entries written.
    ///
    /// # Errors
    ///
    /// Returns the first store error; entries written before it stay written.
    pub async fn sync_ranking(&self, kind: AggregateKind) -> anyhow::Result<usize> {
        let key = kind.ranking_key();
        let counts = self.durable.aggregate_counts(kind).await?;
        let counted: HashSet<String> = counts.iter().map(|(id, _)| id.to_string()).collect();

        for (id, count) in &counts {
            self.hot.zadd(key, &id.to_string(), score_of(*count)).await?;
        }

        let stale: Vec<String> = self
            .hot
            .zrange_by_score(key, f64::NEG_INFINITY, f64::INFINITY, usize::MAX)
            .await?
            .into_iter()
            .filter(|(member, score)| count_of(*score) != 0 && !counted.contains(member))
            .map(|(member, _)| member)
            .collect();
        for member in &stale {
            self.hot.zadd(key, member, 0.0).await?;
        }

        info!(
            ranking = key,
            synced = counts.len(),
            zeroed = stale.len(),
            "ranking synced from durable counts"
        );
        Ok(counts.len() + stale.len())
    }

    async fn audit_all(&self, class: DataClass, ids: Vec<EntityId>, summary: &mut ReconcileSummary) {
        let outcomes: Vec<(EntityId, anyhow::Result<Audit>)> = stream::iter(ids)
            .map(|id| async move { (id, self.audit(class, id).await) })
            .buffer_unordered(self.config.parallelism.max(1))
            .collect()
            .await;

        for (id, outcome) in outcomes {
            summary.audited += 1;
            match outcome {
                Ok(audit) => {
                    record_outcome(class, audit.outcome());
                    if !audit.report.is_consistent() {
                        summary.inconsistent += 1;
                    }
                    if audit.report.fixed {
                        summary.fixed += 1;
                    }
                    if audit.repair_error.is_some() {
                        summary.failures += 1;
                    }
                    summary.reports.push(audit.report);
                }
                Err(err) => {
                    record_outcome(class, "failed");
                    warn!(class = %class, entity = id, error = %err, "audit failed");
                    summary.failures += 1;
                }
            }
        }
        summary.reports.sort_by_key(|r| r.entity_id);
    }

    /// Audits ranked entities that the durable listing never returns: those
    /// holding a non-zero hot count but no durable aggregate.
    async fn sweep_ranking(&self, class: DataClass, summary: &mut ReconcileSummary) {
        let DataClass::Aggregate(kind) = class else {
            return;
        };
        let key = kind.ranking_key();
        let listed = async {
            let counted: HashSet<EntityId> = self
                .durable
                .aggregate_counts(kind)
                .await?
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            let ranked = self
                .hot
                .zrange_by_score(key, f64::NEG_INFINITY, f64::INFINITY, usize::MAX)
                .await?;
            anyhow::Ok((counted, ranked))
        };
        let (counted, ranked) = match listed.await {
            Ok(listed) => listed,
            Err(err) => {
                error!(class = %class, error = %err, "listing ranked entities failed");
                summary.failures += 1;
                return;
            }
        };

        let orphans: Vec<EntityId> = ranked
            .into_iter()
            .filter(|(_, score)| count_of(*score) != 0)
            .filter_map(|(member, _)| match member.parse::<EntityId>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(ranking = key, member = %member, "non-numeric ranking member ignored");
                    None
                }
            })
            .filter(|id| !counted.contains(id))
            .collect();
        if orphans.is_empty() {
            return;
        }
        debug!(class = %class, orphans = orphans.len(), "auditing ranked entities without durable counts");
        self.audit_all(class, orphans, summary).await;
    }

    async fn audit(&self, class: DataClass, entity: EntityId) -> anyhow::Result<Audit> {
        match class {
            DataClass::Relation(kind) => self.audit_relation(kind, entity).await,
            DataClass::Aggregate(kind) => self.audit_aggregate(kind, entity).await,
        }
    }

    async fn audit_relation(&self, kind: RelationKind, subject: EntityId) -> anyhow::Result<Audit> {
        let key = relation_set_key(kind, subject);
        let hot: HashSet<EntityId> = self
            .hot
            .set_members(&key)
            .await?
            .into_iter()
            .filter_map(|member| match member.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(key = %key, member = %member, "non-numeric set member ignored");
                    None
                }
            })
            .collect();
        let cold = self.durable.relation_members(kind, subject).await?;

        let diff = diff_sets(&hot, &cold);
        let mut report = ConsistencyReport::new(
            DataClass::Relation(kind),
            subject,
            len_of(hot.len()),
            len_of(cold.len()),
        );
        report.missing_in_cold = diff.missing_in_cold.len();
        report.missing_in_hot = diff.missing_in_hot.len();

        if report.is_consistent() {
            debug!(%report, "consistent");
            return Ok(Audit::unrepaired(report));
        }
        warn!(%report, "relation drift detected");
        if !self.config.fix_enabled {
            return Ok(Audit::unrepaired(report));
        }
        let repair = self.repair_relation(kind, subject, &diff).await;
        Ok(Self::settle(report, repair))
    }

    async fn repair_relation(
        &self,
        kind: RelationKind,
        subject: EntityId,
        diff: &SetDiff<EntityId>,
    ) -> anyhow::Result<()> {
        let edges = |objects: &[EntityId]| -> Vec<EdgeKey> {
            objects.iter().map(|o| EdgeKey::new(subject, *o)).collect()
        };
        if !diff.missing_in_cold.is_empty() {
            self.durable
                .insert_relations(kind, &edges(&diff.missing_in_cold))
                .await?;
        }
        if !diff.missing_in_hot.is_empty() {
            self.durable
                .delete_relations(kind, &edges(&diff.missing_in_hot))
                .await?;
        }
        Ok(())
    }

    async fn audit_aggregate(&self, kind: AggregateKind, entity: EntityId) -> anyhow::Result<Audit> {
        let key = kind.ranking_key();
        let member = entity.to_string();
        let hot = self.hot.zscore(key, &member).await?.map_or(0, count_of);
        let cold = self.durable.aggregate_count(kind, entity).await?;

        let report = ConsistencyReport::new(DataClass::Aggregate(kind), entity, hot, cold);
        if report.is_consistent() {
            debug!(%report, "consistent");
            return Ok(Audit::unrepaired(report));
        }
        warn!(%report, "aggregate drift detected");
        if !self.config.fix_enabled {
            return Ok(Audit::unrepaired(report));
        }
        let repair = self.hot.zadd(key, &member, score_of(cold)).await;
        Ok(Self::settle(report, repair))
    }

    fn settle(mut report: ConsistencyReport, repair: anyhow::Result<()>) -> Audit {
        match repair {
            Ok(()) => {
                report.fixed = true;
                info!(%report, "drift repaired");
                Audit::unrepaired(report)
            }
            Err(err) => {
                error!(%report, error = %err, "repair failed");
                Audit {
                    report,
                    repair_error: Some(err),
                }
            }
        }
    }
}
