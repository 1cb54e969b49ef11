//! Consistency checker: a full audit of the cached graph.
//!
//! The checker runs independently of sync (usually on a timer), looks for
//! states the tracker should never have produced and repairs what it safely
//! can. Every repair is an ordinary tracker mutation, so it is logged and
//! replicates like any other change.
//!
//! Checks, in order:
//!
//! 1. every record's hash matches its fields,
//! 2. every live branch joins two live notes,
//! 3. the branch graph has no cycles,
//! 4. every live attribute has a live owner and relation targets are live,
//! 5. every live note except the root has a live parent branch.
//!
//! Each check reads the graph as left by the previous one's repairs.

use crate::becca::tree::{find_path, Edge};
use crate::change_log::ChangeLogEntry;
use crate::config::{CheckerConfig, MissingNotePolicy};
use crate::entity::{AttributeValue, EntityId, EntityKind, EntityRecord, Note, NoteType};
use crate::error::CoreResult;
use crate::maintenance::MaintenanceGate;
use crate::tracker::ChangeTracker;
use crate::types::ChangeId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Title given to notes created to satisfy a dangling branch.
pub const PLACEHOLDER_TITLE: &str = "[missing note]";

/// What a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    /// A stored hash does not match the record's fields.
    HashDrift,
    /// A live branch references a note that was never seen.
    BranchMissingNote,
    /// A live branch references a deleted note.
    BranchDeletedNote,
    /// A branch closes a cycle.
    Cycle,
    /// A relation points at a missing or deleted note.
    DanglingRelation,
    /// A live attribute's owner is missing or deleted.
    OrphanAttribute,
    /// A live note other than the root has no live parent.
    ParentlessNote,
    /// A remote change kept failing validation and was set aside by sync.
    Quarantined,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HashDrift => "hash drift",
            Self::BranchMissingNote => "branch to missing note",
            Self::BranchDeletedNote => "branch to deleted note",
            Self::Cycle => "cycle",
            Self::DanglingRelation => "dangling relation",
            Self::OrphanAttribute => "orphan attribute",
            Self::ParentlessNote => "parentless note",
            Self::Quarantined => "quarantined change",
        };
        f.write_str(name)
    }
}

/// One problem found by the checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// What is wrong.
    pub kind: IssueKind,
    /// Table of the entity concerned.
    pub entity_kind: EntityKind,
    /// Entity concerned.
    pub entity_id: EntityId,
    /// Human-readable detail.
    pub detail: String,
    /// Whether a repair was committed.
    pub repaired: bool,
}

/// Outcome of one checker pass.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    /// Problems found, in check order.
    pub findings: Vec<Finding>,
    /// The pass did not run because maintenance was in progress.
    pub skipped: bool,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl CheckReport {
    /// No findings (and the pass actually ran).
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.skipped && self.findings.is_empty()
    }

    /// Findings that were repaired.
    #[must_use]
    pub fn repaired(&self) -> usize {
        self.findings.iter().filter(|f| f.repaired).count()
    }

    /// Findings of one kind.
    pub fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }
}

/// A change that sync gave up on: a remote change that would not apply
/// here, or a local one the peer kept refusing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedChange {
    /// The log entry.
    pub entry: ChangeLogEntry,
    /// Last validation failure.
    pub reason: String,
    /// How many times it was tried.
    pub attempts: u32,
}

/// Changes set aside after repeated validation failures.
///
/// Shared between the sync engine, which fills it, and the checker, which
/// reports it.
#[derive(Debug, Default)]
pub struct Quarantine {
    entries: Mutex<BTreeMap<ChangeId, QuarantinedChange>>,
}

impl Quarantine {
    /// Creates an empty quarantine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a change aside, replacing an earlier record of it.
    pub fn add(&self, entry: ChangeLogEntry, reason: impl Into<String>, attempts: u32) {
        let reason = reason.into();
        error!(
            change = %entry.change_id,
            kind = %entry.entity_kind,
            id = %entry.entity_id,
            attempts,
            %reason,
            "change quarantined"
        );
        self.entries.lock().insert(
            entry.change_id.clone(),
            QuarantinedChange {
                entry,
                reason,
                attempts,
            },
        );
    }

    /// Releases a change, e.g. after it finally applied.
    pub fn remove(&self, change_id: &ChangeId) -> Option<QuarantinedChange> {
        self.entries.lock().remove(change_id)
    }

    /// Whether a change is quarantined.
    pub fn contains(&self, change_id: &ChangeId) -> bool {
        self.entries.lock().contains_key(change_id)
    }

    /// Every quarantined change, ordered by change id.
    pub fn list(&self) -> Vec<QuarantinedChange> {
        self.entries.lock().values().cloned().collect()
    }

    /// Number of quarantined changes.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is quarantined.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

enum NoteState {
    Missing,
    Deleted,
    Live,
}

/// Audits and repairs the graph held by a tracker.
pub struct ConsistencyChecker {
    tracker: Arc<ChangeTracker>,
    gate: MaintenanceGate,
    quarantine: Arc<Quarantine>,
    config: CheckerConfig,
}

impl ConsistencyChecker {
    /// Creates a checker.
    pub fn new(
        tracker: Arc<ChangeTracker>,
        gate: MaintenanceGate,
        quarantine: Arc<Quarantine>,
        config: CheckerConfig,
    ) -> Self {
        Self {
            tracker,
            gate,
            quarantine,
            config,
        }
    }

    /// The checker's configuration.
    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Runs one pass, repairing if the configuration allows it.
    ///
    /// Skipped (with `skipped` set) while a sync or import holds the gate.
    /// Never fails: a repair that cannot be committed is reported as an
    /// unrepaired finding.
    pub fn run(&self) -> CheckReport {
        if self.gate.is_busy() {
            info!(
                jobs = self.gate.active_jobs(),
                "consistency check skipped: maintenance in progress"
            );
            return CheckReport {
                skipped: true,
                ..CheckReport::default()
            };
        }
        self.pass(self.config.auto_repair)
    }

    /// Runs one pass without repairing anything, regardless of the gate.
    pub fn check_only(&self) -> CheckReport {
        self.pass(false)
    }

    fn pass(&self, repair: bool) -> CheckReport {
        let started = Instant::now();
        let mut findings = Vec::new();
        self.check_hashes(repair, &mut findings);
        self.check_branches(repair, &mut findings);
        self.check_cycles(repair, &mut findings);
        self.check_attributes(repair, &mut findings);
        self.check_parents(repair, &mut findings);
        for quarantined in self.quarantine.list() {
            findings.push(Finding {
                kind: IssueKind::Quarantined,
                entity_kind: quarantined.entry.entity_kind,
                entity_id: quarantined.entry.entity_id.clone(),
                detail: format!(
                    "change {} failed {} times: {}",
                    quarantined.entry.change_id, quarantined.attempts, quarantined.reason
                ),
                repaired: false,
            });
        }

        let report = CheckReport {
            findings,
            skipped: false,
            duration: started.elapsed(),
        };
        if report.findings.is_empty() {
            info!(elapsed = ?report.duration, "consistency check clean");
        } else {
            info!(
                findings = report.findings.len(),
                repaired = report.repaired(),
                elapsed = ?report.duration,
                "consistency check finished"
            );
        }
        report
    }

    fn note_state(&self, id: &EntityId) -> NoteState {
        let state = self.tracker.becca().read();
        match state.notes.get(id) {
            None => NoteState::Missing,
            Some(note) if note.is_deleted => NoteState::Deleted,
            Some(_) => NoteState::Live,
        }
    }

    fn attempt(&self, repair: bool, what: &Finding, fix: impl FnOnce() -> CoreResult<()>) -> bool {
        if !repair {
            return false;
        }
        match fix() {
            Ok(()) => {
                info!(kind = %what.kind, id = %what.entity_id, "repaired");
                true
            }
            Err(e) => {
                warn!(kind = %what.kind, id = %what.entity_id, error = %e, "repair failed");
                false
            }
        }
    }

    fn record(
        &self,
        findings: &mut Vec<Finding>,
        repair: bool,
        mut finding: Finding,
        fix: impl FnOnce() -> CoreResult<()>,
    ) {
        finding.repaired = self.attempt(repair, &finding, fix);
        findings.push(finding);
    }

    fn check_hashes(&self, repair: bool, findings: &mut Vec<Finding>) {
        let drifted: Vec<EntityRecord> = self
            .tracker
            .becca()
            .read()
            .records()
            .filter(|r| !r.hash_is_valid())
            .collect();
        for record in drifted {
            warn!(
                kind = %record.kind(),
                id = %record.id(),
                stored = %record.hash().short(),
                computed = %record.compute_hash().short(),
                "hash drift: entity changed outside the tracker"
            );
            let finding = Finding {
                kind: IssueKind::HashDrift,
                entity_kind: record.kind(),
                entity_id: record.id().clone(),
                detail: format!("stored hash {} does not match fields", record.hash().short()),
                repaired: false,
            };
            self.record(findings, repair, finding, || {
                self.tracker
                    .mutate(|draft| {
                        draft.stage_rehash(record);
                        Ok(())
                    })
                    .map(|_| ())
            });
        }
    }

    fn check_branches(&self, repair: bool, findings: &mut Vec<Finding>) {
        let branches: Vec<(EntityId, EntityId, EntityId)> = {
            let state = self.tracker.becca().read();
            let mut live: Vec<_> = state
                .branches
                .values()
                .filter(|b| !b.is_deleted)
                .map(|b| (b.id.clone(), b.parent_note_id.clone(), b.note_id.clone()))
                .collect();
            live.sort();
            live
        };
        for (branch_id, parent, child) in branches {
            for note_id in [&parent, &child] {
                let (kind, detail) = match self.note_state(note_id) {
                    NoteState::Live => continue,
                    NoteState::Missing => (
                        IssueKind::BranchMissingNote,
                        format!("references unknown note {note_id}"),
                    ),
                    NoteState::Deleted => (
                        IssueKind::BranchDeletedNote,
                        format!("references deleted note {note_id}"),
                    ),
                };
                let placeholder = kind == IssueKind::BranchMissingNote
                    && self.config.missing_note_policy == MissingNotePolicy::CreatePlaceholder;
                let finding = Finding {
                    kind,
                    entity_kind: EntityKind::Branch,
                    entity_id: branch_id.clone(),
                    detail,
                    repaired: false,
                };
                self.record(findings, repair, finding, || {
                    if placeholder {
                        let note = Note::with_id(note_id.clone(), PLACEHOLDER_TITLE, NoteType::Text);
                        self.tracker
                            .mutate(|draft| draft.stage_local(note.into()).map(|_| ()))
                            .map(|_| ())
                    } else {
                        self.tracker
                            .mutate(|draft| {
                                draft.stage_tombstone(EntityKind::Branch, &branch_id).map(|_| ())
                            })
                            .map(|_| ())
                    }
                });
                if !placeholder {
                    break;
                }
            }
        }
    }

    fn check_cycles(&self, repair: bool, findings: &mut Vec<Finding>) {
        let limit = self.tracker.becca().stats().branches + 1;
        for _ in 0..limit {
            let Some(cycle) = self.find_cycle() else {
                return;
            };
            let Some(newest) = cycle
                .iter()
                .max_by(|a, b| a.stamp.cmp(&b.stamp).then_with(|| a.branch_id.cmp(&b.branch_id)))
                .cloned()
            else {
                return;
            };
            let path: Vec<&str> = cycle.iter().map(|e| e.branch_id.as_str()).collect();
            warn!(branch = %newest.branch_id, cycle = ?path, "branch cycle found");
            let finding = Finding {
                kind: IssueKind::Cycle,
                entity_kind: EntityKind::Branch,
                entity_id: newest.branch_id.clone(),
                detail: format!("closes cycle through {}", path.join(" -> ")),
                repaired: false,
            };
            let before = findings.len();
            self.record(findings, repair, finding, || {
                self.tracker
                    .mutate(|draft| {
                        draft
                            .stage_tombstone(EntityKind::Branch, &newest.branch_id)
                            .map(|_| ())
                    })
                    .map(|_| ())
            });
            if !findings[before].repaired {
                return;
            }
        }
    }

    /// The edges of some cycle, if the branch graph has one.
    fn find_cycle(&self) -> Option<Vec<Edge>> {
        let state = self.tracker.becca().read();
        let mut branches: Vec<_> = state.branches.values().filter(|b| !b.is_deleted).collect();
        branches.sort_by(|a, b| a.id.cmp(&b.id));
        branches.into_iter().find_map(|branch| {
            let edge = Edge::from(branch);
            if branch.parent_note_id == branch.note_id {
                return Some(vec![edge]);
            }
            find_path(&*state, &branch.note_id, &branch.parent_note_id).map(|mut path| {
                path.push(edge);
                path
            })
        })
    }

    fn check_attributes(&self, repair: bool, findings: &mut Vec<Finding>) {
        let attributes = {
            let state = self.tracker.becca().read();
            let mut live: Vec<_> = state
                .attributes
                .values()
                .filter(|a| !a.is_deleted)
                .cloned()
                .collect();
            live.sort_by(|a, b| a.id.cmp(&b.id));
            live
        };
        for attribute in attributes {
            if !matches!(self.note_state(&attribute.note_id), NoteState::Live) {
                let finding = Finding {
                    kind: IssueKind::OrphanAttribute,
                    entity_kind: EntityKind::Attribute,
                    entity_id: attribute.id.clone(),
                    detail: format!("owner {} is missing or deleted", attribute.note_id),
                    repaired: false,
                };
                self.record(findings, repair, finding, || {
                    self.tracker
                        .mutate(|draft| {
                            draft
                                .stage_tombstone(EntityKind::Attribute, &attribute.id)
                                .map(|_| ())
                        })
                        .map(|_| ())
                });
                continue;
            }
            let Some(target) = attribute.value.target().cloned() else {
                continue;
            };
            if matches!(self.note_state(&target), NoteState::Live) {
                continue;
            }
            let finding = Finding {
                kind: IssueKind::DanglingRelation,
                entity_kind: EntityKind::Attribute,
                entity_id: attribute.id.clone(),
                detail: format!("relation {} targets {target}", attribute.name),
                repaired: false,
            };
            let mut broken = attribute.clone();
            broken.value = AttributeValue::Relation(None);
            self.record(findings, repair, finding, || {
                self.tracker
                    .mutate(|draft| draft.stage_local(broken.into()).map(|_| ()))
                    .map(|_| ())
            });
        }
    }

    fn check_parents(&self, repair: bool, findings: &mut Vec<Finding>) {
        let parentless: Vec<EntityId> = {
            let state = self.tracker.becca().read();
            let mut ids: Vec<_> = state
                .notes
                .values()
                .filter(|n| !n.is_deleted && !n.id.is_root())
                .filter(|n| state.parent_branches(&n.id).next().is_none())
                .map(|n| n.id.clone())
                .collect();
            ids.sort();
            ids
        };
        let root = EntityId::root();
        for id in parentless {
            let finding = Finding {
                kind: IssueKind::ParentlessNote,
                entity_kind: EntityKind::Note,
                entity_id: id.clone(),
                detail: "no live parent branch; re-attaching under root".into(),
                repaired: false,
            };
            self.record(findings, repair, finding, || {
                self.tracker.clone_note(&id, &root, None).map(|_| ())
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::becca::Becca;
    use crate::change_feed::ChangeFeed;
    use crate::config::GraphConfig;
    use crate::entity::{Attribute, Branch, ContentHash};
    use crate::store::{DurableStore, MemoryStore};
    use crate::tracker::NewNote;
    use crate::types::{InstanceId, Stamp};

    struct Fixture {
        store: Arc<MemoryStore>,
        checker: ConsistencyChecker,
        tracker: Arc<ChangeTracker>,
        gate: MaintenanceGate,
    }

    /// Loads a graph from records written straight into the store, bypassing
    /// the tracker the way a manual store edit would.
    fn fixture(records: Vec<EntityRecord>, config: CheckerConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.write_entity(Note::genesis_root().into()).unwrap();
        for record in records {
            store.write_entity(record).unwrap();
        }
        let becca = Arc::new(Becca::load(store.as_ref()).unwrap());
        let tracker = Arc::new(
            ChangeTracker::new(
                store.clone(),
                becca,
                Arc::new(ChangeFeed::default()),
                GraphConfig::new().instance_id(InstanceId::from("a")),
            )
            .unwrap(),
        );
        let gate = MaintenanceGate::new();
        let checker = ConsistencyChecker::new(
            Arc::clone(&tracker),
            gate.clone(),
            Arc::new(Quarantine::new()),
            config,
        );
        Fixture {
            store,
            checker,
            tracker,
            gate,
        }
    }

    fn sealed(mut record: EntityRecord, counter: u64) -> EntityRecord {
        record.restamp(Stamp::new(counter, InstanceId::from("x")));
        record
    }

    fn note(id: &str) -> EntityRecord {
        sealed(
            Note::with_id(EntityId::from(id), id, NoteType::Text).into(),
            1,
        )
    }

    fn branch(parent: &str, child: &str, counter: u64) -> EntityRecord {
        sealed(
            Branch::new(EntityId::from(parent), EntityId::from(child), 0).into(),
            counter,
        )
    }

    #[test]
    fn healthy_graph_is_clean() {
        let f = fixture(Vec::new(), CheckerConfig::new());
        let (n, _) = f
            .tracker
            .create_note(&EntityId::root(), NewNote::text("n"))
            .unwrap();
        f.tracker.add_label(&n.id, "x", "y", true).unwrap();
        assert!(f.checker.run().is_clean());
    }

    #[test]
    fn skipped_while_busy() {
        let f = fixture(Vec::new(), CheckerConfig::new());
        let guard = f.gate.enter();
        let report = f.checker.run();
        assert!(report.skipped);
        assert!(!report.is_clean());
        drop(guard);
        assert!(f.checker.run().is_clean());
    }

    #[test]
    fn branch_to_missing_note_is_removed() {
        let f = fixture(
            vec![note("a"), branch("root", "a", 2), branch("a", "ghost", 3)],
            CheckerConfig::new(),
        );
        let report = f.checker.run();
        let finding = report.of_kind(IssueKind::BranchMissingNote).next().unwrap();
        assert!(finding.repaired);
        assert!(f
            .tracker
            .becca()
            .get_branch(&EntityId::from("a_ghost"))
            .is_none());
        assert!(f.checker.run().is_clean());
    }

    #[test]
    fn branch_to_missing_note_gets_a_placeholder() {
        let config = CheckerConfig::new().missing_note_policy(MissingNotePolicy::CreatePlaceholder);
        let f = fixture(vec![note("a"), branch("root", "a", 2), branch("a", "ghost", 3)], config);
        f.checker.run();
        let ghost = f.tracker.becca().get_note(&EntityId::from("ghost")).unwrap();
        assert_eq!(ghost.title, PLACEHOLDER_TITLE);
        assert_eq!(f.tracker.becca().get_parents(&ghost.id).len(), 1);
        assert!(f.checker.run().is_clean());
    }

    #[test]
    fn cycle_is_cut_at_newest_edge() {
        let f = fixture(
            vec![
                note("a"),
                note("b"),
                branch("root", "a", 2),
                branch("a", "b", 3),
                branch("b", "a", 4),
            ],
            CheckerConfig::new(),
        );
        let report = f.checker.run();
        let cut: Vec<_> = report.of_kind(IssueKind::Cycle).collect();
        assert_eq!(cut.len(), 1);
        assert_eq!(cut[0].entity_id, EntityId::from("b_a"));
        assert!(f.tracker.becca().get_branch(&EntityId::from("a_b")).is_some());
        assert!(f.checker.run().is_clean());
    }

    #[test]
    fn detached_cycle_is_cut_and_reattached() {
        let f = fixture(
            vec![note("a"), note("b"), branch("a", "b", 3), branch("b", "a", 4)],
            CheckerConfig::new(),
        );
        let report = f.checker.run();
        assert_eq!(report.of_kind(IssueKind::Cycle).count(), 1);
        assert_eq!(report.of_kind(IssueKind::ParentlessNote).count(), 1);
        let becca = f.tracker.becca();
        assert!(becca.is_ancestor(&EntityId::root(), &EntityId::from("b")));
        assert!(f.checker.run().is_clean());
    }

    #[test]
    fn attribute_repairs() {
        let gone = sealed(
            Attribute::label(EntityId::from("gone"), "orphan", "").into(),
            2,
        );
        let relation = sealed(
            Attribute::relation(EntityId::from("a"), "points", EntityId::from("gone")).into(),
            3,
        );
        let relation_id = relation.id().clone();
        let f = fixture(
            vec![note("a"), branch("root", "a", 2), gone, relation],
            CheckerConfig::new(),
        );
        let report = f.checker.run();
        assert_eq!(report.of_kind(IssueKind::OrphanAttribute).count(), 1);
        assert_eq!(report.of_kind(IssueKind::DanglingRelation).count(), 1);
        let repaired = f.tracker.becca().get_attribute(&relation_id).unwrap();
        assert_eq!(repaired.value, AttributeValue::Relation(None));
        assert!(f.checker.run().is_clean());
    }

    #[test]
    fn hash_drift_is_rederived_through_the_log() {
        let mut drifted = note("a");
        if let EntityRecord::Note(n) = &mut drifted {
            n.title = "edited by hand".into();
        }
        let f = fixture(vec![drifted, branch("root", "a", 2)], CheckerConfig::new());
        let before = f.store.last_position().unwrap();

        let report = f.checker.run();
        assert!(report.of_kind(IssueKind::HashDrift).all(|x| x.repaired));
        assert_eq!(report.of_kind(IssueKind::HashDrift).count(), 1);
        assert!(f.store.last_position().unwrap() > before);
        let note = f.tracker.becca().get_note(&EntityId::from("a")).unwrap();
        assert_eq!(note.title, "edited by hand");
        assert_ne!(note.hash, ContentHash::default());
        assert!(f.checker.run().is_clean());
    }

    #[test]
    fn report_only_mode_changes_nothing() {
        let config = CheckerConfig::new().auto_repair(false);
        let f = fixture(vec![note("a")], config);
        let before = f.store.last_position().unwrap();
        let report = f.checker.run();
        assert_eq!(report.of_kind(IssueKind::ParentlessNote).count(), 1);
        assert_eq!(report.repaired(), 0);
        assert_eq!(f.store.last_position().unwrap(), before);
    }

    #[test]
    fn quarantined_changes_are_reported() {
        let f = fixture(Vec::new(), CheckerConfig::new());
        let record = note("q");
        let entry = ChangeLogEntry::describe(
            ChangeId::new(InstanceId::from("peer"), 7),
            &record,
            None,
        );
        f.checker.quarantine.add(entry, "missing note", 3);
        let report = f.checker.run();
        let finding = report.of_kind(IssueKind::Quarantined).next().unwrap();
        assert_eq!(finding.entity_id, EntityId::from("q"));
        assert!(!finding.repaired);
    }
}
