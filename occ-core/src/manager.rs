//! `ContextManager`: orchestrates the tokenizer, store, GC engine, and
//! analyzer behind the operation surface consumed by an outer tool layer
//! (§4.G).

use std::sync::Mutex as StdMutex;

use hashbrown::{HashMap, HashSet};
use tracing::instrument;

use crate::analyzer::{AnalysisReport, Analyzer};
use crate::config::Config;
use crate::errors::{BulkResult, ContextError, ContextResult};
use crate::gc::{GCEngine, PruneAction, RootSetParams};
use crate::segment::{Generation, ProjectId, Segment, SegmentId, TaskId};
use crate::store::{SegmentFilters, SegmentStore};
use crate::tokenizer::Tokenizer;
use occ_commons::current_timestamp;

/// A new segment's payload, prior to token counting and id assignment.
#[derive(Debug, Clone)]
pub struct SegmentDraft {
    pub segment_id: SegmentId,
    pub text: String,
    pub segment_type: crate::segment::SegmentType,
    pub task_id: Option<TaskId>,
    pub file_path: Option<String>,
    pub line_range: Option<crate::segment::LineRange>,
    pub tags: hashbrown::HashSet<String>,
    pub topic_id: Option<String>,
    pub references: hashbrown::HashSet<SegmentId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkingSet {
    pub segments: Vec<Segment>,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GcAnalysis {
    pub candidates: Vec<crate::gc::PruningCandidate>,
    pub plan: Option<crate::gc::PruningPlan>,
}

#[derive(Debug)]
pub struct PruneResult {
    pub pruned: Vec<SegmentId>,
    pub tokens_freed: u64,
    pub errors: Vec<(SegmentId, ContextError)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskContext {
    pub segments: Vec<Segment>,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub snapshot_id: String,
    pub referenced_ids: Vec<SegmentId>,
    pub total_tokens: u64,
}

/// One recorded `gc_prune` execution, kept for later inspection/audit.
/// Grounded on the teacher's pruning-decision ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct PruningDecisionRecord {
    pub project_id: ProjectId,
    pub segment_id: SegmentId,
    pub score: f64,
    pub reason: String,
    pub action: &'static str,
    pub recorded_at: u64,
}

#[derive(Default)]
struct PruningDecisionLedger {
    records: Vec<PruningDecisionRecord>,
}

impl PruningDecisionLedger {
    fn record(&mut self, record: PruningDecisionRecord) {
        self.records.push(record);
    }
}

pub struct ContextManager {
    store: SegmentStore,
    tokenizer: Tokenizer,
    gc: GCEngine,
    analyzer: Analyzer,
    config: Config,
    current_task: StdMutex<HashMap<ProjectId, Option<TaskId>>>,
    ledger: StdMutex<PruningDecisionLedger>,
}

impl ContextManager {
    pub fn new(config: Config) -> ContextResult<Self> {
        let store = SegmentStore::open(&config)?;
        Ok(Self {
            store,
            tokenizer: Tokenizer::new(),
            gc: GCEngine::new(),
            analyzer: Analyzer::new(),
            config,
            current_task: StdMutex::new(HashMap::new()),
            ledger: StdMutex::new(PruningDecisionLedger::default()),
        })
    }

    fn current_task_for(&self, project_id: &str) -> Option<TaskId> {
        self.current_task
            .lock()
            .expect("current_task lock poisoned")
            .get(project_id)
            .cloned()
            .flatten()
    }

    /// `analyze(descriptors?, project_id, task_id?, token_limit?)`.
    #[instrument(skip(self, descriptors))]
    pub async fn analyze(
        &self,
        project_id: &str,
        descriptors: Vec<SegmentDraft>,
        task_id: Option<&str>,
        token_limit: Option<u64>,
    ) -> ContextResult<AnalysisReport> {
        for draft in descriptors {
            self.ingest(project_id, draft).await?;
        }

        let segments = self.store.snapshot(project_id).await?;
        let task_id = task_id.map(str::to_string).or_else(|| self.current_task_for(project_id));
        let now = current_timestamp();
        let limit = token_limit.unwrap_or(self.config.token_limit);

        Ok(self
            .analyzer
            .analyze(&segments, &self.config, now, task_id.as_deref(), None, limit))
    }

    async fn ingest(&self, project_id: &str, draft: SegmentDraft) -> ContextResult<()> {
        let now = current_timestamp();
        let mut segment = Segment::new(
            draft.segment_id,
            project_id,
            draft.text,
            draft.segment_type,
            now,
        );
        segment.task_id = draft.task_id;
        segment.file_path = draft.file_path;
        segment.line_range = draft.line_range;
        segment.tags = draft.tags;
        segment.topic_id = draft.topic_id;
        segment.references = draft.references;
        self.tokenizer.count_segment(&mut segment);
        self.store.store(segment).await
    }

    /// `get_working_set(project_id, task_id?)`: §3.3's view over the
    /// current task, recent messages, active-file segments, pinned
    /// segments, and recent decisions.
    #[instrument(skip(self))]
    pub async fn get_working_set(
        &self,
        project_id: &str,
        task_id: Option<&str>,
    ) -> ContextResult<WorkingSet> {
        let segments = self.store.snapshot(project_id).await?;
        let task_id = task_id.map(str::to_string).or_else(|| self.current_task_for(project_id));
        let now = current_timestamp();

        let roots = self.gc.root_set(
            &segments,
            task_id.as_deref(),
            None,
            now,
            RootSetParams {
                recent_messages_n: self.config.gc_recent_messages_n,
            },
        );

        let by_id: HashMap<&str, &Segment> =
            segments.iter().map(|s| (s.segment_id.as_str(), s)).collect();
        let mut working: Vec<Segment> = roots
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|s| (*s).clone()))
            .collect();
        working.sort_by(|a, b| a.segment_id.cmp(&b.segment_id));

        let total_tokens = working.iter().map(|s| s.tokens.unwrap_or(0) as u64).sum();
        Ok(WorkingSet {
            segments: working,
            total_tokens,
        })
    }

    /// `gc_analyze(project_id, task_id?, target_tokens?)`.
    #[instrument(skip(self))]
    pub async fn gc_analyze(
        &self,
        project_id: &str,
        task_id: Option<&str>,
        target_tokens: Option<u64>,
    ) -> ContextResult<GcAnalysis> {
        let segments = self.store.snapshot(project_id).await?;
        let task_id = task_id.map(str::to_string).or_else(|| self.current_task_for(project_id));
        let now = current_timestamp();

        let roots = self.gc.root_set(
            &segments,
            task_id.as_deref(),
            None,
            now,
            RootSetParams {
                recent_messages_n: self.config.gc_recent_messages_n,
            },
        );
        let marked = self.gc.mark(&segments, &roots);

        let candidates: Vec<_> = segments
            .iter()
            .filter(|s| !s.pinned)
            .map(|s| crate::gc::PruningCandidate {
                segment_id: s.segment_id.clone(),
                score: self.gc.score(s, now),
                tokens: s.tokens.unwrap_or(0),
                reason: if marked.contains(&s.segment_id) {
                    format!("type={}", s.segment_type.as_str())
                } else {
                    "unreachable".to_string()
                },
            })
            .collect();

        let plan = target_tokens.map(|target| {
            self.gc
                .plan(&segments, &marked, now, target, PruneAction::Stash)
        });

        Ok(GcAnalysis { candidates, plan })
    }

    /// `gc_prune(project_id, ids, action, confirm)`. Delete requires
    /// `confirm == true`; pinned ids are never pruned.
    #[instrument(skip(self, ids))]
    pub async fn gc_prune(
        &self,
        project_id: &str,
        ids: &[SegmentId],
        action: PruneAction,
        confirm: bool,
    ) -> ContextResult<PruneResult> {
        if action == PruneAction::Delete && !confirm {
            return Err(ContextError::invalid_argument(
                "gc_prune with action=delete requires confirm=true",
            ));
        }

        let now = current_timestamp();
        let segments = self.store.snapshot(project_id).await?;
        let by_id: HashMap<&str, &Segment> =
            segments.iter().map(|s| (s.segment_id.as_str(), s)).collect();

        let mut pruned = Vec::new();
        let mut tokens_freed = 0u64;
        let mut errors = Vec::new();
        let mut ledger_entries = Vec::new();

        match action {
            PruneAction::Stash => {
                let result = self.store.stash(project_id, ids).await?;
                for id in &result.stashed {
                    tokens_freed += by_id.get(id.as_str()).and_then(|s| s.tokens).unwrap_or(0) as u64;
                    ledger_entries.push(PruningDecisionRecord {
                        project_id: project_id.to_string(),
                        segment_id: id.clone(),
                        score: by_id.get(id.as_str()).map_or(0.0, |s| self.gc.score(s, now)),
                        reason: "gc_prune:stash".to_string(),
                        action: "stash",
                        recorded_at: now,
                    });
                }
                pruned = result.stashed;
                errors = result.errors;
            }
            PruneAction::Delete => {
                let result = self.store.delete(project_id, ids, false).await?;
                let failed: HashSet<&SegmentId> =
                    result.errors.iter().map(|(id, _)| id).collect();
                for id in ids {
                    if failed.contains(id) {
                        continue;
                    }
                    tokens_freed += by_id.get(id.as_str()).and_then(|s| s.tokens).unwrap_or(0) as u64;
                    ledger_entries.push(PruningDecisionRecord {
                        project_id: project_id.to_string(),
                        segment_id: id.clone(),
                        score: by_id.get(id.as_str()).map_or(0.0, |s| self.gc.score(s, now)),
                        reason: "gc_prune:delete".to_string(),
                        action: "delete",
                        recorded_at: now,
                    });
                    pruned.push(id.clone());
                }
                drop(failed);
                errors = result.errors;
            }
        }

        if !ledger_entries.is_empty() {
            let mut ledger = self.ledger.lock().expect("ledger lock poisoned");
            for entry in ledger_entries {
                ledger.record(entry);
            }
        }

        Ok(PruneResult {
            pruned,
            tokens_freed,
            errors,
        })
    }

    /// `pin/unpin(project_id, ids)`.
    #[instrument(skip(self, ids))]
    pub async fn set_pinned(
        &self,
        project_id: &str,
        ids: &[SegmentId],
        pinned: bool,
    ) -> ContextResult<BulkResult<()>> {
        let mut result = BulkResult::new();
        for id in ids {
            match self.store.set_pinned(project_id, id, pinned).await {
                Ok(()) => result.succeeded.push(()),
                Err(e) => result.errors.push((id.clone(), e)),
            }
        }
        Ok(result)
    }

    #[instrument(skip(self, ids))]
    pub async fn stash(
        &self,
        project_id: &str,
        ids: &[SegmentId],
    ) -> ContextResult<crate::store::StashResult> {
        self.store.stash(project_id, ids).await
    }

    #[instrument(skip(self, filters))]
    pub async fn search_stashed(
        &self,
        project_id: &str,
        query: &str,
        filters: &SegmentFilters,
        limit: usize,
    ) -> ContextResult<Vec<Segment>> {
        self.store.search_stashed(project_id, query, filters, limit).await
    }

    #[instrument(skip(self, ids))]
    pub async fn retrieve_stashed(
        &self,
        project_id: &str,
        ids: &[SegmentId],
        move_to_active: bool,
    ) -> ContextResult<BulkResult<Segment>> {
        self.store.unstash(project_id, ids, move_to_active).await
    }

    /// `set_current_task(project_id, task_id?) -> {previous, current}`.
    #[instrument(skip(self))]
    pub fn set_current_task(
        &self,
        project_id: &str,
        task_id: Option<TaskId>,
    ) -> (Option<TaskId>, Option<TaskId>) {
        let mut map = self.current_task.lock().expect("current_task lock poisoned");
        let previous = map.get(project_id).cloned().flatten();
        map.insert(project_id.to_string(), task_id.clone());
        (previous, task_id)
    }

    /// `get_task_context(project_id, task_id?) -> {segments, tokens}`.
    #[instrument(skip(self))]
    pub async fn get_task_context(
        &self,
        project_id: &str,
        task_id: Option<&str>,
    ) -> ContextResult<TaskContext> {
        let task_id = task_id.map(str::to_string).or_else(|| self.current_task_for(project_id));
        let Some(task_id) = task_id else {
            return Ok(TaskContext {
                segments: Vec::new(),
                total_tokens: 0,
            });
        };

        let segments: Vec<Segment> = self
            .store
            .snapshot(project_id)
            .await?
            .into_iter()
            .filter(|s| s.task_id.as_deref() == Some(task_id.as_str()))
            .collect();
        let total_tokens = segments.iter().map(|s| s.tokens.unwrap_or(0) as u64).sum();
        Ok(TaskContext {
            segments,
            total_tokens,
        })
    }

    /// `create_task_snapshot(project_id, task_id?, name?)`. Per the resolved
    /// Open Question, this references the task's current segment ids rather
    /// than duplicating their payloads.
    #[instrument(skip(self))]
    pub async fn create_task_snapshot(
        &self,
        project_id: &str,
        task_id: Option<&str>,
        name: Option<&str>,
    ) -> ContextResult<TaskSnapshot> {
        let context = self.get_task_context(project_id, task_id).await?;
        let task_id = task_id
            .map(str::to_string)
            .or_else(|| self.current_task_for(project_id))
            .unwrap_or_else(|| "untasked".to_string());
        let snapshot_id = match name {
            Some(name) => format!("snapshot:{project_id}:{task_id}:{name}"),
            None => format!("snapshot:{project_id}:{task_id}:{}", current_timestamp()),
        };

        let referenced_ids: Vec<SegmentId> =
            context.segments.iter().map(|s| s.segment_id.clone()).collect();
        let total_tokens = context.total_tokens;

        let mut snapshot_segment = Segment::new(
            snapshot_id.clone(),
            project_id,
            format!("snapshot of task {task_id}"),
            crate::segment::SegmentType::Summary,
            current_timestamp(),
        );
        snapshot_segment.task_id = Some(task_id);
        snapshot_segment.generation = Generation::Old;
        snapshot_segment.references = referenced_ids.iter().cloned().collect();
        self.tokenizer.count_segment(&mut snapshot_segment);
        self.store.store(snapshot_segment).await?;

        Ok(TaskSnapshot {
            snapshot_id,
            referenced_ids,
            total_tokens,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentType;
    use tempfile::tempdir;

    fn config_for(dir: &std::path::Path) -> Config {
        Config {
            storage_path: dir.display().to_string(),
            ..Config::default()
        }
    }

    fn draft(id: &str, text: &str) -> SegmentDraft {
        SegmentDraft {
            segment_id: id.to_string(),
            text: text.to_string(),
            segment_type: SegmentType::Note,
            task_id: None,
            file_path: None,
            line_range: None,
            tags: hashbrown::HashSet::new(),
            topic_id: None,
            references: hashbrown::HashSet::new(),
        }
    }

    #[tokio::test]
    async fn analyze_ingests_and_reports_usage() {
        let dir = tempdir().unwrap();
        let manager = ContextManager::new(config_for(dir.path())).unwrap();

        let report = manager
            .analyze("proj", vec![draft("s1", "hello world")], None, Some(10_000))
            .await
            .unwrap();
        assert_eq!(report.metrics.total_segments, 1);
    }

    #[tokio::test]
    async fn pin_protects_from_gc_candidates() {
        let dir = tempdir().unwrap();
        let manager = ContextManager::new(config_for(dir.path())).unwrap();
        manager.ingest("proj", draft("s1", "payload")).await.unwrap();

        manager.set_pinned("proj", &["s1".to_string()], true).await.unwrap();
        let analysis = manager.gc_analyze("proj", None, Some(1)).await.unwrap();
        assert!(!analysis.candidates.iter().any(|c| c.segment_id == "s1"));
    }

    #[tokio::test]
    async fn current_task_round_trips() {
        let dir = tempdir().unwrap();
        let manager = ContextManager::new(config_for(dir.path())).unwrap();

        let (previous, current) = manager.set_current_task("proj", Some("task-1".to_string()));
        assert_eq!(previous, None);
        assert_eq!(current, Some("task-1".to_string()));

        let (previous, current) = manager.set_current_task("proj", Some("task-2".to_string()));
        assert_eq!(previous, Some("task-1".to_string()));
        assert_eq!(current, Some("task-2".to_string()));
    }

    #[tokio::test]
    async fn task_snapshot_references_segments_by_id() {
        let dir = tempdir().unwrap();
        let manager = ContextManager::new(config_for(dir.path())).unwrap();
        let mut d = draft("s1", "payload");
        d.task_id = Some("task-1".to_string());
        manager.ingest("proj", d).await.unwrap();

        let snapshot = manager
            .create_task_snapshot("proj", Some("task-1"), Some("checkpoint"))
            .await
            .unwrap();
        assert_eq!(snapshot.referenced_ids, vec!["s1".to_string()]);
    }
}
