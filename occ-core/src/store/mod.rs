//! Segment storage: active LRU tier, sharded persistent stashed tier, and
//! the index structures kept in lock-step with both (§4.D).

pub mod shard;

use std::collections::HashMap as StdHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use occ_indexer::{InvertedIndex, MetadataFilter, MetadataIndex};

use crate::config::Config;
use crate::errors::{BulkResult, ContextError, ContextResult};
use crate::segment::{ProjectId, Segment, SegmentId, Tier};
use shard::{ShardFile, cleanup_tmp_files, read_shard, write_shard_atomic};

/// Per-id outcome of a `stash` call.
#[derive(Debug, Default)]
pub struct StashResult {
    pub stashed: Vec<SegmentId>,
    pub errors: Vec<(SegmentId, ContextError)>,
}

/// Filters accepted by `search_stashed`; owned so results can outlive the
/// caller's borrowed strings.
#[derive(Debug, Default, Clone)]
pub struct SegmentFilters {
    pub file_path: Option<String>,
    pub task_id: Option<String>,
    pub tag: Option<String>,
    pub segment_type: Option<String>,
}

impl SegmentFilters {
    fn as_metadata_filter(&self) -> MetadataFilter<'_> {
        MetadataFilter {
            file_path: self.file_path.as_deref(),
            task_id: self.task_id.as_deref(),
            tag: self.tag.as_deref(),
            type_: self.segment_type.as_deref(),
        }
    }
}

struct ProjectState {
    active: LruCache<SegmentId, Segment>,
    /// Ids whose working-tier copy currently lives only in an on-disk
    /// mirror because the active LRU evicted them.
    evicted: HashSet<SegmentId>,
    stashed: HashMap<SegmentId, Segment>,
    inverted: InvertedIndex,
    metadata: MetadataIndex,
    /// `id -> set of segment ids that reference it`, kept for §3.2's
    /// `refcount(s) == |backrefs(s)|` invariant.
    backrefs: HashMap<SegmentId, HashSet<SegmentId>>,
}

impl ProjectState {
    fn new(max_active: usize) -> Self {
        Self {
            active: LruCache::new(
                std::num::NonZeroUsize::new(max_active.max(1)).expect("max(1) is nonzero"),
            ),
            evicted: HashSet::new(),
            stashed: HashMap::new(),
            inverted: InvertedIndex::new(),
            metadata: MetadataIndex::new(),
            backrefs: HashMap::new(),
        }
    }

    fn index_segment(&mut self, segment: &Segment, enable_indexing: bool) {
        if enable_indexing {
            self.inverted.add(&segment.segment_id, &segment.text);
        }
        self.metadata.index(
            &segment.segment_id,
            segment.file_path.as_deref(),
            segment.task_id.as_deref(),
            segment.tags.iter().map(String::as_str),
            segment.segment_type.as_str(),
        );
        for target in &segment.references {
            self.backrefs
                .entry(target.clone())
                .or_default()
                .insert(segment.segment_id.clone());
        }
    }

    fn deindex_segment(&mut self, segment: &Segment) {
        self.inverted.remove(&segment.segment_id);
        self.metadata.remove(
            &segment.segment_id,
            segment.file_path.as_deref(),
            segment.task_id.as_deref(),
            segment.tags.iter().map(String::as_str),
            segment.segment_type.as_str(),
        );
        for target in &segment.references {
            if let Some(set) = self.backrefs.get_mut(target) {
                set.remove(&segment.segment_id);
                if set.is_empty() {
                    self.backrefs.remove(target);
                }
            }
        }
        self.backrefs.remove(&segment.segment_id);
    }

    fn refcount_of(&self, id: &str) -> u32 {
        self.backrefs.get(id).map_or(0, |set| set.len() as u32)
    }

    fn contains(&self, id: &str) -> bool {
        self.active.contains(id) || self.evicted.contains(id) || self.stashed.contains_key(id)
    }
}

/// Owns every project's segments. Cheap to clone (everything behind `Arc`)
/// so a host can share one store across tasks.
pub struct SegmentStore {
    root: PathBuf,
    max_active_segments: usize,
    enable_indexing: bool,
    enable_file_sharding: bool,
    projects: std::sync::Mutex<StdHashMap<ProjectId, Arc<Mutex<ProjectState>>>>,
}

impl SegmentStore {
    /// Opens (creating if absent) the storage root and discards leftover
    /// atomic-write temp files per §4.D step 1.
    pub fn open(config: &Config) -> ContextResult<Self> {
        let root = expand_storage_path(&config.storage_path);
        std::fs::create_dir_all(root.join("stashed")).map_err(|source| ContextError::StorageIo {
            path: root.display().to_string(),
            source,
        })?;
        std::fs::create_dir_all(root.join("evicted")).map_err(|source| ContextError::StorageIo {
            path: root.display().to_string(),
            source,
        })?;
        cleanup_tmp_files(&root).map_err(|source| ContextError::StorageIo {
            path: root.display().to_string(),
            source,
        })?;

        Ok(Self {
            root,
            max_active_segments: config.max_active_segments,
            enable_indexing: config.enable_indexing,
            enable_file_sharding: config.enable_file_sharding,
            projects: std::sync::Mutex::new(StdHashMap::new()),
        })
    }

    fn shard_path(&self, project_id: &str) -> PathBuf {
        if self.enable_file_sharding {
            self.root.join("stashed").join(format!("{project_id}.json"))
        } else {
            self.root.join("stashed").join("_all.json")
        }
    }

    fn evicted_path(&self, project_id: &str, segment_id: &str) -> PathBuf {
        self.root
            .join("evicted")
            .join(project_id)
            .join(format!("{segment_id}.json"))
    }

    /// Returns the per-project lock, loading stashed segments from disk on
    /// first access (§4.D step 2-3: load shards, rebuild indexes).
    async fn project(&self, project_id: &str) -> ContextResult<Arc<Mutex<ProjectState>>> {
        let existing = {
            let guard = self.projects.lock().expect("projects lock poisoned");
            guard.get(project_id).cloned()
        };
        if let Some(state) = existing {
            return Ok(state);
        }

        let mut state = ProjectState::new(self.max_active_segments);
        let shard_path = self.shard_path(project_id);
        match read_shard(project_id, &shard_path) {
            Ok(shard) => {
                for segment in shard.segments {
                    if segment.project_id != project_id {
                        continue;
                    }
                    state.index_segment(&segment, self.enable_indexing);
                    state.stashed.insert(segment.segment_id.clone(), segment);
                }
            }
            Err(ContextError::StorageCorrupt { .. }) => {
                // treated as empty for this project per §4.D step 2
            }
            Err(other) => return Err(other),
        }

        let wrapped = Arc::new(Mutex::new(state));
        let mut guard = self.projects.lock().expect("projects lock poisoned");
        let entry = guard
            .entry(project_id.to_string())
            .or_insert_with(|| wrapped.clone());
        Ok(entry.clone())
    }

    fn persist_stash_shard(&self, project_id: &str, state: &ProjectState) -> ContextResult<()> {
        let mut segments: Vec<Segment> = state.stashed.values().cloned().collect();
        segments.sort_by(|a, b| a.segment_id.cmp(&b.segment_id));
        write_shard_atomic(&self.shard_path(project_id), &ShardFile::new(segments))
    }

    /// `store(segment, project_id)`: adds to the active tier, updates all
    /// indexes, fails if the id already exists in the project.
    #[instrument(skip(self, segment), fields(project_id = %segment.project_id))]
    pub async fn store(&self, segment: Segment) -> ContextResult<()> {
        let project_id = segment.project_id.clone();
        let state_arc = self.project(&project_id).await?;
        let mut state = state_arc.lock().await;

        if state.contains(&segment.segment_id) {
            return Err(ContextError::invalid_argument(format!(
                "segment {} already exists in project {project_id}",
                segment.segment_id
            )));
        }

        state.index_segment(&segment, self.enable_indexing);
        if let Some(evicted) = state.active.push(segment.segment_id.clone(), segment) {
            self.mirror_evicted(&project_id, &mut state, evicted.0, evicted.1)
                .await?;
        }
        Ok(())
    }

    async fn mirror_evicted(
        &self,
        project_id: &str,
        state: &mut ProjectState,
        segment_id: SegmentId,
        mut segment: Segment,
    ) -> ContextResult<()> {
        segment.tier = Tier::Working;
        let path = self.evicted_path(project_id, &segment_id);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ContextError::StorageIo {
                path: dir.display().to_string(),
                source,
            })?;
        }
        let body = serde_json::to_vec_pretty(&segment).map_err(|e| ContextError::StorageIo {
            path: path.display().to_string(),
            source: std::io::Error::other(e),
        })?;
        std::fs::write(&path, body).map_err(|source| ContextError::StorageIo {
            path: path.display().to_string(),
            source,
        })?;
        state.evicted.insert(segment_id.clone());
        debug!(project_id, segment_id = %segment_id, "evicted segment mirrored to disk");
        Ok(())
    }

    /// `get(segment_id, project_id) -> Segment`: returns from the active
    /// tier, reloading from the evicted mirror (and re-inserting, possibly
    /// evicting another segment) when needed.
    #[instrument(skip(self))]
    pub async fn get(&self, project_id: &str, segment_id: &str) -> ContextResult<Segment> {
        let state_arc = self.project(project_id).await?;
        let mut state = state_arc.lock().await;

        if let Some(segment) = state.active.get(segment_id) {
            return Ok(segment.clone());
        }

        if state.evicted.contains(segment_id) {
            let path = self.evicted_path(project_id, segment_id);
            let body = std::fs::read(&path).map_err(|source| ContextError::StorageIo {
                path: path.display().to_string(),
                source,
            })?;
            let segment: Segment =
                serde_json::from_slice(&body).map_err(|e| ContextError::StorageCorrupt {
                    project_id: project_id.to_string(),
                    reason: e.to_string(),
                })?;
            state.evicted.remove(segment_id);
            let _ = std::fs::remove_file(&path);

            let reinserted = segment.clone();
            if let Some(evicted) = state.active.push(segment_id.to_string(), segment) {
                self.mirror_evicted(project_id, &mut state, evicted.0, evicted.1)
                    .await?;
            }
            return Ok(reinserted);
        }

        if let Some(segment) = state.stashed.get(segment_id) {
            return Ok(segment.clone());
        }

        Err(ContextError::not_found("segment", segment_id))
    }

    /// Transactional stash: either every requested id moves to the stashed
    /// tier, or none do.
    #[instrument(skip(self, ids))]
    pub async fn stash(&self, project_id: &str, ids: &[SegmentId]) -> ContextResult<StashResult> {
        let state_arc = self.project(project_id).await?;
        let mut state = state_arc.lock().await;

        let mut failures: Vec<(SegmentId, ContextError)> = Vec::new();
        for id in ids {
            if let Some(segment) = state.active.peek(id) {
                if segment.pinned {
                    failures.push((
                        id.clone(),
                        ContextError::PinnedProtected {
                            segment_id: id.clone(),
                            attempted: "stash",
                        },
                    ));
                }
            } else if !state.evicted.contains(id) {
                failures.push((id.clone(), ContextError::not_found("segment", id.clone())));
            }
        }

        if !failures.is_empty() {
            let failing_ids: HashSet<&str> = failures.iter().map(|(id, _)| id.as_str()).collect();
            let siblings: Vec<SegmentId> = ids
                .iter()
                .filter(|id| !failing_ids.contains(id.as_str()))
                .cloned()
                .collect();
            drop(failing_ids);
            for id in siblings {
                failures.push((
                    id.clone(),
                    ContextError::invalid_argument(
                        "stash aborted because a sibling id in the same batch failed",
                    ),
                ));
            }
            return Ok(StashResult {
                stashed: Vec::new(),
                errors: failures,
            });
        }

        let mut moved = Vec::with_capacity(ids.len());
        for id in ids {
            let mut segment = if let Some(segment) = state.active.pop(id) {
                segment
            } else {
                let path = self.evicted_path(project_id, id);
                let body = std::fs::read(&path).map_err(|source| ContextError::StorageIo {
                    path: path.display().to_string(),
                    source,
                })?;
                let segment: Segment = serde_json::from_slice(&body).map_err(|e| {
                    ContextError::StorageCorrupt {
                        project_id: project_id.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                state.evicted.remove(id);
                let _ = std::fs::remove_file(&path);
                segment
            };
            segment.tier = Tier::Stashed;
            state.stashed.insert(id.clone(), segment);
            moved.push(id.clone());
        }

        self.persist_stash_shard(project_id, &state)?;
        Ok(StashResult {
            stashed: moved,
            errors: Vec::new(),
        })
    }

    /// `unstash(segment_ids, project_id, move_to_active)`.
    #[instrument(skip(self, ids))]
    pub async fn unstash(
        &self,
        project_id: &str,
        ids: &[SegmentId],
        move_to_active: bool,
    ) -> ContextResult<BulkResult<Segment>> {
        let state_arc = self.project(project_id).await?;
        let mut state = state_arc.lock().await;
        let mut result = BulkResult::new();

        for id in ids {
            let Some(mut segment) = state.stashed.get(id).cloned() else {
                result
                    .errors
                    .push((id.clone(), ContextError::not_found("segment", id.clone())));
                continue;
            };

            if move_to_active {
                state.stashed.remove(id);
                segment.tier = Tier::Working;
                if let Some(evicted) = state.active.push(id.clone(), segment.clone()) {
                    self.mirror_evicted(project_id, &mut state, evicted.0, evicted.1)
                        .await?;
                }
            }
            result.succeeded.push(segment);
        }

        if move_to_active && !result.succeeded.is_empty() {
            self.persist_stash_shard(project_id, &state)?;
        }
        Ok(result)
    }

    /// `delete(segment_ids, project_id)`. Refuses pinned segments unless
    /// `force` is set.
    #[instrument(skip(self, ids))]
    pub async fn delete(
        &self,
        project_id: &str,
        ids: &[SegmentId],
        force: bool,
    ) -> ContextResult<BulkResult<()>> {
        let state_arc = self.project(project_id).await?;
        let mut state = state_arc.lock().await;
        let mut result = BulkResult::new();
        let mut touched_stash = false;

        for id in ids {
            let segment = if let Some(segment) = state.active.peek(id).cloned() {
                Some(segment)
            } else if let Some(segment) = state.stashed.get(id).cloned() {
                Some(segment)
            } else if state.evicted.contains(id) {
                let path = self.evicted_path(project_id, id);
                std::fs::read(&path)
                    .ok()
                    .and_then(|body| serde_json::from_slice::<Segment>(&body).ok())
            } else {
                None
            };

            let Some(segment) = segment else {
                result
                    .errors
                    .push((id.clone(), ContextError::not_found("segment", id.clone())));
                continue;
            };

            if segment.pinned && !force {
                result.errors.push((
                    id.clone(),
                    ContextError::PinnedProtected {
                        segment_id: id.clone(),
                        attempted: "delete",
                    },
                ));
                continue;
            }

            state.active.pop(id);
            if state.stashed.remove(id).is_some() {
                touched_stash = true;
            }
            if state.evicted.remove(id) {
                let _ = std::fs::remove_file(self.evicted_path(project_id, id));
            }
            state.deindex_segment(&segment);
            result.succeeded.push(());
        }

        if touched_stash {
            self.persist_stash_shard(project_id, &state)?;
        }
        Ok(result)
    }

    /// `search_stashed(query, filters, project_id, limit)`.
    #[instrument(skip(self, filters))]
    pub async fn search_stashed(
        &self,
        project_id: &str,
        query: &str,
        filters: &SegmentFilters,
        limit: usize,
    ) -> ContextResult<Vec<Segment>> {
        let state_arc = self.project(project_id).await?;
        let state = state_arc.lock().await;

        let candidate_ids: HashSet<String> = if query.trim().is_empty() {
            state.stashed.keys().cloned().collect()
        } else {
            state
                .inverted
                .search(query)
                .into_iter()
                .filter(|id| state.stashed.contains_key(id))
                .collect()
        };

        let filtered: HashSet<String> = match state.metadata.filter(&filters.as_metadata_filter())
        {
            None => candidate_ids,
            Some(metadata_hits) => candidate_ids
                .into_iter()
                .filter(|id| metadata_hits.contains(id))
                .collect(),
        };

        let mut results: Vec<Segment> = filtered
            .into_iter()
            .filter_map(|id| state.stashed.get(&id).cloned())
            .collect();
        results.sort_by(|a, b| a.segment_id.cmp(&b.segment_id));
        results.truncate(limit);
        Ok(results)
    }

    /// Flips `pinned` on a segment wherever it currently resides, without
    /// moving it between tiers.
    #[instrument(skip(self))]
    pub async fn set_pinned(
        &self,
        project_id: &str,
        segment_id: &str,
        pinned: bool,
    ) -> ContextResult<()> {
        let state_arc = self.project(project_id).await?;
        let mut state = state_arc.lock().await;

        if let Some(segment) = state.active.get_mut(segment_id) {
            segment.pinned = pinned;
            return Ok(());
        }
        if let Some(segment) = state.stashed.get_mut(segment_id) {
            segment.pinned = pinned;
            self.persist_stash_shard(project_id, &state)?;
            return Ok(());
        }
        if state.evicted.contains(segment_id) {
            let path = self.evicted_path(project_id, segment_id);
            let body = std::fs::read(&path).map_err(|source| ContextError::StorageIo {
                path: path.display().to_string(),
                source,
            })?;
            let mut segment: Segment =
                serde_json::from_slice(&body).map_err(|e| ContextError::StorageCorrupt {
                    project_id: project_id.to_string(),
                    reason: e.to_string(),
                })?;
            segment.pinned = pinned;
            let body = serde_json::to_vec_pretty(&segment).map_err(|e| ContextError::StorageIo {
                path: path.display().to_string(),
                source: std::io::Error::other(e),
            })?;
            std::fs::write(&path, body).map_err(|source| ContextError::StorageIo {
                path: path.display().to_string(),
                source,
            })?;
            return Ok(());
        }

        Err(ContextError::not_found("segment", segment_id))
    }

    /// Computes `refcount(s)` from the backrefs bookkeeping rather than
    /// trusting a caller-supplied field, satisfying the §8 refcount invariant.
    pub async fn refcount(&self, project_id: &str, segment_id: &str) -> ContextResult<u32> {
        let state_arc = self.project(project_id).await?;
        let state = state_arc.lock().await;
        Ok(state.refcount_of(segment_id))
    }

    /// Snapshots every segment currently resident (active + evicted mirrors
    /// + stashed) for a project, used by the GC engine and analyzer. Pulling
    /// a consistent point-in-time copy under the project lock lets callers
    /// then compute scores lock-free, per §5's "snapshot under lock, then
    /// compute lock-free" guidance.
    pub async fn snapshot(&self, project_id: &str) -> ContextResult<Vec<Segment>> {
        let state_arc = self.project(project_id).await?;
        let state = state_arc.lock().await;

        let mut segments: Vec<Segment> = state.active.iter().map(|(_, s)| s.clone()).collect();
        for id in &state.evicted {
            let path = self.evicted_path(project_id, id);
            if let Ok(body) = std::fs::read(&path)
                && let Ok(segment) = serde_json::from_slice::<Segment>(&body)
            {
                segments.push(segment);
            }
        }
        segments.extend(state.stashed.values().cloned());

        for segment in &mut segments {
            segment.refcount = state.refcount_of(&segment.segment_id);
        }
        Ok(segments)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn expand_storage_path(configured: &str) -> PathBuf {
    if let Some(rest) = configured.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
        warn!("HOME not set, using configured path relative to cwd");
    }
    PathBuf::from(configured)
}
