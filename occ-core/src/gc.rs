//! Root-set computation, mark/reachability, heuristic scoring, and
//! heap-bounded top-k pruning-plan generation (§4.E).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::HashSet;

use crate::segment::{Generation, Segment, SegmentId};

/// Parameters that shape root-set selection; mirrors the config knobs in
/// §6.3 that feed `GCEngine`.
#[derive(Debug, Clone, Copy)]
pub struct RootSetParams {
    pub recent_messages_n: usize,
}

/// One entry in a `PruningPlan`.
#[derive(Debug, Clone, PartialEq)]
pub struct PruningCandidate {
    pub segment_id: SegmentId,
    pub score: f64,
    pub tokens: u32,
    pub reason: String,
}

/// Disposition a caller selects for the candidates in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneAction {
    Stash,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PruningPlan {
    pub candidates: Vec<PruningCandidate>,
    pub action: PruneAction,
    pub total_tokens_freed: u64,
    /// Set when `target_tokens` exceeds what candidates could supply.
    pub capacity_exceeded: bool,
}

pub struct GCEngine;

impl GCEngine {
    pub fn new() -> Self {
        Self
    }

    /// §4.E "Root set": segments matching the current task, the active
    /// file, the N most recent messages, pinned segments, and decisions
    /// made within the last hour.
    pub fn root_set(
        &self,
        segments: &[Segment],
        task_id: Option<&str>,
        active_file: Option<&str>,
        now: u64,
        params: RootSetParams,
    ) -> HashSet<SegmentId> {
        let mut roots = HashSet::new();

        if let Some(task_id) = task_id {
            for segment in segments {
                if segment.task_id.as_deref() == Some(task_id) {
                    roots.insert(segment.segment_id.clone());
                }
            }
        }

        if let Some(active_file) = active_file {
            for segment in segments {
                if segment.file_path.as_deref() == Some(active_file) {
                    roots.insert(segment.segment_id.clone());
                }
            }
        }

        let mut messages: Vec<&Segment> = segments
            .iter()
            .filter(|s| s.segment_type == crate::segment::SegmentType::Message)
            .collect();
        messages.sort_by(|a, b| b.last_touched_at.cmp(&a.last_touched_at));
        for segment in messages.into_iter().take(params.recent_messages_n) {
            roots.insert(segment.segment_id.clone());
        }

        for segment in segments {
            if segment.pinned {
                roots.insert(segment.segment_id.clone());
            }
            if segment.segment_type == crate::segment::SegmentType::Decision
                && now.saturating_sub(segment.created_at) <= 3600
            {
                roots.insert(segment.segment_id.clone());
            }
        }

        roots
    }

    /// Iterative transitive closure over `references` edges, starting from
    /// `roots`. Terminates on cycles via the `visited` set.
    pub fn mark(&self, segments: &[Segment], roots: &HashSet<SegmentId>) -> HashSet<SegmentId> {
        let by_id: hashbrown::HashMap<&str, &Segment> = segments
            .iter()
            .map(|s| (s.segment_id.as_str(), s))
            .collect();

        let mut marked: HashSet<SegmentId> = roots.clone();
        let mut stack: Vec<SegmentId> = roots.iter().cloned().collect();
        while let Some(id) = stack.pop() {
            let Some(segment) = by_id.get(id.as_str()) else {
                continue;
            };
            for reference in &segment.references {
                if marked.insert(reference.clone()) {
                    stack.push(reference.clone());
                }
            }
        }
        marked
    }

    /// §4.E scoring formula. Higher means more pruneable. Pinned segments
    /// are never scored by callers (they are filtered out before this is
    /// reached), but this returns `f64::NEG_INFINITY` defensively if asked.
    pub fn score(&self, segment: &Segment, now: u64) -> f64 {
        if segment.pinned {
            return f64::NEG_INFINITY;
        }
        let recency = (segment.age_hours(now) / 24.0).min(1.0);
        let type_weight = segment.segment_type.type_weight();
        let refcount_w = 1.0 / (segment.refcount as f64 + 1.0);
        let generation_w = segment.generation.weight();
        0.4 * recency + 0.3 * type_weight + 0.2 * refcount_w + 0.1 * generation_w
    }

    fn reason_for(&self, segment: &Segment, marked: &HashSet<SegmentId>) -> String {
        if !marked.contains(&segment.segment_id) {
            return "unreachable".to_string();
        }
        if segment.generation == Generation::Old && segment.refcount == 0 {
            return "old+low-refcount".to_string();
        }
        format!("type={}", segment.segment_type.as_str())
    }

    /// §4.E "Sweep / plan generation": builds candidates, scores them, and
    /// selects a bounded top-k via a max-heap, growing k until the
    /// accumulated tokens meet `target_tokens` or candidates run out.
    pub fn plan(
        &self,
        segments: &[Segment],
        marked: &HashSet<SegmentId>,
        now: u64,
        target_tokens: u64,
        action: PruneAction,
    ) -> PruningPlan {
        #[derive(PartialEq)]
        struct Scored<'a> {
            score: f64,
            last_touched_at: u64,
            segment: &'a Segment,
        }
        impl Eq for Scored<'_> {}
        impl Ord for Scored<'_> {
            fn cmp(&self, other: &Self) -> Ordering {
                // max-heap pops the *most pruneable* first: higher score wins,
                // then older last_touched_at, then lexicographic id.
                self.score
                    .partial_cmp(&other.score)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| other.last_touched_at.cmp(&self.last_touched_at))
                    .then_with(|| other.segment.segment_id.cmp(&self.segment.segment_id))
            }
        }
        impl PartialOrd for Scored<'_> {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        let mut heap: BinaryHeap<Scored<'_>> = segments
            .iter()
            .filter(|s| !s.pinned)
            .map(|segment| Scored {
                score: self.score(segment, now),
                last_touched_at: segment.last_touched_at,
                segment,
            })
            .collect();

        let mut candidates = Vec::new();
        let mut accumulated: u64 = 0;
        while accumulated < target_tokens {
            let Some(top) = heap.pop() else {
                break;
            };
            let tokens = top.segment.tokens.unwrap_or(0);
            accumulated += tokens as u64;
            candidates.push(PruningCandidate {
                segment_id: top.segment.segment_id.clone(),
                score: top.score,
                tokens,
                reason: self.reason_for(top.segment, marked),
            });
        }

        PruningPlan {
            capacity_exceeded: accumulated < target_tokens,
            candidates,
            action,
            total_tokens_freed: accumulated,
        }
    }
}

impl Default for GCEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentType;

    fn seg(id: &str, tokens: u32, last_touched: u64, segment_type: SegmentType) -> Segment {
        let mut s = Segment::new(id, "proj", "text", segment_type, last_touched);
        s.tokens = Some(tokens);
        s.last_touched_at = last_touched;
        s
    }

    #[test]
    fn pinned_is_excluded_from_root_and_never_scored() {
        let engine = GCEngine::new();
        let mut pinned = seg("p1", 100, 0, SegmentType::Note);
        pinned.pinned = true;
        assert_eq!(engine.score(&pinned, 1000), f64::NEG_INFINITY);

        let roots = engine.root_set(&[pinned.clone()], None, None, 0, RootSetParams {
            recent_messages_n: 0,
        });
        assert!(roots.contains("p1"));
    }

    #[test]
    fn root_set_includes_recent_messages_task_and_active_file() {
        let engine = GCEngine::new();
        let segments = vec![
            seg("m1", 10, 100, SegmentType::Message),
            seg("m2", 10, 200, SegmentType::Message),
            seg("other", 10, 0, SegmentType::Note),
        ];
        let roots = engine.root_set(&segments, None, None, 0, RootSetParams {
            recent_messages_n: 1,
        });
        assert!(roots.contains("m2"));
        assert!(!roots.contains("m1"));
        assert!(!roots.contains("other"));
    }

    #[test]
    fn mark_is_transitive_and_handles_cycles() {
        let engine = GCEngine::new();
        let mut a = seg("a", 10, 0, SegmentType::Note);
        let mut b = seg("b", 10, 0, SegmentType::Note);
        let c = seg("c", 10, 0, SegmentType::Note);
        a.references.insert("b".to_string());
        b.references.insert("a".to_string());
        b.references.insert("c".to_string());

        let segments = vec![a, b, c];
        let mut roots = HashSet::new();
        roots.insert("a".to_string());

        let marked = engine.mark(&segments, &roots);
        assert!(marked.is_superset(&roots));
        assert!(marked.contains("b"));
        assert!(marked.contains("c"));
    }

    #[test]
    fn plan_excludes_pinned_and_respects_target_tokens() {
        let engine = GCEngine::new();
        let mut pinned = seg("p1", 300, 0, SegmentType::Log);
        pinned.pinned = true;
        let segments = vec![
            pinned,
            seg("s1", 200, 0, SegmentType::Log),
            seg("s2", 200, 1_000_000, SegmentType::Message),
        ];
        let marked = HashSet::new();
        let plan = engine.plan(&segments, &marked, 2_000_000, 400, PruneAction::Stash);

        assert!(!plan.candidates.iter().any(|c| c.segment_id == "p1"));
        assert!(plan.total_tokens_freed >= 400);
        assert!(!plan.capacity_exceeded);
    }

    #[test]
    fn plan_reports_capacity_exceeded_when_candidates_run_out() {
        let engine = GCEngine::new();
        let segments = vec![seg("s1", 50, 0, SegmentType::Note)];
        let marked = HashSet::new();
        let plan = engine.plan(&segments, &marked, 0, 10_000, PruneAction::Stash);
        assert!(plan.capacity_exceeded);
        assert_eq!(plan.total_tokens_freed, 50);
    }
}
