//! The `Segment` record and its small closed vocabularies (§3.1).

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

pub type SegmentId = String;
pub type ProjectId = String;
pub type TaskId = String;

/// Drives scoring and recommendations (§4.E scoring table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    Message,
    Code,
    Log,
    Note,
    Decision,
    Summary,
}

impl SegmentType {
    /// `type_weight` from the GC scoring formula.
    pub fn type_weight(self) -> f64 {
        match self {
            Self::Log => 1.0,
            Self::Note => 0.8,
            Self::Code => 0.5,
            Self::Message => 0.3,
            Self::Decision => 0.1,
            Self::Summary => 0.2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Code => "code",
            Self::Log => "log",
            Self::Note => "note",
            Self::Decision => "decision",
            Self::Summary => "summary",
        }
    }
}

/// Promoted after surviving `gc_young_to_old_survival` sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    Young,
    Old,
}

impl Generation {
    /// `generation_w` from the GC scoring formula.
    pub fn weight(self) -> f64 {
        match self {
            Self::Old => 1.0,
            Self::Young => 0.3,
        }
    }
}

/// Must match the segment's physical location (§3.1 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Working,
    Stashed,
    Archive,
}

/// An inclusive `(start, end)` line range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn new(start: u32, end: u32) -> Result<Self, crate::errors::ContextError> {
        if start > end {
            return Err(crate::errors::ContextError::invalid_argument(format!(
                "line_range start {start} must be <= end {end}"
            )));
        }
        Ok(Self { start, end })
    }
}

/// One atomic piece of context (§3.1). Immutable by convention: callers
/// mutate through `SegmentStore`/`ContextManager` operations, never by
/// holding a `&mut Segment` across an await point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub segment_id: SegmentId,
    pub project_id: ProjectId,
    pub task_id: Option<TaskId>,
    pub text: String,
    #[serde(rename = "type")]
    pub segment_type: SegmentType,
    pub created_at: u64,
    pub last_touched_at: u64,
    pub pinned: bool,
    pub generation: Generation,
    pub gc_survival_count: u32,
    pub refcount: u32,
    pub file_path: Option<String>,
    pub line_range: Option<LineRange>,
    pub tags: HashSet<String>,
    pub topic_id: Option<String>,
    pub tokens: Option<u32>,
    pub text_hash: Option<String>,
    pub tier: Tier,
    /// Forward reference edges (§3.2). Caller-provided; not auto-derived
    /// from `text`.
    #[serde(default)]
    pub references: HashSet<SegmentId>,
}

impl Segment {
    /// Builds a new working-tier segment with the clock fields and
    /// generation set to their initial values. `segment_id` uniqueness is
    /// enforced by the store, not here.
    pub fn new(
        segment_id: impl Into<SegmentId>,
        project_id: impl Into<ProjectId>,
        text: impl Into<String>,
        segment_type: SegmentType,
        now: u64,
    ) -> Self {
        Self {
            segment_id: segment_id.into(),
            project_id: project_id.into(),
            task_id: None,
            text: text.into(),
            segment_type,
            created_at: now,
            last_touched_at: now,
            pinned: false,
            generation: Generation::Young,
            gc_survival_count: 0,
            refcount: 0,
            file_path: None,
            line_range: None,
            tags: HashSet::new(),
            topic_id: None,
            tokens: None,
            text_hash: None,
            tier: Tier::Working,
            references: HashSet::new(),
        }
    }

    /// Age of `last_touched_at` relative to `now`, in hours.
    pub fn age_hours(&self, now: u64) -> f64 {
        now.saturating_sub(self.last_touched_at) as f64 / 3600.0
    }

    pub fn created_age_hours(&self, now: u64) -> f64 {
        now.saturating_sub(self.created_at) as f64 / 3600.0
    }

    /// Whether the cached `tokens` is usable for `self.text` as it stands;
    /// the caller supplies the freshly computed hash to avoid this type
    /// depending on the tokenizer's hashing choice.
    pub fn tokens_fresh_for(&self, current_hash: &str) -> bool {
        matches!((self.tokens, &self.text_hash), (Some(_), Some(h)) if h == current_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_weights_match_scoring_table() {
        assert_eq!(SegmentType::Log.type_weight(), 1.0);
        assert_eq!(SegmentType::Note.type_weight(), 0.8);
        assert_eq!(SegmentType::Code.type_weight(), 0.5);
        assert_eq!(SegmentType::Message.type_weight(), 0.3);
        assert_eq!(SegmentType::Decision.type_weight(), 0.1);
        assert_eq!(SegmentType::Summary.type_weight(), 0.2);
    }

    #[test]
    fn line_range_rejects_inverted_bounds() {
        assert!(LineRange::new(10, 5).is_err());
        assert!(LineRange::new(5, 10).is_ok());
    }

    #[test]
    fn new_segment_starts_young_and_working() {
        let segment = Segment::new("s1", "proj", "hello", SegmentType::Note, 1000);
        assert_eq!(segment.generation, Generation::Young);
        assert_eq!(segment.tier, Tier::Working);
        assert!(!segment.pinned);
        assert_eq!(segment.refcount, 0);
    }

    #[test]
    fn tokens_fresh_requires_matching_hash() {
        let mut segment = Segment::new("s1", "proj", "hello", SegmentType::Note, 1000);
        assert!(!segment.tokens_fresh_for("abc"));
        segment.tokens = Some(5);
        segment.text_hash = Some("abc".to_string());
        assert!(segment.tokens_fresh_for("abc"));
        assert!(!segment.tokens_fresh_for("def"));
    }
}
