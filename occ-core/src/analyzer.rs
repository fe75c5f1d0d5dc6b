//! Usage metrics, health scoring, and threshold-driven warnings (§4.F).

use hashbrown::HashMap;

use crate::config::Config;
use crate::gc::{GCEngine, PruneAction, RootSetParams};
use crate::segment::Segment;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageMetrics {
    pub total_tokens: u64,
    pub total_segments: usize,
    pub tokens_by_type: HashMap<String, u64>,
    pub segments_by_type: HashMap<String, usize>,
    pub tokens_by_task: HashMap<String, u64>,
    pub oldest_segment_age_hours: f64,
    pub newest_segment_age_hours: f64,
    pub pinned_segments_count: usize,
    pub pinned_tokens: u64,
    pub usage_percent: f64,
    pub estimated_remaining_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthFactors {
    pub usage_score: f64,
    pub age_penalty: f64,
    pub distribution_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthScore {
    pub score: f64,
    pub factors: HealthFactors,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuggestedAction {
    pub description: String,
    pub segment_ids: Vec<String>,
    pub estimated_tokens_freed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub metrics: UsageMetrics,
    pub health: HealthScore,
    pub warnings: Vec<String>,
    pub suggested_actions: Vec<SuggestedAction>,
    /// Projected `usage_percent` after applying the first suggested action.
    pub impact_summary: Option<f64>,
    pub pruning_candidates_count: usize,
}

pub struct Analyzer;

impl Analyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn metrics(&self, segments: &[Segment], now: u64, token_limit: u64) -> UsageMetrics {
        if segments.is_empty() {
            return UsageMetrics {
                usage_percent: 0.0,
                estimated_remaining_tokens: token_limit,
                ..UsageMetrics::default()
            };
        }

        let mut metrics = UsageMetrics {
            oldest_segment_age_hours: f64::MIN,
            newest_segment_age_hours: f64::MAX,
            ..UsageMetrics::default()
        };

        for segment in segments {
            let tokens = segment.tokens.unwrap_or(0) as u64;
            metrics.total_tokens += tokens;
            metrics.total_segments += 1;

            let type_key = segment.segment_type.as_str().to_string();
            *metrics.tokens_by_type.entry(type_key.clone()).or_insert(0) += tokens;
            *metrics.segments_by_type.entry(type_key).or_insert(0) += 1;

            if let Some(task_id) = &segment.task_id {
                *metrics.tokens_by_task.entry(task_id.clone()).or_insert(0) += tokens;
            }

            let age = segment.age_hours(now);
            metrics.oldest_segment_age_hours = metrics.oldest_segment_age_hours.max(age);
            metrics.newest_segment_age_hours = metrics.newest_segment_age_hours.min(age);

            if segment.pinned {
                metrics.pinned_segments_count += 1;
                metrics.pinned_tokens += tokens;
            }
        }

        metrics.usage_percent = if token_limit == 0 {
            100.0
        } else {
            metrics.total_tokens as f64 / token_limit as f64 * 100.0
        };
        metrics.estimated_remaining_tokens = token_limit.saturating_sub(metrics.total_tokens);
        metrics
    }

    pub fn health(&self, metrics: &UsageMetrics) -> HealthScore {
        let usage_score = (100.0 - metrics.usage_percent).max(0.0);
        let oldest_age_days = metrics.oldest_segment_age_hours.max(0.0) / 24.0;
        let age_penalty = (oldest_age_days * 2.0).min(20.0);

        let dominant_share = metrics
            .tokens_by_type
            .values()
            .copied()
            .max()
            .map(|max| {
                if metrics.total_tokens == 0 {
                    0.0
                } else {
                    max as f64 / metrics.total_tokens as f64
                }
            })
            .unwrap_or(0.0);
        let distribution_score = (10.0 * (1.0 - dominant_share)).clamp(0.0, 10.0);

        let score = (usage_score - age_penalty + distribution_score).clamp(0.0, 100.0);
        HealthScore {
            score,
            factors: HealthFactors {
                usage_score,
                age_penalty,
                distribution_score,
            },
        }
    }

    fn warnings(&self, metrics: &UsageMetrics, config: &Config, all_pinned: bool) -> Vec<String> {
        let mut warnings = Vec::new();
        let pct = metrics.usage_percent;
        if pct >= config.warning_threshold_pct {
            warnings.push(format!(
                "WARNING: context usage at {pct:.1}% (>= {:.0}% threshold)",
                config.warning_threshold_pct
            ));
        }
        if pct >= config.high_threshold_pct {
            warnings.push(format!(
                "HIGH: context usage at {pct:.1}% (>= {:.0}% threshold)",
                config.high_threshold_pct
            ));
        }
        if pct >= config.urgent_threshold_pct {
            warnings.push(format!(
                "URGENT: context usage at {pct:.1}% (>= {:.0}% threshold)",
                config.urgent_threshold_pct
            ));
        }

        if all_pinned && pct >= config.warning_threshold_pct {
            warnings.push(
                "all segments over the usage threshold are pinned; nothing can be pruned \
                 automatically"
                    .to_string(),
            );
        }
        warnings
    }

    /// Full §4.F analysis: metrics, health, threshold warnings, suggested
    /// actions, and a pruning-candidates count sourced from `GCEngine`.
    pub fn analyze(
        &self,
        segments: &[Segment],
        config: &Config,
        now: u64,
        task_id: Option<&str>,
        active_file: Option<&str>,
        token_limit: u64,
    ) -> AnalysisReport {
        let metrics = self.metrics(segments, now, token_limit);
        let health = self.health(&metrics);

        let all_pinned = !segments.is_empty() && metrics.pinned_segments_count == segments.len();
        let warnings = self.warnings(&metrics, config, all_pinned);

        let gc = GCEngine::new();
        let roots = gc.root_set(
            segments,
            task_id,
            active_file,
            now,
            RootSetParams {
                recent_messages_n: config.gc_recent_messages_n,
            },
        );
        let marked = gc.mark(segments, &roots);
        let pruning_candidates_count = segments.iter().filter(|s| !s.pinned).count();

        let mut suggested_actions = Vec::new();
        let mut impact_summary = None;
        if !warnings.is_empty() {
            // Any crossed threshold implies the warning threshold is crossed
            // too (thresholds are ascending), so targeting it clears every
            // active warning in one plan.
            let target_tokens =
                (config.warning_threshold_pct / 100.0 * token_limit as f64) as u64;
            let overage = metrics.total_tokens.saturating_sub(target_tokens);
            let plan = gc.plan(segments, &marked, now, overage, PruneAction::Stash);
            if !plan.candidates.is_empty() {
                let ids: Vec<String> = plan
                    .candidates
                    .iter()
                    .map(|c| c.segment_id.clone())
                    .collect();
                suggested_actions.push(SuggestedAction {
                    description: format!(
                        "stash ids {ids:?} to free ~{} tokens",
                        plan.total_tokens_freed
                    ),
                    segment_ids: ids,
                    estimated_tokens_freed: plan.total_tokens_freed,
                });
                let projected_tokens = metrics.total_tokens.saturating_sub(plan.total_tokens_freed);
                impact_summary = Some(if token_limit == 0 {
                    0.0
                } else {
                    projected_tokens as f64 / token_limit as f64 * 100.0
                });
            }
        }

        AnalysisReport {
            metrics,
            health,
            warnings,
            suggested_actions,
            impact_summary,
            pruning_candidates_count,
        }
    }

    /// Human-readable efficiency/impact summary, grounded on the teacher's
    /// formatted report output rather than structured data a caller would
    /// otherwise have to format itself.
    pub fn format_efficiency_report(&self, report: &AnalysisReport) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "context health: {:.1}/100 (usage {:.1}%, {} segments, {} tokens)\n",
            report.health.score,
            report.metrics.usage_percent,
            report.metrics.total_segments,
            report.metrics.total_tokens
        ));
        for warning in &report.warnings {
            out.push_str(&format!("  ! {warning}\n"));
        }
        for action in &report.suggested_actions {
            out.push_str(&format!("  -> {}\n", action.description));
        }
        if let Some(projected) = report.impact_summary {
            out.push_str(&format!(
                "  projected usage after top suggestion: {projected:.1}%\n"
            ));
        }
        out
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentType;

    fn seg(id: &str, tokens: u32, segment_type: SegmentType) -> Segment {
        let mut s = Segment::new(id, "proj", "text", segment_type, 0);
        s.tokens = Some(tokens);
        s
    }

    #[test]
    fn empty_project_has_zero_metrics_and_perfect_health() {
        let analyzer = Analyzer::new();
        let metrics = analyzer.metrics(&[], 0, 1000);
        assert_eq!(metrics.total_tokens, 0);
        assert_eq!(metrics.usage_percent, 0.0);

        let health = analyzer.health(&metrics);
        assert_eq!(health.score, 100.0);
    }

    #[test]
    fn ingest_and_usage_scenario_flags_urgent() {
        let analyzer = Analyzer::new();
        let config = Config::default();
        let segments = vec![
            seg("s1", 200, SegmentType::Message),
            seg("s2", 300, SegmentType::Message),
            seg("s3", 250, SegmentType::Note),
            seg("s4", 250, SegmentType::Note),
        ];

        let report = analyzer.analyze(&segments, &config, 0, None, None, 1000);
        assert_eq!(report.metrics.total_tokens, 1000);
        assert_eq!(report.metrics.usage_percent, 100.0);
        assert!(report.warnings.iter().any(|w| w.contains("URGENT")));
        assert!(report.warnings.iter().any(|w| w.contains("HIGH")));
        assert!(report.warnings.iter().any(|w| w.contains("WARNING")));
        assert!(!report.suggested_actions.is_empty());
        assert!(report.impact_summary.is_some());
    }

    #[test]
    fn all_pinned_over_threshold_states_pin_situation() {
        let analyzer = Analyzer::new();
        let config = Config::default();
        let mut a = seg("s1", 700, SegmentType::Note);
        a.pinned = true;
        let mut b = seg("s2", 700, SegmentType::Note);
        b.pinned = true;

        let report = analyzer.analyze(&[a, b], &config, 0, None, None, 1000);
        assert!(report.warnings.iter().any(|w| w.contains("pinned")));
    }

    #[test]
    fn usage_percent_uses_token_limit() {
        let analyzer = Analyzer::new();
        let metrics = analyzer.metrics(&[seg("s1", 500, SegmentType::Code)], 0, 1000);
        assert_eq!(metrics.usage_percent, 50.0);
        assert_eq!(metrics.estimated_remaining_tokens, 500);
    }
}
