//! Engine configuration: a plain struct with per-field serde defaults, in the
//! style of the teacher's `TokenBudgetConfig`/`LedgerConfig`. Loading this
//! from a file, environment, or CLI flags is a host concern and out of scope
//! here; a host only needs to deserialize a (possibly partial) JSON/TOML
//! document into this struct.

use serde::{Deserialize, Serialize};

fn default_storage_path() -> String {
    "~/.out_of_context".to_string()
}

fn default_token_limit() -> u64 {
    1_000_000
}

fn default_tokenizer_model() -> String {
    "gpt-4".to_string()
}

fn default_max_active_segments() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_warning_threshold_pct() -> f64 {
    60.0
}

fn default_high_threshold_pct() -> f64 {
    80.0
}

fn default_urgent_threshold_pct() -> f64 {
    90.0
}

fn default_gc_recent_messages_n() -> usize {
    10
}

fn default_gc_young_to_old_survival() -> u32 {
    3
}

/// Engine-wide configuration. `Config::default()` matches the documented
/// defaults exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    /// Project token budget used for `usage_percent`. Defaults to 1,000,000
    /// per the resolved Open Question (the source alternately used 32,000
    /// and 1,000,000; this crate standardizes on the latter).
    #[serde(default = "default_token_limit")]
    pub token_limit: u64,

    #[serde(default = "default_tokenizer_model")]
    pub default_tokenizer_model: String,

    #[serde(default = "default_max_active_segments")]
    pub max_active_segments: usize,

    #[serde(default = "default_true")]
    pub enable_indexing: bool,

    #[serde(default = "default_true")]
    pub enable_file_sharding: bool,

    #[serde(default = "default_warning_threshold_pct")]
    pub warning_threshold_pct: f64,

    #[serde(default = "default_high_threshold_pct")]
    pub high_threshold_pct: f64,

    #[serde(default = "default_urgent_threshold_pct")]
    pub urgent_threshold_pct: f64,

    #[serde(default = "default_gc_recent_messages_n")]
    pub gc_recent_messages_n: usize,

    #[serde(default = "default_gc_young_to_old_survival")]
    pub gc_young_to_old_survival: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            token_limit: default_token_limit(),
            default_tokenizer_model: default_tokenizer_model(),
            max_active_segments: default_max_active_segments(),
            enable_indexing: default_true(),
            enable_file_sharding: default_true(),
            warning_threshold_pct: default_warning_threshold_pct(),
            high_threshold_pct: default_high_threshold_pct(),
            urgent_threshold_pct: default_urgent_threshold_pct(),
            gc_recent_messages_n: default_gc_recent_messages_n(),
            gc_young_to_old_survival: default_gc_young_to_old_survival(),
        }
    }
}
