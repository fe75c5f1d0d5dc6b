//! Small set of utilities shared across the context-cache crates: timestamps
//! and content hashing, used by the tokenizer's fingerprint cache and by
//! segment bookkeeping. Kept deliberately thin — storage, indexing, and
//! orchestration each own their own error and domain types rather than
//! depending on a shared abstraction layer.

pub mod utils;

pub use utils::{calculate_sha256, current_timestamp, current_timestamp_result};
