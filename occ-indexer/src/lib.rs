//! Inverted term index and metadata indexes used by the context cache engine.
//!
//! No embeddings, no vector store — postings are plain hash maps keyed by
//! whitespace/word-boundary terms, the same direct-and-boring approach the
//! rest of this workspace favors over a database dependency.

pub mod inverted;
pub mod metadata;
pub mod tokenize;

pub use inverted::InvertedIndex;
pub use metadata::{MetadataFilter, MetadataIndex};
pub use tokenize::tokenize_terms;
