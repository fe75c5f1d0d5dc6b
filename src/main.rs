//! Thin demo binary: wires a `Config` into a `ContextManager` and walks
//! through the operation surface. No tool-calling transport lives here —
//! that framing belongs to an outer layer this crate doesn't provide.

use anyhow::{Context, Result};
use occ_core::manager::SegmentDraft;
use occ_core::segment::SegmentType;
use occ_core::{Config, ContextManager};

fn initialize_tracing() {
    use tracing_subscriber::prelude::*;

    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::from_default_env()
    } else {
        tracing_subscriber::EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn draft(id: &str, text: &str, segment_type: SegmentType) -> SegmentDraft {
    SegmentDraft {
        segment_id: id.to_string(),
        text: text.to_string(),
        segment_type,
        task_id: None,
        file_path: None,
        line_range: None,
        tags: Default::default(),
        topic_id: None,
        references: Default::default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing();

    let config = Config::default();
    let manager = ContextManager::new(config).context("failed to open context store")?;

    let project = "demo-project";
    let report = manager
        .analyze(
            project,
            vec![
                draft("m1", "user asked to add retry logic to the fetcher", SegmentType::Message),
                draft("c1", "fn fetch_with_retry() { ... }", SegmentType::Code),
                draft("d1", "decided to cap retries at 3", SegmentType::Decision),
            ],
            None,
            None,
        )
        .await?;

    println!("{}", manager.config().storage_path);
    println!(
        "{}",
        occ_core::Analyzer::new().format_efficiency_report(&report)
    );

    let working_set = manager.get_working_set(project, None).await?;
    println!(
        "working set: {} segments, {} tokens",
        working_set.segments.len(),
        working_set.total_tokens
    );

    Ok(())
}
