use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use kpack::config::KpackConfig;
use kpack::events::{EventSink, FanoutSink, MemorySink, RecordedEvent, TracingSink};
use kpack::index::IndexPartition;
use kpack::orchestrator::{LoadOutcome, LoadRecord};
use kpack::KnowledgeOrchestrator;

#[derive(Serialize)]
struct StatusReport<'a> {
    root: String,
    provider: String,
    model: &'a str,
    loads: &'a [LoadRecord],
    partitions: Vec<IndexPartition>,
    events: Vec<RecordedEvent>,
}

/// Assemble the pack once and print what loaded, what was missing, and the
/// analytics events recorded along the way.
pub fn status(config: &KpackConfig, json: bool) -> Result<()> {
    let memory = Arc::new(MemorySink::new());
    let sinks: Vec<Arc<dyn EventSink>> = vec![
        Arc::new(TracingSink) as Arc<dyn EventSink>,
        memory.clone() as Arc<dyn EventSink>,
    ];
    let orchestrator = KnowledgeOrchestrator::with_sink(config, Arc::new(FanoutSink::new(sinks)))?;

    let index = orchestrator.index();
    let partitions = index
        .partition_keys()?
        .iter()
        .filter_map(|key| index.partition(key).transpose())
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let model = orchestrator.embedding_model();
    let report = StatusReport {
        root: orchestrator.descriptor().root().display().to_string(),
        provider: model.provider.to_string(),
        model: &model.model,
        loads: orchestrator.report(),
        partitions,
        events: memory.events(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Knowledge Pack Status");
    println!("{}", "=".repeat(40));
    println!("  Root:                {}", report.root);
    println!("  Embedding model:     {} ({})", report.model, report.provider);
    println!("  Contexts declared:   {}", orchestrator.descriptor().contexts().len());
    println!();

    println!("Loads:");
    for record in report.loads {
        let outcome = match record.outcome {
            LoadOutcome::Loaded { documents } => format!("{documents} documents"),
            LoadOutcome::Missing => "missing".to_string(),
        };
        println!(
            "  {:<20} {:<16} {}",
            record.phase,
            record.context.as_deref().unwrap_or("-"),
            outcome
        );
    }
    println!();

    println!("Markdown partitions:   {}", orchestrator.markdown().len());
    println!("Embedding partitions:");
    for p in &report.partitions {
        println!(
            "  {:<20} {} docs, {} chunks, {} dims",
            p.key,
            p.document_count,
            p.chunk_count,
            p.dimensions.map_or_else(|| "-".to_string(), |d| d.to_string())
        );
    }

    if !report.events.is_empty() {
        println!();
        println!("Events:");
        for event in &report.events {
            println!(
                "  {} {} {}",
                event.name,
                event.field("phase").unwrap_or("-"),
                event.field("path").unwrap_or("-")
            );
        }
    }

    Ok(())
}
