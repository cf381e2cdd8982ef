use anyhow::Result;

use kpack::config::{ConfigSource, KpackConfig};
use kpack::pack::KnowledgePackDescriptor;

/// List the contexts the pack declares and which of their directories exist.
///
/// Only reads the layout; nothing is loaded or embedded.
pub fn contexts(config: &KpackConfig) -> Result<()> {
    let descriptor = KnowledgePackDescriptor::open(config.load_knowledge_pack_path())?;

    println!("Knowledge pack: {}", descriptor.root().display());
    if descriptor.contexts().is_empty() {
        println!("  (no contexts declared)");
        return Ok(());
    }

    println!("  {:<24} {:<10} {}", "CONTEXT", "MARKDOWN", "EMBEDDINGS");
    for ctx in descriptor.contexts() {
        let markdown = descriptor.context_markdown_path(ctx).is_dir();
        let embeddings = descriptor.context_embeddings_path(ctx).is_dir();
        println!(
            "  {:<24} {:<10} {}",
            ctx.name,
            present(markdown),
            present(embeddings)
        );
    }
    Ok(())
}

fn present(exists: bool) -> &'static str {
    if exists {
        "yes"
    } else {
        "missing"
    }
}
