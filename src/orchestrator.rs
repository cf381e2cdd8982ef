//! Knowledge-pack assembly.
//!
//! [`KnowledgeOrchestrator`] opens the pack descriptor and drives four loads in
//! a fixed order:
//!
//! 1. base markdown
//! 2. context markdown, one context at a time in declaration order
//! 3. base embeddings, after resolving the model and building the index
//! 4. context embeddings, in declaration order
//!
//! A load whose source directory is missing is recorded as an
//! [`OPTIONAL_SOURCE_MISSING`] event and leaves its partition absent. Every
//! other failure aborts initialization.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::ConfigSource;
use crate::embedding::{self, EmbeddingModelSpec};
use crate::error::{KnowledgePackError, LoadError, Result};
use crate::events::{EventFields, EventSink, TracingSink, OPTIONAL_SOURCE_MISSING};
use crate::index::{EmbeddingIndex, KnowledgeIndex};
use crate::markdown::{MarkdownKnowledgeStore, MarkdownStore};
use crate::pack::{ContextDescriptor, KnowledgePackDescriptor, BASE_PARTITION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    BaseMarkdown,
    ContextMarkdown,
    BaseEmbeddings,
    ContextEmbeddings,
}

impl LoadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BaseMarkdown => "base_markdown",
            Self::ContextMarkdown => "context_markdown",
            Self::BaseEmbeddings => "base_embeddings",
            Self::ContextEmbeddings => "context_embeddings",
        }
    }
}

impl std::fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded { documents: usize },
    Missing,
}

/// One attempted load, in the order it ran.
#[derive(Debug, Clone, Serialize)]
pub struct LoadRecord {
    pub phase: LoadPhase,
    pub context: Option<String>,
    pub path: PathBuf,
    pub outcome: LoadOutcome,
}

impl LoadRecord {
    pub fn is_loaded(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Loaded { .. })
    }
}

/// Whether each layer of one context made it into the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextStatus {
    pub markdown: bool,
    pub embeddings: bool,
}

/// Runs loads, converting missing sources into events.
struct Loader<'a> {
    sink: &'a dyn EventSink,
    report: Vec<LoadRecord>,
}

impl Loader<'_> {
    fn attempt(
        &mut self,
        phase: LoadPhase,
        context: Option<&ContextDescriptor>,
        path: PathBuf,
        load: impl FnOnce(&Path) -> std::result::Result<usize, LoadError>,
    ) -> Result<()> {
        let context_name = context.map(|c| c.name.clone());
        let outcome = match load(&path) {
            Ok(documents) => LoadOutcome::Loaded { documents },
            Err(err) if err.is_not_found() => {
                tracing::warn!(
                    phase = %phase,
                    context = context_name.as_deref().unwrap_or("-"),
                    path = %path.display(),
                    "optional knowledge source missing"
                );
                let mut fields = EventFields::new();
                fields.insert("phase".into(), phase.to_string());
                if let Some(name) = &context_name {
                    fields.insert("context".into(), name.clone());
                }
                fields.insert("path".into(), path.display().to_string());
                fields.insert("error".into(), err.to_string());
                self.sink.record_event(OPTIONAL_SOURCE_MISSING, fields);
                LoadOutcome::Missing
            }
            Err(source) => {
                return Err(KnowledgePackError::Load {
                    phase,
                    context: context_name,
                    source,
                })
            }
        };

        self.report.push(LoadRecord {
            phase,
            context: context_name,
            path,
            outcome,
        });
        Ok(())
    }
}

/// The assembled knowledge model plus the currently selected context.
///
/// Construct one per composition root and pass it explicitly to whatever
/// handles requests.
pub struct KnowledgeOrchestrator<M = MarkdownKnowledgeStore, E = EmbeddingIndex> {
    descriptor: KnowledgePackDescriptor,
    markdown: M,
    index: E,
    model: EmbeddingModelSpec,
    report: Vec<LoadRecord>,
    active_context: Option<String>,
}

impl KnowledgeOrchestrator {
    /// Assemble the pack named by `config`, logging analytics through `tracing`.
    pub fn new(config: &dyn ConfigSource) -> Result<Self> {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Assemble the pack named by `config`, sending analytics to `sink`.
    pub fn with_sink(config: &dyn ConfigSource, sink: Arc<dyn EventSink>) -> Result<Self> {
        let options = config.index_options();
        Self::assemble(
            config,
            MarkdownKnowledgeStore::new(),
            |spec| {
                let provider = embedding::create_provider(spec)?;
                EmbeddingIndex::open(Arc::from(provider), &options)
            },
            sink.as_ref(),
        )
    }
}

impl<M: MarkdownStore, E: KnowledgeIndex> KnowledgeOrchestrator<M, E> {
    /// Run the four load phases against caller-supplied stores.
    ///
    /// `build_index` receives the resolved embedding model and is only called
    /// after both markdown phases finish. Its failure is a configuration error.
    pub fn assemble<F>(
        config: &dyn ConfigSource,
        mut markdown: M,
        build_index: F,
        sink: &dyn EventSink,
    ) -> Result<Self>
    where
        F: FnOnce(&EmbeddingModelSpec) -> anyhow::Result<E>,
    {
        let root = config.load_knowledge_pack_path();
        let descriptor = KnowledgePackDescriptor::open(&root)?;
        tracing::info!(
            root = %descriptor.root().display(),
            contexts = descriptor.contexts().len(),
            "assembling knowledge pack"
        );

        let mut loader = Loader {
            sink,
            report: Vec::new(),
        };

        loader.attempt(
            LoadPhase::BaseMarkdown,
            None,
            descriptor.base_markdown_path(),
            |path| markdown.load_base_knowledge(path),
        )?;

        for context in descriptor.contexts() {
            loader.attempt(
                LoadPhase::ContextMarkdown,
                Some(context),
                descriptor.context_markdown_path(context),
                |path| markdown.load_context_knowledge(&context.name, path),
            )?;
        }

        let model = config
            .load_embedding_model()
            .map_err(KnowledgePackError::Configuration)?;
        let mut index = build_index(&model).map_err(KnowledgePackError::Configuration)?;

        // A persistent index may hold contexts this pack no longer declares.
        let mut keep = vec![BASE_PARTITION];
        keep.extend(descriptor.contexts().iter().map(|c| c.name.as_str()));
        let pruned = index
            .retain_partitions(&keep)
            .map_err(|source| KnowledgePackError::Load {
                phase: LoadPhase::BaseEmbeddings,
                context: None,
                source,
            })?;
        if pruned > 0 {
            tracing::info!(pruned, "removed undeclared embedding partitions");
        }

        loader.attempt(
            LoadPhase::BaseEmbeddings,
            None,
            descriptor.base_embeddings_path(),
            |path| index.load_knowledge_base(path),
        )?;

        for context in descriptor.contexts() {
            loader.attempt(
                LoadPhase::ContextEmbeddings,
                Some(context),
                descriptor.context_embeddings_path(context),
                |path| index.load_knowledge_context(&context.name, path),
            )?;
        }

        let missing = loader
            .report
            .iter()
            .filter(|r| r.outcome == LoadOutcome::Missing)
            .count();
        tracing::info!(
            loads = loader.report.len(),
            missing,
            "knowledge pack assembled"
        );

        Ok(Self {
            descriptor,
            markdown,
            index,
            model,
            report: loader.report,
            active_context: None,
        })
    }

    /// Make `name` the active context and return it.
    ///
    /// Any name is accepted; retrieval must cope with a context that was
    /// never declared or whose layers did not load.
    pub fn select_active_context(&mut self, name: impl Into<String>) -> &str {
        let name = name.into();
        if !self.descriptor.is_declared(&name) {
            tracing::debug!(context = %name, "selected context is not declared by the pack");
        }
        self.active_context.insert(name).as_str()
    }

    pub fn active_context(&self) -> Option<&str> {
        self.active_context.as_deref()
    }

    /// Return to the base layer.
    pub fn clear_active_context(&mut self) {
        self.active_context = None;
    }

    pub fn descriptor(&self) -> &KnowledgePackDescriptor {
        &self.descriptor
    }

    pub fn markdown(&self) -> &M {
        &self.markdown
    }

    pub fn index(&self) -> &E {
        &self.index
    }

    pub fn embedding_model(&self) -> &EmbeddingModelSpec {
        &self.model
    }

    /// Every load attempted during construction, in execution order.
    pub fn report(&self) -> &[LoadRecord] {
        &self.report
    }

    /// Which layers of context `name` loaded. `None` if it is not declared.
    pub fn context_status(&self, name: &str) -> Option<ContextStatus> {
        self.descriptor.context(name)?;
        let loaded = |phase: LoadPhase| {
            self.report
                .iter()
                .any(|r| r.phase == phase && r.context.as_deref() == Some(name) && r.is_loaded())
        };
        Some(ContextStatus {
            markdown: loaded(LoadPhase::ContextMarkdown),
            embeddings: loaded(LoadPhase::ContextEmbeddings),
        })
    }
}
