mod helpers;

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use helpers::{assemble_with_fake, config_for, TestPack};
use kpack::events::{MemorySink, OPTIONAL_SOURCE_MISSING};
use kpack::index::KnowledgeIndex;
use kpack::markdown::MarkdownStore;
use kpack::orchestrator::{LoadOutcome, LoadPhase};
use kpack::{KnowledgeOrchestrator, KnowledgePackError, LoadError, BASE_PARTITION};

type CallLog = Rc<RefCell<Vec<String>>>;

fn exists_or_not_found(path: &Path) -> Result<usize, LoadError> {
    if path.is_dir() {
        Ok(0)
    } else {
        Err(LoadError::NotFound {
            path: path.to_path_buf(),
        })
    }
}

struct RecordingMarkdown(CallLog);

impl MarkdownStore for RecordingMarkdown {
    fn load_base_knowledge(&mut self, path: &Path) -> Result<usize, LoadError> {
        self.0.borrow_mut().push("markdown:base".into());
        exists_or_not_found(path)
    }

    fn load_context_knowledge(&mut self, name: &str, path: &Path) -> Result<usize, LoadError> {
        self.0.borrow_mut().push(format!("markdown:{name}"));
        exists_or_not_found(path)
    }
}

struct RecordingIndex(CallLog);

impl KnowledgeIndex for RecordingIndex {
    fn load_knowledge_base(&mut self, path: &Path) -> Result<usize, LoadError> {
        self.0.borrow_mut().push("embeddings:base".into());
        exists_or_not_found(path)
    }

    fn load_knowledge_context(&mut self, name: &str, path: &Path) -> Result<usize, LoadError> {
        self.0.borrow_mut().push(format!("embeddings:{name}"));
        exists_or_not_found(path)
    }
}

fn full_pack() -> TestPack {
    let pack = TestPack::new();
    pack.file("overview.md", "# Overview\n\nShared guidance for every team.")
        .file("embeddings/glossary.md", "Deploys go through the release train.")
        .file("contexts/team-a/api.md", "# Team A API\n\nTeam A owns billing.")
        .file("contexts/team-a/embeddings/runbook.md", "Billing outages page team A.")
        .file("contexts/team-b/intro.md", "# Team B")
        .file("contexts/team-b/embeddings/notes.txt", "Team B ships the mobile app.");
    pack
}

#[test]
fn loads_every_layer_of_a_complete_pack() {
    let pack = full_pack();
    let sink = MemorySink::new();
    let orchestrator = assemble_with_fake(&pack.config(), &sink).unwrap();

    assert!(sink.events().is_empty());
    assert_eq!(orchestrator.report().len(), 6);
    assert!(orchestrator.report().iter().all(|r| r.is_loaded()));

    let markdown = orchestrator.markdown();
    for key in [BASE_PARTITION, "team-a", "team-b"] {
        assert!(markdown.contains(key), "markdown partition {key} missing");
        assert!(orchestrator.index().contains(key).unwrap(), "index partition {key} missing");
    }
    assert_eq!(markdown.documents("team-a")[0].title, "Team A API");
    assert_eq!(orchestrator.active_context(), None);
}

#[test]
fn pack_without_contexts_loads_base_only() {
    let pack = TestPack::new();
    pack.file("overview.md", "# Overview")
        .file("embeddings/faq.md", "Ask in the help channel.");

    let sink = MemorySink::new();
    let orchestrator = assemble_with_fake(&pack.config(), &sink).unwrap();

    assert!(orchestrator.descriptor().contexts().is_empty());
    let phases: Vec<LoadPhase> = orchestrator.report().iter().map(|r| r.phase).collect();
    assert_eq!(phases, vec![LoadPhase::BaseMarkdown, LoadPhase::BaseEmbeddings]);
    assert!(sink.events().is_empty());
    assert_eq!(orchestrator.markdown().keys().collect::<Vec<_>>(), vec![BASE_PARTITION]);
}

#[test]
fn missing_context_directory_degrades_with_two_events() {
    let pack = TestPack::new();
    pack.file("overview.md", "# Overview")
        .file("embeddings/faq.md", "Ask in the help channel.")
        .manifest("[[contexts]]\nname = \"team-a\"\n");

    let sink = MemorySink::new();
    let orchestrator = assemble_with_fake(&pack.config(), &sink).unwrap();

    let events = sink.events_named(OPTIONAL_SOURCE_MISSING);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].field("phase"), Some("context_markdown"));
    assert_eq!(events[1].field("phase"), Some("context_embeddings"));
    for event in &events {
        assert_eq!(event.field("context"), Some("team-a"));
        assert!(event.field("path").unwrap().contains("team-a"));
        assert!(event.field("error").is_some());
    }

    assert!(orchestrator.markdown().contains(BASE_PARTITION));
    assert!(!orchestrator.markdown().contains("team-a"));
    assert!(!orchestrator.index().contains("team-a").unwrap());

    let status = orchestrator.context_status("team-a").unwrap();
    assert!(!status.markdown);
    assert!(!status.embeddings);
}

#[test]
fn missing_base_layers_are_degradable() {
    let pack = TestPack::new();
    pack.mkdir("contexts/team-a");

    let sink = MemorySink::new();
    let orchestrator = assemble_with_fake(&pack.config(), &sink).unwrap();

    // root exists with no markdown, so base markdown loads empty; only the
    // embeddings directories are missing
    let missing: Vec<_> = orchestrator
        .report()
        .iter()
        .filter(|r| r.outcome == LoadOutcome::Missing)
        .map(|r| r.phase)
        .collect();
    assert_eq!(
        missing,
        vec![LoadPhase::BaseEmbeddings, LoadPhase::ContextEmbeddings]
    );
    assert_eq!(sink.events_named(OPTIONAL_SOURCE_MISSING).len(), 2);
    assert!(orchestrator.markdown().documents(BASE_PARTITION).is_empty());
}

#[test]
fn later_context_loads_when_earlier_one_is_missing() {
    let pack = TestPack::new();
    pack.file("overview.md", "# Overview")
        .file("contexts/team-b/intro.md", "# Team B")
        .file("contexts/team-b/embeddings/notes.md", "Mobile releases ship weekly.")
        .manifest(
            "[[contexts]]\nname = \"team-a\"\n\n[[contexts]]\nname = \"team-b\"\n",
        );

    let sink = MemorySink::new();
    let orchestrator = assemble_with_fake(&pack.config(), &sink).unwrap();

    assert!(!orchestrator.markdown().contains("team-a"));
    assert!(orchestrator.markdown().contains("team-b"));
    assert!(orchestrator.index().contains("team-b").unwrap());

    let status = orchestrator.context_status("team-b").unwrap();
    assert!(status.markdown && status.embeddings);
    assert!(sink
        .events_named(OPTIONAL_SOURCE_MISSING)
        .iter()
        .all(|e| e.field("context") != Some("team-b")));
}

#[test]
fn nonexistent_root_is_fatal() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path().join("no-such-pack");

    let err = assemble_with_fake(&config_for(&root), &MemorySink::new())
        .err()
        .unwrap();

    assert!(matches!(err, KnowledgePackError::PackNotFound { .. }));
    assert!(err.to_string().contains("no-such-pack"));
}

#[test]
fn phases_run_in_fixed_order() {
    let pack = TestPack::new();
    pack.mkdir("embeddings")
        .mkdir("contexts/zeta/embeddings")
        .mkdir("contexts/alpha")
        .manifest(
            "[[contexts]]\nname = \"zeta\"\n\n[[contexts]]\nname = \"alpha\"\n",
        );

    let log: CallLog = Rc::default();
    let index_log = log.clone();
    let orchestrator = KnowledgeOrchestrator::assemble(
        &pack.config(),
        RecordingMarkdown(log.clone()),
        |spec| {
            index_log.borrow_mut().push(format!("build_index:{}", spec.model));
            Ok(RecordingIndex(index_log.clone()))
        },
        &MemorySink::new(),
    )
    .unwrap();

    assert_eq!(
        *log.borrow(),
        vec![
            "markdown:base",
            "markdown:zeta",
            "markdown:alpha",
            "build_index:all-MiniLM-L6-v2",
            "embeddings:base",
            "embeddings:zeta",
            "embeddings:alpha",
        ]
    );
    let alpha = orchestrator.context_status("alpha").unwrap();
    assert!(alpha.markdown);
    assert!(!alpha.embeddings);
}

#[test]
fn non_directory_source_is_fatal() {
    let pack = full_pack();
    std::fs::remove_dir_all(pack.root().join("embeddings")).unwrap();
    pack.file("embeddings", "not a directory");

    let sink = MemorySink::new();
    let err = assemble_with_fake(&pack.config(), &sink).err().unwrap();

    match err {
        KnowledgePackError::Load {
            phase,
            context,
            source,
        } => {
            assert_eq!(phase, LoadPhase::BaseEmbeddings);
            assert_eq!(context, None);
            assert!(matches!(source, LoadError::NotADirectory { .. }));
        }
        other => panic!("expected load error, got {other:?}"),
    }
    assert!(sink.events().is_empty());
}

#[test]
fn index_construction_failure_is_a_configuration_error() {
    let pack = full_pack();
    let log: CallLog = Rc::default();

    let result = KnowledgeOrchestrator::<RecordingMarkdown, RecordingIndex>::assemble(
        &pack.config(),
        RecordingMarkdown(log.clone()),
        |_| anyhow::bail!("model files not found"),
        &MemorySink::new(),
    );

    let err = result.err().unwrap();
    assert!(matches!(err, KnowledgePackError::Configuration(_)));
    // markdown phases already ran; no embeddings load was attempted
    assert_eq!(log.borrow().len(), 3);
    assert!(log.borrow().iter().all(|call| call.starts_with("markdown:")));
}

#[test]
fn unknown_provider_is_a_configuration_error() {
    let pack = full_pack();
    let mut config = pack.config();
    config.embedding.provider = "openai".into();

    let err = assemble_with_fake(&config, &MemorySink::new()).err().unwrap();
    assert!(matches!(err, KnowledgePackError::Configuration(_)));
    assert!(err.to_string().contains("openai"));
}

#[test]
fn selection_accepts_any_name() {
    let pack = full_pack();
    let mut orchestrator = assemble_with_fake(&pack.config(), &MemorySink::new()).unwrap();

    assert_eq!(orchestrator.select_active_context("team-a"), "team-a");
    assert_eq!(orchestrator.active_context(), Some("team-a"));

    assert_eq!(orchestrator.select_active_context("x"), "x");
    assert_eq!(orchestrator.active_context(), Some("x"));
    assert!(orchestrator.context_status("x").is_none());

    orchestrator.clear_active_context();
    assert_eq!(orchestrator.active_context(), None);
}

#[test]
fn reassembly_is_idempotent() {
    let pack = full_pack();
    let config = pack.config();

    let first = assemble_with_fake(&config, &MemorySink::new()).unwrap();
    let second = assemble_with_fake(&config, &MemorySink::new()).unwrap();

    let outcomes = |o: &KnowledgeOrchestrator| {
        o.report()
            .iter()
            .map(|r| (r.phase, r.context.clone(), r.outcome))
            .collect::<Vec<_>>()
    };
    assert_eq!(outcomes(&first), outcomes(&second));
    assert_eq!(
        first.markdown().documents("team-b"),
        second.markdown().documents("team-b")
    );
    assert_eq!(
        first.index().partition("team-a").unwrap().unwrap().chunk_count,
        second.index().partition("team-a").unwrap().unwrap().chunk_count
    );
}

#[test]
fn demo_pack_with_empty_base_embeddings_and_missing_context() {
    let pack = TestPack::new();
    pack.file("overview.md", "# Overview\n\nShared guidance.")
        .mkdir("embeddings")
        .manifest("[[contexts]]\nname = \"team-a\"\n");

    let sink = MemorySink::new();
    let orchestrator = assemble_with_fake(&pack.config(), &sink).unwrap();

    let base = orchestrator.index().partition(BASE_PARTITION).unwrap().unwrap();
    assert_eq!(base.chunk_count, 0);
    assert_eq!(base.dimensions, None);
    assert!(orchestrator.markdown().contains(BASE_PARTITION));

    assert!(!orchestrator.markdown().contains("team-a"));
    assert!(!orchestrator.index().contains("team-a").unwrap());

    let phases: Vec<_> = sink
        .events_named(OPTIONAL_SOURCE_MISSING)
        .iter()
        .map(|e| e.field("phase").map(str::to_owned))
        .collect();
    assert_eq!(
        phases,
        vec![
            Some("context_markdown".to_string()),
            Some("context_embeddings".to_string())
        ]
    );
    assert_eq!(sink.events().len(), 2);
}

#[test]
fn persistent_index_forgets_removed_and_undeclared_contexts() {
    let pack = full_pack();
    let mut config = pack.config();
    config.index.path = pack.root().join("state/index.db").to_string_lossy().into_owned();

    let first = assemble_with_fake(&config, &MemorySink::new()).unwrap();
    assert!(first.index().contains("team-a").unwrap());
    assert!(first.index().contains("team-b").unwrap());
    drop(first);

    // team-a loses its embeddings; team-b is no longer declared
    std::fs::remove_dir_all(pack.root().join("contexts/team-a/embeddings")).unwrap();
    pack.manifest("[[contexts]]\nname = \"team-a\"\n");

    let sink = MemorySink::new();
    let second = assemble_with_fake(&config, &sink).unwrap();

    let events = sink.events_named(OPTIONAL_SOURCE_MISSING);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].field("phase"), Some("context_embeddings"));
    assert_eq!(events[0].field("context"), Some("team-a"));

    assert!(!second.index().contains("team-a").unwrap());
    assert!(!second.index().contains("team-b").unwrap());
    assert_eq!(second.index().partition_keys().unwrap(), vec![BASE_PARTITION]);
    assert!(second.markdown().contains("team-a"));
}
