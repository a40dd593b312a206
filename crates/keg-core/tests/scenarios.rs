//! End-to-end behaviour of kegs over the local backends.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use keg_config::{KegTarget, ResolvedConfig};
use keg_core::dex::{IndexEngine, PluginOutcome, UpdateStatus};
use keg_core::{
    Backend, BackendDirs, IndexEntry, Keg, KegFile, LoaderErrorReason, MANIFEST_FILE, Node,
    NodeMeta, ResolveError, SearchEngine, SearchError, SearchFilter, extract_title,
};
use keg_storage::{MemoryStorage, NodeId, Storage};
use keg_storage_fs::FsStorage;
use keg_storage_web::{KvStorage, MemoryArea};
use pretty_assertions::assert_eq;

const MANIFEST: &str = "\
title: Field notes
creator: https://example.com/me
url: https://keg.example.com/notes
kegv: '2023-01'
updated: 2024-02-03T04:05:06Z
state: living
summary: Notes taken in the field.
indexes:
  nodes:
    file: dex/nodes.tsv
    summary: all nodes by id
  changes:
    file: dex/changes.md
    summary: latest changes
    hooks:
    - on-write
  tags:
    file: dex/tags.yaml
    summary: tag index
";

fn day(n: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, n, 9, 30, 0).unwrap()
}

fn manifest() -> KegFile {
    KegFile::from_yaml(MANIFEST).unwrap()
}

/// Write a manifest and one node, then read both back.
fn assert_read_after_write(storage: Arc<dyn Storage>) {
    let keg = Keg::create(Arc::clone(&storage), manifest()).unwrap();
    let node = Node::new(
        NodeId::new(3),
        "# Three\n\nLinks to [one](../1).\n",
        NodeMeta::dated(day(3)).with_tags(["field"]).with_author("me"),
    );

    keg.write_node(&node).unwrap();
    let reloaded = Keg::from_storage(storage).unwrap();

    assert_eq!(reloaded.keg_file(), &manifest());
    assert_eq!(reloaded.get_node(NodeId::new(3)).unwrap(), Some(node));
    assert_eq!(
        reloaded.list_nodes().unwrap().collect::<Vec<_>>(),
        vec![NodeId::new(3)]
    );
}

#[test]
fn test_manifest_round_trip() {
    let keg_file = manifest();

    let encoded = keg_file.to_yaml().unwrap();

    assert_eq!(KegFile::from_yaml(&encoded).unwrap(), keg_file);
    assert_eq!(
        keg_file.dex().iter().map(|(name, _)| name).collect::<Vec<_>>(),
        vec!["nodes", "changes", "tags"]
    );
    assert_eq!(keg_file.updated, Some(Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap()));
}

#[test]
fn test_read_after_write_memory() {
    assert_read_after_write(Arc::new(MemoryStorage::new()));
}

#[test]
fn test_read_after_write_fs() {
    let temp_dir = tempfile::tempdir().unwrap();

    assert_read_after_write(Arc::new(FsStorage::new(temp_dir.path())));
    assert!(temp_dir.path().join(MANIFEST_FILE).is_file());
    assert!(temp_dir.path().join("3/meta.yaml").is_file());
}

#[test]
fn test_read_after_write_web() {
    let area = Arc::new(MemoryArea::new());

    assert_read_after_write(Arc::new(KvStorage::new(area, "keg")));
}

#[test]
fn test_list_nodes_sparse_ids() {
    let mut storage = MemoryStorage::new()
        .with_file(MANIFEST_FILE, MANIFEST)
        .with_file("notes/README.md", "# not a node\n")
        .with_file("dex/nodes.tsv", "");
    for id in [13, 2, 0, 5, 1] {
        storage = storage.with_file(&format!("{id}/README.md"), &format!("# Node {id}\n"));
    }
    let keg = Keg::from_storage(Arc::new(storage)).unwrap();

    let ids: Vec<u64> = keg.list_nodes().unwrap().map(NodeId::value).collect();

    assert_eq!(ids, vec![0, 1, 2, 5, 13]);
}

#[test]
fn test_title_keeps_inline_markup() {
    let storage = MemoryStorage::new()
        .with_file(MANIFEST_FILE, MANIFEST)
        .with_file("0/README.md", "# Title with [link](../0)\n\nBody.\n");
    let keg = Keg::from_storage(Arc::new(storage)).unwrap();

    let node = keg.get_node(NodeId::new(0)).unwrap().unwrap();

    assert_eq!(node.title(), "Title with [link](../0)");
    assert_eq!(extract_title("no heading here"), "");
}

#[test]
fn test_index_pass_is_idempotent() {
    let keg = Keg::create(Arc::new(MemoryStorage::new()), manifest()).unwrap();
    for (id, title, date) in [(1, "One", 2), (2, "Two", 1)] {
        let meta = NodeMeta::dated(day(date)).with_tags(["x"]);
        keg.write_node(&Node::new(NodeId::new(id), format!("# {title}\n"), meta))
            .unwrap();
    }
    let mut engine = IndexEngine::with_builtin();

    engine.update(&keg).unwrap();
    let nodes = keg.read_index("nodes").unwrap();
    let changes = keg.read_index("changes").unwrap();
    let second = engine.update(&keg).unwrap();

    assert_eq!(
        nodes.as_deref(),
        Some("1\t2024-01-02 09:30:00Z\tOne\n2\t2024-01-01 09:30:00Z\tTwo\n")
    );
    assert_eq!(
        changes.as_deref(),
        Some("* 2024-01-02 09:30:00Z [One](../1)\n* 2024-01-01 09:30:00Z [Two](../2)\n")
    );
    assert!(second.iter().all(|(_, outcome)| matches!(
        outcome,
        PluginOutcome::Completed(UpdateStatus::Unchanged { .. })
    )));
    assert_eq!(keg.read_index("nodes").unwrap(), nodes);
}

#[test]
fn test_tag_index_over_thirteen_nodes() {
    let keg_file = KegFile {
        title: "Tags".to_owned(),
        ..KegFile::default()
    }
    .with_index("tags", IndexEntry::new("dex/tags.yaml"));
    let keg = Keg::create(Arc::new(MemoryStorage::new()), keg_file).unwrap();
    for id in 1..=13_u64 {
        let mut tags = vec!["all"];
        if id % 2 == 0 {
            tags.push("even");
        }
        if id % 5 == 0 {
            tags.push("five");
        }
        let meta = NodeMeta::dated(day(1)).with_tags(tags);
        keg.write_node(&Node::new(NodeId::new(id), format!("# {id}\n"), meta))
            .unwrap();
    }

    let report = IndexEngine::with_builtin().update(&keg).unwrap();

    assert!(matches!(
        report.get("tags"),
        Some(PluginOutcome::Completed(UpdateStatus::Written { path })) if path == "dex/tags.yaml"
    ));
    assert!(matches!(
        report.get("nodes"),
        Some(PluginOutcome::Completed(UpdateStatus::NotConfigured))
    ));
    let tags = keg.storage().read("dex/tags.yaml").unwrap().unwrap();
    let expected = "\
all:
- 1
- 2
- 3
- 4
- 5
- 6
- 7
- 8
- 9
- 10
- 11
- 12
- 13
even:
- 2
- 4
- 6
- 8
- 10
- 12
five:
- 5
- 10
";
    assert_eq!(tags, expected);
}

/// Memory backend with kegs `a` and `b`, plus aliases that can't load.
fn search_fixture() -> (Backend, ResolvedConfig) {
    let root = MemoryStorage::new();
    for (alias, nodes) in [
        ("a", vec![(1, "# Rust notes\n", 5, "rust"), (2, "# Cooking\nno rust here\n", 6, "food")]),
        ("b", vec![(1, "# Rust\n", 2, "rust"), (4, "# Garden\n", 7, "rust")]),
    ] {
        let keg = Keg::create(root.child(&format!("kegs/{alias}")), manifest()).unwrap();
        for (id, content, date, tag) in nodes {
            let meta = NodeMeta::dated(day(date)).with_tags([tag]);
            keg.write_node(&Node::new(NodeId::new(id), content, meta))
                .unwrap();
        }
    }
    let config = ResolvedConfig::default()
        .with_keg("a", KegTarget::new("memory:a"))
        .with_keg("b", KegTarget::new("memory:b"))
        .with_keg("empty", KegTarget::new("memory:empty"))
        .with_keg("disk", KegTarget::new("/srv/keg"));
    (Backend::memory_from(&root), config)
}

#[test]
fn test_search_is_deterministic_across_runs() {
    let (backend, config) = search_fixture();
    let engine = SearchEngine::new(&backend, &config);
    let filter = SearchFilter::text("rust").as_of(day(20));

    let runs: Vec<Vec<(String, NodeId)>> = (0..5)
        .map(|_| {
            engine
                .search(&["a", "b"], &filter, None)
                .unwrap()
                .results
                .into_iter()
                .map(|r| (r.keg_alias, r.node_id))
                .collect()
        })
        .collect();

    assert!(runs.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(
        runs[0],
        vec![
            ("b".to_owned(), NodeId::new(1)),
            ("a".to_owned(), NodeId::new(1)),
            ("a".to_owned(), NodeId::new(2)),
        ]
    );
}

#[test]
fn test_search_tag_filter() {
    let (backend, config) = search_fixture();
    let filter = SearchFilter::default().with_tag("rust").as_of(day(20));

    let output = SearchEngine::new(&backend, &config)
        .search(&["a", "b"], &filter, None)
        .unwrap();

    let hits: Vec<_> = output
        .results
        .iter()
        .map(|r| (r.keg_alias.as_str(), r.node_id.value()))
        .collect();
    assert_eq!(hits, vec![("b", 4), ("a", 1), ("b", 1)]);
}

#[test]
fn test_search_partial_alias_failure() {
    let (backend, config) = search_fixture();

    let output = SearchEngine::new(&backend, &config)
        .search(&["a", "empty", "disk"], &SearchFilter::text("garden rust"), None)
        .unwrap();

    assert_eq!(output.results.len(), 2);
    let failed: Vec<_> = output.failures.iter().map(|f| f.alias.as_str()).collect();
    assert_eq!(failed, vec!["empty", "disk"]);
    assert!(matches!(output.failures[0].error, ResolveError::Keg(_)));
    assert!(matches!(
        &output.failures[1].error,
        ResolveError::Loader(e) if matches!(e.reason, LoaderErrorReason::UnsupportedProtocol { .. })
    ));
}

#[test]
fn test_search_all_aliases_failing() {
    let (backend, config) = search_fixture();

    let err = SearchEngine::new(&backend, &config)
        .search(&["nope", "empty"], &SearchFilter::default(), None)
        .unwrap_err();

    assert!(matches!(err, SearchError::AllFailed(ref failures) if failures.len() == 2));
    assert!(err.to_string().starts_with("search failed for every keg: nope: alias not found: nope"));
}

#[test]
fn test_loader_error_names_alias() {
    let temp_dir = tempfile::tempdir().unwrap();
    let backend = Backend::filesystem(BackendDirs::under(temp_dir.path()));
    let config = ResolvedConfig::default();

    let err = backend.resolve("work-notes", &config).err().unwrap();

    assert_eq!(err.alias, "work-notes");
    assert_eq!(err.reason, LoaderErrorReason::AliasNotFound);
    assert!(err.to_string().contains("work-notes"));
}

#[test]
fn test_filesystem_keg_indexed_on_disk() {
    let temp_dir = tempfile::tempdir().unwrap();
    let keg_dir = temp_dir.path().join("notes");
    std::fs::create_dir_all(&keg_dir).unwrap();
    let backend = Backend::filesystem(BackendDirs::under(temp_dir.path()));
    let config = ResolvedConfig::default().with_keg("notes", KegTarget::new(keg_dir.to_string_lossy()));
    let keg = Keg::create(Arc::new(FsStorage::new(&keg_dir)), manifest()).unwrap();
    keg.write_node(&Node::new(NodeId::new(1), "# Disk\n", NodeMeta::dated(day(1))))
        .unwrap();

    let keg = backend.load_keg("notes", &config).unwrap();
    let report = IndexEngine::with_builtin().update(&keg).unwrap();

    assert!(report.is_success());
    assert_eq!(
        std::fs::read_to_string(keg_dir.join("dex/nodes.tsv")).unwrap(),
        "1\t2024-01-01 09:30:00Z\tDisk\n"
    );
}
