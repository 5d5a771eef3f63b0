//! Knowledge base integration tests: markdown files, index and links
//! together, using the hashing embedder.

use std::path::Path;

use roots_core::config::{Config, PROJECT_CONFIG_FILE};
use roots_core::index::Tier;
use roots_core::knowledge::{
    DEFAULT_RELATION, KnowledgeBase, KnowledgeError, LeafUpdate, NewLeaf, slugify,
};
use roots_core::search::{HashEmbedder, SearchQuery};

fn open(dir: &Path) -> KnowledgeBase {
    KnowledgeBase::open_with_embedder(dir.join(".roots"), Box::new(HashEmbedder::default()))
        .expect("open knowledge base")
}

fn seeded(dir: &Path) -> KnowledgeBase {
    let kb = open(dir);
    kb.add_branch("Rust", "Errors", "").unwrap();
    kb.add_branch("Rust", "Async", "").unwrap();
    kb.add_branch("Cooking", "Bread", "").unwrap();
    kb.add_leaf(
        NewLeaf::new("errors", "Use thiserror for library error enums")
            .name("thiserror")
            .tier(Tier::Trunk)
            .confidence(0.9)
            .tags(["rust", "errors"]),
    )
    .unwrap();
    kb.add_leaf(
        NewLeaf::new("async", "Never block inside an async task; use spawn_blocking")
            .name("blocking")
            .tags(["rust", "tokio"]),
    )
    .unwrap();
    kb.add_leaf(
        NewLeaf::new("bread", "Proof sourdough dough overnight in the fridge")
            .name("sourdough")
            .tier(Tier::Roots)
            .confidence(0.7)
            .tags(["baking"]),
    )
    .unwrap();
    kb
}

#[test]
fn leaf_file_round_trips_through_frontmatter() {
    let dir = tempfile::tempdir().unwrap();
    let kb = seeded(dir.path());

    let leaf = kb.get_leaf("rust/errors/thiserror").unwrap().unwrap();
    assert_eq!(leaf.tree, "rust");
    assert_eq!(leaf.branch, "errors");
    assert_eq!(leaf.name, "thiserror");
    assert_eq!(leaf.content, "Use thiserror for library error enums");
    assert_eq!(leaf.tier, Tier::Trunk);
    assert!((leaf.confidence - 0.9).abs() < 1e-9);
    assert_eq!(leaf.tags, vec!["rust", "errors"]);
    assert_eq!(leaf.file_path, "rust/errors/thiserror.md");

    let raw = std::fs::read_to_string(kb.roots_path().join("rust/errors/thiserror.md")).unwrap();
    assert!(raw.starts_with("---\n"));
    assert!(raw.contains("tier: trunk"));
    assert!(raw.ends_with("\n\nUse thiserror for library error enums"));

    assert!(kb.get_leaf("rust/errors/missing.md").unwrap().is_none());
}

#[test]
fn generated_name_comes_from_content() {
    let dir = tempfile::tempdir().unwrap();
    let kb = open(dir.path());
    let path = kb
        .add_leaf(NewLeaf::new("notes", "Quick tip: prefer &str params!").tree("misc"))
        .unwrap();
    assert_eq!(path, "misc/notes/quick_tip_prefer_str_params.md");
}

#[test]
fn search_ranks_relevant_leaf_first_and_filters() {
    let dir = tempfile::tempdir().unwrap();
    let kb = seeded(dir.path());

    let hits = kb.search(&SearchQuery::new("sourdough dough")).unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].file_path, "cooking/bread/sourdough.md");
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    let hits = kb
        .search(&SearchQuery::new("error enums").tags(["rust"]).tiers([Tier::Trunk]))
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, "Use thiserror for library error enums");

    let hits = kb
        .search(&SearchQuery::new("anything").min_confidence(0.6))
        .unwrap();
    assert_eq!(hits.len(), 2);
}

#[test]
fn search_skips_leaves_deleted_behind_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let kb = seeded(dir.path());
    std::fs::remove_file(kb.roots_path().join("cooking/bread/sourdough.md")).unwrap();

    let hits = kb.search(&SearchQuery::new("sourdough")).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.file_path != "cooking/bread/sourdough.md"));
}

#[test]
fn update_rewrites_file_and_index() {
    let dir = tempfile::tempdir().unwrap();
    let kb = seeded(dir.path());
    let path = "rust/async/blocking.md";
    let before = kb.index().get_leaf(path).unwrap().unwrap();

    kb.update_leaf(
        path,
        LeafUpdate {
            content: Some("Offload CPU-heavy work with spawn_blocking".into()),
            tier: Some(Tier::Branches),
            ..LeafUpdate::default()
        },
    )
    .unwrap();

    let leaf = kb.get_leaf(path).unwrap().unwrap();
    assert_eq!(leaf.content, "Offload CPU-heavy work with spawn_blocking");
    assert_eq!(leaf.tier, Tier::Branches);
    assert_eq!(leaf.tags, vec!["rust", "tokio"]);

    let after = kb.index().get_leaf(path).unwrap().unwrap();
    assert_eq!(after.tier, Tier::Branches);
    assert_ne!(after.content_hash, before.content_hash);
    assert_ne!(after.embedding, before.embedding);
    assert!(after.updated_at > before.updated_at);

    let raw = std::fs::read_to_string(kb.roots_path().join(path)).unwrap();
    assert!(raw.contains("updated_at:"));
}

#[test]
fn update_missing_leaf_fails() {
    let dir = tempfile::tempdir().unwrap();
    let kb = open(dir.path());
    let err = kb.update_leaf("no/such/leaf", LeafUpdate::default()).unwrap_err();
    assert!(matches!(
        err,
        roots_core::Error::Knowledge(KnowledgeError::LeafNotFound(_))
    ));
}

#[test]
fn links_and_related_groups() {
    let dir = tempfile::tempdir().unwrap();
    let kb = seeded(dir.path());
    let a = "rust/errors/thiserror.md";
    let b = "rust/async/blocking.md";
    let c = "cooking/bread/sourdough.md";

    assert!(kb.link(a, b, DEFAULT_RELATION).unwrap());
    assert!(!kb.link(a, b, DEFAULT_RELATION).unwrap());
    assert!(kb.link(c, a, "contradicts").unwrap());

    let related = kb.get_related(a).unwrap();
    let keys: Vec<&str> = related.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["is_contradicts_by", "related_to"]);
    assert_eq!(related["related_to"][0].file_path, b);
    assert_eq!(related["is_contradicts_by"][0].file_path, c);

    assert!(kb.unlink(a, b, DEFAULT_RELATION).unwrap());
    assert!(!kb.get_related(a).unwrap().contains_key("related_to"));
}

#[test]
fn delete_removes_file_entry_and_links() {
    let dir = tempfile::tempdir().unwrap();
    let mut kb = seeded(dir.path());
    let a = "rust/errors/thiserror.md";
    let b = "rust/async/blocking.md";
    kb.link(a, b, DEFAULT_RELATION).unwrap();
    kb.link(b, a, "supports").unwrap();

    assert!(kb.delete_leaf(a).unwrap());
    assert!(!kb.roots_path().join(a).exists());
    assert!(kb.index().get_leaf(a).unwrap().is_none());
    assert!(kb.index().get_links_from(b).unwrap().is_empty());
    assert!(kb.index().get_links_to(b).unwrap().is_empty());
    assert!(!kb.delete_leaf(a).unwrap());
}

#[test]
fn tags_and_tiers_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let kb = seeded(dir.path());

    let rust = kb.get_by_tags(&["rust".to_string()], 20).unwrap();
    assert_eq!(rust.len(), 2);
    assert_eq!(kb.get_by_tags(&["rust".to_string()], 1).unwrap().len(), 1);
    assert!(kb.get_by_tags(&["none".to_string()], 20).unwrap().is_empty());

    let roots = kb.get_by_tier(Tier::Roots).unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].name, "sourdough");
}

#[test]
fn navigation_lists_are_sorted_and_skip_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let kb = seeded(dir.path());

    assert_eq!(kb.list_trees().unwrap(), vec!["cooking", "rust"]);
    assert_eq!(kb.list_branches("Rust").unwrap(), vec!["async", "errors"]);
    assert_eq!(kb.list_leaves("rust", "errors").unwrap(), vec!["thiserror"]);
    assert!(kb.list_branches("absent").unwrap().is_empty());

    let outline = kb.show_tree(Some("rust")).unwrap();
    assert_eq!(
        outline,
        "rust/\n  async/\n    [L] blocking\n  errors/\n    [T] thiserror"
    );
}

#[test]
fn reindex_rebuilds_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let kb = seeded(dir.path());
    kb.link("rust/errors/thiserror.md", "rust/async/blocking.md", DEFAULT_RELATION)
        .unwrap();

    // A leaf written by hand, without going through the index.
    std::fs::write(
        kb.roots_path().join("rust/errors/manual.md"),
        "---\ntier: branches\nconfidence: 0.8\ntags: [manual]\n---\n\nhand written",
    )
    .unwrap();
    std::fs::write(kb.roots_path().join("rust/errors/_draft.md"), "ignored").unwrap();

    assert_eq!(kb.reindex().unwrap(), 4);
    assert_eq!(kb.index().leaf_count().unwrap(), 4);
    let manual = kb.index().get_leaf("rust/errors/manual.md").unwrap().unwrap();
    assert_eq!(manual.tier, Tier::Branches);
    assert_eq!(manual.tags, vec!["manual"]);
    assert_eq!(
        kb.index().get_links_from("rust/errors/thiserror.md").unwrap().len(),
        1
    );
}

#[test]
fn reindex_skips_leaf_with_broken_frontmatter() {
    let dir = tempfile::tempdir().unwrap();
    let kb = seeded(dir.path());
    std::fs::write(
        kb.roots_path().join("rust/async/broken.md"),
        "---\ntier: [not, a, tier\n---\n\nbody",
    )
    .unwrap();

    assert_eq!(kb.reindex().unwrap(), 3);
    assert_eq!(kb.index().leaf_count().unwrap(), 3);
    assert!(kb.index().get_leaf("rust/async/broken.md").unwrap().is_none());
    assert!(kb.index().get_leaf("cooking/bread/sourdough.md").unwrap().is_some());
}

#[test]
fn reopen_sees_existing_index() {
    let dir = tempfile::tempdir().unwrap();
    drop(seeded(dir.path()));
    let kb = open(dir.path());
    assert_eq!(kb.index().leaf_count().unwrap(), 3);
}

#[test]
fn open_uses_project_config_model() {
    let dir = tempfile::tempdir().unwrap();
    let roots = dir.path().join(".roots");
    let mut config = Config::default();
    config.embedding.model = "lite".to_string();
    config.save(&roots.join(PROJECT_CONFIG_FILE)).unwrap();

    let kb = KnowledgeBase::open(&roots).unwrap();
    assert!(!kb.embedder_ready());
    assert_eq!(kb.embedder().unwrap().info().name, "fnv1a-hash-384");
    assert!(kb.embedder_ready());
}

#[test]
fn navigation_never_contacts_the_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let roots = dir.path().join(".roots");
    let socket = dir.path().join("d.sock");
    let listener = std::os::unix::net::UnixListener::bind(&socket).unwrap();
    listener.set_nonblocking(true).unwrap();

    let mut config = Config::default();
    config.embedding.model = "minilm".to_string();
    config.embedding.use_daemon = true;
    config.daemon.socket_path = socket;
    config.save(&roots.join(PROJECT_CONFIG_FILE)).unwrap();

    let kb = KnowledgeBase::open(&roots).unwrap();
    kb.add_branch("Rust", "Errors", "").unwrap();
    assert_eq!(kb.list_trees().unwrap(), vec!["rust"]);
    assert_eq!(kb.show_tree(None).unwrap(), "rust/\n  errors/");
    assert!(kb.get_leaf("rust/errors/none.md").unwrap().is_none());
    assert!(kb.get_related("rust/errors/none.md").unwrap().is_empty());

    assert!(!kb.embedder_ready());
    let accepted = listener.accept();
    assert!(
        matches!(&accepted, Err(e) if e.kind() == std::io::ErrorKind::WouldBlock),
        "daemon socket was contacted: {accepted:?}"
    );
}

#[test]
fn slugs_are_stable_directory_names() {
    assert_eq!(slugify("Machine Learning"), "machine_learning");
    assert_eq!(slugify("C++ / Rust"), "c_rust");
}
