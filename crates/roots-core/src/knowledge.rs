//! Markdown knowledge tree backed by the leaf index.
//!
//! Layout under the roots directory:
//!
//! ```text
//! .roots/
//!   _index.db
//!   _config.toml          (optional)
//!   {tree}/_meta.yaml
//!   {tree}/{branch}/_meta.yaml
//!   {tree}/{branch}/{leaf}.md
//! ```
//!
//! Each leaf is a markdown file with a YAML frontmatter block. The files are
//! the source of truth; the index only holds embeddings and metadata and can
//! always be rebuilt with [`KnowledgeBase::reindex`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, OnceLock};

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::Config;
use crate::index::{self, IndexEntry, IndexStore, Tier};
use crate::search::daemon::{DaemonEmbedder, EmbedClient};
use crate::search::{
    ContentSource, Embedder, HashEmbedder, ModelKind, ModelRegistry, SearchEngine, SearchHit,
    SearchQuery, SelectOptions, select_embedder,
};

/// Environment variable naming the roots directory.
pub const ROOTS_PATH_ENV: &str = "ROOTS_PATH";
pub const ROOTS_DIR_NAME: &str = ".roots";
pub const INDEX_FILE: &str = "_index.db";
pub const META_FILE: &str = "_meta.yaml";
pub const DEFAULT_RELATION: &str = "related_to";
pub const DEFAULT_CONFIDENCE: f64 = 0.5;
pub const DEFAULT_TAG_LIMIT: usize = 20;

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("static pattern"));
static DASH_OR_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-\s]+").expect("static pattern"));
static SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static pattern"));

/// Knowledge file layer errors
#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("Branch '{0}' not found. Specify a tree or create the branch first.")]
    BranchNotFound(String),

    #[error("Leaf not found: {0}")]
    LeafNotFound(String),

    #[error("Invalid frontmatter in {path}: {reason}")]
    InvalidFrontmatter { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Locate the roots directory: `ROOTS_PATH`, then the nearest `.roots/`
/// walking up from the working directory, then `<cwd>/.roots`.
pub fn find_roots_path() -> std::io::Result<PathBuf> {
    if let Some(path) = std::env::var_os(ROOTS_PATH_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let cwd = std::env::current_dir()?;
    let found = cwd
        .ancestors()
        .map(|dir| dir.join(ROOTS_DIR_NAME))
        .find(|candidate| candidate.is_dir());
    Ok(found.unwrap_or_else(|| cwd.join(ROOTS_DIR_NAME)))
}

/// Lowercase, drop punctuation, join words with `_`.
pub fn slugify(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let cleaned = NON_WORD.replace_all(&lowered, "");
    DASH_OR_SPACE.replace_all(&cleaned, "_").into_owned()
}

/// Derive a leaf name from the start of its content.
fn generate_leaf_name(content: &str) -> String {
    let head: String = content.chars().take(50).collect();
    let cleaned = NON_WORD.replace_all(head.trim(), "");
    let joined = SPACE.replace_all(&cleaned, "_");
    let name: String = joined.chars().take(40).collect();
    if name.is_empty() {
        "unnamed".to_string()
    } else {
        name
    }
}

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Frontmatter {
    #[serde(default)]
    tier: Tier,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

impl Default for Frontmatter {
    fn default() -> Self {
        Self {
            tier: Tier::default(),
            confidence: DEFAULT_CONFIDENCE,
            tags: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct Meta<'a> {
    name: &'a str,
    description: &'a str,
    created_at: String,
}

/// A leaf as read back from disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Leaf {
    pub tree: String,
    pub branch: String,
    pub name: String,
    pub content: String,
    pub tier: Tier,
    pub confidence: f64,
    pub tags: Vec<String>,
    /// Relative to the roots directory, always with a `.md` suffix.
    pub file_path: String,
}

/// Input for [`KnowledgeBase::add_leaf`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewLeaf {
    /// Branch name, searched across trees when `tree` is `None`.
    pub branch: String,
    pub tree: Option<String>,
    pub content: String,
    pub name: Option<String>,
    pub tier: Tier,
    pub confidence: f64,
    pub tags: Vec<String>,
}

impl NewLeaf {
    pub fn new(branch: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            tree: None,
            content: content.into(),
            name: None,
            tier: Tier::default(),
            confidence: DEFAULT_CONFIDENCE,
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn tree(mut self, tree: impl Into<String>) -> Self {
        self.tree = Some(tree.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    #[must_use]
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Fields to change in [`KnowledgeBase::update_leaf`]. `None` keeps the
/// current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafUpdate {
    pub content: Option<String>,
    pub tier: Option<Tier>,
    pub confidence: Option<f64>,
    pub tags: Option<Vec<String>>,
}

/// Build the embedder the configuration asks for.
///
/// A running daemon serving the same model is preferred when `use_daemon` is
/// set, so short-lived processes skip loading the model themselves.
pub fn embedder_for_config(config: &Config) -> Result<Box<dyn Embedder>> {
    let resolved = ModelRegistry::builtin().resolve(&config.embedding.model);
    if resolved.kind == ModelKind::Hash {
        return Ok(Box::new(HashEmbedder::default()));
    }

    if config.embedding.use_daemon {
        let client = EmbedClient::new(&config.daemon.socket_path)
            .with_timeout(config.daemon.client_timeout());
        if client.get_model().as_deref() == Some(resolved.name.as_str()) {
            match DaemonEmbedder::connect(client, &resolved.name) {
                Ok(embedder) => {
                    debug!(model = %resolved.name, "Using embedding daemon");
                    return Ok(Box::new(embedder));
                }
                Err(err) => debug!(error = %err, "Embedding daemon not usable"),
            }
        }
    }

    let selection = select_embedder(
        &resolved,
        &SelectOptions {
            strict: config.embedding.strict_model,
            cache_dir: config.embedding.cache_dir.clone(),
        },
    )?;
    debug!(model = %selection.serving_model(), "Using in-process embedder");
    Ok(Box::new(selection.backend))
}

/// Tree-structured knowledge base with semantic search.
pub struct KnowledgeBase {
    roots_path: PathBuf,
    index: IndexStore,
    config: Config,
    /// Built from `config` on first use.
    embedder: OnceLock<Box<dyn Embedder>>,
}

impl KnowledgeBase {
    /// Open (creating if needed) the knowledge base at `roots_path`. The
    /// embedder its configuration selects is built the first time a leaf is
    /// embedded, so navigation never loads a model or contacts the daemon.
    pub fn open(roots_path: impl Into<PathBuf>) -> Result<Self> {
        let roots_path = roots_path.into();
        let config = Config::load_layered(Some(&roots_path))?;
        Self::open_inner(roots_path, config, OnceLock::new())
    }

    pub fn open_with_embedder(
        roots_path: impl Into<PathBuf>,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self> {
        Self::open_inner(roots_path.into(), Config::default(), OnceLock::from(embedder))
    }

    fn open_inner(
        roots_path: PathBuf,
        config: Config,
        embedder: OnceLock<Box<dyn Embedder>>,
    ) -> Result<Self> {
        fs::create_dir_all(&roots_path).map_err(KnowledgeError::from)?;
        let index = IndexStore::open(roots_path.join(INDEX_FILE))?;
        Ok(Self {
            roots_path,
            index,
            config,
            embedder,
        })
    }

    pub fn roots_path(&self) -> &Path {
        &self.roots_path
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    /// The embedder, building it on first call.
    pub fn embedder(&self) -> Result<&dyn Embedder> {
        if let Some(embedder) = self.embedder.get() {
            return Ok(embedder.as_ref());
        }
        let built = embedder_for_config(&self.config)?;
        Ok(self.embedder.get_or_init(|| built).as_ref())
    }

    /// Whether the embedder has been built yet.
    pub fn embedder_ready(&self) -> bool {
        self.embedder.get().is_some()
    }

    // ---------------------------------------------------------------------
    // Structure
    // ---------------------------------------------------------------------

    pub fn create_tree(&self, name: &str, description: &str) -> Result<PathBuf> {
        let tree_path = self.roots_path.join(slugify(name));
        fs::create_dir_all(&tree_path).map_err(KnowledgeError::from)?;
        write_meta(&tree_path, name, description)?;
        Ok(tree_path)
    }

    /// Add a branch, creating the tree first if it does not exist.
    pub fn add_branch(&self, tree: &str, branch: &str, description: &str) -> Result<PathBuf> {
        let tree_path = self.roots_path.join(slugify(tree));
        if !tree_path.exists() {
            self.create_tree(tree, "")?;
        }
        let branch_path = tree_path.join(slugify(branch));
        fs::create_dir_all(&branch_path).map_err(KnowledgeError::from)?;
        write_meta(&branch_path, branch, description)?;
        Ok(branch_path)
    }

    /// Write and index a new leaf. Returns its relative path.
    pub fn add_leaf(&self, leaf: NewLeaf) -> Result<String> {
        let branch_path = match &leaf.tree {
            Some(tree) => self.roots_path.join(slugify(tree)).join(slugify(&leaf.branch)),
            None => self
                .find_branch(&leaf.branch)?
                .ok_or_else(|| KnowledgeError::BranchNotFound(leaf.branch.clone()))?,
        };
        fs::create_dir_all(&branch_path).map_err(KnowledgeError::from)?;

        let name = leaf
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| generate_leaf_name(&leaf.content));
        let full_path = branch_path.join(format!("{}.md", slugify(&name)));
        let rel_path = self.relative_path(&full_path);
        index::check_confidence(&rel_path, leaf.confidence)?;

        let frontmatter = Frontmatter {
            tier: leaf.tier,
            confidence: leaf.confidence,
            tags: leaf.tags,
            created_at: Some(Utc::now().to_rfc3339()),
            updated_at: None,
        };
        write_markdown(&full_path, &frontmatter, &leaf.content)?;
        self.index_leaf(&rel_path, &leaf.content, &frontmatter)?;
        info!(file_path = %rel_path, tier = %frontmatter.tier, "Added leaf");
        Ok(rel_path)
    }

    /// Read a leaf. The `.md` suffix may be omitted.
    pub fn get_leaf(&self, file_path: &str) -> Result<Option<Leaf>> {
        let file_path = with_md_suffix(file_path);
        let full_path = self.roots_path.join(&file_path);
        if !full_path.is_file() {
            return Ok(None);
        }
        let (content, meta) = parse_markdown(&full_path, &file_path)?;
        let parts: Vec<&str> = file_path.split('/').collect();
        let name = parts
            .last()
            .map(|last| last.trim_end_matches(".md").to_string())
            .unwrap_or_default();
        Ok(Some(Leaf {
            tree: parts.first().map(ToString::to_string).unwrap_or_default(),
            branch: parts.get(1).map(ToString::to_string).unwrap_or_default(),
            name,
            content,
            tier: meta.tier,
            confidence: meta.confidence,
            tags: meta.tags,
            file_path,
        }))
    }

    /// Rewrite a leaf with the given changes and re-index it.
    pub fn update_leaf(&self, file_path: &str, update: LeafUpdate) -> Result<()> {
        let file_path = with_md_suffix(file_path);
        let full_path = self.roots_path.join(&file_path);
        if !full_path.is_file() {
            return Err(KnowledgeError::LeafNotFound(file_path).into());
        }
        let (mut content, mut meta) = parse_markdown(&full_path, &file_path)?;
        if let Some(new_content) = update.content {
            content = new_content;
        }
        if let Some(tier) = update.tier {
            meta.tier = tier;
        }
        if let Some(confidence) = update.confidence {
            index::check_confidence(&file_path, confidence)?;
            meta.confidence = confidence;
        }
        if let Some(tags) = update.tags {
            meta.tags = tags;
        }
        meta.updated_at = Some(Utc::now().to_rfc3339());

        write_markdown(&full_path, &meta, &content)?;
        self.index_leaf(&file_path, &content, &meta)?;
        info!(file_path = %file_path, "Updated leaf");
        Ok(())
    }

    /// Remove the file and its index entry, with every link touching it.
    /// Returns whether anything existed.
    pub fn delete_leaf(&mut self, file_path: &str) -> Result<bool> {
        let file_path = with_md_suffix(file_path);
        let full_path = self.roots_path.join(&file_path);
        let had_file = full_path.is_file();
        if had_file {
            fs::remove_file(&full_path).map_err(KnowledgeError::from)?;
        }
        let had_entry = self.index.delete_leaf(&file_path)?;
        if had_file || had_entry {
            info!(file_path = %file_path, "Deleted leaf");
        }
        Ok(had_file || had_entry)
    }

    // ---------------------------------------------------------------------
    // Retrieval
    // ---------------------------------------------------------------------

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        SearchEngine::new(&self.index, self.embedder()?, self).search(query)
    }

    /// Leaves sharing any of `tags`, in index order.
    pub fn get_by_tags(&self, tags: &[String], limit: usize) -> Result<Vec<Leaf>> {
        let mut leaves = Vec::new();
        for entry in self.index.get_all_leaves()? {
            if leaves.len() == limit {
                break;
            }
            if !entry.tags.iter().any(|t| tags.contains(t)) {
                continue;
            }
            if let Some(leaf) = self.get_leaf(&entry.file_path)? {
                leaves.push(leaf);
            }
        }
        Ok(leaves)
    }

    pub fn get_by_tier(&self, tier: Tier) -> Result<Vec<Leaf>> {
        let mut leaves = Vec::new();
        for entry in self.index.get_all_leaves()? {
            if entry.tier != tier {
                continue;
            }
            if let Some(leaf) = self.get_leaf(&entry.file_path)? {
                leaves.push(leaf);
            }
        }
        Ok(leaves)
    }

    // ---------------------------------------------------------------------
    // Links
    // ---------------------------------------------------------------------

    /// Returns `false` if the link already existed.
    pub fn link(&self, from_path: &str, to_path: &str, relation: &str) -> Result<bool> {
        Ok(self.index.add_link(from_path, to_path, relation)?)
    }

    pub fn unlink(&self, from_path: &str, to_path: &str, relation: &str) -> Result<bool> {
        Ok(self.index.remove_link(from_path, to_path, relation)?)
    }

    /// Linked leaves grouped by relation. Incoming links appear under
    /// `is_{relation}_by`. Links to leaves that no longer exist are skipped.
    pub fn get_related(&self, file_path: &str) -> Result<BTreeMap<String, Vec<Leaf>>> {
        let mut related: BTreeMap<String, Vec<Leaf>> = BTreeMap::new();
        for link in self.index.get_links_from(file_path)? {
            if let Some(leaf) = self.get_leaf(&link.to_path)? {
                related.entry(link.relation).or_default().push(leaf);
            }
        }
        for link in self.index.get_links_to(file_path)? {
            if let Some(leaf) = self.get_leaf(&link.from_path)? {
                related
                    .entry(format!("is_{}_by", link.relation))
                    .or_default()
                    .push(leaf);
            }
        }
        Ok(related)
    }

    // ---------------------------------------------------------------------
    // Navigation
    // ---------------------------------------------------------------------

    pub fn list_trees(&self) -> Result<Vec<String>> {
        list_dir(&self.roots_path, |name, path| {
            path.is_dir() && !name.starts_with('_') && !name.starts_with('.')
        })
    }

    pub fn list_branches(&self, tree: &str) -> Result<Vec<String>> {
        list_dir(&self.roots_path.join(slugify(tree)), |name, path| {
            path.is_dir() && !name.starts_with('_')
        })
    }

    /// Leaf names (without `.md`) in a branch.
    pub fn list_leaves(&self, tree: &str, branch: &str) -> Result<Vec<String>> {
        let dir = self.roots_path.join(slugify(tree)).join(slugify(branch));
        let names = list_dir(&dir, |name, path| {
            path.is_file() && name.ends_with(".md") && !name.starts_with('_')
        })?;
        Ok(names
            .into_iter()
            .map(|n| n.trim_end_matches(".md").to_string())
            .collect())
    }

    /// Indented outline of one tree, or of all trees.
    pub fn show_tree(&self, tree: Option<&str>) -> Result<String> {
        let trees = match tree {
            Some(t) => vec![t.to_string()],
            None => self.list_trees()?,
        };
        let mut lines = Vec::new();
        for t in &trees {
            lines.push(format!("{t}/"));
            for branch in self.list_branches(t)? {
                lines.push(format!("  {branch}/"));
                for leaf in self.list_leaves(t, &branch)? {
                    let path = format!("{}/{}/{leaf}.md", slugify(t), slugify(&branch));
                    let tier = self.get_leaf(&path)?.map(|l| l.tier).unwrap_or_default();
                    lines.push(format!("    {} {leaf}", tier.marker()));
                }
            }
        }
        Ok(lines.join("\n"))
    }

    // ---------------------------------------------------------------------
    // Index maintenance
    // ---------------------------------------------------------------------

    /// Rebuild the index from every markdown leaf on disk. Every file is
    /// read before existing entries are cleared, so a model change never
    /// mixes dimensions. Leaves with unreadable frontmatter are skipped with
    /// a warning. Links are kept. Returns the number of leaves indexed.
    pub fn reindex(&self) -> Result<usize> {
        let mut files = Vec::new();
        collect_markdown(&self.roots_path, &mut files)?;
        files.sort();

        let mut leaves = Vec::with_capacity(files.len());
        let mut skipped = 0usize;
        for full_path in &files {
            let rel_path = self.relative_path(full_path);
            match parse_markdown(full_path, &rel_path) {
                Ok((content, meta)) => leaves.push((rel_path, content, meta)),
                Err(err) => {
                    warn!(file_path = %rel_path, error = %err, "Skipping unreadable leaf");
                    skipped += 1;
                }
            }
        }

        self.embedder()?;
        let cleared = self.index.clear_leaves()?;
        for (rel_path, content, meta) in &leaves {
            self.index_leaf(rel_path, content, meta)?;
        }
        info!(cleared, indexed = leaves.len(), skipped, "Reindexed knowledge base");
        Ok(leaves.len())
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn index_leaf(&self, file_path: &str, content: &str, meta: &Frontmatter) -> Result<()> {
        let embedding = self.embedder()?.embed(content)?;
        let entry = IndexEntry {
            file_path: file_path.to_string(),
            content_hash: content_hash(content),
            embedding,
            tier: meta.tier,
            confidence: meta.confidence,
            tags: meta.tags.clone(),
            updated_at: self.next_updated_at(file_path)?,
        };
        self.index.upsert_leaf(&entry)?;
        Ok(())
    }

    /// `now`, or 1 ms past the stored timestamp if the clock has not moved
    /// beyond it.
    fn next_updated_at(&self, file_path: &str) -> Result<DateTime<Utc>> {
        // Stored timestamps carry microseconds.
        let now = Utc::now().trunc_subsecs(6);
        Ok(match self.index.get_leaf(file_path)? {
            Some(prev) if now <= prev.updated_at => prev.updated_at + TimeDelta::milliseconds(1),
            _ => now,
        })
    }

    fn find_branch(&self, branch: &str) -> Result<Option<PathBuf>> {
        let slug = slugify(branch);
        for tree in self.list_trees()? {
            let candidate = self.roots_path.join(&tree).join(&slug);
            if candidate.is_dir() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    fn relative_path(&self, full_path: &Path) -> String {
        let rel = full_path.strip_prefix(&self.roots_path).unwrap_or(full_path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl ContentSource for KnowledgeBase {
    fn load_content(&self, file_path: &str) -> Option<String> {
        match self.get_leaf(file_path) {
            Ok(leaf) => leaf.map(|l| l.content),
            Err(err) => {
                debug!(file_path, error = %err, "Leaf content unreadable");
                None
            }
        }
    }
}

fn with_md_suffix(file_path: &str) -> String {
    if file_path.ends_with(".md") {
        file_path.to_string()
    } else {
        format!("{file_path}.md")
    }
}

/// Write `_meta.yaml` unless one already exists.
fn write_meta(dir: &Path, name: &str, description: &str) -> Result<()> {
    let meta_path = dir.join(META_FILE);
    if meta_path.exists() {
        return Ok(());
    }
    let meta = Meta {
        name,
        description,
        created_at: Utc::now().to_rfc3339(),
    };
    let yaml = serde_yaml::to_string(&meta).map_err(KnowledgeError::from)?;
    fs::write(meta_path, yaml).map_err(KnowledgeError::from)?;
    Ok(())
}

fn write_markdown(path: &Path, meta: &Frontmatter, content: &str) -> Result<()> {
    let yaml = serde_yaml::to_string(meta).map_err(KnowledgeError::from)?;
    fs::write(path, format!("---\n{yaml}---\n\n{content}")).map_err(KnowledgeError::from)?;
    Ok(())
}

/// Split a leaf file into body and frontmatter. A file without a complete
/// frontmatter block is all body with default metadata.
fn parse_markdown(path: &Path, display_path: &str) -> Result<(String, Frontmatter)> {
    let text = fs::read_to_string(path).map_err(KnowledgeError::from)?;
    let Some(rest) = text.strip_prefix("---") else {
        return Ok((text, Frontmatter::default()));
    };
    let Some((yaml, body)) = rest.split_once("---") else {
        return Ok((text, Frontmatter::default()));
    };
    let meta = if yaml.trim().is_empty() {
        Frontmatter::default()
    } else {
        serde_yaml::from_str(yaml).map_err(|e| KnowledgeError::InvalidFrontmatter {
            path: display_path.to_string(),
            reason: e.to_string(),
        })?
    };
    Ok((body.trim().to_string(), meta))
}

fn list_dir(dir: &Path, keep: impl Fn(&str, &Path) -> bool) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(KnowledgeError::from(err).into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(KnowledgeError::from)?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if keep(&name, &path) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Every `.md` file below `dir` whose name does not start with `_`.
fn collect_markdown(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(KnowledgeError::from)? {
        let entry = entry.map_err(KnowledgeError::from)?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(KnowledgeError::from)?;
        if file_type.is_dir() {
            collect_markdown(&path, out)?;
        } else if file_type.is_file() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".md") && !name.starts_with('_') {
                out.push(path);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb(dir: &Path) -> KnowledgeBase {
        KnowledgeBase::open_with_embedder(dir.join(".roots"), Box::new(HashEmbedder::default()))
            .unwrap()
    }

    #[test]
    fn slugify_rules() {
        assert_eq!(slugify("Rust Patterns"), "rust_patterns");
        assert_eq!(slugify("  Error-Handling!  "), "error_handling");
        assert_eq!(slugify("a -- b"), "a_b");
        assert_eq!(slugify("Café au lait"), "café_au_lait");
    }

    #[test]
    fn generated_names() {
        assert_eq!(generate_leaf_name("Use ? for errors."), "Use_for_errors");
        assert_eq!(generate_leaf_name("!!!"), "unnamed");
        let long = "word ".repeat(30);
        assert!(generate_leaf_name(&long).chars().count() <= 40);
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn frontmatter_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf.md");

        fs::write(&path, "---\ntier: trunk\ntags: [a]\n---\n\nbody text\n").unwrap();
        let (body, meta) = parse_markdown(&path, "leaf.md").unwrap();
        assert_eq!(body, "body text");
        assert_eq!(meta.tier, Tier::Trunk);
        assert!((meta.confidence - DEFAULT_CONFIDENCE).abs() < f64::EPSILON);
        assert_eq!(meta.tags, vec!["a"]);

        fs::write(&path, "no frontmatter here").unwrap();
        let (body, meta) = parse_markdown(&path, "leaf.md").unwrap();
        assert_eq!(body, "no frontmatter here");
        assert_eq!(meta, Frontmatter::default());

        fs::write(&path, "---\ntier: canopy\n---\nbody").unwrap();
        let err = parse_markdown(&path, "leaf.md").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Knowledge(KnowledgeError::InvalidFrontmatter { .. })
        ));
    }

    #[test]
    fn add_requires_known_branch() {
        let dir = tempfile::tempdir().unwrap();
        let kb = kb(dir.path());
        let err = kb.add_leaf(NewLeaf::new("nowhere", "text")).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Knowledge(KnowledgeError::BranchNotFound(_))
        ));
    }

    #[test]
    fn add_finds_branch_across_trees() {
        let dir = tempfile::tempdir().unwrap();
        let kb = kb(dir.path());
        kb.add_branch("Rust", "Errors", "error handling").unwrap();
        let path = kb
            .add_leaf(NewLeaf::new("errors", "Prefer thiserror in libraries").name("libs"))
            .unwrap();
        assert_eq!(path, "rust/errors/libs.md");
        assert!(kb.roots_path().join("rust/_meta.yaml").is_file());
        assert!(kb.roots_path().join("rust/errors/_meta.yaml").is_file());
        assert_eq!(kb.index().leaf_count().unwrap(), 1);
    }

    #[test]
    fn bad_confidence_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let kb = kb(dir.path());
        let err = kb
            .add_leaf(NewLeaf::new("b", "text").tree("t").name("x").confidence(1.5))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Storage(_)));
        assert!(!kb.roots_path().join("t/b/x.md").exists());
    }

    #[test]
    fn updated_at_strictly_advances() {
        let dir = tempfile::tempdir().unwrap();
        let kb = kb(dir.path());
        let path = kb
            .add_leaf(NewLeaf::new("b", "first").tree("t").name("n"))
            .unwrap();
        let before = kb.index().get_leaf(&path).unwrap().unwrap().updated_at;
        kb.update_leaf(&path, LeafUpdate::default()).unwrap();
        let after = kb.index().get_leaf(&path).unwrap().unwrap().updated_at;
        assert!(after > before);
    }

    #[test]
    fn show_tree_uses_markers() {
        let dir = tempfile::tempdir().unwrap();
        let kb = kb(dir.path());
        kb.add_leaf(NewLeaf::new("b", "x").tree("t").name("core").tier(Tier::Roots))
            .unwrap();
        kb.add_leaf(NewLeaf::new("b", "y").tree("t").name("note"))
            .unwrap();
        assert_eq!(
            kb.show_tree(None).unwrap(),
            "t/\n  b/\n    [R] core\n    [L] note"
        );
    }
}
