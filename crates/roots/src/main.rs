//! roots CLI
//!
//! Persistent, searchable knowledge for AI agents.
//!
//! # Usage
//!
//! ```bash
//! roots init
//! roots add errors "Prefer thiserror in libraries" --tree rust --tag rust
//! roots search "error handling" -n 5 --json
//! roots get rust/errors/prefer_thiserror_in_libraries
//! roots server start --model bge-base
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;

use roots_core::config::{Config, PROJECT_CONFIG_FILE};
use roots_core::error::{ConfigError, Remediation, ServerError};
use roots_core::index::Tier;
use roots_core::knowledge::{
    DEFAULT_CONFIDENCE, DEFAULT_RELATION, KnowledgeBase, KnowledgeError, LeafUpdate, NewLeaf,
    find_roots_path,
};
use roots_core::logging::init_logging;
use roots_core::search::daemon::{
    DaemonLauncher, DaemonPaths, ServerOptions, StartOutcome, StopOutcome, daemon_status,
    run_daemon, start_daemon, stop_daemon,
};
use roots_core::search::{DEFAULT_SEARCH_LIMIT, ModelRegistry, SearchQuery};

#[derive(Parser)]
#[command(name = "roots")]
#[command(about = "Persistent, searchable knowledge for AI agents")]
#[command(version)]
struct Cli {
    /// Knowledge base directory (defaults to the nearest .roots)
    #[arg(long, global = true, env = "ROOTS_PATH")]
    roots: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a knowledge base with a default configuration
    Init {
        /// Embedding model alias or name
        #[arg(long)]
        model: Option<String>,
    },

    /// Add a knowledge leaf
    Add {
        /// Branch name, looked up across trees unless --tree is given
        branch: String,

        /// Leaf content
        content: String,

        #[arg(long)]
        tree: Option<String>,

        /// Leaf name (derived from content when omitted)
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "leaves")]
        tier: Tier,

        #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
        confidence: f64,

        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Print one leaf
    Get {
        path: String,

        #[arg(long)]
        json: bool,
    },

    /// Change a leaf's content or metadata and re-index it
    Update {
        path: String,

        #[arg(long)]
        content: Option<String>,

        #[arg(long)]
        tier: Option<Tier>,

        #[arg(long)]
        confidence: Option<f64>,

        /// Replaces every existing tag
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Delete a leaf with its index entry and links
    Delete { path: String },

    /// Semantic search across all leaves
    Search {
        query: String,

        #[arg(short = 'n', long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,

        #[arg(long = "tier")]
        tiers: Vec<Tier>,

        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long, default_value_t = 0.0)]
        min_confidence: f64,

        /// Drop hits scoring below this similarity
        #[arg(long)]
        min_score: Option<f64>,

        /// Print hits as JSON
        #[arg(long)]
        json: bool,
    },

    /// Link two leaves
    Link {
        from: String,
        to: String,

        #[arg(long, default_value = DEFAULT_RELATION)]
        relation: String,

        /// Remove the link instead
        #[arg(long)]
        remove: bool,
    },

    /// Show leaves linked to a leaf
    Related {
        path: String,

        #[arg(long)]
        json: bool,
    },

    /// Rebuild the index from the markdown files
    Reindex,

    /// Show the tree structure
    Tree {
        /// Only this tree
        name: Option<String>,
    },

    /// Inspect or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage the embedding daemon
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Set the embedding model
    Model {
        name: String,

        /// Write the per-user file instead of the knowledge base's
        #[arg(long)]
        global: bool,
    },

    /// List the built-in models
    Models,
}

#[derive(Subcommand)]
enum ServerCommands {
    /// Start the daemon
    Start {
        /// Run in this process instead of detaching
        #[arg(long)]
        foreground: bool,

        #[arg(long)]
        model: Option<String>,
    },

    Stop,

    Status {
        #[arg(long)]
        json: bool,
    },

    /// Stop, then start
    Restart {
        #[arg(long)]
        model: Option<String>,
    },

    /// Daemon process entry point used by `start`
    #[command(hide = true)]
    Run {
        #[arg(long)]
        model: String,

        #[arg(long)]
        socket: PathBuf,

        #[arg(long)]
        pid_file: PathBuf,

        #[arg(long)]
        log_file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            if let Some(remediation) = remediation_for(&err) {
                eprint!("\n{}", remediation.render_plain());
            }
            ExitCode::FAILURE
        }
    }
}

fn remediation_for(err: &anyhow::Error) -> Option<Remediation> {
    if let Some(err) = err.downcast_ref::<roots_core::Error>() {
        return err.remediation();
    }
    if let Some(err) = err.downcast_ref::<ServerError>() {
        return Some(err.remediation());
    }
    err.downcast_ref::<ConfigError>().map(ConfigError::remediation)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let roots_path = match cli.roots {
        Some(path) => path,
        None => find_roots_path().context("cannot determine the working directory")?,
    };
    let config = Config::load_layered(Some(&roots_path))?;

    let mut log_config = config.log_config();
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }
    init_logging(&log_config)?;
    debug!(roots_path = %roots_path.display(), "Resolved knowledge base");

    match cli.command {
        Commands::Init { model } => init(&roots_path, model),
        Commands::Add {
            branch,
            content,
            tree,
            name,
            tier,
            confidence,
            tags,
        } => {
            let kb = KnowledgeBase::open(&roots_path)?;
            let mut leaf = NewLeaf::new(branch, content)
                .tier(tier)
                .confidence(confidence)
                .tags(tags);
            if let Some(tree) = tree {
                leaf = leaf.tree(tree);
            }
            if let Some(name) = name {
                leaf = leaf.name(name);
            }
            println!("{}", kb.add_leaf(leaf)?);
            Ok(())
        }
        Commands::Get { path, json } => {
            let kb = KnowledgeBase::open(&roots_path)?;
            let leaf = kb
                .get_leaf(&path)?
                .ok_or_else(|| roots_core::Error::from(KnowledgeError::LeafNotFound(path)))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&leaf)?);
            } else {
                println!(
                    "{} {} (confidence {:.2})",
                    leaf.tier.marker(),
                    leaf.file_path,
                    leaf.confidence
                );
                if !leaf.tags.is_empty() {
                    println!("tags: {}", leaf.tags.join(", "));
                }
                println!("\n{}", leaf.content);
            }
            Ok(())
        }
        Commands::Update {
            path,
            content,
            tier,
            confidence,
            tags,
        } => {
            let kb = KnowledgeBase::open(&roots_path)?;
            let update = LeafUpdate {
                content,
                tier,
                confidence,
                tags: (!tags.is_empty()).then_some(tags),
            };
            kb.update_leaf(&path, update)?;
            println!("Updated {path}");
            Ok(())
        }
        Commands::Delete { path } => {
            let mut kb = KnowledgeBase::open(&roots_path)?;
            if !kb.delete_leaf(&path)? {
                return Err(roots_core::Error::from(KnowledgeError::LeafNotFound(path)).into());
            }
            println!("Deleted {path}");
            Ok(())
        }
        Commands::Search {
            query,
            limit,
            tiers,
            tags,
            min_confidence,
            min_score,
            json,
        } => {
            let kb = KnowledgeBase::open(&roots_path)?;
            let mut query = SearchQuery::new(query)
                .limit(limit)
                .tiers(tiers)
                .tags(tags)
                .min_confidence(min_confidence);
            if let Some(min_score) = min_score {
                query = query.min_score(min_score);
            }
            let hits = kb.search(&query)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("No results");
            } else {
                for hit in hits {
                    println!(
                        "{} {} (score {:.3}, confidence {:.2})",
                        hit.tier.marker(),
                        hit.file_path,
                        hit.score,
                        hit.confidence
                    );
                    println!("    {}", first_line(&hit.content));
                }
            }
            Ok(())
        }
        Commands::Link {
            from,
            to,
            relation,
            remove,
        } => {
            let kb = KnowledgeBase::open(&roots_path)?;
            if remove {
                let removed = kb.unlink(&from, &to, &relation)?;
                println!("{}", if removed { "Unlinked" } else { "No such link" });
            } else {
                let added = kb.link(&from, &to, &relation)?;
                println!("{}", if added { "Linked" } else { "Already linked" });
            }
            Ok(())
        }
        Commands::Related { path, json } => {
            let kb = KnowledgeBase::open(&roots_path)?;
            let related = kb.get_related(&path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&related)?);
            } else {
                for (relation, leaves) in related {
                    println!("{relation}:");
                    for leaf in leaves {
                        println!("  {} {}", leaf.tier.marker(), leaf.file_path);
                    }
                }
            }
            Ok(())
        }
        Commands::Reindex => {
            let kb = KnowledgeBase::open(&roots_path)?;
            println!("Indexed {} leaves", kb.reindex()?);
            Ok(())
        }
        Commands::Tree { name } => {
            let kb = KnowledgeBase::open(&roots_path)?;
            println!("{}", kb.show_tree(name.as_deref())?);
            Ok(())
        }
        Commands::Config { command } => run_config(command, &roots_path, &config),
        Commands::Server { command } => run_server(command, &config),
    }
}

fn init(roots_path: &Path, model: Option<String>) -> anyhow::Result<()> {
    let config_path = roots_path.join(PROJECT_CONFIG_FILE);
    if !config_path.exists() {
        let mut config = Config::default();
        if let Some(model) = model {
            config.embedding.model = model;
        }
        config.save(&config_path)?;
    }
    KnowledgeBase::open(roots_path)?;
    println!("Initialized knowledge base at {}", roots_path.display());
    Ok(())
}

fn run_config(command: ConfigCommands, roots_path: &Path, config: &Config) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show => {
            print!("{}", toml::to_string_pretty(config)?);
        }
        ConfigCommands::Model { name, global } => {
            let path = if global {
                Config::global_path().context("no per-user config directory on this platform")?
            } else {
                roots_path.join(PROJECT_CONFIG_FILE)
            };
            let mut target = Config::load(&path)?;
            let resolved = ModelRegistry::builtin().resolve(&name);
            target.embedding.model = name;
            target.save(&path)?;
            println!("Model set to {} in {}", resolved.name, path.display());
            println!("Run `roots reindex` to re-embed existing leaves.");
        }
        ConfigCommands::Models => {
            for info in ModelRegistry::builtin().list() {
                println!(
                    "{:<10} {:>5}d {:>7}  {}",
                    info.alias, info.dimension, info.size_hint, info.description
                );
            }
        }
    }
    Ok(())
}

fn run_server(command: ServerCommands, config: &Config) -> anyhow::Result<()> {
    let paths = config.daemon.paths();
    match command {
        ServerCommands::Start { foreground, model } => {
            let model = model.unwrap_or_else(|| config.embedding.model.clone());
            if foreground {
                run_daemon(ServerOptions {
                    model,
                    paths,
                    cache_dir: config.embedding.cache_dir.clone(),
                })?;
                return Ok(());
            }
            start_detached(config, &paths, &model)
        }
        ServerCommands::Stop => {
            match stop_daemon(&paths, config.daemon.stop_policy())? {
                StopOutcome::NotRunning => println!("Embedding daemon is not running"),
                StopOutcome::Stopped => println!("Embedding daemon stopped"),
                StopOutcome::Killed { pid } => println!("Embedding daemon killed (pid {pid})"),
            }
            Ok(())
        }
        ServerCommands::Status { json } => {
            let status = daemon_status(&paths);
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else if status.running {
                let pid = status
                    .pid
                    .map_or_else(|| "unknown".to_string(), |p| p.to_string());
                println!(
                    "Running: model {} (pid {pid}, socket {})",
                    status.model.unwrap_or_default(),
                    status.socket.display()
                );
            } else {
                println!("Not running");
            }
            Ok(())
        }
        ServerCommands::Restart { model } => {
            let model = model.unwrap_or_else(|| config.embedding.model.clone());
            stop_daemon(&paths, config.daemon.stop_policy())?;
            start_detached(config, &paths, &model)
        }
        ServerCommands::Run {
            model,
            socket,
            pid_file,
            log_file,
        } => {
            run_daemon(ServerOptions {
                model,
                paths: DaemonPaths {
                    socket,
                    pid_file,
                    log_file,
                },
                cache_dir: config.embedding.cache_dir.clone(),
            })?;
            Ok(())
        }
    }
}

fn start_detached(config: &Config, paths: &DaemonPaths, model: &str) -> anyhow::Result<()> {
    let launcher = DaemonLauncher::current_exe().context("cannot locate the roots executable")?;
    let outcome = start_daemon(
        paths,
        model,
        &launcher,
        config.daemon.start_policy(),
        config.daemon.stop_policy(),
    )?;
    match outcome {
        StartOutcome::AlreadyRunning { .. } => {
            println!("Embedding daemon already running with {model}");
        }
        StartOutcome::Started { pid } => {
            println!("Embedding daemon started (pid {pid})");
        }
        StartOutcome::Restarted {
            previous_model,
            pid,
        } => {
            println!("Embedding daemon switched from {previous_model} (pid {pid})");
        }
    }
    Ok(())
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or_default()
}
