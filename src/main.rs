//! # Nuggit CLI (`nuggit`)
//!
//! The `nuggit` binary manages resources, rules, and the trigger server.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nuggit init` | Create the SQLite database and run schema migrations |
//! | `nuggit serve` | Start the JSON HTTP API |
//! | `nuggit resources cat <path>` | Print qualified resources |
//! | `nuggit resources digest <path>` | Print `name@digest` for each resource |
//! | `nuggit resources index <path>` | Summarize an index in dependency order |
//! | `nuggit resources put <path>` | Store resources in the database |
//! | `nuggit pipe disable <name@digest>` | Stop triggering a pipe |
//! | `nuggit rule create --hostname example.com foo` | Attach pipes to a URL predicate |
//! | `nuggit trigger <url>` | Plan the pipes matching a URL |
//! | `nuggit sum <file>` | Print file checksums |
//!
//! ## Examples
//!
//! ```bash
//! nuggit init
//! nuggit resources put ./resources
//! nuggit rule create --hostname example.com foo-text
//! nuggit trigger https://example.com/ --include-pipes
//! nuggit serve
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use nuggit::config::{self, Config};
use nuggit::sqlite_store::SqliteStore;
use nuggit::{db, loader, migrate, rules, server, sum};
use nuggit_core::index::Index;
use nuggit_core::rule::Rule;
use nuggit_core::store::memory::InMemoryStore;
use nuggit_core::trigger::{self, TriggerRequest};
use nuggit_core::NameDigest;

/// Nuggit CLI: content-addressed scraping pipes and the rules that trigger
/// them.
///
/// State lives under the Nuggit directory (`$NUGGIT_DIR`, default
/// `~/.nuggit`), which holds `nuggit.toml` and the SQLite database.
#[derive(Parser)]
#[command(name = "nuggit", about = "Nuggit: content-addressed scraping pipes", version)]
struct Cli {
    /// Nuggit directory holding `nuggit.toml` and the database.
    #[arg(long, global = true, env = "NUGGIT_DIR")]
    nuggit_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it again leaves existing data alone.
    Init,

    /// Start the JSON HTTP API.
    Serve {
        /// Use a private in-memory database instead of the configured one.
        #[arg(long)]
        inmemory: bool,

        /// Load and store every resource under this path before serving.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Override `[server] port`.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Work with resource files.
    Resources {
        #[command(subcommand)]
        action: ResourcesAction,
    },

    /// Enable or disable a stored pipe.
    Pipe {
        #[command(subcommand)]
        action: PipeAction,
    },

    /// Create or delete trigger rules.
    Rule {
        #[command(subcommand)]
        action: RuleAction,
    },

    /// Plan every pipe whose rules match a URL and print the response.
    Trigger {
        /// The page URL.
        url: String,

        /// Plan against resources under this path instead of the database.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Include the matched pipes in the output.
        #[arg(long)]
        include_pipes: bool,

        /// Omit the plan from the output.
        #[arg(long)]
        no_plan: bool,
    },

    /// Print CRC32C, SHA-1, and SHA-256 checksums of a file.
    Sum {
        file: PathBuf,

        /// Fail unless one of the checksums equals this hex value.
        #[arg(long)]
        check: Option<String>,
    },

    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ResourcesAction {
    /// Print the qualified resources found under a path.
    Cat {
        path: PathBuf,
        #[arg(long, value_enum, default_value = "yaml")]
        format: Format,
    },
    /// Print `kind name@digest` for each resource, dependencies first.
    Digest { path: PathBuf },
    /// Summarize the index built from a path.
    Index { path: PathBuf },
    /// Store the resources under a path in the database.
    Put { path: PathBuf },
}

#[derive(Subcommand)]
enum PipeAction {
    Enable { pipe: String },
    Disable { pipe: String },
}

#[derive(Subcommand)]
enum RuleAction {
    /// Attach pipes to a URL predicate.
    Create(RuleArgs),
    /// Detach pipes from a URL predicate.
    Delete(RuleArgs),
}

#[derive(clap::Args)]
struct RuleArgs {
    /// Pipes to attach, as `name` or `name@digest`.
    #[arg(required = true)]
    pipes: Vec<String>,
    #[arg(long)]
    hostname: Option<String>,
    /// Regular expression matched against the full URL.
    #[arg(long)]
    url_pattern: Option<String>,
    /// Match every URL.
    #[arg(long)]
    always: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let nuggit_dir = match cli.nuggit_dir {
        Some(dir) => dir,
        None => config::default_nuggit_dir()?,
    };

    match cli.command {
        Commands::Init => {
            let cfg = config::load_config(&nuggit_dir)?;
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            match &cfg.storage.db_path {
                Some(path) => println!("Database initialized at {}", path.display()),
                None => println!("Database initialized"),
            }
        }
        Commands::Serve {
            inmemory,
            dir,
            port,
        } => {
            let mut cfg = config::load_config(&nuggit_dir)?;
            if inmemory {
                cfg = cfg.inmemory();
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }
            let store = open_store(&cfg).await?;
            if let Some(dir) = dir {
                let (index, stats) = loader::load_path(&dir)?;
                let stored = loader::put_index(&store, &index).await?;
                println!(
                    "Stored {} resources ({} files skipped)",
                    stored.len(),
                    stats.skipped
                );
            }
            server::run_server(&cfg, Arc::new(store)).await?;
        }
        Commands::Resources { action } => run_resources(&nuggit_dir, action).await?,
        Commands::Pipe { action } => {
            let (pipe, disabled) = match action {
                PipeAction::Enable { pipe } => (pipe, false),
                PipeAction::Disable { pipe } => (pipe, true),
            };
            let nd = NameDigest::parse(&pipe)?;
            let store = open_store(&config::load_config(&nuggit_dir)?).await?;
            let nd = store.set_disabled(&nd, disabled).await?;
            println!("{} {}", if disabled { "disabled" } else { "enabled" }, nd);
        }
        Commands::Rule { action } => {
            let store = open_store(&config::load_config(&nuggit_dir)?).await?;
            match action {
                RuleAction::Create(args) => {
                    let rule = rules::create_rule(&store, args.into_rule()?).await?;
                    println!("{}", serde_json::to_string_pretty(&rule)?);
                }
                RuleAction::Delete(args) => {
                    rules::delete_rule(&store, args.into_rule()?).await?;
                    println!("Rule deleted");
                }
            }
        }
        Commands::Trigger {
            url,
            dir,
            include_pipes,
            no_plan,
        } => {
            let req = TriggerRequest {
                include_pipes,
                include_plan: !no_plan,
                ..TriggerRequest::new(url)
            };
            let resp = match dir {
                Some(dir) => {
                    let (index, _) = loader::load_path(&dir)?;
                    let store = InMemoryStore::new(&index)?;
                    trigger::implicit(&store, &req).await?
                }
                None => {
                    let store = open_store(&config::load_config(&nuggit_dir)?).await?;
                    trigger::implicit(&store, &req).await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Commands::Sum { file, check } => {
            let sums = sum::sum_file(&file)?;
            println!("crc32c  {}", sums.crc32c);
            println!("sha1    {}", sums.sha1);
            println!("sha256  {}", sums.sha256);
            if let Some(expected) = check {
                if !sums.matches(&expected) {
                    bail!("checksum mismatch for {}: {}", file.display(), expected);
                }
                println!("OK");
            }
        }
        Commands::Version => {
            println!("nuggit {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn run_resources(nuggit_dir: &Path, action: ResourcesAction) -> Result<()> {
    match action {
        ResourcesAction::Cat { path, format } => {
            let index = load_qualified(&path)?;
            for (i, item) in index.topo().enumerate() {
                let nd = item?;
                let Some(resource) = index.get(&nd) else {
                    continue;
                };
                match format {
                    Format::Json => println!("{}", resource.to_json_pretty()?),
                    Format::Yaml => {
                        if i > 0 {
                            println!("---");
                        }
                        print!("{}", resource.to_yaml()?);
                    }
                }
            }
        }
        ResourcesAction::Digest { path } => {
            let index = load_qualified(&path)?;
            for item in index.topo() {
                let nd = item?;
                if let Some(kind) = index.kind_of(&nd) {
                    println!("{}\t{}", kind, nd);
                }
            }
        }
        ResourcesAction::Index { path } => {
            let (index, stats) = loader::load_path(&path)?;
            let qualified = index.qualified()?;
            println!(
                "{} resources ({} pipes, {} views, {} rules), {} files skipped",
                qualified.len(),
                qualified.pipes().count(),
                qualified.views().count(),
                qualified.rules().count(),
                stats.skipped
            );
            for item in qualified.topo() {
                let nd = item?;
                let deps = qualified
                    .get(&nd)
                    .map(|r| r.deps())
                    .unwrap_or_default();
                if deps.is_empty() {
                    println!("  {}", nd);
                } else {
                    let deps: Vec<String> = deps.iter().map(ToString::to_string).collect();
                    println!("  {} <- {}", nd, deps.join(", "));
                }
            }
        }
        ResourcesAction::Put { path } => {
            let (index, stats) = loader::load_path(&path)?;
            let store = open_store(&config::load_config(nuggit_dir)?).await?;
            let stored = loader::put_index(&store, &index).await?;
            for nd in &stored {
                println!("{}", nd);
            }
            println!(
                "Stored {} resources ({} files skipped)",
                stored.len(),
                stats.skipped
            );
        }
    }
    Ok(())
}

impl RuleArgs {
    fn into_rule(self) -> Result<Rule> {
        let pipes = self
            .pipes
            .iter()
            .map(|p| NameDigest::parse(p))
            .collect::<nuggit_core::Result<Vec<_>>>()?;
        Ok(Rule {
            hostname: self.hostname,
            url_pattern: self.url_pattern,
            always_trigger: self.always,
            labels: Vec::new(),
            pipes,
        })
    }
}

fn load_qualified(path: &Path) -> Result<Index> {
    let (index, _) = loader::load_path(path)?;
    index
        .qualified()
        .with_context(|| format!("Failed to qualify resources under {}", path.display()))
}

async fn open_store(cfg: &Config) -> Result<SqliteStore> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;
    Ok(SqliteStore::new(pool))
}
