mod app;
mod chat_cmd;
mod config;
mod serve_cmd;
mod session_cmds;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use plansmith_db::pool;

use config::{CliOverrides, PlansmithConfig};

#[derive(Parser)]
#[command(name = "plansmith", about = "Conversational account plan research assistant")]
struct Cli {
    /// Database URL (overrides PLANSMITH_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Session store backend: file, postgres or memory
    #[arg(long, global = true)]
    store: Option<String>,

    /// Completion model (overrides PLANSMITH_MODEL env var)
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a plansmith config file
    Init {
        /// Session store backend to record: file, postgres or memory
        #[arg(long, default_value = "file")]
        backend: String,
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/plansmith")]
        db_url: String,
        /// OpenAI-compatible API base URL
        #[arg(long)]
        base_url: Option<String>,
        /// Session file for the file backend
        #[arg(long)]
        sessions_path: Option<PathBuf>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the plansmith database and run migrations
    DbInit,
    /// Chat with the assistant on stdin
    Chat {
        /// Session to open or create
        #[arg(long, default_value = "cli")]
        session: String,
        /// User the session belongs to
        #[arg(long, default_value = "local")]
        user: String,
        /// Do not resume paused research automatically
        #[arg(long)]
        no_auto_continue: bool,
    },
    /// Serve the chat HTTP API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
    /// Print the conversation of a session
    History {
        session: String,
    },
    /// Print the plan of a session as markdown
    Show {
        session: String,
    },
    /// List stored session ids
    Sessions,
    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

/// Execute `plansmith init`: write the config file.
fn cmd_init(
    backend: &str,
    db_url: &str,
    base_url: Option<String>,
    sessions_path: Option<PathBuf>,
    force: bool,
) -> anyhow::Result<()> {
    let path = config::config_path();
    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        completion: config::CompletionSection {
            base_url,
            ..Default::default()
        },
        store: config::StoreSection {
            backend: Some(backend.to_string()),
            path: sessions_path,
        },
        database: config::DatabaseSection {
            url: Some(db_url.to_string()),
        },
        turn: config::TurnSection::default(),
    };
    let path = config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  store.backend = {backend}");
    println!("  database.url = {db_url}");
    println!();
    println!("Set PLANSMITH_API_KEY (or OPENAI_API_KEY), or add completion.api_key to the file.");
    if backend == "postgres" {
        println!("Next: run `plansmith db-init` to create and migrate the database.");
    }
    Ok(())
}

/// Execute `plansmith db-init`: create the database and run migrations.
async fn cmd_db_init(resolved: &PlansmithConfig) -> anyhow::Result<()> {
    println!("Initializing plansmith database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let sessions = pool::session_count(&db_pool).await?;
    println!("Database ready. sessions: {sessions} rows");

    db_pool.close().await;
    println!("plansmith db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = CliOverrides {
        database_url: cli.database_url.clone(),
        store: cli.store.clone(),
        model: cli.model.clone(),
    };

    match cli.command {
        Commands::Init {
            backend,
            db_url,
            base_url,
            sessions_path,
            force,
        } => {
            cmd_init(&backend, &db_url, base_url, sessions_path, force)?;
        }
        Commands::DbInit => {
            let resolved = PlansmithConfig::resolve(&overrides)?;
            cmd_db_init(&resolved).await?;
        }
        Commands::Chat {
            session,
            user,
            no_auto_continue,
        } => {
            let resolved = PlansmithConfig::resolve(&overrides)?;
            let store = app::open_store(&resolved).await?;
            let coordinator = app::build_coordinator(&resolved);
            let options = chat_cmd::ChatOptions {
                session_id: session,
                user_id: user,
                auto_continue: !no_auto_continue,
            };
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            chat_cmd::run_chat(&coordinator, store.as_ref(), &options, stdin, &mut std::io::stdout())
                .await?;
        }
        Commands::Serve { bind, port } => {
            let resolved = PlansmithConfig::resolve(&overrides)?;
            let store = app::open_store(&resolved).await?;
            let coordinator = Arc::new(app::build_coordinator(&resolved));
            let state = serve_cmd::AppState::new(coordinator, store);
            serve_cmd::run_serve(state, &bind, port).await?;
        }
        Commands::History { session } => {
            let resolved = PlansmithConfig::resolve(&overrides)?;
            let store = app::open_store(&resolved).await?;
            session_cmds::run_history(store.as_ref(), &session, &mut std::io::stdout()).await?;
        }
        Commands::Show { session } => {
            let resolved = PlansmithConfig::resolve(&overrides)?;
            let store = app::open_store(&resolved).await?;
            session_cmds::run_show(store.as_ref(), &session, &mut std::io::stdout()).await?;
        }
        Commands::Sessions => {
            let resolved = PlansmithConfig::resolve(&overrides)?;
            let store = app::open_store(&resolved).await?;
            session_cmds::run_list(store.as_ref(), &mut std::io::stdout()).await?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "plansmith", &mut std::io::stdout());
        }
    }

    Ok(())
}
