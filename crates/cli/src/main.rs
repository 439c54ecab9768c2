mod config_commands;
mod extension_commands;
mod repo_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, Subcommand, ValueEnum},
    hikari_config::{HikariConfig, Severity},
    hikari_extensions::{ContentKind, ExtensionHost, HttpCapabilities, JsonFileStore},
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "hikari", about = "Hikari source extension manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Content kind to operate on.
    #[arg(long, global = true, value_enum, default_value_t = KindArg::Manga)]
    kind: KindArg,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom data directory (overrides config and platform default).
    #[arg(long, global = true, env = "HIKARI_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Config file to load instead of the discovered one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Manga,
    Anime,
}

impl From<KindArg> for ContentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Manga => ContentKind::Manga,
            KindArg::Anime => ContentKind::Anime,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Repository management.
    Repo {
        #[command(subcommand)]
        action: repo_commands::RepoAction,
    },
    /// List every extension offered by the added repositories.
    Catalog {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Install an extension from a repository.
    Install {
        /// Repository URL the extension is listed in.
        #[arg(long)]
        repo: String,
        /// Extension id.
        id: String,
    },
    /// Remove an installed extension.
    Uninstall { id: String },
    /// Enable an installed extension.
    Enable { id: String },
    /// Disable an installed extension without removing it.
    Disable { id: String },
    /// Flip the enabled flag of an installed extension.
    Toggle { id: String },
    /// List installed extensions and their load state.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List the sources currently available for queries.
    Sources {
        /// Only sources in this language.
        #[arg(long)]
        lang: Option<String>,
    },
    /// Show installed extensions with a newer version in their repository.
    Updates,
    /// Update one installed extension.
    Update { id: String },
    /// Search a source.
    Search {
        /// Source id.
        source: String,
        query: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Configuration checks.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<HikariConfig> {
    let mut config = match cli.config {
        Some(ref path) => hikari_config::load_config(path)?,
        None => hikari_config::discover_and_load(),
    };
    if let Some(ref dir) = cli.data_dir {
        config.data_dir = Some(dir.clone());
    }

    let result = hikari_config::validate::validate_config(&config);
    for d in &result.diagnostics {
        match d.severity {
            Severity::Error => error!(path = %d.path, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
            Severity::Info => info!(path = %d.path, "{}", d.message),
        }
    }
    if result.has_errors() {
        anyhow::bail!("configuration has errors; run `hikari config check` for details");
    }
    Ok(config)
}

async fn build_host(config: &HikariConfig) -> anyhow::Result<ExtensionHost> {
    let data_dir = hikari_config::data_dir(config);
    info!(data_dir = %data_dir.display(), "opening extension data");

    let kv = Arc::new(JsonFileStore::new(data_dir));
    let capabilities = Arc::new(
        HttpCapabilities::new(&config.network).context("failed to build plugin HTTP client")?,
    );
    let host = ExtensionHost::builder(config, kv, capabilities)
        .build()
        .context("failed to construct extension host")?;
    host.initialize().await;
    Ok(host)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "hikari starting");

    if let Commands::Config { action } = cli.command {
        return config_commands::handle_config(action, cli.config.as_deref());
    }

    let config = load_config(&cli)?;
    let host = build_host(&config).await?;
    let ctx = host.context(cli.kind.into());

    match cli.command {
        Commands::Repo { action } => repo_commands::handle_repo(ctx, action).await,
        Commands::Catalog { json } => extension_commands::catalog(ctx, json).await,
        Commands::Install { repo, id } => extension_commands::install(ctx, &repo, &id).await,
        Commands::Uninstall { id } => extension_commands::uninstall(ctx, &id).await,
        Commands::Enable { id } => extension_commands::set_enabled(ctx, &id, true).await,
        Commands::Disable { id } => extension_commands::set_enabled(ctx, &id, false).await,
        Commands::Toggle { id } => extension_commands::toggle(ctx, &id).await,
        Commands::List { json } => extension_commands::list(ctx, json).await,
        Commands::Sources { lang } => extension_commands::sources(ctx, lang.as_deref()).await,
        Commands::Updates => extension_commands::updates(ctx).await,
        Commands::Update { id } => extension_commands::update(ctx, &id).await,
        Commands::Search {
            source,
            query,
            page,
        } => extension_commands::search(ctx, &source, &query, page).await,
        Commands::Config { .. } => Ok(()),
    }
}
