use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use onyx_gui_lib::config::ExtensionConfig;
use onyx_gui_lib::server::{self, ServerConfig, ServerState};
use onyx_gui_lib::{
    ApiProxy, BackendTarget, DocumentOpener, HostServices, HttpTransport, InstanceRegistry,
    JsonFileStateStore, LogNotifier,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "onyx-gui", about = "Onyx GUI extension core", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the backend extension endpoints
    Serve {
        /// Address to listen on
        #[arg(long, env = "ONYX_GUI_BIND", default_value = "127.0.0.1:8888")]
        bind: String,
        /// Notebook server base URL path
        #[arg(long, env = "JUPYTERHUB_SERVICE_PREFIX", default_value = "/")]
        base_url: String,
        /// Directory downloaded and written files land in
        #[arg(long, default_value = ".")]
        root_dir: PathBuf,
    },
    /// Relay a GET to the Onyx API and print the response body
    Route {
        route: String,
        /// Send through the alternate backend extension
        #[arg(long)]
        alternate: bool,
    },
    /// Download an s3:// object server-side and print its local path
    Open { uri: String },
    /// Write content to a file server-side
    Write {
        path: String,
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        content: Option<String>,
        /// Read the content from a local file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Read a value from an instance's saved state
    Get { instance: String, key: String },
    /// Save a JSON value into an instance's state
    Set {
        instance: String,
        key: String,
        value: String,
    },
    /// Print the backend extension version
    Version,
    /// Show the saved client settings, or update them
    Config {
        /// Notebook server base URL
        #[arg(long)]
        server_url: Option<String>,
        /// Notebook server token (empty to clear)
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        request_timeout_secs: Option<u64>,
        #[arg(long)]
        state_file: Option<PathBuf>,
    },
}

/// Opening a document from the command line means printing its path.
struct PrintOpener;

impl DocumentOpener for PrintOpener {
    fn open(&self, path: &str) {
        println!("{path}");
    }
}

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    onyx_gui_lib::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, base_url, root_dir } => serve(&bind, base_url, root_dir).await,
        Commands::Config {
            server_url,
            token,
            request_timeout_secs,
            state_file,
        } => configure(server_url, token, request_timeout_secs, state_file),
        command => run_client(command).await,
    }
}

/// Commands that act as one extension instance against a running server.
async fn run_client(command: Commands) -> anyhow::Result<()> {
    let config = ExtensionConfig::load();
    let registry = activate(&config).await?;

    match command {
        Commands::Serve { .. } | Commands::Config { .. } => {}
        Commands::Route { route, alternate } => {
            let target = if alternate { BackendTarget::Alternate } else { BackendTarget::Primary };
            let ctx = registry.open(None).await;
            let result = ctx.route_request_to(&route, target).await;
            registry.close_all().await;
            println!("{}", result?.text());
        }
        Commands::Open { uri } => {
            let ctx = registry.open(None).await;
            let result = ctx.resolve_remote_object(&uri).await;
            registry.close_all().await;
            result?;
        }
        Commands::Write { path, content, file } => {
            let content = match (content, file) {
                (Some(content), _) => content,
                (None, Some(file)) => std::fs::read_to_string(&file)
                    .with_context(|| format!("reading {}", file.display()))?,
                (None, None) => anyhow::bail!("--content or --file is required"),
            };
            let ctx = registry.open(None).await;
            let result = ctx.write_remote_file(&path, &content).await;
            registry.close_all().await;
            result?;
        }
        Commands::Get { instance, key } => {
            // Reading leaves the instance's state in place
            let ctx = registry.open(Some(&instance)).await;
            match ctx.get(&key) {
                Some(value) => println!("{value}"),
                None => anyhow::bail!("no value for {key} in {instance}"),
            }
        }
        Commands::Set { instance, key, value } => {
            // Bare words are stored as strings
            let value = serde_json::from_str(&value)
                .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
            let ctx = registry.open(Some(&instance)).await;
            ctx.set(&key, value);
            ctx.cache().flush().await;
        }
        Commands::Version => {
            let version = registry.version();
            if version.is_empty() {
                anyhow::bail!("backend version unavailable");
            }
            println!("{version}");
        }
    }
    Ok(())
}

fn configure(
    server_url: Option<String>,
    token: Option<String>,
    request_timeout_secs: Option<u64>,
    state_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = ExtensionConfig::load_saved();
    let changed = server_url.is_some()
        || token.is_some()
        || request_timeout_secs.is_some()
        || state_file.is_some();

    if let Some(url) = server_url {
        config.server_url = url;
    }
    if let Some(token) = token {
        config.token = Some(token).filter(|t| !t.is_empty());
    }
    if let Some(secs) = request_timeout_secs {
        config.request_timeout_secs = secs;
    }
    if let Some(path) = state_file {
        config.state_file = Some(path);
    }
    if changed {
        config.save().map_err(anyhow::Error::msg)?;
    }

    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

async fn activate(config: &ExtensionConfig) -> anyhow::Result<InstanceRegistry> {
    let settings = config.proxy_settings().map_err(anyhow::Error::msg)?;
    let transport = HttpTransport::new(config.token.clone(), config.request_timeout())
        .context("building HTTP client")?;
    let proxy = ApiProxy::new(settings, Arc::new(transport));

    let store = JsonFileStateStore::open(config.state_file_path())
        .await
        .context("opening state file")?;

    let services = HostServices {
        proxy: Arc::new(proxy),
        documents: Arc::new(PrintOpener),
        notifier: Arc::new(LogNotifier),
    };
    Ok(InstanceRegistry::activate(Arc::new(store), services).await)
}

async fn serve(bind: &str, base_url: String, root_dir: PathBuf) -> anyhow::Result<()> {
    let config = ServerConfig::from_env(base_url, root_dir);
    if config.onyx_credentials().is_none() {
        tracing::warn!("ONYX_DOMAIN / ONYX_TOKEN not set; Onyx requests will be refused");
    }
    let state = ServerState::new(config).context("building HTTP client")?;
    server::start_server(Arc::new(state), bind)
        .await
        .with_context(|| format!("serving on {bind}"))
}
