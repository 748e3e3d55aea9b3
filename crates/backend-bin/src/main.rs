// ============================
// crates/backend-bin/src/main.rs
// ============================
//! Entry point of the `repogate` forward-auth service.
use std::io::{BufRead, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use repogate_lib::{
    auth::{generate_secret, AuthGateway, CredentialCodec, CredentialStore, MemoryCredentialStore},
    config::{AuthSettings, LogFormat, Settings, DEFAULT_CONFIG_FILE},
    router::create_router,
    AppState,
};
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zeroize::Zeroizing;

/// Longest accepted stdin line, line terminator included
const MAX_PASSWORD_LEN: usize = 1024;

#[derive(Debug, Parser)]
#[command(name = "repogate", version, about = "Argon2 forward-auth gate for artifact uploads")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "REPOGATE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Print a fresh base64 host secret
    Secret,
    /// Hash a password read from stdin with the secret of a configured host
    Hash {
        /// Host whose secret is used; `*` for the wildcard host
        #[arg(long)]
        host: String,
        /// User name the line is printed for
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Secret => {
            println!("{}", generate_secret()?);
            Ok(())
        },
        Command::Hash { host, user } => hash(&cli.config, &host, &user).await,
        Command::Serve => serve(&cli.config).await,
    }
}

fn load(path: &Path) -> Result<Settings> {
    Settings::load_from(path).with_context(|| format!("loading configuration from {}", path.display()))
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match settings.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn hash(config: &Path, host: &str, user: &str) -> Result<()> {
    if user.is_empty() || user.contains(':') {
        bail!("user name must be non-empty and must not contain ':'");
    }
    let settings = load(config)?;
    let store = MemoryCredentialStore::from_settings(&settings.hosts)?;
    let Some(secret) = store.secret(host).await else {
        bail!("host `{host}` is not configured");
    };

    let password = read_password(std::io::stdin().lock())?;
    let hash = CredentialCodec::default().generate(password.as_bytes(), &secret)?;
    println!("{user} = \"{hash}\"");
    Ok(())
}

/// Read one line, terminator stripped, into a buffer that never grows.
fn read_password(reader: impl BufRead) -> Result<Zeroizing<String>> {
    let mut password = Zeroizing::new(String::with_capacity(MAX_PASSWORD_LEN));
    reader
        .take(MAX_PASSWORD_LEN as u64)
        .read_line(&mut password)
        .context("reading password from stdin")?;
    if password.len() == MAX_PASSWORD_LEN && !password.ends_with('\n') {
        bail!("password line exceeds {MAX_PASSWORD_LEN} bytes");
    }
    let trimmed = password.trim_end_matches(['\r', '\n']).len();
    password.truncate(trimmed);
    if password.is_empty() {
        bail!("empty password");
    }
    Ok(password)
}

async fn serve(config: &Path) -> Result<()> {
    let settings = load(config)?;
    init_tracing(&settings);

    if settings.user_count() == 0 {
        bail!("no users configured; add some with `repogate hash`");
    }

    let state = Arc::new(AppState::new(settings.clone())?);
    info!(
        hosts = settings.hosts.len(),
        users = settings.user_count(),
        ceiling = state.gateway.limiter().ceiling(),
        "authentication engine ready"
    );
    spawn_schedules(Arc::clone(&state.gateway), &settings.auth);

    let app = create_router(state);

    match &settings.socket {
        Some(socket) => serve_unix(socket, app).await,
        None => {
            let listener = tokio::net::TcpListener::bind(settings.bind_addr)
                .await
                .with_context(|| format!("binding {}", settings.bind_addr))?;
            info!("listening on {}", settings.bind_addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            Ok(())
        },
    }
}

#[cfg(unix)]
async fn serve_unix(socket: &Path, app: axum::Router) -> Result<()> {
    // A previous run may have left its socket behind.
    match std::fs::remove_file(socket) {
        Ok(()) => info!("removed stale socket {}", socket.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
        Err(err) => return Err(err).with_context(|| format!("removing {}", socket.display())),
    }
    let listener = tokio::net::UnixListener::bind(socket)
        .with_context(|| format!("binding {}", socket.display()))?;
    info!("listening on {}", socket.display());

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(err) = std::fs::remove_file(socket) {
        error!("failed to remove socket {}: {err}", socket.display());
    }
    served?;
    Ok(())
}

#[cfg(not(unix))]
async fn serve_unix(_socket: &Path, _app: axum::Router) -> Result<()> {
    bail!("unix sockets are not supported on this platform")
}

/// Nonce rotation and coalescer sweeps
fn spawn_schedules(gateway: Arc<AuthGateway>, auth: &AuthSettings) {
    let rotation = auth.nonce_rotation();
    let rotating = Arc::clone(&gateway);
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + rotation, rotation);
        loop {
            ticker.tick().await;
            if let Err(err) = rotating.rotate_nonce() {
                error!(error = %err, "nonce rotation failed");
            }
        }
    });

    let sweep = auth.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + sweep, sweep);
        loop {
            ticker.tick().await;
            let swept = gateway.sweep();
            debug!(swept, "coalescing map swept");
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
