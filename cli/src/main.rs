use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use sso_gate::config::generate_state;
use sso_gate::navigation::{Navigator, path_of};
use sso_gate::net::{ReqwestTransport, TransportError};
use sso_gate::session::{FileStorage, StorageBackend};
use sso_gate::{
    AppConfig, ClientContext, ConfigError, ExecutionContext, NavigationOutcome, RequestError, RequestOptions,
    SessionStore, SsoGate, StorageError,
};
use tracing_subscriber::EnvFilter;

const ROUTE_KEY: &str = "route";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("http client error: {0}")]
    Transport(#[from] TransportError),
    #[error("api request failed: {0}")]
    Request(#[from] RequestError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "sso-gate", about = "Drive the SSO client session gate from a terminal")]
struct Cli {
    /// File holding the session marker and the active route.
    #[arg(long, env = "SSO_GATE_STATE", default_value = ".sso-gate/state.json")]
    state_file: PathBuf,

    /// Per-request timeout for API calls, in seconds.
    #[arg(long, env = "SSO_GATE_TIMEOUT", default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show session state, active route and configuration.
    Status,
    /// Record a completed SSO login with the given session marker.
    Login { marker: String },
    /// End the session on the server and locally.
    Logout,
    /// Navigate to a route through the guard.
    Visit { path: String },
    /// Authenticated GET against the API; prints the JSON body.
    Get { path: String },
    /// Print the SSO authorization URL with a fresh `state` value.
    AuthorizeUrl,
}

/// Navigator persisting the active route next to the session marker, so
/// consecutive invocations behave like one client.
struct StoredRoute {
    storage: Arc<FileStorage>,
}

impl Navigator for StoredRoute {
    fn current_path(&self) -> String {
        match self.storage.get_item(ROUTE_KEY) {
            Ok(Some(route)) => path_of(&route).to_owned(),
            Ok(None) => "/".to_owned(),
            Err(e) => {
                tracing::warn!(error = %e, "route read failed");
                "/".to_owned()
            }
        }
    }

    fn navigate(&self, target: &str) -> bool {
        if path_of(target) == self.current_path() {
            return false;
        }
        match self.storage.set_item(ROUTE_KEY, target) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(route = %target, error = %e, "route write failed");
                false
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let storage = Arc::new(FileStorage::new(&cli.state_file));
    let ctx = ExecutionContext::Client(ClientContext::from_shared(storage.clone()));
    let navigator = Arc::new(StoredRoute { storage });
    let transport = Arc::new(ReqwestTransport::with_timeout(Duration::from_secs(cli.timeout_secs))?);
    let gate = SsoGate::new(config, &ctx, navigator, transport);

    match cli.command {
        Command::Status => run_status(&gate),
        Command::Login { marker } => run_login(&gate, marker),
        Command::Logout => run_logout(&gate).await,
        Command::Visit { path } => run_visit(&gate, &path),
        Command::Get { path } => run_get(&gate, &path).await,
        Command::AuthorizeUrl => run_authorize_url(&gate),
    }
}

fn run_status(gate: &SsoGate) -> Result<(), CliError> {
    let config = gate.config();
    println!("profile:  {}", config.profile.as_str());
    println!("api base: {}", config.api_base);
    println!("sso:      {}", config.sso_server_url);
    println!("session:  {:?}", gate.auth_state());
    println!("route:    {}", gate.router().current_path());
    Ok(())
}

fn run_login(gate: &SsoGate, marker: String) -> Result<(), CliError> {
    gate.complete_login(marker)?;
    println!("signed in");
    Ok(())
}

/// The SSO server also accepts the session token as a bearer credential,
/// which stands in for the cookie jar across separate invocations.
fn bearer_options(gate: &SsoGate) -> RequestOptions {
    let options = RequestOptions::new();
    match gate.session().and_then(SessionStore::get) {
        Some(marker) => options.header("Authorization", format!("Bearer {}", marker.as_str())),
        None => options,
    }
}

async fn run_logout(gate: &SsoGate) -> Result<(), CliError> {
    gate.logout_with(bearer_options(gate)).await;
    println!("signed out; now at {}", gate.router().current_path());
    Ok(())
}

fn run_visit(gate: &SsoGate, path: &str) -> Result<(), CliError> {
    match gate.router().push(path) {
        NavigationOutcome::Entered(path) => println!("entered {path}"),
        NavigationOutcome::Redirected { requested, to } => {
            println!("{requested} requires a session; redirected to {to}");
        }
    }
    Ok(())
}

async fn run_get(gate: &SsoGate, path: &str) -> Result<(), CliError> {
    match gate.client().request::<Value>(path, bearer_options(gate)).await {
        Ok(resp) => print_json(&resp.data),
        Err(RequestError::Unauthorized) => {
            eprintln!("session expired; redirected to {}", gate.router().current_path());
            Err(RequestError::Unauthorized.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn run_authorize_url(gate: &SsoGate) -> Result<(), CliError> {
    println!("{}", gate.config().authorize_url(&generate_state())?);
    Ok(())
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
