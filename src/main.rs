mod callback;
mod config;
mod console;
mod refresh;
mod storage;
mod supabase;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use gate::{
    GateConfig, GateError, GateState, IdentityProvider, Notifier, Project, SessionGate, SessionStorage, StorageError,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::callback::{CallbackError, RedirectOutcome};
use crate::config::{AppConfig, ConfigError};
use crate::console::{Console, Prompter, TerminalNotifier};
use crate::storage::FileStorage;
use crate::supabase::{Endpoint, GoTrueClient, PostgrestClient};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("session storage: {0}")]
    Storage(#[from] StorageError),
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Gate(#[from] GateError),
    #[error("{0}")]
    Callback(#[from] CallbackError),
    #[error("terminal: {0}")]
    Io(#[from] std::io::Error),
    #[error("not authorized (state: {0})")]
    NotAuthorized(GateState),
    #[error("MOODS_CALLBACK_ADDR must be set to receive sign-in links")]
    NoCallbackAddr,
    #[error("no sign-in data in {0}")]
    NoRedirectData(String),
    #[error("missing {0}")]
    MissingInput(&'static str),
}

#[derive(Parser, Debug)]
#[command(name = "moods-admin", about = "Moods admin console")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive console (the default).
    Console {
        /// URL a sign-in link opened, including its `#access_token=...` fragment.
        #[arg(long)]
        entry_url: Option<String>,
    },
    /// Restore the persisted session and print who is signed in.
    Status,
    Login {
        #[arg(env = "MOODS_EMAIL")]
        email: String,
        #[arg(long, env = "MOODS_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Email a sign-in link.
    MagicLink { email: String },
    /// Finish sign-in from the URL a sign-in link opened.
    Callback { url: String },
    Logout,
    Projects(ProjectsCommand),
    /// Wait for one sign-in link on the loopback listener.
    ServeCallback,
}

#[derive(Args, Debug)]
struct ProjectsCommand {
    #[command(subcommand)]
    command: ProjectsSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProjectsSubcommand {
    List,
    Add { name: String },
}

/// Everything a command needs, wired from config.
struct App {
    config: AppConfig,
    auth: Arc<GoTrueClient>,
    gate: SessionGate,
}

impl App {
    fn build(config: AppConfig, notifier: Arc<dyn Notifier>) -> Result<Self, CliError> {
        let file = FileStorage::open(&config.storage_path)?;
        let http = supabase::http_client()?;
        let endpoint = Endpoint::new(&config.supabase_url, &config.anon_key);
        info!(
            project = %endpoint.project_ref(),
            storage = %file.path().display(),
            timeout_secs = config.request_timeout.as_secs(),
            "console configured"
        );

        let storage: Arc<dyn SessionStorage> = Arc::new(file);
        let auth = Arc::new(GoTrueClient::new(http.clone(), endpoint.clone(), storage.clone()));
        let store = Arc::new(PostgrestClient::new(http, endpoint, auth.clone()));
        let gate = SessionGate::new(
            auth.clone(),
            store,
            storage,
            notifier,
            GateConfig { request_timeout: config.request_timeout },
        );
        Ok(Self { config, auth, gate })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();
    init_tracing();
    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!(error = %e, "failed to load .env");
        }
    }

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so they never interleave with the console screen on stdout.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let command = cli.command.unwrap_or(Command::Console { entry_url: None });
    let config = AppConfig::from_env()?;
    let prompter = Arc::new(Prompter::stdio());
    let interactive = matches!(command, Command::Console { .. });
    let app = App::build(config, Arc::new(TerminalNotifier::new(prompter.clone(), interactive)))?;

    match command {
        Command::Console { entry_url } => run_console(&app, prompter, entry_url).await,
        Command::Status => {
            app.gate.start().await;
            print_status(&app.gate);
            Ok(())
        }
        Command::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => prompter
                    .ask_secret("Password: ")
                    .await?
                    .ok_or(CliError::MissingInput("password"))?,
            };
            app.gate.sign_in(&email, &password).await?;
            print_status(&app.gate);
            Ok(())
        }
        Command::MagicLink { email } => {
            app.gate
                .request_magic_link(&email, app.config.redirect_url.as_deref())
                .await?;
            Ok(())
        }
        Command::Callback { url } => {
            let (clean, outcome) = callback::parse_entry_url(&url)?;
            let outcome = outcome.ok_or(CliError::NoRedirectData(clean))?;
            complete(&app.gate, outcome).await?;
            print_status(&app.gate);
            Ok(())
        }
        Command::Logout => {
            app.gate.start().await;
            app.gate.sign_out().await;
            print_status(&app.gate);
            Ok(())
        }
        Command::Projects(projects) => run_projects(&app, projects.command).await,
        Command::ServeCallback => serve_callback(&app).await,
    }
}

async fn run_console(app: &App, prompter: Arc<Prompter>, entry_url: Option<String>) -> Result<(), CliError> {
    // Subscribe before anything can emit.
    let events = app.auth.subscribe();
    let refresh = refresh::spawn_refresh_task(app.auth.clone(), app.config.refresh_interval);

    let (redirects, listener) = match app.config.callback_addr {
        Some(addr) => {
            let (tx, rx) = mpsc::channel(4);
            let (local, handle) = callback::serve(addr, tx).await?;
            prompter.say(&format!("Sign-in links are received on http://{local}/"))?;
            (Some(rx), Some(handle))
        }
        None => (None, None),
    };

    let state = app.gate.start().await;
    debug!(%state, "console starting");
    if let Some(url) = entry_url {
        let (clean, outcome) = callback::parse_entry_url(&url)?;
        if let Some(outcome) = outcome {
            debug!(url = %clean, "consuming sign-in data from entry URL");
            callback::apply(&app.gate, outcome).await;
        }
    }

    let result = Console::new(&app.gate, prompter, app.config.redirect_url.clone())
        .run(events, redirects)
        .await;

    refresh.abort();
    if let Some(listener) = listener {
        listener.abort();
    }
    result.map_err(CliError::from)
}

async fn run_projects(app: &App, command: ProjectsSubcommand) -> Result<(), CliError> {
    let state = app.gate.start().await;
    if state != GateState::Authorized {
        return Err(CliError::NotAuthorized(state));
    }
    match command {
        ProjectsSubcommand::List => print_projects(&app.gate.load_projects().await?),
        ProjectsSubcommand::Add { name } => {
            app.gate.create_project(&name).await?;
            print_projects(&app.gate.view().projects);
        }
    }
    Ok(())
}

async fn serve_callback(app: &App) -> Result<(), CliError> {
    let addr = app.config.callback_addr.ok_or(CliError::NoCallbackAddr)?;
    let (tx, mut rx) = mpsc::channel(1);
    let (local, handle) = callback::serve(addr, tx).await?;
    println!("Waiting for a sign-in link on http://{local}/ (Ctrl-C to stop)");

    let outcome = tokio::select! {
        outcome = rx.recv() => outcome,
        _ = tokio::signal::ctrl_c() => None,
    };
    handle.abort();

    let Some(outcome) = outcome else {
        return Ok(());
    };
    complete(&app.gate, outcome).await?;
    print_status(&app.gate);
    Ok(())
}

/// Like [`callback::apply`], but surfaces the failure to the caller.
async fn complete(gate: &SessionGate, outcome: RedirectOutcome) -> Result<(), GateError> {
    match outcome {
        RedirectOutcome::Tokens(tokens) => gate.complete_redirect(tokens).await,
        RedirectOutcome::Error(description) => {
            gate.report_redirect_error(&description).await;
            Err(GateError::Credential(description))
        }
    }
}

fn print_status(gate: &SessionGate) {
    let view = gate.view();
    match view.user {
        Some(user) => println!("{} ({})", user.email, view.state),
        None => println!("signed out"),
    }
}

fn print_projects(projects: &[Project]) {
    if projects.is_empty() {
        println!("(no projects)");
    }
    for project in projects {
        println!("{}", console::format_project(project));
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
