//! Interactive console: one screen, two modes.
//!
//! ARCHITECTURE
//! ============
//! ```text
//!   stdin lines ──┐
//!   auth events ──┼──▶ select! (events first) ──▶ SessionGate ──▶ render
//!   callbacks ────┘
//! ```
//! The loop owns the gate's lifecycle [`Subscription`] for as long as the
//! console runs. Events are always drained before the next command is read,
//! so a command never acts on a state the provider has already moved past.
//! Commands run inline; notices raised while one runs are acknowledged on
//! the same stdin the loop reads from.

use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex, PoisonError};

use gate::{GateError, GateState, GateView, Notice, Notifier, Project, SessionGate, Subscription};
use time::macros::format_description;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::callback::{self, RedirectOutcome};

// =============================================================================
// TERMINAL I/O
// =============================================================================

type Input = Lines<Box<dyn AsyncBufRead + Send + Unpin>>;

/// Line-oriented terminal shared by the command loop and the notifier.
pub struct Prompter {
    input: tokio::sync::Mutex<Input>,
    output: Mutex<Box<dyn Write + Send>>,
    /// Secrets are read from the controlling terminal without echo.
    hide_secrets: bool,
}

impl Prompter {
    pub fn new(input: impl AsyncBufRead + Send + Unpin + 'static, output: impl Write + Send + 'static) -> Self {
        let input: Box<dyn AsyncBufRead + Send + Unpin> = Box::new(input);
        Self {
            input: tokio::sync::Mutex::new(input.lines()),
            output: Mutex::new(Box::new(output)),
            hide_secrets: false,
        }
    }

    #[must_use]
    pub fn stdio() -> Self {
        Self {
            hide_secrets: io::stdin().is_terminal(),
            ..Self::new(BufReader::new(tokio::io::stdin()), io::stdout())
        }
    }

    /// Next input line without its newline; `None` at end of input.
    pub async fn read_line(&self) -> io::Result<Option<String>> {
        self.input.lock().await.next_line().await
    }

    pub fn say(&self, text: &str) -> io::Result<()> {
        let mut out = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{text}")?;
        out.flush()
    }

    fn prompt(&self, text: &str) -> io::Result<()> {
        let mut out = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        write!(out, "{text}")?;
        out.flush()
    }

    /// Show `question` and read the answer. Blank answers count as no answer.
    pub async fn ask(&self, question: &str) -> io::Result<Option<String>> {
        self.prompt(question)?;
        Ok(self
            .read_line()
            .await?
            .map(|line| line.trim().to_owned())
            .filter(|line| !line.is_empty()))
    }

    /// Like [`Prompter::ask`], without echoing the answer when stdin is a terminal.
    pub async fn ask_secret(&self, question: &str) -> io::Result<Option<String>> {
        if !self.hide_secrets {
            return self.ask(question).await;
        }
        let question = question.to_owned();
        let answer = tokio::task::spawn_blocking(move || rpassword::prompt_password(question))
            .await
            .map_err(io::Error::other)??;
        Ok(Some(answer).filter(|answer| !answer.is_empty()))
    }
}

/// Shows notices on the terminal.
///
/// With `acknowledge` set, `notify` waits for Enter, which is how the
/// interactive console makes a notice modal. One-shot commands print and move on.
pub struct TerminalNotifier {
    prompter: Arc<Prompter>,
    acknowledge: bool,
}

impl TerminalNotifier {
    #[must_use]
    pub fn new(prompter: Arc<Prompter>, acknowledge: bool) -> Self {
        Self { prompter, acknowledge }
    }

    async fn show(&self, notice: &Notice) -> io::Result<()> {
        self.prompter.say(&format!("\n!! {notice}"))?;
        if self.acknowledge {
            self.prompter.prompt("   [press Enter] ")?;
            self.prompter.read_line().await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for TerminalNotifier {
    async fn notify(&self, notice: Notice) {
        if let Err(e) = self.show(&notice).await {
            warn!(error = %e, %notice, "failed to show notice");
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SignIn { email: Option<String> },
    MagicLink { email: Option<String> },
    Redirect { url: Option<String> },
    SignOut,
    Retry,
    Load,
    Add { name: Option<String> },
    Help,
    Quit,
}

/// Parse one input line. Blank lines parse to `None`.
///
/// # Errors
///
/// Returns a message for the operator when the command is unknown.
pub fn parse_action(line: &str) -> Result<Option<Action>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let arg = Some(rest.trim().to_owned()).filter(|a| !a.is_empty());
    let action = match command.to_ascii_lowercase().as_str() {
        "login" | "signin" => Action::SignIn { email: arg },
        "link" | "magic" => Action::MagicLink { email: arg },
        "redirect" | "url" => Action::Redirect { url: arg },
        "logout" | "signout" => Action::SignOut,
        "retry" => Action::Retry,
        "load" | "ls" => Action::Load,
        "add" | "new" => Action::Add { name: arg },
        "help" | "?" => Action::Help,
        "quit" | "exit" | "q" => Action::Quit,
        other => return Err(format!("unknown command `{other}`; type `help`")),
    };
    Ok(Some(action))
}

/// Whether `action` is offered in `state`.
///
/// # Errors
///
/// Returns why the action is unavailable.
pub fn available(action: &Action, state: GateState) -> Result<(), &'static str> {
    match action {
        Action::Help | Action::Quit => Ok(()),
        Action::SignIn { .. } | Action::MagicLink { .. } | Action::Redirect { .. } => {
            if state == GateState::Anonymous { Ok(()) } else { Err("already signed in; `logout` first") }
        }
        Action::SignOut => {
            if state.has_session() { Ok(()) } else { Err("not signed in") }
        }
        Action::Retry => {
            if state == GateState::Denied { Ok(()) } else { Err("nothing to retry") }
        }
        Action::Load | Action::Add { .. } => {
            if state == GateState::Authorized { Ok(()) } else { Err("available once access is confirmed") }
        }
    }
}

// =============================================================================
// RENDERING
// =============================================================================

#[must_use]
pub fn format_project(project: &Project) -> String {
    let updated = project
        .updated_at
        .format(format_description!("[year]-[month]-[day] [hour]:[minute] UTC"))
        .unwrap_or_else(|_| project.updated_at.unix_timestamp().to_string());
    format!("{} — {} — {updated}", project.name, project.status.as_deref().unwrap_or("-"))
}

#[must_use]
pub fn render(view: &GateView) -> String {
    let mut lines = vec![String::new(), "== Moods Admin ==".to_owned()];

    match &view.user {
        None if view.state == GateState::Authenticating => lines.push("Signing in...".to_owned()),
        None => {
            lines.push("Not signed in.".to_owned());
            lines.push(String::new());
            lines.push("  login [email]     sign in with email and password".to_owned());
            lines.push("  link [email]      email me a sign-in link".to_owned());
            lines.push("  redirect [url]    finish sign-in from a link's URL".to_owned());
        }
        Some(user) => {
            let status = match view.state {
                GateState::Authorized => "access confirmed",
                GateState::Denied => "access could not be verified",
                _ => "checking access...",
            };
            lines.push(format!("Signed in as {} ({status})", user.email));
            lines.push(String::new());
            lines.push("  logout            sign out".to_owned());
            if view.state == GateState::Denied {
                lines.push("  retry             check access again".to_owned());
            }
            if view.state == GateState::Authorized {
                lines.push("  load              load projects".to_owned());
                lines.push("  add [name]        add a project".to_owned());
                lines.push(String::new());
                if view.projects.is_empty() {
                    lines.push("  (no projects loaded)".to_owned());
                }
                lines.extend(view.projects.iter().map(|p| format!("  * {}", format_project(p))));
            }
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

// =============================================================================
// LOOP
// =============================================================================

pub struct Console<'a> {
    gate: &'a SessionGate,
    prompter: Arc<Prompter>,
    redirect_url: Option<String>,
}

impl<'a> Console<'a> {
    #[must_use]
    pub fn new(gate: &'a SessionGate, prompter: Arc<Prompter>, redirect_url: Option<String>) -> Self {
        Self { gate, prompter, redirect_url }
    }

    /// Run until `quit` or end of input.
    ///
    /// # Errors
    ///
    /// Returns terminal I/O errors.
    pub async fn run(
        &self,
        mut events: Subscription,
        mut redirects: Option<mpsc::Receiver<RedirectOutcome>>,
    ) -> io::Result<()> {
        let mut shown = String::new();
        loop {
            let screen = render(&self.gate.view());
            if screen != shown {
                self.prompter.say(&screen)?;
                self.prompter.prompt("> ")?;
                shown = screen;
            }

            tokio::select! {
                biased;
                Some(event) = events.recv() => self.gate.handle_event(event).await,
                Some(outcome) = next_redirect(&mut redirects) => callback::apply(self.gate, outcome).await,
                line = self.prompter.read_line() => {
                    let Some(line) = line? else { break };
                    if !self.dispatch(&line).await? {
                        break;
                    }
                    // Always re-show the screen after a command.
                    shown.clear();
                }
            }
        }
        debug!("console closed");
        Ok(())
    }

    /// Execute one command line. Returns `false` to quit.
    async fn dispatch(&self, line: &str) -> io::Result<bool> {
        let action = match parse_action(line) {
            Ok(Some(action)) => action,
            Ok(None) => return Ok(true),
            Err(message) => {
                self.prompter.say(&message)?;
                return Ok(true);
            }
        };
        if let Err(reason) = available(&action, self.gate.state()) {
            self.prompter.say(reason)?;
            return Ok(true);
        }

        match action {
            Action::Quit => return Ok(false),
            Action::Help => self.prompter.say(&render(&self.gate.view()))?,
            Action::SignIn { email } => {
                let Some(email) = self.arg_or_ask(email, "Email: ").await? else {
                    return Ok(true);
                };
                let Some(password) = self.prompter.ask_secret("Password: ").await? else {
                    return Ok(true);
                };
                self.report(self.gate.sign_in(&email, &password).await)?;
            }
            Action::MagicLink { email } => {
                let Some(email) = self.arg_or_ask(email, "Email for magic link: ").await? else {
                    return Ok(true);
                };
                self.report(
                    self.gate
                        .request_magic_link(&email, self.redirect_url.as_deref())
                        .await,
                )?;
            }
            Action::Redirect { url } => {
                let Some(url) = self.arg_or_ask(url, "Redirect URL: ").await? else {
                    return Ok(true);
                };
                match callback::parse_entry_url(&url) {
                    Ok((_, Some(outcome))) => callback::apply(self.gate, outcome).await,
                    Ok((_, None)) => self.prompter.say("That URL carries no sign-in data.")?,
                    Err(e) => self.prompter.say(&e.to_string())?,
                }
            }
            Action::SignOut => self.gate.sign_out().await,
            Action::Retry => self.report(self.gate.authorize().await)?,
            Action::Load => self.report(self.gate.load_projects().await.map(|_| ()))?,
            Action::Add { name } => {
                let Some(name) = self.arg_or_ask(name, "Project name: ").await? else {
                    return Ok(true);
                };
                self.report(self.gate.create_project(&name).await)?;
            }
        }
        Ok(true)
    }

    async fn arg_or_ask(&self, arg: Option<String>, question: &str) -> io::Result<Option<String>> {
        match arg {
            Some(arg) => Ok(Some(arg)),
            None => self.prompter.ask(question).await,
        }
    }

    /// Failures the gate already raised as notices are only logged.
    fn report(&self, result: Result<(), GateError>) -> io::Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e @ (GateError::InvalidInput(_) | GateError::SessionActive | GateError::NotAuthorized)) => {
                self.prompter.say(&e.to_string())
            }
            Err(e) => {
                debug!(error = %e, "command failed");
                Ok(())
            }
        }
    }
}

async fn next_redirect(redirects: &mut Option<mpsc::Receiver<RedirectOutcome>>) -> Option<RedirectOutcome> {
    match redirects {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "console_test.rs"]
mod tests;
