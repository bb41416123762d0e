//! Interactive chat loop.
//!
//! Reads lines from stdin and sends them as user turns while printing replies
//! and the telemetry feed as they arrive. Lines starting with `/` are
//! commands.

use std::env;
use std::io::{self, IsTerminal};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use tether::config::ClientConfig;
use tether::push::{ChannelKind, ConnectionState};
use tether::session::{DeliveryState, SessionEvent, SessionManager, SessionSnapshot};
use tether::{Credential, HttpChatApi, Identity, SseTransport};

#[derive(Debug, Args)]
pub struct ChatCommand {
    /// Username for basic authentication
    #[arg(short, long, env = "TETHER_USER")]
    pub user: Option<String>,
    /// Password for basic authentication
    #[arg(short, long, env = "TETHER_PASSWORD", requires = "user", conflicts_with = "token")]
    pub password: Option<String>,
    /// Bearer token
    #[arg(long, env = "TETHER_TOKEN")]
    pub token: Option<String>,
    /// Resume an existing conversation instead of starting a new one
    #[arg(long, value_name = "CONVERSATION_ID")]
    pub resume: Option<String>,
}

impl ChatCommand {
    fn identity(&self) -> Result<Identity> {
        match (&self.user, &self.password, &self.token) {
            (user, _, Some(token)) => Ok(Identity::new(
                user.clone().unwrap_or_else(|| "token".to_string()),
                Credential::bearer(token.clone()),
            )),
            (Some(user), Some(password), None) => {
                Ok(Identity::new(user.clone(), Credential::basic(user, password)))
            }
            (Some(_), None, None) => bail!("--password is required with --user"),
            (None, _, None) => bail!("pass --token, or --user with --password"),
        }
    }
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Empty,
    Quit,
    New,
    Retry,
    Status,
    Reconnect,
    Help,
    Unknown(String),
    Message(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        match line {
            "/quit" | "/exit" => Self::Quit,
            "/new" => Self::New,
            "/retry" => Self::Retry,
            "/status" => Self::Status,
            "/reconnect" => Self::Reconnect,
            "/help" => Self::Help,
            _ if line.starts_with('/') && !line.starts_with("//") => {
                Self::Unknown(line.to_string())
            }
            // `//text` sends a message that starts with a slash.
            _ => Self::Message(line.strip_prefix('/').unwrap_or(line).to_string()),
        }
    }
}

const HELP: &str = "commands: /quit /new /retry /status /reconnect /help";

#[tokio::main]
pub async fn run(config: ClientConfig, cmd: ChatCommand) -> Result<()> {
    let identity = cmd.identity()?;
    let api = HttpChatApi::new(&config).context("building HTTP client")?;
    let transport = SseTransport::new(&config).context("building event-stream client")?;
    let style = Style::detect();

    let mut manager = SessionManager::new(Arc::new(api), Arc::new(transport), config);
    let started = match cmd.resume.as_deref() {
        Some(id) => manager.resume(identity.clone(), id).await,
        None => manager.initialize(identity.clone()).await,
    };
    started.context("starting chat session")?;
    info!(
        conversation = manager.session().id.as_deref().unwrap_or("-"),
        user = %identity.username,
        "chat session started"
    );
    print_status(&manager.snapshot());
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                match Input::parse(&line) {
                    Input::Empty => {}
                    Input::Quit => break,
                    Input::Help => println!("{HELP}"),
                    Input::Unknown(command) => println!("unknown command {command}. {HELP}"),
                    Input::Status => print_status(&manager.snapshot()),
                    Input::New => {
                        manager.start_initialize(identity.clone());
                        println!("starting a new session...");
                    }
                    Input::Retry => match manager.history().last_failed() {
                        Some(id) => {
                            if let Err(e) = manager.retry(id) {
                                eprintln!("error: {e}");
                            }
                        }
                        None => println!("nothing to retry"),
                    },
                    Input::Reconnect => {
                        if !manager.reconnect() {
                            println!("nothing to reconnect");
                        }
                    }
                    Input::Message(text) => {
                        if let Err(e) = manager.send(text) {
                            eprintln!("error: {e}");
                        }
                    }
                }
            }
            event = manager.next_event() => {
                let Some(event) = event else {
                    break;
                };
                render(&manager, &style, event);
            }
        }
    }

    let exchanged = manager.messages().len();
    manager.teardown();
    info!(messages = exchanged, "chat finished");
    Ok(())
}

fn render(manager: &SessionManager, style: &Style, event: SessionEvent) {
    match event {
        SessionEvent::Initialized { .. } => print_status(&manager.snapshot()),
        SessionEvent::InitializationFailed { reason } => eprintln!("error: {reason}"),
        SessionEvent::Delivery { message_id, state } => {
            if let DeliveryState::Failed(reason) = state {
                eprintln!("error: message {message_id} was not sent: {reason}");
                eprintln!("type /retry to send it again");
            }
        }
        SessionEvent::Reply { content, .. } => println!("assistant> {content}"),
        SessionEvent::Telemetry { arrival_index } => {
            if let Some(frame) = manager
                .telemetry_log()
                .iter()
                .rev()
                .find(|f| f.arrival_index == arrival_index)
            {
                println!(
                    "{}",
                    style.dim(&format!("[#{}] {}", arrival_index, frame.payload.label()))
                );
            }
        }
        SessionEvent::ConnectionChanged { kind, state } => {
            let name = match kind {
                ChannelKind::Conversation => "replies",
                ChannelKind::Telemetry => "telemetry",
            };
            eprintln!("{}", style.dim(&format!("-- {name}: {state}")));
            if state.is_terminal() {
                eprintln!("type /reconnect to try again");
            }
        }
    }
}

fn print_status(snapshot: &SessionSnapshot) {
    println!("session:      {}", snapshot.lifecycle);
    if let Some(username) = &snapshot.username {
        println!("user:         {username}");
    }
    if let Some(id) = &snapshot.conversation_id {
        println!("conversation: {id}");
    }
    if let Some(id) = &snapshot.process_id {
        println!("process:      {id}");
    }
    println!("replies:      {}", describe(&snapshot.conversation_state));
    println!(
        "telemetry:    {} ({} events)",
        describe(&snapshot.telemetry_state),
        snapshot.telemetry_len
    );
    println!("messages:     {}", snapshot.messages.len());
    if snapshot.awaiting_reply {
        println!("waiting for a reply");
    }
}

fn describe(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Errored { terminal: true, .. } => format!("{state} (gave up)"),
        _ => state.to_string(),
    }
}

struct Style {
    color: bool,
}

impl Style {
    fn detect() -> Self {
        Self {
            color: env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal(),
        }
    }

    fn dim(&self, text: &str) -> String {
        if self.color {
            format!("\x1b[2m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }
}
