//! # parley
//!
//! Terminal chat client: initializes a session, sends each stdin line as a
//! message, and prints session updates as they arrive.

#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parley_core::ids::{ChatId, MessageId, VisitorId};
use parley_core::messages::Role;
use parley_session::{
    ConnectionConfig, CoordinatorConfig, HealthProbe, HttpHealthProbe, HttpSessionService,
    InitializeOptions, SendOptions, SessionCoordinator, SessionUpdate,
};
use parley_settings::ParleySettings;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

/// Parley terminal chat client.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Terminal chat client", version)]
struct Cli {
    /// WebSocket endpoint (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Base URL of the session HTTP API (overrides settings).
    #[arg(long)]
    api: Option<String>,

    /// Tenant identifier (overrides settings).
    #[arg(long)]
    tenant: Option<String>,

    /// Bearer token for the connection.
    #[arg(long)]
    token: Option<String>,

    /// Resume an existing chat instead of creating one.
    #[arg(long)]
    chat: Option<String>,

    /// Stable visitor identity.
    #[arg(long)]
    visitor: Option<String>,

    /// Skip the backend readiness probe.
    #[arg(long)]
    skip_health: bool,

    /// Log filter, e.g. `info` or `parley_session=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, settings: &mut ParleySettings) {
        if let Some(url) = &self.url {
            settings.connection.url.clone_from(url);
        }
        if let Some(api) = &self.api {
            settings.connection.api_base_url.clone_from(api);
        }
        if let Some(tenant) = &self.tenant {
            settings.connection.tenant_id.clone_from(tenant);
        }
        if self.token.is_some() {
            settings.connection.token.clone_from(&self.token);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send(String),
    Retry(MessageId),
    Switch(ChatId),
    Stats,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Send(line.to_owned());
    };
    let (name, arg) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(name, arg)| (name, arg.trim()));
    match (name, arg) {
        ("quit" | "exit", _) => Command::Quit,
        ("stats", _) => Command::Stats,
        ("help", _) => Command::Help,
        ("retry", id) if !id.is_empty() => Command::Retry(MessageId::from(id)),
        ("switch", chat) if !chat.is_empty() => Command::Switch(ChatId::from(chat)),
        _ => Command::Unknown(line.to_owned()),
    }
}

const HELP: &str = "commands: /retry <message-id>, /switch <chat-id>, /stats, /quit";

fn render(update: &SessionUpdate) -> Option<String> {
    let line = match update {
        SessionUpdate::ConnectionState(state) => format!("* connection {state}"),
        SessionUpdate::SessionStarted(session) => match &session.chat_id {
            Some(chat_id) => format!("* session ready in chat {chat_id}"),
            None => "* session ready (degraded, no chat id)".to_string(),
        },
        SessionUpdate::Initialization { phase, message } => match message {
            Some(message) => format!("* {phase}: {message}"),
            None => format!("* {phase}"),
        },
        SessionUpdate::MessageAdded(message) if message.role == Role::User => {
            format!("> [{}] {}", message.id, message.content)
        }
        SessionUpdate::MessageUpdated(message) => match &message.metadata.failure_reason {
            Some(reason) => format!("! [{}] failed: {reason}", message.id),
            None if message.role == Role::Assistant => {
                format!("< [{}] {}", message.id, message.content)
            }
            None => format!("* [{}] {:?}", message.id, message.status),
        },
        SessionUpdate::MessageReconciled { temp_id, message } => {
            format!("* [{temp_id}] delivered as {}", message.id)
        }
        SessionUpdate::AssistantTyping(true) => "* assistant is typing".to_string(),
        SessionUpdate::RateLimited { retry_after_ms } => {
            format!("! rate limited, wait {retry_after_ms} ms")
        }
        SessionUpdate::Error { class, message } => format!("! {message} ({class})"),
        SessionUpdate::ChatSwitched { to, .. } => format!("* switched to chat {to}"),
        SessionUpdate::Disconnected => "* disconnected".to_string(),
        SessionUpdate::MessageAdded(_)
        | SessionUpdate::MessageRemoved(_)
        | SessionUpdate::StreamDelta { .. }
        | SessionUpdate::AssistantTyping(false) => return None,
    };
    Some(line)
}

async fn print_updates(mut updates: broadcast::Receiver<SessionUpdate>) {
    loop {
        match updates.recv().await {
            Ok(update) => {
                if let Some(line) = render(&update) {
                    println!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "update printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn build_coordinator(cli: &Cli, settings: &ParleySettings) -> SessionCoordinator {
    let api = settings.connection.api_base_url.clone();
    let request_timeout = Duration::from_millis(settings.session.request_timeout_ms);
    let sessions = Arc::new(HttpSessionService::new(api.clone(), request_timeout));
    let health: Option<Arc<dyn HealthProbe>> = if cli.skip_health {
        None
    } else {
        Some(Arc::new(HttpHealthProbe::new(api, request_timeout)))
    };
    SessionCoordinator::new(
        CoordinatorConfig::from_settings(settings),
        ConnectionConfig::from_settings(settings),
        sessions,
        health,
    )
}

fn handle(coordinator: &SessionCoordinator, command: Command) -> bool {
    let outcome = match command {
        Command::Send(text) => coordinator.send_message(&text, SendOptions::default()).map(drop),
        Command::Retry(id) => coordinator.retry_message(&id).map(drop),
        Command::Switch(chat_id) => coordinator.switch_chat(chat_id),
        Command::Stats => {
            println!("connection: {:?}", coordinator.connection_stats());
            println!("typing: {:?}", coordinator.typing_stats());
            Ok(())
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Unknown(line) => {
            println!("unknown command: {line}\n{HELP}");
            Ok(())
        }
        Command::Empty => Ok(()),
        Command::Quit => return false,
    };
    if let Err(err) = outcome {
        tracing::debug!(error = %err, "command failed");
        println!("! {}", err.user_message());
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = parley_settings::load_settings().context("Failed to load settings")?;
    cli.apply(&mut settings);
    parley_settings::validate(&settings).context("Invalid settings")?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.logging.level.as_filter_str().to_string());
    if settings.logging.json {
        parley_core::logging::init_json_subscriber(&level);
    } else {
        parley_core::logging::init_subscriber(&level);
    }
    if settings.connection.tenant_id.trim().is_empty() {
        anyhow::bail!("a tenant id is required (--tenant or connection.tenantId)");
    }

    let coordinator = build_coordinator(&cli, &settings);
    let printer = tokio::spawn(print_updates(coordinator.subscribe()));

    let options = InitializeOptions {
        visitor_id: cli.visitor.as_deref().map(VisitorId::from),
        session_id: None,
        chat_id: cli.chat.as_deref().map(ChatId::from),
    };
    let session = coordinator
        .initialize(options)
        .await
        .context("Failed to start chat session")?;
    tracing::info!(chat_id = ?session.chat_id.as_deref(), degraded = session.degraded, "chat ready");
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        if !handle(&coordinator, parse_command(&line)) {
            break;
        }
    }

    coordinator.disconnect();
    // Let the printer flush the final updates.
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::messages::{Message, MessageMetadata, MessageStatus};

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(parse_command("  hello  "), Command::Send("hello".into()));
        assert_eq!(parse_command("   "), Command::Empty);
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse_command("/quit"), Command::Quit);
        assert_eq!(parse_command("/exit"), Command::Quit);
        assert_eq!(parse_command("/stats"), Command::Stats);
        assert_eq!(
            parse_command("/retry  tmp-1 "),
            Command::Retry(MessageId::from("tmp-1"))
        );
        assert_eq!(
            parse_command("/switch chat-2"),
            Command::Switch(ChatId::from("chat-2"))
        );
    }

    #[test]
    fn incomplete_commands_are_unknown() {
        assert_eq!(parse_command("/retry"), Command::Unknown("/retry".into()));
        assert_eq!(parse_command("/nope x"), Command::Unknown("/nope x".into()));
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "parley",
            "--url",
            "wss://chat.example.com/ws",
            "--tenant",
            "acme",
            "--token",
            "t0k",
            "--json-logs",
        ]);
        let mut settings = ParleySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.connection.url, "wss://chat.example.com/ws");
        assert_eq!(settings.connection.tenant_id, "acme");
        assert_eq!(settings.connection.token.as_deref(), Some("t0k"));
        assert!(settings.logging.json);
    }

    #[test]
    fn render_failed_message() {
        let mut message = Message::user("hi");
        message.status = MessageStatus::Failed;
        message.metadata = MessageMetadata::failure("not acknowledged");
        let line = render(&SessionUpdate::MessageUpdated(message)).unwrap();
        assert!(line.ends_with("failed: not acknowledged"));
    }

    #[test]
    fn stream_deltas_are_not_printed() {
        let update = SessionUpdate::StreamDelta {
            message_id: MessageId::from("a1"),
            content: "Hel".into(),
        };
        assert_eq!(render(&update), None);
    }
}
