use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use agent_engine::{init_logging, EnvConfig};
use agent_provider::new_cancel_signal;
use anyhow::Context;
use coding_agent::commands::{parse_slash_command, SlashCommand, HELP_TEXT};
use coding_agent::tools::NATIVE_TOOL_NAMES;
use coding_agent::{
    credential_manager, AgentConfig, AgentError, AgentEvent, Conversation, EventSink, NativeTools, Orchestrator,
    OrchestratorSettings, ProviderRegistry, SubmitOutcome, ToolDispatcher,
};
use credentials::CredentialManager;
use mcp_client::{McpManager, McpSettings};
use session_store::SessionStore;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = EnvConfig::from_env();
    init_logging(&env).context("failed to initialize logging")?;

    let cwd = std::env::current_dir().context("failed to resolve the current directory")?;
    let config_path = env
        .config_path
        .clone()
        .unwrap_or_else(|| cwd.join(".agent").join("config.json"));
    let config = AgentConfig::load(&config_path)?;
    let workspace = config.workspace_root(&cwd);
    let active = config.active_provider_id(env.provider.as_deref())?;

    let native = NativeTools::new(&workspace, config.tools.clone()).map_err(AgentError::Workspace)?;
    let mcp = McpManager::start(
        &config.mcp_config(),
        NATIVE_TOOL_NAMES.iter().map(|name| (*name).to_string()),
        McpSettings::default(),
    )
    .await;

    let (conversation, session_id) = open_session(&workspace, env.resume, &active)?;
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let credentials_path = config.credentials_path(home.as_deref(), &workspace);
    let credentials = Arc::new(credential_manager(&config, &credentials_path, |name| {
        std::env::var(name).ok()
    })?);
    let registry = ProviderRegistry::from_config(&config, &credentials, Some(&session_id))?;

    let mut orchestrator = Orchestrator::new(
        registry,
        &active,
        ToolDispatcher::new(Arc::new(native), Arc::new(mcp)),
        conversation,
        OrchestratorSettings {
            instructions: config.system_instructions(env.system_instructions.as_deref()),
            max_rounds: config.max_rounds,
        },
    )?;

    println!(
        "agent ready: provider {active}, workspace {}, {} turn(s) in transcript. /help for commands.",
        workspace.display(),
        orchestrator.transcript().len()
    );
    for rejected in orchestrator.rejected_tools() {
        println!("warning: {rejected}");
    }

    let cancel = new_cancel_signal();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                cancel.store(true, Ordering::Release);
            }
        }
    });

    let mut printer = TerminalPrinter::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().context("failed to flush stdout")?;
        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        cancel.store(false, Ordering::Release);

        let outcome = match parse_slash_command(&line) {
            None => orchestrator.submit(line.trim(), &cancel, &mut printer).await,
            Some(SlashCommand::Quit) => break,
            Some(SlashCommand::Help) => {
                println!("{HELP_TEXT}");
                continue;
            }
            Some(SlashCommand::Provider(None)) => {
                for id in orchestrator.provider_ids() {
                    let marker = if id == orchestrator.active_provider() { "*" } else { " " };
                    println!("{marker} {id}");
                }
                continue;
            }
            Some(SlashCommand::Provider(Some(id))) => {
                match orchestrator.switch_provider(&id) {
                    Ok(()) => println!("active provider: {id}"),
                    Err(error) => println!("error: {error}"),
                }
                continue;
            }
            Some(SlashCommand::Login(provider)) => {
                let provider = provider.unwrap_or_else(|| orchestrator.active_provider().to_string());
                login(&credentials, &provider).await;
                continue;
            }
            Some(SlashCommand::Resume(id)) => {
                resume(&mut orchestrator, &workspace, id.as_deref());
                continue;
            }
            Some(SlashCommand::Mcp) => {
                print_mcp_status(&orchestrator);
                continue;
            }
            Some(SlashCommand::Retry) => match orchestrator.retry(&cancel, &mut printer).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    println!("error: {error}");
                    continue;
                }
            },
            Some(SlashCommand::Unknown(command)) => {
                println!("unknown command {command}; /help lists commands");
                continue;
            }
        };
        printer.finish_line();
        print_outcome(&outcome);
    }

    orchestrator.tools().native().stop_sessions();
    orchestrator.tools().mcp().shutdown().await;
    Ok(())
}

/// Returns the conversation together with its session id.
fn open_session(workspace: &Path, resume: bool, provider: &str) -> Result<(Conversation, String), AgentError> {
    if resume {
        let resumed = SessionStore::latest_session_path(workspace)
            .and_then(|path| SessionStore::open(&path))
            .and_then(|store| {
                let session_id = store.header().session_id.clone();
                Conversation::from_store(store).map(|conversation| (conversation, session_id))
            });
        match resumed {
            Ok(resumed) => return Ok(resumed),
            Err(error) => tracing::warn!(%error, "could not resume the latest session; starting a new one"),
        }
    }
    let store = SessionStore::create_with_provider(workspace, Some(provider))?;
    let session_id = store.header().session_id.clone();
    Ok((Conversation::with_sink(Box::new(store)), session_id))
}

fn resume(orchestrator: &mut Orchestrator, workspace: &Path, id: Option<&str>) {
    let Some(id) = id else {
        match SessionStore::list_sessions(workspace) {
            Ok(sessions) if sessions.is_empty() => println!("no saved sessions in this workspace"),
            Ok(sessions) => {
                for session in sessions {
                    let provider = session.provider_id.as_deref().unwrap_or("-");
                    println!(
                        "{}  {}  {provider}  {} entries  {}",
                        session.session_id, session.created_at, session.entry_count, session.title
                    );
                }
                println!("/resume <id> continues one of these (a unique prefix is enough)");
            }
            Err(error) => println!("error: {error}"),
        }
        return;
    };
    let resumed = SessionStore::find_session(workspace, id)
        .and_then(|summary| SessionStore::open(&summary.path))
        .and_then(Conversation::from_store);
    match resumed {
        Ok(conversation) => {
            orchestrator.replace_conversation(conversation);
            println!("resumed session: {} turn(s)", orchestrator.transcript().len());
        }
        Err(error) => println!("error: {error}"),
    }
}

async fn login(credentials: &CredentialManager, provider: &str) {
    if !credentials.has_authorization_flow(provider) {
        println!("provider {provider} authenticates with an API key; set the variable named by api_key_env");
        return;
    }
    let presenter = Arc::new(|url: &str| {
        println!("Open this URL in a browser to log in:\n  {url}");
    });
    match credentials.run_authorization_flow(provider, presenter).await {
        Ok(_) => println!("logged in to {provider}"),
        Err(error) => println!("login failed: {error}"),
    }
}

fn print_mcp_status(orchestrator: &Orchestrator) {
    let statuses = orchestrator.tools().mcp().statuses();
    if statuses.is_empty() {
        println!("no MCP servers configured");
    }
    for status in statuses {
        let name = status.server_name.as_deref().unwrap_or("-");
        println!(
            "{} [{}] {} ({name}, {} tools)",
            status.server_id, status.transport, status.state, status.tool_count
        );
        if let Some(error) = status.last_error {
            println!("    last error: {error}");
        }
    }
    for rejected in orchestrator.rejected_tools() {
        println!("rejected: {rejected}");
    }
}

fn print_outcome(outcome: &SubmitOutcome) {
    match outcome {
        SubmitOutcome::Completed => {}
        SubmitOutcome::Cancelled => println!("[cancelled]"),
        SubmitOutcome::Failed(report) => {
            let hint = if report.session_usable {
                "; /retry to try again"
            } else {
                ""
            };
            println!("[failed: {report}{hint}]");
        }
        SubmitOutcome::RoundLimitReached { rounds } => {
            println!("[stopped after {rounds} rounds; send a message to continue]");
        }
    }
}

/// Renders events as plain text on stdout.
#[derive(Debug, Default)]
struct TerminalPrinter {
    mid_line: bool,
}

impl TerminalPrinter {
    fn finish_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }

    fn line(&mut self, text: &str) {
        self.finish_line();
        println!("{text}");
    }
}

impl EventSink for TerminalPrinter {
    fn emit(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::TurnStarted { .. } => {}
            AgentEvent::TextDelta(text) => {
                print!("{text}");
                let _ = std::io::stdout().flush();
                self.mid_line = !text.ends_with('\n');
            }
            AgentEvent::ReasoningDelta(text) => tracing::debug!(reasoning = %text),
            AgentEvent::ToolCallStarted { tool_name, origin, .. } => {
                let origin = origin.map_or_else(|| "unknown".to_string(), |origin| origin.to_string());
                self.line(&format!("-> {tool_name} ({origin})"));
            }
            AgentEvent::ToolCallFinished { summary, is_error, .. } => {
                let marker = if is_error { "x" } else { "ok" };
                self.line(&format!("   [{marker}] {summary}"));
            }
            AgentEvent::TurnCompleted { .. } => self.finish_line(),
            AgentEvent::ProviderSwitched { from, to } => self.line(&format!("[provider: {from} -> {to}]")),
            AgentEvent::Error(report) => self.line(&format!("[{report}]")),
        }
    }
}
