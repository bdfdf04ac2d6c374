#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    /// `/provider` alone lists providers; with an id it switches.
    Provider(Option<String>),
    /// `/login [provider]`; defaults to the active provider.
    Login(Option<String>),
    Mcp,
    /// `/resume` alone lists saved sessions; with an id (or unique prefix) it
    /// continues that transcript.
    Resume(Option<String>),
    Retry,
    Quit,
    Unknown(String),
}

pub const HELP_TEXT: &str = "\
/help              show this help
/provider [id]     list providers or switch to <id>
/login [id]        run the login flow for a provider (default: active)
/mcp               show MCP server status and tool catalog
/resume [id]       list saved sessions or continue session <id>
/retry             re-send the last request without a new message
/quit              exit
Ctrl-C cancels the running turn.";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut words = trimmed.split_whitespace();
    let command = words.next().unwrap_or(trimmed).to_string();
    let argument = words.next().map(str::to_string);

    let parsed = match command.as_str() {
        "/help" => SlashCommand::Help,
        "/provider" => SlashCommand::Provider(argument),
        "/login" => SlashCommand::Login(argument),
        "/mcp" => SlashCommand::Mcp,
        "/resume" => SlashCommand::Resume(argument),
        "/retry" => SlashCommand::Retry,
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}
