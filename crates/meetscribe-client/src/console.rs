//! Line commands typed into a running participant.

use crate::session::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Session(Command),
    /// Summarize the meeting, or one speaker by display name
    Summary(Option<String>),
    Members,
    Help,
    Unknown(String),
}

pub const HELP: &str =
    "commands: mute | unmute | listen | stop | summary [name|id] | members | leave";

pub fn parse(line: &str) -> Option<ConsoleInput> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    Some(match word.to_ascii_lowercase().as_str() {
        "mute" => ConsoleInput::Session(Command::Mute(true)),
        "unmute" => ConsoleInput::Session(Command::Mute(false)),
        "listen" => ConsoleInput::Session(Command::StartListening),
        "stop" => ConsoleInput::Session(Command::StopListening),
        "leave" | "quit" => ConsoleInput::Session(Command::Leave),
        "summary" => ConsoleInput::Summary((!rest.is_empty()).then(|| rest.to_string())),
        "members" => ConsoleInput::Members,
        "help" | "?" => ConsoleInput::Help,
        _ => ConsoleInput::Unknown(line.to_string()),
    })
}
