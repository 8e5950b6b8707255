//! Text protocol spoken between the relay and its clients.
//!
//! One command or chat line per `\n`-terminated line. Lines starting with `/`
//! are commands; everything else is chat content for the sender's room.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Longest input line accepted, in bytes. A longer line ends the session.
pub const MAX_LINE: usize = 64 * 1024;

/// Sent to every client right after the connection is accepted.
pub const BANNER: &[&str] = &[
    "Available commands:",
    "/name <new_name> - Change your name",
    "/listall - List all connected clients",
    "/join <room> - Join a room",
    "/leave - Leave the current room",
    "/rooms - List all rooms",
    "/list - List all room participants",
    "/exit - Exit the chat",
    "Type your message below:",
];

pub const NOT_IN_ROOM: &str = "You are not in any room.";
pub const NOT_IN_ROOM_CHAT: &str = "You are not in any room. Use /join <room> to join a room.";
pub const LEFT_ROOM: &str = "You have left the room.";
pub const UNKNOWN_COMMAND: &str = "Unknown command. Type /list to see available commands.";
pub const NAME_USAGE: &str = "Usage: /name <new_name>";
pub const JOIN_USAGE: &str = "Usage: /join <room>";

pub fn name_changed(name: &str) -> String {
    format!("Your name has been changed to {name}")
}

pub fn joined_room(room: &str) -> String {
    format!("You have joined room {room}")
}

/// Formats a chat line the way it is broadcast to a room.
pub fn chat_line(display_name: &str, text: &str) -> String {
    format!("[{display_name}]: {text}")
}

/// A single parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Name(String),
    ListAll,
    Join(String),
    Leave,
    Rooms,
    List,
    Exit,
    /// `/name` or `/join` without a usable argument; carries the usage text.
    Usage(&'static str),
    Unknown,
    Chat(String),
}

impl Input {
    /// Parses a line with its line ending already removed.
    ///
    /// Commands are case-sensitive and matched on the exact prefix, so
    /// `/Join x` and `/names` are unknown commands rather than chat.
    pub fn parse(line: &str) -> Self {
        if !line.starts_with('/') {
            return Input::Chat(line.to_string());
        }

        match line {
            "/listall" => return Input::ListAll,
            "/leave" => return Input::Leave,
            "/rooms" => return Input::Rooms,
            "/list" => return Input::List,
            "/exit" => return Input::Exit,
            "/name" => return Input::Usage(NAME_USAGE),
            "/join" => return Input::Usage(JOIN_USAGE),
            _ => {}
        }

        if let Some(name) = line.strip_prefix("/name ") {
            return argument(name).map_or(Input::Usage(NAME_USAGE), Input::Name);
        }
        if let Some(room) = line.strip_prefix("/join ") {
            return argument(room).map_or(Input::Usage(JOIN_USAGE), Input::Join);
        }

        Input::Unknown
    }
}

fn argument(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

/// Writes several lines with a single flush at the end.
pub async fn write_lines<W, I, S>(writer: &mut W, lines: I) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut encoded = Vec::new();
    for line in lines {
        encoded.extend_from_slice(line.as_ref().as_bytes());
        encoded.push(b'\n');
    }
    if encoded.is_empty() {
        return Ok(());
    }
    writer.write_all(&encoded).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_commands() {
        assert_eq!(Input::parse("/listall"), Input::ListAll);
        assert_eq!(Input::parse("/leave"), Input::Leave);
        assert_eq!(Input::parse("/rooms"), Input::Rooms);
        assert_eq!(Input::parse("/list"), Input::List);
        assert_eq!(Input::parse("/exit"), Input::Exit);
    }

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(Input::parse("/name Alice"), Input::Name("Alice".into()));
        assert_eq!(Input::parse("/join general"), Input::Join("general".into()));
        assert_eq!(
            Input::parse("/name  Alice Smith "),
            Input::Name("Alice Smith".into())
        );
    }

    #[test]
    fn missing_arguments_yield_usage() {
        assert_eq!(Input::parse("/name"), Input::Usage(NAME_USAGE));
        assert_eq!(Input::parse("/name   "), Input::Usage(NAME_USAGE));
        assert_eq!(Input::parse("/join"), Input::Usage(JOIN_USAGE));
        assert_eq!(Input::parse("/join "), Input::Usage(JOIN_USAGE));
    }

    #[test]
    fn commands_are_case_sensitive() {
        assert_eq!(Input::parse("/LIST"), Input::Unknown);
        assert_eq!(Input::parse("/Join general"), Input::Unknown);
        assert_eq!(Input::parse("/names"), Input::Unknown);
        assert_eq!(Input::parse("/"), Input::Unknown);
    }

    #[test]
    fn non_slash_lines_are_chat() {
        assert_eq!(Input::parse("hello"), Input::Chat("hello".into()));
        assert_eq!(Input::parse(" /join x"), Input::Chat(" /join x".into()));
        assert_eq!(Input::parse(""), Input::Chat(String::new()));
    }

    #[test]
    fn chat_line_embeds_display_name() {
        assert_eq!(chat_line("Alice", "hi there"), "[Alice]: hi there");
    }

    #[tokio::test]
    async fn written_lines_are_newline_terminated() {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut lines = BufReader::new(reader).lines();

        write_lines(&mut writer, ["first", "", "third"])
            .await
            .expect("write lines");
        write_line(&mut writer, "fourth").await.expect("write line");
        drop(writer);

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("third"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("fourth"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
