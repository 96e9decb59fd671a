use chrono::Utc;
use colored::Colorize;
use docent_core::chat::{ChatError, ChatSession};
use docent_core::store::{Bookmark, Role};
use eyre::{Result, WrapErr};
use futures::StreamExt;
use std::fmt::Display;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const HELP: &str = "\
/help               Show this help screen
/history            Show the conversation so far
/clear              Forget the conversation
/bookmark TITLE     Bookmark the last reply under TITLE
/bookmarks          List bookmarks
/sessions           List saved sessions
/save-session NAME  Save the conversation as a named session
/exit               Leave docent";

const PREVIEW_CHARS: usize = 100;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Help,
    History,
    Clear,
    Bookmark(String),
    Bookmarks,
    Sessions,
    SaveSession(String),
    Exit,
    Chat(String),
    Invalid(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ReplCommand::Empty;
        }
        if !line.starts_with('/') {
            return ReplCommand::Chat(line.to_string());
        }

        let (command, argument) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command.to_ascii_lowercase().as_str() {
            "/help" => ReplCommand::Help,
            "/history" => ReplCommand::History,
            "/clear" => ReplCommand::Clear,
            "/bookmarks" => ReplCommand::Bookmarks,
            "/sessions" => ReplCommand::Sessions,
            "/exit" | "/quit" => ReplCommand::Exit,
            "/bookmark" if argument.is_empty() => {
                ReplCommand::Invalid("Usage: /bookmark TITLE".to_string())
            }
            "/bookmark" => ReplCommand::Bookmark(argument.to_string()),
            "/save-session" if argument.is_empty() => {
                ReplCommand::Invalid("Usage: /save-session NAME".to_string())
            }
            "/save-session" => ReplCommand::SaveSession(argument.to_string()),
            _ => ReplCommand::Invalid(format!(
                "Unknown command {command}. Type /help for the list."
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Line-oriented front end over a [`ChatSession`].
///
/// Output goes to any writer so the loop can run against a buffer in tests.
pub struct Repl<W> {
    chat: ChatSession,
    stream: bool,
    out: W,
}

impl<W: Write> Repl<W> {
    pub fn new(chat: ChatSession, stream: bool, out: W) -> Self {
        Self { chat, stream, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn print_help(&mut self) -> Result<()> {
        writeln!(self.out, "{HELP}")?;
        Ok(())
    }

    /// Read lines until `/exit`, end of input or Ctrl-C at the prompt.
    pub async fn run<R>(&mut self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            write!(self.out, "{} ", "You:".cyan().bold())?;
            self.out.flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line.wrap_err("Failed to read input")?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                writeln!(self.out)?;
                break;
            };

            if self.handle(&line).await? == Flow::Exit {
                break;
            }
        }
        writeln!(self.out, "{}", "Goodbye!".magenta().bold())?;
        Ok(())
    }

    /// Act on one line. Only output failures are returned as errors; chat
    /// and store failures are reported and the loop goes on.
    pub async fn handle(&mut self, line: &str) -> Result<Flow> {
        match ReplCommand::parse(line) {
            ReplCommand::Empty => {}
            ReplCommand::Help => self.print_help()?,
            ReplCommand::History => self.show_history()?,
            ReplCommand::Clear => {
                self.chat.store().clear();
                match self.chat.store().save_async().await {
                    Ok(()) => self.success("History cleared.")?,
                    Err(err) => self.failure(&err, None)?,
                }
            }
            ReplCommand::Bookmark(title) => self.bookmark_last_reply(&title)?,
            ReplCommand::Bookmarks => self.show_bookmarks()?,
            ReplCommand::Sessions => self.show_sessions()?,
            ReplCommand::SaveSession(name) => match self.chat.save_session(&name) {
                Ok(session) => {
                    let count = session.messages().len();
                    self.success(&format!("Saved session '{name}' with {count} messages."))?;
                }
                Err(err) => self.failure(&err, None)?,
            },
            ReplCommand::Exit => return Ok(Flow::Exit),
            ReplCommand::Invalid(message) => {
                writeln!(self.out, "{}", message.red())?;
            }
            ReplCommand::Chat(text) => {
                let token = CancellationToken::new();
                let interrupt = {
                    let token = token.clone();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            token.cancel();
                        }
                    })
                };
                let outcome = if self.stream {
                    self.stream_turn(&text, token).await
                } else {
                    self.turn(&text, token).await
                };
                interrupt.abort();
                outcome?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn turn(&mut self, text: &str, token: CancellationToken) -> Result<()> {
        match self.chat.send_with_token(text, token).await {
            Ok(outcome) => {
                writeln!(self.out, "{} {}", "Docent:".green().bold(), outcome.reply)?;
                if let Some(err) = outcome.persist_error {
                    self.failure(&err, None)?;
                }
            }
            Err(err) => self.chat_failure(&err)?,
        }
        Ok(())
    }

    async fn stream_turn(&mut self, text: &str, token: CancellationToken) -> Result<()> {
        let mut stream = self.chat.stream(text, token);
        let mut reply = String::new();
        write!(self.out, "{} ", "Docent:".green().bold())?;

        while let Some(fragment) = stream.next().await {
            match fragment {
                Ok(fragment) => {
                    write!(self.out, "{fragment}")?;
                    self.out.flush()?;
                    reply.push_str(&fragment);
                }
                Err(err) => {
                    writeln!(self.out)?;
                    return self.chat_failure(&err);
                }
            }
        }
        writeln!(self.out)?;

        if let Err(err) = self.chat.record_turn(text, &reply).await {
            warn!(target: "docent::cli", "Reply was not saved: {}", err);
            self.failure(&err, None)?;
        }
        Ok(())
    }

    fn chat_failure(&mut self, err: &ChatError) -> Result<()> {
        self.failure(err, err.hint())
    }

    fn show_history(&mut self) -> Result<()> {
        let history = self.chat.store().history();
        if history.is_empty() {
            writeln!(self.out, "{}", "No conversation yet.".dimmed())?;
            return Ok(());
        }
        for message in history {
            let label = match message.role {
                Role::User => "You".cyan().bold(),
                Role::Assistant => "Docent".green().bold(),
            };
            writeln!(self.out, "{label}: {}", preview(&message.content))?;
        }
        Ok(())
    }

    fn bookmark_last_reply(&mut self, title: &str) -> Result<()> {
        let last_reply = self
            .chat
            .store()
            .history()
            .into_iter()
            .rev()
            .find(|message| message.role == Role::Assistant);
        let Some(reply) = last_reply else {
            writeln!(self.out, "{}", "Nothing to bookmark yet.".yellow())?;
            return Ok(());
        };

        let bookmark = Bookmark::new(title)
            .with_field("content", reply.content)
            .with_field("saved_at", Utc::now().to_rfc3339());
        match self.chat.store().add_bookmark(bookmark) {
            Ok(true) => self.success("Bookmarked!")?,
            Ok(false) => writeln!(self.out, "{}", "Already bookmarked.".yellow())?,
            Err(err) => self.failure(&err, None)?,
        }
        Ok(())
    }

    fn show_bookmarks(&mut self) -> Result<()> {
        let bookmarks = self.chat.store().bookmarks();
        if bookmarks.is_empty() {
            writeln!(self.out, "{}", "No bookmarks.".dimmed())?;
            return Ok(());
        }
        for (index, bookmark) in bookmarks.iter().enumerate() {
            write!(self.out, "{:>3}. {}", index + 1, bookmark.title().bold())?;
            if let Some(doc_type) = bookmark.doc_type() {
                write!(self.out, " [{doc_type}]")?;
            }
            writeln!(self.out)?;
            if let Some(content) = bookmark.content() {
                writeln!(self.out, "     {}", preview(content).dimmed())?;
            }
        }
        Ok(())
    }

    fn show_sessions(&mut self) -> Result<()> {
        let sessions = self.chat.store().sessions();
        if sessions.is_empty() {
            writeln!(self.out, "{}", "No saved sessions.".dimmed())?;
            return Ok(());
        }
        for session in sessions {
            let created = session
                .get("created_at")
                .and_then(|value| value.as_str())
                .unwrap_or("unknown date");
            writeln!(
                self.out,
                "- {} ({} messages, {})",
                session.name().bold(),
                session.messages().len(),
                created
            )?;
        }
        Ok(())
    }

    fn success(&mut self, message: &str) -> Result<()> {
        writeln!(self.out, "{}", message.green())?;
        Ok(())
    }

    fn failure(&mut self, err: &dyn Display, hint: Option<&str>) -> Result<()> {
        debug!(target: "docent::cli", "Reported error: {}", err);
        writeln!(self.out, "{}", format!("Error: {err}").red())?;
        if let Some(hint) = hint {
            writeln!(self.out, "{}", hint.dimmed())?;
        }
        Ok(())
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
