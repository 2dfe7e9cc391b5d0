//! The chat host: an append-only transcript, the trigger registry, and a
//! terminal renderer on top of both.

use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use std::io::Write;
use tracing::{debug, warn};

use crate::codeblocks::CodeBlock;
use crate::model::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
    Exception,
    Notice,
}

impl Sender {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::User => "You",
            Self::Assistant => "Fleet Context",
            Self::Exception => "Exception",
            Self::Notice => "System",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatEntry {
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub sealed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub message: MessageId,
    pub blocks: Vec<CodeBlock>,
    pub clicks: u64,
}

/// One activation of a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Click {
    pub trigger: usize,
    pub blocks: Vec<CodeBlock>,
    pub clicks: u64,
}

/// The contract between the response cycle and whatever displays the chat.
pub trait ChatHost {
    /// User and assistant turns in order. Notices are not part of the history.
    fn serialize(&self) -> Vec<Message>;

    /// Appends a complete, non-interactive message.
    fn send(&mut self, content: &str, sender: Sender) -> MessageId;

    /// Appends `chunk` to `message` if it is still open, otherwise starts a
    /// new message.
    fn stream(&mut self, chunk: &str, message: Option<MessageId>, sender: Sender) -> MessageId;

    /// Seals a streamed message. Later `stream` calls will not extend it.
    fn finish(&mut self, message: MessageId);

    fn content(&self, message: MessageId) -> Option<&str>;

    /// Arms one execute trigger per message. Returns the 1-based trigger
    /// number, or `None` when the message already has one.
    fn arm_trigger(&mut self, message: MessageId, blocks: Vec<CodeBlock>) -> Option<usize>;
}

#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<ChatEntry>,
    triggers: Vec<Trigger>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn push_user(&mut self, content: &str) -> MessageId {
        self.push_sealed(content, Sender::User)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.triggers.clear();
    }

    /// Activates trigger `number` (1-based), or the most recent trigger.
    pub fn click(&mut self, number: Option<usize>) -> Option<Click> {
        let index = match number {
            Some(0) => return None,
            Some(n) => n - 1,
            None => self.triggers.len().checked_sub(1)?,
        };
        let trigger = self.triggers.get_mut(index)?;
        trigger.clicks += 1;
        Some(Click {
            trigger: index + 1,
            blocks: trigger.blocks.clone(),
            clicks: trigger.clicks,
        })
    }

    fn next_id(&self) -> MessageId {
        MessageId(self.entries.len())
    }

    fn push_sealed(&mut self, content: &str, sender: Sender) -> MessageId {
        let id = self.next_id();
        self.entries.push(ChatEntry {
            id,
            sender,
            content: content.to_string(),
            sent_at: Utc::now(),
            sealed: true,
        });
        id
    }

    fn entry_mut(&mut self, message: MessageId) -> Option<&mut ChatEntry> {
        self.entries.get_mut(message.0)
    }
}

impl ChatHost for Transcript {
    fn serialize(&self) -> Vec<Message> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.sender {
                Sender::User => Some(Message::user(entry.content.clone())),
                Sender::Assistant | Sender::Exception => {
                    Some(Message::assistant(entry.content.clone()))
                }
                Sender::Notice => None,
            })
            .collect()
    }

    fn send(&mut self, content: &str, sender: Sender) -> MessageId {
        self.push_sealed(content, sender)
    }

    fn stream(&mut self, chunk: &str, message: Option<MessageId>, sender: Sender) -> MessageId {
        if let Some(id) = message
            && let Some(entry) = self.entry_mut(id)
            && !entry.sealed
        {
            entry.content.push_str(chunk);
            return id;
        }

        let id = self.next_id();
        self.entries.push(ChatEntry {
            id,
            sender,
            content: chunk.to_string(),
            sent_at: Utc::now(),
            sealed: false,
        });
        id
    }

    fn finish(&mut self, message: MessageId) {
        if let Some(entry) = self.entry_mut(message) {
            entry.sealed = true;
        }
    }

    fn content(&self, message: MessageId) -> Option<&str> {
        self.entries
            .get(message.0)
            .map(|entry| entry.content.as_str())
    }

    fn arm_trigger(&mut self, message: MessageId, blocks: Vec<CodeBlock>) -> Option<usize> {
        if self.triggers.iter().any(|trigger| trigger.message == message) {
            debug!(message = message.0, "trigger already armed for message");
            return None;
        }
        self.triggers.push(Trigger {
            message,
            blocks,
            clicks: 0,
        });
        Some(self.triggers.len())
    }
}

/// Renders the transcript to a terminal as it changes.
pub struct TerminalChat<W: Write> {
    transcript: Transcript,
    out: W,
}

impl<W: Write> TerminalChat<W> {
    pub fn new(out: W) -> Self {
        Self {
            transcript: Transcript::new(),
            out,
        }
    }

    pub fn transcript_mut(&mut self) -> &mut Transcript {
        &mut self.transcript
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, text: &str) {
        if let Err(err) = self
            .out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush())
        {
            warn!(error = %err, "failed to write chat output");
        }
    }

    fn header(sender: Sender) -> String {
        let name = sender.display_name();
        match sender {
            Sender::User => name.bold().to_string(),
            Sender::Assistant => name.cyan().bold().to_string(),
            Sender::Exception => name.red().bold().to_string(),
            Sender::Notice => name.yellow().bold().to_string(),
        }
    }

    /// Writes the transcript with local timestamps.
    pub fn print_history(&mut self) {
        if self.transcript.entries().is_empty() {
            self.write("(history is empty)\n\n");
            return;
        }

        let mut rendered = String::new();
        for entry in self.transcript.entries() {
            let at: DateTime<Local> = entry.sent_at.into();
            rendered.push_str(&format!(
                "[{}] {} {}: {}\n",
                entry.id.0,
                at.format("%H:%M:%S"),
                entry.sender.display_name(),
                entry.content
            ));
        }
        rendered.push('\n');
        self.write(&rendered);
    }
}

impl<W: Write> ChatHost for TerminalChat<W> {
    fn serialize(&self) -> Vec<Message> {
        self.transcript.serialize()
    }

    fn send(&mut self, content: &str, sender: Sender) -> MessageId {
        let id = self.transcript.send(content, sender);
        let line = format!("{}: {}\n\n", Self::header(sender), content);
        self.write(&line);
        id
    }

    fn stream(&mut self, chunk: &str, message: Option<MessageId>, sender: Sender) -> MessageId {
        let id = self.transcript.stream(chunk, message, sender);
        if message == Some(id) {
            self.write(chunk);
        } else {
            let line = format!("{}: {}", Self::header(sender), chunk);
            self.write(&line);
        }
        id
    }

    fn finish(&mut self, message: MessageId) {
        self.transcript.finish(message);
        self.write("\n\n");
    }

    fn content(&self, message: MessageId) -> Option<&str> {
        self.transcript.content(message)
    }

    fn arm_trigger(&mut self, message: MessageId, blocks: Vec<CodeBlock>) -> Option<usize> {
        let number = self.transcript.arm_trigger(message, blocks)?;
        let hint = format!("[run {number}] type /run {number} to execute the code above\n\n");
        self.write(&hint.green().to_string());
        Some(number)
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatHost, Click, Sender, TerminalChat, Transcript};
    use crate::codeblocks::CodeBlock;
    use crate::model::Message;

    fn block(source: &str) -> CodeBlock {
        CodeBlock {
            language: Some("python".to_string()),
            source: source.to_string(),
        }
    }

    #[test]
    fn stream_creates_then_extends_one_message() {
        let mut transcript = Transcript::new();
        let first = transcript.stream("Hel", None, Sender::Assistant);
        let second = transcript.stream("lo", Some(first), Sender::Assistant);
        assert_eq!(first, second);
        assert_eq!(transcript.content(first), Some("Hello"));
        assert_eq!(transcript.entries().len(), 1);
    }

    #[test]
    fn sealed_messages_are_not_extended() {
        let mut transcript = Transcript::new();
        let id = transcript.stream("done", None, Sender::Assistant);
        transcript.finish(id);
        let next = transcript.stream("new", Some(id), Sender::Assistant);
        assert_ne!(id, next);
        assert_eq!(transcript.content(id), Some("done"));
        assert_eq!(transcript.content(next), Some("new"));
    }

    #[test]
    fn serialize_keeps_turns_and_drops_notices() {
        let mut transcript = Transcript::new();
        transcript.push_user("hi");
        transcript.send("something went wrong", Sender::Notice);
        transcript.send("hello", Sender::Assistant);
        transcript.send("```python\nboom\n```", Sender::Exception);

        assert_eq!(
            transcript.serialize(),
            vec![
                Message::user("hi"),
                Message::assistant("hello"),
                Message::assistant("```python\nboom\n```"),
            ]
        );
    }

    #[test]
    fn arm_trigger_is_idempotent_per_message() {
        let mut transcript = Transcript::new();
        let id = transcript.send("code", Sender::Assistant);
        assert_eq!(transcript.arm_trigger(id, vec![block("x = 1")]), Some(1));
        assert_eq!(transcript.arm_trigger(id, vec![block("x = 2")]), None);
        assert_eq!(transcript.triggers().len(), 1);
        assert_eq!(transcript.triggers()[0].blocks, vec![block("x = 1")]);
    }

    #[test]
    fn click_counts_every_activation() {
        let mut transcript = Transcript::new();
        assert_eq!(transcript.click(None), None);

        let first = transcript.send("a", Sender::Assistant);
        let second = transcript.send("b", Sender::Assistant);
        transcript.arm_trigger(first, vec![block("a")]);
        transcript.arm_trigger(second, vec![block("b")]);

        let latest = transcript.click(None).expect("latest trigger");
        assert_eq!(
            latest,
            Click {
                trigger: 2,
                blocks: vec![block("b")],
                clicks: 1,
            }
        );
        assert_eq!(transcript.click(Some(2)).map(|c| c.clicks), Some(2));
        assert_eq!(transcript.click(Some(1)).map(|c| c.clicks), Some(1));
        assert_eq!(transcript.click(Some(0)), None);
        assert_eq!(transcript.click(Some(3)), None);
    }

    #[test]
    fn reset_clears_entries_and_triggers() {
        let mut transcript = Transcript::new();
        let id = transcript.send("a", Sender::Assistant);
        transcript.arm_trigger(id, vec![block("a")]);
        transcript.reset();
        assert!(transcript.entries().is_empty());
        assert!(transcript.triggers().is_empty());
    }

    #[test]
    fn terminal_renders_streamed_text_in_place() {
        colored::control::set_override(false);
        let mut chat = TerminalChat::new(Vec::new());
        let id = chat.stream("Hello", None, Sender::Assistant);
        chat.stream(", world", Some(id), Sender::Assistant);
        chat.finish(id);
        chat.arm_trigger(id, vec![block("print(1)")]);

        let rendered = String::from_utf8(chat.into_inner()).expect("utf8 output");
        assert!(rendered.starts_with("Fleet Context: Hello, world\n\n"));
        assert!(rendered.contains("type /run 1"));
    }
}
