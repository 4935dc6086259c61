use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::services::export::export_to_markdown;
use crate::services::settings::ChatSettings;
use crate::services::{ChatService, ConversationStore, LocalCache, SettingsService};

const HELP: &str = "\
Commands:
  /new [title]       start a conversation
  /list              list conversations
  /open <id>         switch to a conversation and show its messages
  /rename <title>    rename the current conversation
  /delete <id>       delete a conversation and its messages
  /export            print the current conversation as markdown
  /regenerate        ask again for a reply to the last message
  /system [prompt]   set the system prompt, or clear it
  /help              show this help
  /quit              exit
Anything else is sent as a message.
";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Say(String),
    New(Option<String>),
    List,
    Open(String),
    Rename(String),
    Delete(String),
    Export,
    Regenerate,
    System(Option<String>),
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    /// `None` for a blank line.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Say(line.to_string()));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim().to_string()).filter(|a| !a.is_empty())),
            None => (rest, None),
        };

        let command = match (name, arg) {
            ("new", title) => Command::New(title),
            ("list", _) => Command::List,
            ("open", Some(id)) => Command::Open(id),
            ("rename", Some(title)) => Command::Rename(title),
            ("delete", Some(id)) => Command::Delete(id),
            ("export", _) => Command::Export,
            ("regenerate", _) => Command::Regenerate,
            ("system", prompt) => Command::System(prompt),
            ("help", _) => Command::Help,
            ("quit" | "exit", _) => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        };
        Some(command)
    }
}

/// Line-oriented chat session over any async reader and writer.
pub struct Repl {
    store: Arc<ConversationStore>,
    chat: ChatService,
    cache: LocalCache,
    current: Option<String>,
}

impl Repl {
    pub fn new(store: Arc<ConversationStore>, chat: ChatService, cache: LocalCache) -> Self {
        Self {
            store,
            chat,
            cache,
            current: None,
        }
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Process lines until `/quit` or end of input.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        output.write_all(b"Type /help for commands.\n> ").await?;
        output.flush().await?;

        while let Some(line) = lines.next_line().await? {
            let Some(command) = Command::parse(&line) else {
                output.write_all(b"> ").await?;
                output.flush().await?;
                continue;
            };
            if command == Command::Quit {
                break;
            }
            let reply = self.handle(command).await;
            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n> ").await?;
            output.flush().await?;
        }

        output.write_all(b"\n").await?;
        output.flush().await?;
        Ok(())
    }

    async fn handle(&mut self, command: Command) -> String {
        match command {
            Command::Say(text) => {
                match self.chat.send_message(self.current.as_deref(), &text).await {
                    Ok(exchange) => {
                        tracing::debug!(
                            "Stored turn {} -> {}",
                            exchange.user_message.id,
                            exchange.reply.id
                        );
                        self.current = Some(exchange.conversation_id);
                        exchange.reply.content
                    }
                    Err(e) => {
                        tracing::warn!("Chat turn failed: {}", e);
                        format!("Error: {}", e.user_message())
                    }
                }
            }
            Command::New(title) => {
                let conversation = self
                    .store
                    .create_conversation(title.as_deref().unwrap_or_default());
                let reply = format!("Started \"{}\" ({})", conversation.title, conversation.id);
                self.current = Some(conversation.id);
                reply
            }
            Command::List => {
                let conversations = self.store.get_all_conversations().await;
                if conversations.is_empty() {
                    return "No conversations yet.".to_string();
                }
                conversations
                    .iter()
                    .map(|c| {
                        let marker = if self.current.as_deref() == Some(c.id.as_str()) {
                            '*'
                        } else {
                            ' '
                        };
                        let count = c
                            .message_count
                            .map(|n| format!("{} messages, ", n))
                            .unwrap_or_default();
                        format!(
                            "{} {}  {}  ({}updated {})",
                            marker,
                            c.id,
                            c.title,
                            count,
                            c.updated_at.format("%Y-%m-%d %H:%M")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Command::Open(id) => match self.store.get_conversation(&id).await {
                Some(conversation) => {
                    let messages = self.store.get_all_messages(Some(&id)).await;
                    let mut reply = format!("# {}", conversation.title);
                    for msg in &messages {
                        reply.push_str(&format!("\n[{}] {}", msg.role.as_str(), msg.content));
                    }
                    self.current = Some(conversation.id);
                    reply
                }
                None => format!("No conversation {}", id),
            },
            Command::Rename(title) => {
                let Some(id) = self.current.clone() else {
                    return "No conversation open.".to_string();
                };
                if let Some(conversation) = self.store.rename_conversation(&id, &title) {
                    return format!("Renamed to \"{}\"", conversation.title);
                }
                // Known only to the remote store: adopt the row locally under the new title.
                match self.store.get_conversation(&id).await {
                    Some(mut conversation) => {
                        conversation.title = title;
                        let saved = self.store.save_conversation(conversation);
                        format!("Renamed to \"{}\"", saved.title)
                    }
                    None => format!("No conversation {}", id),
                }
            }
            Command::Delete(id) => {
                // Remote-only rows are deleted too, so a local miss is not an error.
                if !self.store.delete_conversation(&id) {
                    tracing::debug!("Conversation {} was not in the local cache", id);
                }
                if self.current.as_deref() == Some(id.as_str()) {
                    self.current = None;
                }
                format!("Deleted {}", id)
            }
            Command::Export => {
                let Some(id) = self.current.clone() else {
                    return "No conversation open.".to_string();
                };
                match self.store.get_conversation(&id).await {
                    Some(conversation) => {
                        let messages = self.store.get_all_messages(Some(&id)).await;
                        export_to_markdown(&conversation, &messages)
                    }
                    None => format!("No conversation {}", id),
                }
            }
            Command::Regenerate => {
                let Some(id) = self.current.clone() else {
                    return "No conversation open.".to_string();
                };
                match self.chat.regenerate(&id).await {
                    Ok(reply) => reply.content,
                    Err(e) => {
                        tracing::warn!("Regenerate failed: {}", e);
                        format!("Error: {}", e.user_message())
                    }
                }
            }
            Command::System(prompt) => {
                let settings = ChatSettings {
                    system_prompt: prompt,
                    ..self.chat.settings().clone()
                };
                SettingsService::save(&self.cache, &settings);
                let reply = match &settings.system_prompt {
                    Some(_) => "System prompt set.",
                    None => "System prompt cleared.",
                };
                self.chat.set_settings(settings);
                reply.to_string()
            }
            Command::Help => HELP.trim_end().to_string(),
            Command::Unknown(line) => format!("Unknown command: {} (try /help)", line),
            Command::Quit => String::new(),
        }
    }
}
