//! Console rendering of the run as it happens.
//!
//! The supervisor and specialists push [`TranscriptUpdate`]s into an
//! [`UpdateSink`]; a separate task owns the receiving half and writes each
//! update through a [`TranscriptPrinter`]. Output shape:
//!
//! ```text
//! Update from node supervisor:
//!
//! ================================ Ai Message =================================
//! Name: supervisor
//!
//! Delegating to stock_finder_agent
//!
//! Update from subgraph stock_finder_agent:
//!
//! 	Update from node agent:
//! 	...
//! ```

use std::io::{self, Write};

use console::style;
use stockdesk_models::{Message, OutputConfig, Role, TranscriptUpdate};
use tokio::sync::mpsc;
use tracing::debug;

const RULE_WIDTH: usize = 80;

/// Sending half of the update stream. A disabled sink drops everything.
#[derive(Debug, Clone, Default)]
pub struct UpdateSink {
    tx: Option<mpsc::UnboundedSender<TranscriptUpdate>>,
}

impl UpdateSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TranscriptUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, update: TranscriptUpdate) {
        if let Some(tx) = &self.tx {
            if tx.send(update).is_err() {
                debug!("Update receiver dropped");
            }
        }
    }
}

pub struct TranscriptPrinter<W: Write> {
    out: W,
    last_message: bool,
    show_subgraphs: bool,
    styled: bool,
}

impl<W: Write> TranscriptPrinter<W> {
    pub fn new(out: W, config: &OutputConfig) -> Self {
        Self {
            out,
            last_message: config.last_message,
            show_subgraphs: config.show_subgraphs,
            styled: false,
        }
    }

    /// Colour labels and headers (for a terminal).
    pub fn styled(mut self, styled: bool) -> Self {
        self.styled = styled;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Print updates until every sender is dropped.
    pub async fn drain(mut self, mut rx: mpsc::UnboundedReceiver<TranscriptUpdate>) -> io::Result<W> {
        while let Some(update) = rx.recv().await {
            self.print_update(&update)?;
        }
        self.out.flush()?;
        Ok(self.out)
    }

    pub fn print_update(&mut self, update: &TranscriptUpdate) -> io::Result<()> {
        if update.is_nested() && !self.show_subgraphs {
            return Ok(());
        }

        let indent = if update.is_nested() { "\t" } else { "" };
        if let Some(namespace) = &update.namespace {
            let label = self.label(&format!("Update from subgraph {namespace}:"));
            writeln!(self.out, "{label}\n")?;
        }

        let label = self.label(&format!("Update from node {}:", update.node));
        writeln!(self.out, "{indent}{label}\n")?;

        let messages = if self.last_message {
            &update.messages[update.messages.len().saturating_sub(1)..]
        } else {
            &update.messages[..]
        };
        for message in messages {
            for line in self.render(message).lines() {
                writeln!(self.out, "{indent}{line}")?;
            }
        }
        writeln!(self.out)?;
        self.out.flush()
    }

    fn label(&self, text: &str) -> String {
        if self.styled {
            style(text).cyan().bold().to_string()
        } else {
            text.to_string()
        }
    }

    /// One message as a ruled block: header, optional name, tool calls, content.
    pub fn render(&self, message: &Message) -> String {
        let mut out = String::new();
        let rule = header(message);
        if self.styled {
            out.push_str(&style(rule).bold().to_string());
        } else {
            out.push_str(&rule);
        }
        out.push('\n');

        if let Some(name) = &message.name {
            out.push_str(&format!("Name: {name}\n"));
        }
        out.push('\n');

        if !message.content.is_empty() {
            out.push_str(&message.content);
            out.push('\n');
        }
        if message.has_tool_calls() {
            out.push_str("Tool Calls:\n");
            for call in &message.tool_calls {
                out.push_str(&format!("  {} ({})\n", call.name, call.id));
                out.push_str(&format!(" Call ID: {}\n", call.id));
                out.push_str("  Args:\n");
                match call.arguments.as_object() {
                    Some(args) => {
                        for (key, value) in args {
                            let value = value
                                .as_str()
                                .map(str::to_string)
                                .unwrap_or_else(|| value.to_string());
                            out.push_str(&format!("    {key}: {value}\n"));
                        }
                    }
                    None if !call.arguments.is_null() => {
                        out.push_str(&format!("    {}\n", call.arguments));
                    }
                    None => {}
                }
            }
        }
        out
    }
}

fn header(message: &Message) -> String {
    let kind = match message.role {
        Role::User => "Human",
        Role::Assistant => "Ai",
        Role::Tool => "Tool",
        Role::System => "System",
    };
    let title = format!(" {kind} Message ");
    let pad = RULE_WIDTH.saturating_sub(title.len());
    let left = pad / 2;
    format!("{}{title}{}", "=".repeat(left), "=".repeat(pad - left))
}
