//! Line commands for the interactive shell
//!
//! ```text
//! like photo <id> on|off
//! like album <id> on|off
//! seen <notification-id>
//! dismiss <notification-id>
//! seen-all <id> <id> ...
//! flush
//! stats
//! ```

use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info, warn};

use crate::action::EntityType;
use crate::error::{Result, SyncError};
use crate::queue::SyncQueue;

/// Why [`run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExit {
    EndOfInput,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Like {
        entity_type: EntityType,
        entity_id: String,
        liked: bool,
    },
    Seen(String),
    Dismiss(String),
    SeenAll(Vec<String>),
    Flush,
    Stats,
}

impl ShellCommand {
    /// Parse one input line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        let command = match (verb, args.as_slice()) {
            ("like", [entity_type, entity_id, state]) => ShellCommand::Like {
                entity_type: entity_type.parse()?,
                entity_id: entity_id.to_string(),
                liked: parse_toggle(state)?,
            },
            ("seen", [id]) => ShellCommand::Seen(id.to_string()),
            ("dismiss", [id]) => ShellCommand::Dismiss(id.to_string()),
            ("seen-all", ids) if !ids.is_empty() => {
                ShellCommand::SeenAll(ids.iter().map(|id| id.to_string()).collect())
            }
            ("flush", []) => ShellCommand::Flush,
            ("stats", []) => ShellCommand::Stats,
            _ => return Err(SyncError::Configuration(format!("unrecognized command: {}", line))),
        };
        Ok(Some(command))
    }

    /// Apply to the queue. Returns text to print, if any.
    pub async fn apply(self, queue: &SyncQueue) -> Result<Option<String>> {
        match self {
            ShellCommand::Like {
                entity_type,
                entity_id,
                liked,
            } => queue.queue_like(entity_type, &entity_id, liked)?,
            ShellCommand::Seen(id) => queue.queue_notification_seen(&id)?,
            ShellCommand::Dismiss(id) => queue.queue_notification_dismiss(&id)?,
            ShellCommand::SeenAll(ids) => queue.queue_all_notifications_seen(&ids)?,
            ShellCommand::Flush => {
                let summary = queue.flush_now().await?;
                return Ok(Some(serde_json::to_string(&summary)?));
            }
            ShellCommand::Stats => {
                let stats = queue.stats().await?;
                return Ok(Some(serde_json::to_string(&stats)?));
            }
        }
        Ok(None)
    }
}

/// Feed input lines to the queue until end of input or `shutdown`.
///
/// `shutdown` is raced against both reading and applying, so a slow
/// `flush` never holds up teardown.
pub async fn run<R, W, S>(input: R, mut output: W, queue: &SyncQueue, shutdown: S) -> Result<ShellExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = input.lines();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => return Ok(ShellExit::Shutdown),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("End of input");
            return Ok(ShellExit::EndOfInput);
        };

        let command = match ShellCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Ignoring input line");
                continue;
            }
        };

        let applied = tokio::select! {
            _ = &mut shutdown => return Ok(ShellExit::Shutdown),
            applied = command.apply(queue) => applied,
        };
        match applied {
            Ok(Some(text)) => {
                output.write_all(text.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "Command failed"),
        }
    }
}

fn parse_toggle(word: &str) -> Result<bool> {
    match word {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(SyncError::Configuration(format!("expected on|off, got {}", other))),
    }
}
