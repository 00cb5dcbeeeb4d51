//! Line-oriented operator console.
//!
//! Each input line is either `<selector> <command>`, routed as typed, or a
//! bare shortcut token that expands to one or more such lines. Results are
//! acknowledged on the output stream, one line per target.

use std::collections::BTreeMap;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use fleet_protocol::split_command;

use crate::router::{CommandRouter, DispatchReport};

/// How one console line was understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Direct { selector: String, command: String },
    Shortcut { token: String, lines: Vec<(String, String)> },
    Unrecognized(String),
    Empty,
}

pub fn interpret(line: &str, shortcuts: &BTreeMap<String, Vec<String>>) -> ConsoleInput {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleInput::Empty;
    }

    if let Some(expansion) = shortcuts.get(line) {
        let lines = expansion
            .iter()
            .filter_map(|l| {
                let (sel, cmd) = split_command(l.trim());
                cmd.map(|c| (sel.to_string(), c.to_string()))
            })
            .collect();
        return ConsoleInput::Shortcut {
            token: line.to_string(),
            lines,
        };
    }

    match split_command(line) {
        (selector, Some(command)) => ConsoleInput::Direct {
            selector: selector.to_string(),
            command: command.to_string(),
        },
        (token, None) => ConsoleInput::Unrecognized(token.to_string()),
    }
}

fn render(selector: &str, command: &str, result: &Result<DispatchReport, fleet_protocol::FleetError>) -> Vec<String> {
    match result {
        Ok(report) => {
            let mut out: Vec<String> = report
                .delivered
                .iter()
                .map(|id| format!("ok {id} {command}"))
                .collect();
            out.extend(
                report
                    .failed
                    .iter()
                    .map(|(id, e)| format!("failed {id} {command}: {e}")),
            );
            out
        }
        Err(e) => vec![format!("failed {selector} {command}: {e}")],
    }
}

/// Read operator lines from `reader` until EOF or shutdown.
pub async fn run_console<R, W>(
    reader: R,
    mut writer: W,
    router: &CommandRouter,
    shortcuts: &BTreeMap<String, Vec<String>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), anyhow::Error>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.changed() => break,
        };
        let Some(line) = line else { break };

        let routed = match interpret(&line, shortcuts) {
            ConsoleInput::Empty => continue,
            ConsoleInput::Unrecognized(token) => {
                tracing::warn!(input = %token, "Unrecognised operator input");
                let stamp = chrono::Local::now().format("%H:%M:%S");
                writer
                    .write_all(format!("[{stamp}] unrecognised: {token}\n").as_bytes())
                    .await?;
                writer.flush().await?;
                continue;
            }
            ConsoleInput::Direct { selector, command } => vec![(selector, command)],
            ConsoleInput::Shortcut { token, lines } => {
                tracing::debug!(shortcut = %token, count = lines.len(), "Expanding shortcut");
                lines
            }
        };

        for (selector, command) in routed {
            let result = router.route_text(&selector, &command).await;
            if let Err(e) = &result {
                tracing::warn!(selector = %selector, command = %command, error = %e, "Operator command rejected");
            }
            let stamp = chrono::Local::now().format("%H:%M:%S");
            for ack in render(&selector, &command, &result) {
                writer.write_all(format!("[{stamp}] {ack}\n").as_bytes()).await?;
            }
        }
        writer.flush().await?;
    }

    Ok(())
}
