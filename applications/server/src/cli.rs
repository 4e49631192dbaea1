/// Interactive command loop
///
/// A convenience shell over the same operations the voice path drives.
/// Only started when stdin is a terminal.
use crate::orchestrator::Orchestrator;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const HELP: &str = "\nCommands:\n  \
    say <text>   - speak text through the device TTS\n  \
    ask <text>   - hand text to the built-in assistant\n  \
    music <url>  - play a URL on the device\n  \
    local <kw>   - search the local library and play matches\n  \
    stop         - stop playback and clear the queue\n  \
    refresh      - refresh the music index\n  \
    quit         - exit\n";

pub async fn command_loop(orchestrator: Arc<Orchestrator>) {
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!(">>> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed, leaving command loop");
                break;
            }
            Err(err) => {
                warn!(%err, "failed to read command line");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command.to_lowercase().as_str() {
            "quit" | "exit" => break,
            "stop" => orchestrator.stop_music().await,
            "refresh" => {
                if let Err(err) = orchestrator.refresh_index("manual").await {
                    warn!(%err, "manual refresh failed");
                }
            }
            "say" | "ask" | "music" | "local" if rest.is_empty() => {
                println!("missing argument");
            }
            "say" => info!(reply = ?orchestrator.speak_checked(rest).await, "[say]"),
            "ask" => info!(reply = ?orchestrator.ask_checked(rest).await, "[ask]"),
            "music" => info!(reply = ?orchestrator.play_url_checked(rest).await, "[music]"),
            "local" => orchestrator.play_by_keyword(rest).await,
            other => warn!(command = other, "unknown command"),
        }
    }
}
