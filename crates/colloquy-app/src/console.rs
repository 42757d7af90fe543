//! Interactive console transport.
//!
//! Reads one message per line and prints the orchestrator's replies.
//! Lines starting with `/` are console commands:
//!
//! - `/history` prints the recent turns
//! - `/sessions` lists live sessions
//! - `/end` or `/quit` ends the session

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use colloquy_core::events::SessionEvent;
use colloquy_core::types::{Phase, SessionSummary};
use colloquy_dialogue::{Orchestrator, TurnResponse};

const HISTORY_LINES: usize = 20;
const LOGGER_DRAIN: Duration = Duration::from_secs(1);

pub type ConsoleResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Log a session's events until its channel closes.
pub fn spawn_event_logger(rx: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = BroadcastStream::new(rx).filter_map(|result| result.ok());
        while let Some(event) = stream.next().await {
            debug!(
                session_id = %event.session_id(),
                event = event.event_name(),
                "Session event"
            );
        }
    })
}

fn render_turn(response: &TurnResponse) -> String {
    let mut out = format!("{}\n", response.response_text);
    if !response.sources.is_empty() {
        out.push_str("\nSources:\n");
        for source in &response.sources {
            out.push_str(&format!("  [{}] {}\n", source.source_id, source.excerpt));
        }
    }
    if !response.suggested_questions.is_empty() {
        out.push_str("\nYou could ask:\n");
        for question in &response.suggested_questions {
            out.push_str(&format!("  - {}\n", question));
        }
    }
    if !response.related_topics.is_empty() {
        out.push_str(&format!("\nRelated: {}\n", response.related_topics.join(", ")));
    }
    out
}

fn render_summary(summary: &SessionSummary) -> String {
    format!(
        "Session {} ended ({:?}): {} turns, quality {:.2}, topics: {}\n",
        summary.session_id,
        summary.reason,
        summary.turn_count,
        summary.quality_score,
        if summary.topics_discussed.is_empty() {
            "none".to_string()
        } else {
            summary.topics_discussed.join(", ")
        }
    )
}

/// Run one chat session over `input`/`output`. Returns the summary when the
/// session was ended from the console, `None` when the conversation itself
/// ended it.
pub async fn run_chat<R, W>(
    orchestrator: &Orchestrator,
    session_id: Option<String>,
    input: R,
    mut output: W,
) -> ConsoleResult<Option<SessionSummary>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let started = orchestrator.start(session_id).await?;
    let id = started.session_id;
    let logger = spawn_event_logger(orchestrator.subscribe(&id)?);
    info!(session_id = %id, "Console session started");

    output
        .write_all(format!("{}\n\n> ", started.greeting_text).as_bytes())
        .await?;
    output.flush().await?;

    let mut lines = input.lines();
    let mut summary = None;
    loop {
        let Some(line) = lines.next_line().await? else {
            summary = Some(orchestrator.end(&id).await?);
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            output.write_all(b"> ").await?;
            output.flush().await?;
            continue;
        }

        let text = match line {
            "/end" | "/quit" => {
                summary = Some(orchestrator.end(&id).await?);
                break;
            }
            "/history" => {
                let mut text = String::new();
                for turn in orchestrator.get_history(&id, HISTORY_LINES).await? {
                    text.push_str(&format!("{}: {}\n", turn.role, turn.text));
                }
                text
            }
            "/sessions" => {
                let mut text = String::new();
                for info in orchestrator.list_sessions().await {
                    text.push_str(&format!(
                        "{} {} turns={}\n",
                        info.session_id, info.phase, info.turn_count
                    ));
                }
                text
            }
            message => {
                let response = orchestrator.send_message(&id, message).await?;
                if response.phase == Phase::Ending {
                    output.write_all(render_turn(&response).as_bytes()).await?;
                    break;
                }
                render_turn(&response)
            }
        };

        output.write_all(format!("{}\n> ", text).as_bytes()).await?;
        output.flush().await?;
    }

    if let Some(ref summary) = summary {
        output.write_all(render_summary(summary).as_bytes()).await?;
    }
    output.flush().await?;
    // The channel closes once the session is finalized.
    let _ = tokio::time::timeout(LOGGER_DRAIN, logger).await;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use colloquy_core::config::ColloquyConfig;
    use tokio::io::BufReader;

    use crate::corpus::CorpusRetriever;
    use crate::generator::ExtractiveGenerator;

    const CORPUS: &str = r#"[
        {"id": "handbook", "content": "Employees accrue 20 vacation days per year. Vacation days are granted by managers."}
    ]"#;

    fn orchestrator() -> Orchestrator {
        let corpus = CorpusRetriever::from_json(CORPUS).unwrap();
        Orchestrator::builder(ColloquyConfig::default(), Arc::new(corpus))
            .generator(Arc::new(ExtractiveGenerator::new()))
            .build()
    }

    async fn chat(orch: &Orchestrator, script: &str) -> (String, Option<SessionSummary>) {
        let mut out = Vec::new();
        let summary = run_chat(orch, Some("console".into()), BufReader::new(script.as_bytes()), &mut out)
            .await
            .unwrap();
        (String::from_utf8(out).unwrap(), summary)
    }

    #[tokio::test]
    async fn test_goodbye_ends_chat() {
        let orch = orchestrator();
        let (out, summary) = chat(&orch, "help\nbye\n").await;
        assert!(out.starts_with("Hello"));
        assert!(out.contains("plain language"));
        assert!(out.contains("Goodbye"));
        assert!(summary.is_none());
        assert!(orch.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_question_shows_sources() {
        let orch = orchestrator();
        let (out, summary) = chat(&orch, "How many vacation days do employees get?\n/end\n").await;
        assert!(out.contains("Sources:"));
        assert!(out.contains("[handbook#1]"));
        assert!(out.contains("You could ask:"));
        let summary = summary.unwrap();
        assert_eq!(summary.session_id, "console");
        assert!(out.contains("Session console ended"));
    }

    #[tokio::test]
    async fn test_history_command() {
        let orch = orchestrator();
        let (out, _) = chat(&orch, "help\n/history\n").await;
        assert!(out.contains("user: help"));
        assert!(out.contains("assistant: Hello"));
    }

    #[tokio::test]
    async fn test_end_of_input_ends_session() {
        let orch = orchestrator();
        let (_, summary) = chat(&orch, "").await;
        assert_eq!(summary.unwrap().turn_count, 1);
        assert!(orch.list_sessions().await.is_empty());
    }
}
