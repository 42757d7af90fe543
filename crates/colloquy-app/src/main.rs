//! Colloquy binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Build the orchestrator over the JSON corpus and the extractive generator
//! 4. Start the idle-session sweeper
//! 5. Run the console chat on stdin/stdout

mod cli;
mod console;
mod corpus;
mod generator;

use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;

use colloquy_core::collaborator::Retriever;
use colloquy_core::config::ColloquyConfig;
use colloquy_dialogue::Orchestrator;

use cli::{CliArgs, Command};
use corpus::CorpusRetriever;
use generator::ExtractiveGenerator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config = ColloquyConfig::load_or_default(&config_file);

    // Tracing. Logs go to stderr so they do not interleave with the chat.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Starting Colloquy v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    match args.command() {
        Command::Config => {
            let rendered = toml::to_string_pretty(&config)?;
            println!("{}", rendered);
            Ok(())
        }
        Command::Chat { corpus, session } => {
            let retriever = match corpus {
                Some(path) => CorpusRetriever::load(&path)?,
                None => {
                    tracing::warn!("No corpus given; every question will need clarification");
                    CorpusRetriever::default()
                }
            };
            let retriever: Arc<dyn Retriever> = Arc::new(retriever);

            let orchestrator = Orchestrator::builder(config, retriever)
                .generator(Arc::new(ExtractiveGenerator::new()))
                .build();

            // Idle-session sweeper.
            let sweeper = Arc::new(orchestrator.sweeper());
            let sweeper_task = {
                let sweeper = Arc::clone(&sweeper);
                tokio::spawn(async move { sweeper.run().await })
            };

            let stdin = BufReader::new(tokio::io::stdin());
            let result = console::run_chat(&orchestrator, session, stdin, tokio::io::stdout()).await;

            sweeper.shutdown();
            let _ = sweeper_task.await;

            if let Some(summary) = result? {
                tracing::info!(
                    session_id = %summary.session_id,
                    turn_count = summary.turn_count,
                    "Chat finished"
                );
            }
            Ok(())
        }
    }
}
