use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use stockdesk::agents::llm::HttpProviderFactory;
use stockdesk::agents::{AgentError, ProcessEnv, TranscriptPrinter, UpdateSink};
use stockdesk::models::DeskConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stockdesk", about = "Supervised multi-agent NYSE stock recommendations")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config/stockdesk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Route a query through the specialist agents
    Run {
        /// The request; prompted for on stdin when omitted
        query: Option<String>,

        /// Print every message of each update, not only the last
        #[arg(long)]
        all_messages: bool,

        /// Print the final transcript as JSON instead of streaming updates
        #[arg(long)]
        json: bool,
    },
    /// Ask the model directly, without agents or tools
    Direct {
        query: Option<String>,
    },
    /// Check provider credentials and tool server prerequisites
    Doctor {
        /// Write a .env.template naming every variable the config reads
        #[arg(long)]
        write_env_template: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the process environment still applies.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: failed to load .env: {e}");
        }
    }

    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = stockdesk::load_config(&cli.config)?;

    match cli.command {
        Command::Run {
            query,
            all_messages,
            json,
        } => {
            if all_messages {
                config.output.last_message = false;
            }
            let query = match query {
                Some(q) => q,
                None => prompt_query()?,
            };
            run(&config, &query, json).await
        }
        Command::Direct { query } => {
            let query = query.unwrap_or_else(|| stockdesk::DEFAULT_QUERY.to_string());
            direct(&config, &query).await
        }
        Command::Doctor { write_env_template } => doctor(&config, write_env_template).await,
    }
}

fn prompt_query() -> Result<String> {
    print!("Enter your query: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    let query = line.trim();
    if query.is_empty() {
        bail!("Empty query");
    }
    Ok(query.to_string())
}

async fn run(config: &DeskConfig, query: &str, json: bool) -> Result<()> {
    let desk = stockdesk::build_desk(config)
        .await
        .map_err(|e| fail("Failed to start", &e))?;
    eprintln!("Using {}", desk.model_info());
    if desk.tools().is_empty() {
        eprintln!("No tools available; agents will answer from model knowledge only.");
    }

    let (sink, printing) = if json {
        (UpdateSink::disabled(), None)
    } else {
        let (sink, rx) = UpdateSink::channel();
        let printer = TranscriptPrinter::new(std::io::stdout(), &config.output)
            .styled(console::user_attended());
        (sink, Some(tokio::spawn(printer.drain(rx))))
    };

    let outcome = desk.run(query, &sink).await;
    drop(sink);
    if let Some(printing) = printing {
        printing
            .await
            .context("Printer task failed")?
            .context("Failed to write transcript")?;
    }
    desk.shutdown().await;

    let report = outcome.map_err(|failure| fail("Run failed", &failure.error))?;
    info!(
        run_id = %report.run_id,
        delegations = ?report.delegations,
        messages = report.transcript.len(),
        "Run finished"
    );
    if json {
        println!("{}", serde_json::to_string_pretty(report.transcript.messages())?);
    }
    Ok(())
}

async fn direct(config: &DeskConfig, query: &str) -> Result<()> {
    let model = stockdesk::resolve_model(config)
        .await
        .map_err(|e| fail("Failed to initialize model", &e))?;
    eprintln!("Using {}", model.info());

    let reply = stockdesk::direct_analysis(model.as_ref(), query, config)
        .await
        .map_err(|e| fail("Analysis failed", &e))?;
    println!("{}", reply.content);
    Ok(())
}

async fn doctor(config: &DeskConfig, write_template: bool) -> Result<()> {
    let factory = HttpProviderFactory::new(Duration::from_secs(config.request_timeout_secs))?;
    let report = stockdesk::doctor::diagnose(config, &factory, &ProcessEnv).await;
    print!("{}", report.render(console::user_attended()));

    let template = Path::new(".env.template");
    if write_template || (!Path::new(".env").exists() && !template.exists()) {
        stockdesk::doctor::write_env_template(config, template)
            .with_context(|| format!("Failed to write {}", template.display()))?;
        println!("\nWrote {}; copy it to .env and fill in your keys.", template.display());
    }

    if !report.is_ready() {
        bail!("No usable model provider");
    }
    Ok(())
}

/// Log, print the setup hint if there is one, and convert for `main`.
fn fail(context: &str, error: &AgentError) -> anyhow::Error {
    warn!(error = %error, "{}", context);
    if let Some(hint) = stockdesk::hint(error) {
        eprintln!("\n{hint}\n");
    }
    anyhow!("{context}: {error}")
}
