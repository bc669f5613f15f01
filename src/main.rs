use anyhow::Context;
use clap::{Parser, Subcommand};
use reason_relay::io_struct::{ChatMessage, ChatOptions};
use reason_relay::{BlockingRegistry, Config, logging};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "reason-relay", version, about = "Reasoning-injection relay for chat completion APIs")]
struct Cli {
    /// off, error, warn, info, debug or trace
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the OpenAI-compatible HTTP API
    Serve {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one streaming chat against a configured model and print it
    Chat {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        model: String,
        #[arg(long)]
        system: Option<String>,
        prompt: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = cli
        .log_level
        .parse::<log::LevelFilter>()
        .with_context(|| format!("invalid log level '{}'", cli.log_level))?;
    logging::init(level);

    match cli.command {
        Command::Serve { config, host, port } => {
            let mut config = Config::from_file(config)?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            reason_relay::serve(config)
        }
        Command::Chat {
            config,
            model,
            system,
            prompt,
        } => chat(Config::from_file(config)?, &model, system, prompt),
    }
}

fn chat(config: Config, model: &str, system: Option<String>, prompt: String) -> anyhow::Result<()> {
    let registry = BlockingRegistry::from_config(&config)?;
    let orchestrator = registry.resolve(model)?;

    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));

    let mut stdout = std::io::stdout().lock();
    let mut answering = false;
    for chunk in orchestrator.stream(messages, ChatOptions::new()) {
        let chunk = chunk?;
        if let Some(reasoning) = chunk.reasoning() {
            write!(stdout, "{}", reasoning)?;
        }
        if let Some(content) = chunk.content() {
            if !answering {
                answering = true;
                writeln!(stdout, "\n---")?;
            }
            write!(stdout, "{}", content)?;
        }
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}
