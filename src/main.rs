//! llmq - query Ollama models from the terminal.
//!
//! Sends one prompt per invocation to a local or cloud Ollama host and prints
//! the response, either whole or streamed token by token. Connection and
//! model settings come from flags, the environment, and a small config file.

mod config;
mod error;
mod ollama;

use std::io::Write;

use clap::{CommandFactory, Parser};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use config::Overrides;
use error::Error;
use ollama::OllamaClient;

#[derive(Parser)]
#[command(name = "llmq")]
#[command(author, version, about = "Query Ollama models from the terminal")]
struct Cli {
    /// Prompt text
    #[arg(value_name = "PROMPT", trailing_var_arg = true, allow_hyphen_values = true)]
    prompt: Vec<String>,

    /// Ollama host URL
    #[arg(long)]
    host: Option<String>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// Request timeout in seconds
    #[arg(long, allow_negative_numbers = true)]
    timeout: Option<i64>,

    /// Stream response tokens as they arrive
    #[arg(long, conflicts_with = "models")]
    stream: bool,

    /// List available models
    #[arg(long, conflicts_with = "prompt")]
    models: bool,

    /// Print models as JSON
    #[arg(long)]
    json: bool,

    /// Use the Ollama cloud host
    #[arg(long, conflicts_with = "local")]
    cloud: bool,

    /// Force the localhost host default
    #[arg(long)]
    local: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            model: self.model.clone(),
            timeout: self.timeout,
            cloud: self.cloud,
            local: self.local,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let no_args = std::env::args_os().len() <= 1;
    let cli = Cli::parse();

    if let Err(err) = run(cli, no_args).await {
        eprintln!("{err}");
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli, no_args: bool) -> Result<(), Error> {
    if cli.models {
        return list_models(&cli).await;
    }

    let prompt = cli.prompt.join(" ").trim().to_string();
    if prompt.is_empty() {
        if no_args {
            Cli::command().print_help()?;
            if !config::config_path()?.exists() {
                return init_config_interactive(&cli).await;
            }
            return Ok(());
        }
        return Err(Error::usage("No prompt provided."));
    }

    let settings = config::resolve_settings(cli.overrides())?;
    let client = OllamaClient::new(&settings.host, settings.timeout, settings.api_key.as_deref())?;

    if cli.stream {
        return stream_response(&client, &settings.model, &prompt).await;
    }

    let response = client.generate(&settings.model, &prompt).await?;
    println!("{response}");
    Ok(())
}

/// Print tokens as they arrive, flushing after each one.
///
/// A mid-stream error still propagates; whatever was printed before it stays
/// committed on stdout, the error goes to stderr.
async fn stream_response(client: &OllamaClient, model: &str, prompt: &str) -> Result<(), Error> {
    let mut stream = client.generate_stream(model, prompt).await?;
    let mut stdout = std::io::stdout();
    let mut printed = false;
    let mut ends_with_newline = false;

    while let Some(token) = stream.next().await {
        let token = token?;
        write!(stdout, "{token}")?;
        stdout.flush()?;
        printed = true;
        ends_with_newline = token.ends_with('\n');
    }
    if printed && !ends_with_newline {
        println!();
    }
    Ok(())
}

async fn list_models(cli: &Cli) -> Result<(), Error> {
    let settings = config::resolve_settings(cli.overrides())?;
    let client = OllamaClient::new(&settings.host, settings.timeout, settings.api_key.as_deref())?;
    let models = client.list_models().await?;

    if cli.json {
        println!("{}", serde_json::Value::from(models));
    } else {
        for name in &models {
            println!("{name}");
        }
    }
    Ok(())
}

/// First-run setup: pick a default model from the server's list and persist
/// it together with the resolved host and timeout.
async fn init_config_interactive(cli: &Cli) -> Result<(), Error> {
    let settings = config::resolve_settings(cli.overrides())?;
    let client = OllamaClient::new(&settings.host, settings.timeout, settings.api_key.as_deref())?;
    let models = client.list_models().await?;
    if models.is_empty() {
        return Err(Error::usage("No models available to select."));
    }

    println!("Available models:");
    for (index, name) in models.iter().enumerate() {
        println!("{}. {name}", index + 1);
    }

    let Some(choice) = prompt_model_choice(models.len())? else {
        return Err(Error::usage("No model selected."));
    };
    let chosen = &models[choice - 1];
    let path = config::write_config(&settings.host, chosen, settings.timeout)?;
    println!("Saved default model '{chosen}' to {}.", path.display());
    Ok(())
}

/// Read a 1-based menu choice from stdin, re-prompting until it is valid.
/// Returns `None` on end of input.
fn prompt_model_choice(count: usize) -> Result<Option<usize>, Error> {
    let stdin = std::io::stdin();
    loop {
        print!("Choose a default model [1-{count}]: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let raw = line.trim();
        if raw.is_empty() {
            eprintln!("Please enter a number.");
            continue;
        }
        match raw.parse::<usize>() {
            Ok(choice) if (1..=count).contains(&choice) => return Ok(Some(choice)),
            Ok(_) => eprintln!("Choose a number between 1 and {count}."),
            Err(_) => eprintln!("Please enter a number."),
        }
    }
}
