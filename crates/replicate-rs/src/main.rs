//! Command-line front end for the Replicate API.
//!
//! Reads the API token from the `REPLICATE_API_TOKEN` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Run a model to completion and print its output as JSON
//! replicate run replicate/hello-world --input text=Alice
//!
//! # Pin a version; values that parse as JSON are sent as JSON
//! replicate run stability-ai/sdxl:39ed52f2 --input prompt="an astronaut" --input num_outputs=2
//!
//! # Stream tokens as they are produced
//! replicate stream meta/meta-llama-3-8b-instruct --input prompt="Tell me a joke"
//!
//! # Inspect and manage predictions
//! replicate predictions list
//! replicate predictions get ufawqhfynnddngldkgtslldrkq
//! replicate predictions cancel ufawqhfynnddngldkgtslldrkq
//!
//! # Platform info
//! replicate hardware
//! replicate account
//! ```

use std::io::{self, Write};
use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::Level;

use replicate_rs::blocking::Client;
use replicate_rs::{ClientConfig, CreatePrediction, Cursor, Error, EventType, Result};

/// Run models and manage predictions on Replicate.
///
/// Reads the API token from the REPLICATE_API_TOKEN environment variable.
#[derive(Parser)]
#[command(name = "replicate", version)]
struct Cli {
    /// API token (overrides REPLICATE_API_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// API base URL (overrides REPLICATE_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Log to stderr; repeat for more detail
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a prediction, wait for it, and print its output
    Run {
        /// owner/name, owner/name:version, or a version id
        reference: String,

        /// Input field as key=value (repeatable)
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Ask the server to hold the create call up to this many seconds
        #[arg(long, value_name = "SECONDS")]
        wait: Option<u64>,
    },

    /// Create a streaming prediction and print output as it arrives
    Stream {
        reference: String,

        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Also print log events to stderr
        #[arg(long)]
        logs: bool,
    },

    /// Inspect and manage predictions
    Predictions {
        #[command(subcommand)]
        action: PredictionAction,
    },

    /// List available hardware
    Hardware,

    /// Show the account that owns the token
    Account,

    /// Show the secret webhook deliveries are signed with
    WebhookSecret,
}

#[derive(Subcommand)]
enum PredictionAction {
    /// Show one prediction
    Get { id: String },
    /// Request cancellation of a prediction
    Cancel { id: String },
    /// List recent predictions, one page at a time
    List {
        /// Cursor from a previous page's `next`
        #[arg(long)]
        cursor: Option<String>,
    },
}

// ── Input parsing ──────────────────────────────────────────────────

/// `key=value` pairs into a JSON object. Values that parse as JSON keep
/// their type; anything else is sent as a string.
fn parse_inputs(pairs: &[String]) -> Result<Value> {
    let mut input = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("invalid input {pair:?}; expected key=value")))?;
        if key.is_empty() {
            return Err(Error::Config(format!("invalid input {pair:?}; empty key")));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        input.insert(key.to_string(), value);
    }
    Ok(Value::Object(input))
}

fn write_json(out: &mut impl Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).map_err(io::Error::from)?;
    writeln!(out)?;
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    write_json(&mut io::stdout().lock(), value)
}

// ── Commands ───────────────────────────────────────────────────────

fn execute(cli: Cli) -> Result<()> {
    let mut config = ClientConfig::from_env();
    if let Some(token) = cli.token {
        config = config.with_api_token(token);
    }
    if let Some(url) = cli.base_url {
        config = config.with_base_url(url);
    }
    let client = Client::new(config)?;

    match cli.command {
        Command::Run { reference, inputs, wait } => {
            let mut params = CreatePrediction::new(parse_inputs(&inputs)?);
            if let Some(seconds) = wait {
                params = params.with_wait(seconds);
            }
            let output = client.run_with(&reference, params)?;
            print_json(&output)
        }
        Command::Stream { reference, inputs, logs } => {
            let mut stream = client.stream(&reference, parse_inputs(&inputs)?)?;
            let mut stdout = io::stdout().lock();
            for event in stream.by_ref() {
                let event = event?;
                match event.event {
                    EventType::Output => {
                        // Best effort: a closed stdout (e.g. `| head`) just ends output.
                        if write!(stdout, "{event}").and_then(|_| stdout.flush()).is_err() {
                            break;
                        }
                    }
                    EventType::Logs if logs => eprintln!("{}", event.data),
                    _ => {}
                }
            }
            stream.close();
            let _ = writeln!(stdout);
            Ok(())
        }
        Command::Predictions { action } => match action {
            PredictionAction::Get { id } => print_json(&client.predictions().get(&id)?),
            PredictionAction::Cancel { id } => print_json(&client.predictions().cancel_by_id(&id)?),
            PredictionAction::List { cursor } => {
                let cursor = cursor.map_or(Cursor::Start, Cursor::At);
                let page = client.predictions().list(cursor)?;
                print_json(&serde_json::json!({
                    "results": page.results,
                    "next": page.next,
                    "previous": page.previous,
                }))
            }
        },
        Command::Hardware => print_json(&client.hardware().list()?),
        Command::Account => print_json(&client.accounts().current()?),
        Command::WebhookSecret => print_json(&client.webhooks().default_secret()?),
    }
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();

    if let Err(e) = execute(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
