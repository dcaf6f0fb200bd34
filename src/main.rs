//! Mock Interceptor - CLI Entry Point
//!
//! Loads a rule file and checks it, or replays a single request against it.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use mock_interceptor::{Client, MockConfig, NoNetwork};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-interceptor",
    about = "Rule-based HTTP mock interceptor - validate rule files and replay requests against them",
    version
)]
struct Args {
    /// Path to the rule file
    #[arg(short, long, default_value = "rules.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print an example rule file and exit
    #[arg(long)]
    print_config: bool,

    /// Validate the rule file and exit
    #[arg(long)]
    validate: bool,

    /// Replay a request, e.g. `--request GET https://host/path`
    #[arg(long, num_args = 2, value_names = ["METHOD", "URL"])]
    request: Option<Vec<String>>,

    /// Request header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    body: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        println!("{}", include_str!("../demos/default-rules.yaml"));
        return Ok(());
    }

    if !args.config.exists() {
        anyhow::bail!("Rule file not found: {:?}", args.config);
    }
    info!(path = ?args.config, "Loading rules");
    let config = MockConfig::from_file(&args.config)?;

    if args.validate {
        println!(
            "Rule file is valid ({} rules, {:?} behavior)",
            config.rules.len(),
            config.behavior
        );
        return Ok(());
    }

    let Some(request) = args.request else {
        println!("Nothing to do: pass --validate or --request METHOD URL");
        return Ok(());
    };
    let (method, url) = match request.as_slice() {
        [method, url] => (method.to_uppercase(), url),
        _ => anyhow::bail!("--request takes a method and a URL"),
    };

    let mut builder = http::Request::builder().method(method.as_str()).uri(url.as_str());
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Invalid header {:?}, expected `Name: value`", header))?;
        builder = builder.header(name.trim(), value.trim());
    }
    let request = builder.body(Bytes::from(args.body.unwrap_or_default()))?;

    let interceptor = Arc::new(config.build_interceptor()?);
    let client = Client::builder()
        .interceptor(interceptor.clone())
        .transport(Arc::new(NoNetwork))
        .build();

    let response = client
        .execute(request)
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    println!("{}", response.status());
    for (name, value) in response.headers() {
        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    println!();
    println!("{}", String::from_utf8_lossy(response.body()));

    info!(
        total = interceptor.total_requests(),
        matched = interceptor.total_matched(),
        "Request replayed"
    );
    Ok(())
}
