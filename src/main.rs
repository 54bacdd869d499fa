//! exrun CLI - drive Exegol containers and workflows from the shell

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

use exrun::error::Remediation;
use exrun::ops::ApiResponse;
use exrun::{EngineConfig, EngineError, Operations};

#[derive(Parser)]
#[command(name = "exrun")]
#[command(about = "exrun - command execution and workflow orchestration for Exegol containers")]
#[command(version)]
struct Cli {
    /// Path to config.yaml (defaults to ./config.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a command in a container
    Exec {
        /// Container name
        container: String,

        /// Command to run inside the container
        command: String,

        /// Per-command timeout in seconds (capped by config)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Reuse a persistent shell session
        #[arg(long)]
        session: bool,
    },

    /// List available containers
    List,

    /// Show engine and collaborator status
    Status,

    /// List catalog workflows
    Workflows {
        /// Filter by category (recon, enumeration, vulnerability_scan, ...)
        #[arg(long)]
        category: Option<String>,

        /// Filter by difficulty (easy, medium, hard)
        #[arg(long)]
        difficulty: Option<String>,

        /// Filter by tag (any match; repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Run a catalog workflow against a container
    Run {
        /// Workflow id (see `exrun workflows`)
        workflow: String,

        /// Container name
        container: String,

        /// Workflow parameter as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<EngineConfig, EngineError> {
    match path {
        Some(path) => EngineConfig::from_file(path),
        None if std::path::Path::new("config.yaml").exists() => {
            EngineConfig::from_file("config.yaml")
        }
        None => Ok(EngineConfig::default()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config) {
        Ok(config) => config,
        Err(e) => exit_with_error(e),
    };

    // Logs go to stderr; stdout carries the response JSON
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let ops = match Operations::with_builtin_catalog(config) {
        Ok(ops) => ops,
        Err(e) => exit_with_error(e),
    };
    ops.start_background();

    let response = match cli.command {
        Commands::Exec {
            container,
            command,
            timeout,
            session,
        } => ops.execute(&container, &command, timeout, session).await,
        Commands::List => ops.list_containers().await,
        Commands::Status => ops.status().await,
        Commands::Workflows {
            category,
            difficulty,
            tags,
        } => ops.list_workflows(category.as_deref(), difficulty.as_deref(), &tags),
        Commands::Run {
            workflow,
            container,
            params,
        } => {
            let params: HashMap<String, String> = params.into_iter().collect();
            ops.run_workflow(&workflow, &container, &params).await
        }
    };

    ops.shutdown().await;
    render(&response);
    if !response.success {
        std::process::exit(1);
    }
}

fn render(response: &ApiResponse) {
    println!(
        "{}",
        serde_json::to_string_pretty(response).expect("response serializes")
    );
    if let Some(error) = &response.error {
        eprintln!(
            "{} [{}] {}",
            "Error:".red().bold(),
            error.error_code,
            error.message
        );
        if let Some(remediation) = &error.remediation {
            eprintln!("  {} {}", "Fix:".yellow(), remediation);
        }
    }
}

fn exit_with_error(e: EngineError) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), e);
    if let Some(remediation) = e.remediation() {
        eprintln!("  {} {}", "Fix:".yellow(), remediation);
    }
    std::process::exit(1);
}
