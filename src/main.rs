//! `stagehand` command-line entry point.
//!
//! ## Commands
//!
//! - `review`: run the code-review pipeline over one source file
//! - `ask`: run the research pipeline over one question

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use stagehand::provider::{self, ChatProvider};
use stagehand::research::{Coordinator, Question};
use stagehand::review::{Lang, Orchestrator, Severity, SourceFile};
use stagehand::{Config, StageOptions};

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sequential LLM agent pipelines for code review and research Q&A", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: per-user config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Review a source file and print a refactor plan
    Review {
        /// Source file to review
        path: Option<PathBuf>,

        /// Source file to review (alternative to the positional argument)
        #[arg(short, long = "file", value_name = "FILE", conflicts_with = "path")]
        file: Option<PathBuf>,

        /// Source language (inferred from the extension when omitted)
        #[arg(long)]
        lang: Option<Lang>,

        /// Only report issues at or above this severity (low, medium, high, critical)
        #[arg(long, value_name = "SEVERITY")]
        min_severity: Option<Severity>,

        /// Exit with an error when any issue reaches this severity
        #[arg(long, value_name = "SEVERITY")]
        fail_on: Option<Severity>,

        /// Also write the plan as pretty JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print JSON instead of markdown
        #[arg(long)]
        json: bool,
    },

    /// Answer a question with the research pipeline
    Ask {
        /// The question to answer
        question: String,

        /// Extra background for the researcher
        #[arg(long)]
        context: Option<String>,

        /// Also write the answer as pretty JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
}

/// Install the stderr fmt subscriber. `RUST_LOG` wins over the configured
/// level; `--verbose` wins over both.
fn init_tracing(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_provider(config: &Config) -> Result<Arc<dyn ChatProvider>> {
    let settings = config
        .provider_settings()
        .context("cannot start without model credentials")?;
    let timeout = Duration::from_secs(config.request_timeout_secs);
    Ok(provider::from_settings(&settings, timeout)?)
}

/// Print the result and optionally persist it as pretty JSON.
async fn emit<T: Serialize>(
    value: &T,
    markdown: String,
    json: bool,
    output: Option<&Path>,
) -> Result<()> {
    let pretty = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    if json {
        println!("{pretty}");
    } else {
        println!("{markdown}");
    }
    if let Some(path) = output {
        tokio::fs::write(path, &pretty)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "Result saved");
    }
    Ok(())
}

/// Options of the `review` subcommand.
struct ReviewArgs {
    path: PathBuf,
    lang: Option<Lang>,
    min_severity: Option<Severity>,
    fail_on: Option<Severity>,
    output: Option<PathBuf>,
    json: bool,
}

async fn review(config: &Config, args: ReviewArgs) -> Result<()> {
    let ReviewArgs {
        path,
        lang,
        min_severity,
        fail_on,
        output,
        json,
    } = args;
    let provider = build_provider(config)?;

    let code = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let lang = lang.unwrap_or_else(|| Lang::from_path(&path));
    tracing::info!(path = %path.display(), language = lang.name(), "Reviewing file");

    let mut plan = Orchestrator::new(provider, StageOptions::from(config))
        .run(SourceFile::new(code, lang))
        .await
        .with_context(|| format!("review of {} failed", path.display()))?;
    let failing = fail_on.map(|threshold| (threshold, plan.count_at_least(threshold)));
    if let Some(min) = min_severity {
        plan.retain_min_severity(min);
    }

    emit(&plan, plan.to_markdown(), json, output.as_deref()).await?;

    match failing {
        Some((threshold, count)) if count > 0 => {
            bail!("{count} issue(s) at or above {threshold} severity")
        }
        _ => Ok(()),
    }
}

async fn ask(
    config: &Config,
    question: String,
    context: Option<String>,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let provider = build_provider(config)?;

    let mut question = Question::new(question);
    if let Some(ctx) = context {
        question = question.with_context(ctx);
    }

    let answer = Coordinator::new(provider, StageOptions::from(config))
        .answer(question)
        .await
        .context("research pipeline failed")?;

    emit(&answer, answer.to_markdown(), json, output.as_deref()).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.log_level, cli.verbose);

    match cli.command {
        Commands::Review {
            path,
            file,
            lang,
            min_severity,
            fail_on,
            output,
            json,
        } => {
            let path = path
                .or(file)
                .context("no input file given (pass FILE or --file FILE)")?;
            let args = ReviewArgs {
                path,
                lang,
                min_severity,
                fail_on,
                output,
                json,
            };
            review(&config, args).await
        }
        Commands::Ask {
            question,
            context,
            output,
            json,
        } => ask(&config, question, context, output, json).await,
    }
}
