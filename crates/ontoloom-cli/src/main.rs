//! ontoloom: run relation population, string expansion and code matching
//! from YAML definitions.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use ontoloom_cli::{commands, logging, LogSettings};
use ontoloom_jobs::TaskSnapshot;

#[derive(Parser)]
#[command(name = "ontoloom")]
#[command(author, version, about = "LLM relation population and vector code matching")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a populator over its concept selection and persist the triples
    Populate {
        /// Populator YAML file
        #[arg(short, long)]
        config: PathBuf,

        /// Count failed items and continue instead of stopping
        #[arg(long)]
        keep_going: bool,
    },

    /// Run a relation set over literal terms without persisting anything
    TestTerms {
        /// Relation-set YAML file
        #[arg(short, long)]
        relation_set: PathBuf,

        /// Newline-separated terms
        #[arg(short, long, conflicts_with = "terms_file")]
        terms: Option<String>,

        /// File with one term per line
        #[arg(long)]
        terms_file: Option<PathBuf>,

        /// LLM YAML file (default: LLM_BACKEND and friends)
        #[arg(long)]
        llm: Option<PathBuf>,
    },

    /// Expand selected strings with the model and write expansion summaries
    Expand {
        /// Expansion YAML file
        #[arg(short, long)]
        config: PathBuf,

        /// Count failed strings and continue instead of stopping
        #[arg(long)]
        keep_going: bool,
    },

    /// Write code summary vectors for a terminology or code set
    SummarizeCodes {
        /// Code summary YAML file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Rank target codes against extracted objects and persist the matches
    Match {
        /// Matcher YAML file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Apply pending database migrations
    Migrate,

    /// Print the prompt template built for a relation set
    ShowPrompt {
        /// Relation-set YAML file
        #[arg(short, long)]
        relation_set: PathBuf,
    },
}

fn print_result(snapshot: &TaskSnapshot) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(snapshot)?;
    println!("{}", out);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Populate { config, keep_going } => {
            let fail_fast = keep_going.then_some(false);
            print_result(&commands::populate(&config, fail_fast).await?)?;
        }
        Commands::TestTerms {
            relation_set,
            terms,
            terms_file,
            llm,
        } => {
            let terms = match (terms, terms_file) {
                (Some(terms), _) => terms,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => anyhow::bail!("either --terms or --terms-file is required"),
            };
            print_result(&commands::test_terms(&relation_set, &terms, llm.as_deref()).await?)?;
        }
        Commands::Expand { config, keep_going } => {
            let fail_fast = keep_going.then_some(false);
            print_result(&commands::expand(&config, fail_fast).await?)?;
        }
        Commands::SummarizeCodes { config } => {
            print_result(&commands::summarize_codes(&config).await?)?;
        }
        Commands::Match { config } => {
            print_result(&commands::match_codes(&config).await?)?;
        }
        Commands::Migrate => commands::migrate().await?,
        Commands::ShowPrompt { relation_set } => {
            print!("{}", commands::show_prompt(&relation_set)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let settings = LogSettings::from_env();
    let _log_guard = logging::init(&settings);
    info!(
        json = settings.json,
        log_file = settings.file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
