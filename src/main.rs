//! # Table Talk CLI (`ttq`)
//!
//! Ask questions about a BigQuery dataset in plain language.
//!
//! ## Usage
//!
//! ```bash
//! ttq --config ./config/table-talk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ttq check` | Resolve credentials and print the effective configuration |
//! | `ttq seed` | Bootstrap the retrieval corpus from the config file |
//! | `ttq ask "<question>"` | Answer a question against the dataset |
//! | `ttq training-data` | List every entry stored in the corpus |
//!
//! ## Examples
//!
//! ```bash
//! # Verify credentials resolve before anything else
//! ttq check
//!
//! # Seed once; a populated corpus is left alone
//! ttq seed
//!
//! # Re-seed after editing the corpus config
//! ttq seed --force
//!
//! ttq ask "How many active allocations do we have today?"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use table_talk::chroma::ChromaClient;
use table_talk::config::{self, Config};
use table_talk::corpus;
use table_talk::credentials::{Configuration, CredentialResolver};
use table_talk::knowledge::{ChromaKnowledge, KnowledgeClient};
use table_talk::model::GeminiClient;
use table_talk::models::AnswerStatus;
use table_talk::orchestrator::QueryOrchestrator;
use table_talk::render::render_table;
use table_talk::warehouse::BigQueryWarehouse;

/// Table Talk CLI — retrieval-grounded question answering over a BigQuery
/// dataset.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/table-talk.example.toml` for a full example. Secrets
/// are never read from the config file; they come from the secrets dir,
/// credentials file, or environment, in that order.
#[derive(Parser)]
#[command(
    name = "ttq",
    about = "Table Talk — ask questions about a BigQuery dataset in plain language",
    version,
    long_about = "Table Talk answers natural-language questions by generating BigQuery SQL \
    grounded in a seeded retrieval corpus (schema, documentation, example pairs), validating \
    it as read-only, executing it, and enriching the result with an optional chart, a summary, \
    and follow-up questions."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/table-talk.toml`. Warehouse, model, and corpus
    /// settings are read from this file.
    #[arg(long, global = true, default_value = "./config/table-talk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Resolve credentials and print the effective configuration.
    ///
    /// Walks the credential source chain, validates the service-account
    /// blob and model API key, and prints what was resolved without
    /// touching the warehouse or the model.
    Check,

    /// Bootstrap the retrieval corpus.
    ///
    /// Inserts the schema, documentation, and example entries declared in
    /// the config file, schema first. A corpus that already holds entries
    /// is left untouched unless `--force` is given.
    Seed {
        /// Seed even when the corpus is already populated.
        #[arg(long)]
        force: bool,
    },

    /// Answer a question against the dataset.
    ///
    /// Generates SQL grounded in the corpus, validates it as read-only,
    /// executes it on BigQuery, and prints the rows, summary, chart
    /// description, and follow-up questions.
    Ask {
        /// The question, in any language.
        question: String,
    },

    /// List every entry stored in the corpus.
    TrainingData,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let resolver = CredentialResolver::from_config(&cfg.credentials);
    let configuration = Arc::new(resolver.resolve(&cfg)?);

    match cli.command {
        Commands::Check => {
            println!("Credentials resolved.");
            println!("  project:   {}", configuration.warehouse_project_id);
            println!("  dataset:   {}", configuration.dataset_id);
            println!(
                "  account:   {}",
                configuration.warehouse_credential.client_email
            );
            println!("  model:     {}", configuration.model_name);
            if let Some(path) = configuration.credential_path() {
                println!("  key file:  {}", path.display());
            }
        }
        Commands::Seed { force } => {
            let knowledge = build_knowledge(&cfg, &configuration)?;
            let entries = cfg.corpus.seed_entries();
            let result = corpus::ensure_seeded(knowledge.as_ref(), &entries, force)
                .await
                .context("corpus bootstrap failed")?;
            if result.skipped {
                println!("Corpus already seeded; nothing to do (use --force to re-seed).");
            } else {
                println!(
                    "Seeded {} entries ({} failed).",
                    result.inserted, result.failed
                );
            }
        }
        Commands::Ask { question } => {
            let knowledge = build_knowledge(&cfg, &configuration)?;
            let model = Arc::new(GeminiClient::new(
                &cfg.model,
                &configuration.model_api_key,
                &configuration.model_name,
            )?);
            let warehouse = Arc::new(BigQueryWarehouse::new(
                &configuration,
                cfg.warehouse.timeout_secs,
            )?);
            let orchestrator =
                QueryOrchestrator::new(Arc::clone(&configuration), knowledge, model, warehouse);

            let bundle = orchestrator.answer(&question).await;
            print_bundle(&bundle);
        }
        Commands::TrainingData => {
            let knowledge = build_knowledge(&cfg, &configuration)?;
            let entries = knowledge
                .training_data()
                .await
                .context("failed to list corpus")?;
            if entries.is_empty() {
                println!("Corpus is empty. Run `ttq seed` first.");
            } else {
                for entry in &entries {
                    println!("[{}] {}", entry.kind(), entry.document());
                    println!();
                }
                println!("{} entries.", entries.len());
            }
        }
    }

    Ok(())
}

fn build_knowledge(cfg: &Config, configuration: &Configuration) -> Result<Arc<dyn KnowledgeClient>> {
    let chroma = ChromaClient::new(&cfg.corpus.url, &cfg.corpus.collection, cfg.model.timeout_secs)?;
    let model = Arc::new(GeminiClient::new(
        &cfg.model,
        &configuration.model_api_key,
        &configuration.model_name,
    )?);
    Ok(Arc::new(ChromaKnowledge::new(
        chroma,
        model,
        &configuration.warehouse_project_id,
        &configuration.dataset_id,
        cfg.corpus.top_k,
    )))
}

fn print_bundle(bundle: &table_talk::models::AnswerBundle) {
    match &bundle.status {
        AnswerStatus::Answered => {}
        AnswerStatus::NoQueryGenerated => {
            println!("No SQL query could be generated for this question.");
            return;
        }
        AnswerStatus::GenerationFailed { message } => {
            println!("SQL generation failed: {message}");
            return;
        }
        AnswerStatus::Rejected { sql } => {
            println!("The generated statement was rejected as not read-only:");
            println!();
            println!("  {sql}");
            return;
        }
        AnswerStatus::ExecutionFailed { message, hint } => {
            println!("Query execution failed: {message}");
            if let Some(hint) = hint {
                println!("Hint: {hint}");
            }
            if let Some(sql) = &bundle.sql {
                println!();
                println!("SQL: {sql}");
            }
            print_followups(&bundle.followups);
            return;
        }
    }

    if let Some(sql) = &bundle.sql {
        println!("SQL: {sql}");
        println!();
    }
    println!("{}", render_table(&bundle.rows));

    if let Some(summary) = &bundle.summary {
        println!("{summary}");
    }
    if let Some(chart) = &bundle.chart {
        let title = chart.title.as_deref().unwrap_or("untitled");
        println!();
        println!(
            "Chart: {} \"{}\" ({} points)",
            chart.kind,
            title,
            chart.x.len()
        );
    }
    print_followups(&bundle.followups);
}

fn print_followups(followups: &[String]) {
    if followups.is_empty() {
        return;
    }
    println!();
    println!("You might also ask:");
    for question in followups {
        println!("  - {question}");
    }
}
