//! Minimal CLI over the identity core: initialize a profile, replay a
//! recorded session against it, and inspect status.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use aril_core::core::observer::InteractionRecord;
use aril_core::{setup_logging, CoreConfig, FileLog, UnifiedIdentity, Vocabulary};

#[derive(Parser)]
#[command(name = "aril", about = "Online identity-learning core")]
struct Cli {
    /// Storage directory for the agent's private log
    #[arg(long, default_value = ".aril")]
    dir: PathBuf,

    /// Agent identifier
    #[arg(long, default_value = "agent")]
    agent: String,

    /// Log filter, e.g. "info" or "aril_core=debug"
    #[arg(long)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a fresh identity with the given dimensions
    Init {
        /// Comma-separated behavioral assertion names (max 16)
        #[arg(long, value_delimiter = ',')]
        dims: Vec<String>,
        /// Uniform coupling strength between dimensions
        #[arg(long, default_value_t = 0.2)]
        coupling: f64,
    },
    /// Replay a recorded session (InteractionRecord JSON) and learn from it
    Session {
        /// Path to the recorded interaction JSON
        record: PathBuf,
    },
    /// Print the current status report
    Status,
    /// Verify the declaration chain and print the continuity proof
    Verify,
    /// Force a save of the current state
    Save,
}

async fn wake(cli: &Cli, vocab: Vocabulary) -> Result<UnifiedIdentity> {
    let log = Arc::new(FileLog::open(&cli.dir).await?);
    Ok(UnifiedIdentity::wake(&cli.agent, vocab, CoreConfig::default(), log).await?)
}

/// Recover the persisted vocabulary so subcommands after init don't need
/// the dimension list again.
async fn stored_vocabulary(cli: &Cli) -> Result<Vocabulary> {
    let raw = tokio::fs::read(cli.dir.join("index.json"))
        .await
        .context("no identity at this directory; run `aril init` first")?;
    let index: aril_core::core::storage::LogIndex = serde_json::from_slice(&raw)?;
    let slot = index
        .find(aril_core::core::storage::STATE_ENTRY_ID)
        .context("identity has never been saved")?;
    let entry_raw = tokio::fs::read(cli.dir.join(format!("{}.json", slot.hash))).await?;
    let entry: aril_core::core::storage::LogEntry = serde_json::from_slice(&entry_raw)?;
    let vocab = entry
        .metadata
        .get("vocabulary")
        .cloned()
        .context("stored state has no vocabulary")?;
    Ok(serde_json::from_value(vocab)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log.clone());

    match &cli.command {
        Command::Init { dims, coupling } => {
            let vocab = Vocabulary::fully_connected(dims.clone(), *coupling)?;
            let log = Arc::new(FileLog::open(&cli.dir).await?);
            let identity =
                UnifiedIdentity::new(&cli.agent, vocab, CoreConfig::default()).with_log(log);
            identity.save().await?;
            println!(
                "initialized '{}' with {} dimensions at {}",
                cli.agent,
                identity.vocabulary().len(),
                cli.dir.display()
            );
        }
        Command::Session { record } => {
            let vocab = stored_vocabulary(&cli).await?;
            let mut identity = wake(&cli, vocab).await?;
            let raw = tokio::fs::read(record)
                .await
                .with_context(|| format!("reading {}", record.display()))?;
            let interaction: InteractionRecord = serde_json::from_slice(&raw)?;

            identity.start_session(&interaction.id).await?;
            for call in &interaction.tool_calls {
                identity.record_tool_call(call.clone());
            }
            for d in &interaction.decisions {
                identity.record_decision(d);
            }
            for f in &interaction.failures {
                identity.record_failure(f);
            }
            for v in &interaction.verifications {
                identity.record_verification(v);
            }
            for s in &interaction.information_seeks {
                identity.record_information_seek(s);
            }
            let report = identity.end_session().await?;

            println!("R      = {:+.4} (adj {:+.4})", report.outcome.r, report.outcome.r_adj);
            println!("alpha  = {:.2}", report.blend_alpha);
            for (i, (name, _)) in identity.status().dimensions.iter().enumerate() {
                println!(
                    "  {:<24} phi={:+.4} dw={:+.5}",
                    name, report.attributions[i], report.delta_w[i]
                );
            }
            for directive in report.directives.iter().take(5) {
                println!("- [{:?}] {}", directive.strength, directive.text);
            }
        }
        Command::Status => {
            let vocab = stored_vocabulary(&cli).await?;
            let identity = wake(&cli, vocab).await?;
            let status = identity.status();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Verify => {
            let vocab = stored_vocabulary(&cli).await?;
            let identity = wake(&cli, vocab).await?;
            let verification = identity.chain().verify();
            let proof = identity
                .chain()
                .continuity_proof(identity.state(), identity.params());
            println!("valid: {}", verification.valid);
            for e in &verification.errors {
                println!("  {}", e);
            }
            println!("{}", serde_json::to_string_pretty(&proof)?);
        }
        Command::Save => {
            let vocab = stored_vocabulary(&cli).await?;
            let identity = wake(&cli, vocab).await?;
            identity.save().await?;
            println!("saved");
        }
    }
    Ok(())
}
