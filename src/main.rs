use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use factverify::config::Settings;
use factverify::progress::{stream_verification, ProgressSink, StreamMessage};
use factverify::server::{run_server, Engine};
use factverify::types::ClaimEntry;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "factverify", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Cmd {
    /// HTTP + WebSocket server
    Serve {
        #[arg(long, env = "FACTVERIFY_ADDR", default_value = "0.0.0.0:8080")]
        addr: String,
    },
    /// Verify one claim, logging progress and printing the result as JSON
    Verify {
        #[arg(long)]
        word: Option<String>,
        #[arg(long)]
        claim: String,
        #[arg(long)]
        lang: Option<String>,
    },
    /// Verify JSONL claim entries in one batch
    Batch {
        #[arg(long)]
        input_file: String,
        #[arg(long)]
        output_file: String,
        #[arg(long)]
        lang: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.settings.log_level));
    FmtSubscriber::builder().with_env_filter(filter).with_target(false).init();
    info!("factverify v{}", env!("CARGO_PKG_VERSION"));

    let engine = Engine::from_settings(&cli.settings)?;
    match cli.cmd {
        Cmd::Serve { addr } => run_server(engine, &addr).await?,
        Cmd::Verify { word, claim, lang } => {
            let pipeline = if word.is_some() { engine.definitions.clone() } else { engine.statements.clone() };
            let lang = lang.unwrap_or_else(|| engine.default_lang.clone());
            let (sink, mut rx) = ProgressSink::channel();
            let only_intro = engine.only_intro;
            let job = tokio::spawn(async move { stream_verification(&pipeline, word, claim, &lang, only_intro, sink).await });

            while let Some(msg) = rx.recv().await {
                match msg {
                    StreamMessage::Progress { message } => info!(stage = %message, "progress"),
                    StreamMessage::Result { data } => println!("{}", serde_json::to_string_pretty(&data)?),
                    StreamMessage::Error { message } => anyhow::bail!(message),
                }
            }
            job.await?;
        }
        Cmd::Batch { input_file, output_file, lang } => {
            let raw = tokio::fs::read_to_string(&input_file).await.with_context(|| format!("reading {input_file}"))?;
            let entries = raw
                .lines()
                .filter(|l| !l.trim().is_empty())
                .enumerate()
                .map(|(i, l)| serde_json::from_str::<ClaimEntry>(l).with_context(|| format!("{input_file}: record {}", i + 1)))
                .collect::<Result<Vec<_>>>()?;

            let lang = lang.unwrap_or_else(|| engine.default_lang.clone());
            let results = engine.definitions.pipeline().verify_batch(&entries, &lang, engine.only_intro).await?;

            let mut out = String::new();
            for r in &results {
                out.push_str(&serde_json::to_string(r)?);
                out.push('\n');
            }
            tokio::fs::write(&output_file, out).await.with_context(|| format!("writing {output_file}"))?;
            info!(entries = entries.len(), output = %output_file, "batch verified");
        }
    }
    Ok(())
}
