use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokindex::{Indexer, SearchMode, Settings, TokenizerKind};

#[derive(Parser)]
#[command(name = "tokindex")]
#[command(about = "Watch files and answer token queries from a live in-memory index")]
struct Cli {
    /// Paths to watch (directories or files)
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Configuration file (defaults to .tokindex/settings.toml in this or a parent directory)
    #[arg(short, long, env = "TOKINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Tokenizer to use (overrides config)
    #[arg(short, long, value_parser = parse_tokenizer)]
    tokenizer: Option<TokenizerKind>,

    /// Match files containing any query token instead of all of them
    #[arg(long)]
    any: bool,
}

fn parse_tokenizer(name: &str) -> Result<TokenizerKind, String> {
    match name {
        "word" => Ok(TokenizerKind::Word),
        "whitespace" => Ok(TokenizerKind::Whitespace),
        other => Err(format!("unknown tokenizer '{other}', expected word or whitespace")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Settings::load().context("failed to load configuration")?,
    };
    if let Some(tokenizer) = cli.tokenizer {
        settings.indexing.tokenizer = tokenizer;
    }
    tokindex::logging::init_with_config(&settings.logging);

    let indexer = Indexer::builder()
        .settings(settings)
        .build()
        .context("failed to start indexer")?;

    for path in &cli.paths {
        let added = indexer
            .watch_path(path)
            .await
            .with_context(|| format!("cannot watch {}", path.display()))?;
        if !added {
            eprintln!("Not watching {}: already covered or unreadable", path.display());
        }
    }
    eprintln!(
        "Indexed {} files under {} roots. Enter tokens to search, :files, :roots or :quit.",
        indexer.all_files().len(),
        indexer.watched_root_paths().len()
    );

    let mode = if cli.any { SearchMode::Any } else { SearchMode::All };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            ":quit" => break,
            ":files" => {
                for file in indexer.all_files() {
                    println!("{}", file.display());
                }
            }
            ":roots" => {
                for root in indexer.watched_root_paths() {
                    println!("{}", root.display());
                }
            }
            query => {
                let mut results: Vec<_> = indexer
                    .search_tokens(query.split_whitespace(), mode)
                    .into_iter()
                    .collect();
                results.sort_by(|a, b| a.0.cmp(&b.0));
                for (path, tokens) in results {
                    let hits: Vec<String> = tokens
                        .iter()
                        .map(|t| format!("{}@{}", t.value, t.position))
                        .collect();
                    println!("{}: {}", path.display(), hits.join(" "));
                }
            }
        }
    }

    indexer.close().await;
    Ok(())
}
