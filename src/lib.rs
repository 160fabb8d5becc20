//! Comic Ingest - crawling and ingestion pipeline for comic-reading websites
//!
//! Given a comic URL the pipeline extracts the comic's metadata and chapter
//! list, stores the comic with its cover, and ingests chapter page images
//! through two bounded priority queues.

// Module declarations
pub mod application;
pub mod crawling;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
pub mod test_utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use tracing::{error, info};

use application::{ChapterRequest, IngestionService};
use infrastructure::config::AppConfig;
use infrastructure::logging::init_logging_with_config;

#[derive(Debug, Parser)]
#[command(name = "comic-ingest", version, about = "Ingest comics, chapters and page images from comic sites")]
pub struct Cli {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve a comic URL, creating the comic and its chapter stubs on first sight
    Comic {
        url: String,
    },
    /// Ingest every chapter of a stored comic that is still ready for crawl
    Chapters {
        comic_id: i64,
    },
    /// Ingest a single chapter page for a stored comic
    Chapter {
        #[arg(long)]
        comic_id: i64,
        #[arg(long)]
        url: String,
        #[arg(long)]
        number: String,
        #[arg(long, default_value_t = 0)]
        position: i64,
    },
}

/// Parse the command line, set up logging and run one command.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging_with_config(&config.logging)?;

    let service = IngestionService::from_config(&config).await?;
    execute(&service, cli.command).await
}

pub async fn execute(service: &IngestionService, command: Command) -> Result<()> {
    match command {
        Command::Comic { url } => {
            let comic = service.resolve_or_create(&url).await?;
            println!("{}", serde_json::to_string_pretty(&comic)?);
        }
        Command::Chapters { comic_id } => {
            let mut stream = service.ingest_chapters_for_comic(comic_id).await?;
            let mut ingested = 0_usize;
            while let Some(chapter) = stream.next().await {
                ingested += 1;
                println!(
                    "chapter {} (id {}): {} images",
                    chapter.chapter_number,
                    chapter.id,
                    chapter.images.len()
                );
            }
            info!("Ingested {} chapters for comic {}", ingested, comic_id);
        }
        Command::Chapter {
            comic_id,
            url,
            number,
            position,
        } => {
            let request = ChapterRequest {
                url,
                chapter_number: number,
                comic_id,
                position,
            };
            match service.ingest_chapter(&request).await {
                Ok(chapter) => println!("{}", serde_json::to_string_pretty(&chapter)?),
                Err(e) => {
                    error!("Chapter ingestion failed: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    let status = service.queue_status().await;
    info!(
        "Queues idle check: chapter pending={} image pending={}",
        status.chapter.pending, status.image.pending
    );
    Ok(())
}
