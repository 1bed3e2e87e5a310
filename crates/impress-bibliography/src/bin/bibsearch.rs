//! bibsearch - query the merged bibliography of a document from the shell

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use impress_bibliography::{
    BibliographyConfig, BibliographyManager, BibliographyProvider, BibliographySourceWithCollections,
    DocumentContext, LocalFileProvider, ZoteroProvider,
};

/// Search the bibliography a document would see.
#[derive(Parser)]
#[command(name = "bibsearch", about = "Search local and Zotero bibliographies")]
struct Cli {
    /// Document whose directory relative bibliography paths resolve against
    #[arg(long)]
    document: Option<PathBuf>,

    /// Bibliography files (.bib, .bibtex, .json), as the document metadata would list them
    #[arg(long = "bibliography", short = 'b')]
    bibliographies: Vec<PathBuf>,

    /// Zotero data directory (detected when omitted)
    #[arg(long)]
    zotero_dir: Option<PathBuf>,

    /// Leave the Zotero library out
    #[arg(long)]
    no_zotero: bool,

    /// Only records of this provider ("local", "zotero")
    #[arg(long)]
    provider: Option<String>,

    /// Only records in this collection key
    #[arg(long)]
    collection: Option<String>,

    /// Maximum number of search results
    #[arg(long)]
    limit: Option<usize>,

    /// Print records as CSL-JSON
    #[arg(long)]
    json: bool,

    /// Print a BibLaTeX entry for this id instead of searching
    #[arg(long)]
    cite: Option<String>,

    /// Search text; lists every visible record when omitted
    query: Option<String>,
}

fn print_records(records: &[BibliographySourceWithCollections]) {
    for record in records {
        let authors: Vec<String> = record.author.iter().map(|a| a.display_name()).collect();
        println!(
            "{}\t{}\t{}\t{}\t{}",
            record.provider_key(),
            record.id(),
            record.year().map(|y| y.to_string()).unwrap_or_default(),
            authors.join("; "),
            record.title.as_deref().unwrap_or("")
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    let project_root = cli
        .document
        .as_deref()
        .and_then(|doc| doc.parent())
        .map(PathBuf::from)
        .unwrap_or_else(|| cwd.clone());
    let mut config = BibliographyConfig::load_standard(Some(&project_root))?;
    if let Some(dir) = cli.zotero_dir {
        config.zotero.data_dir = Some(dir);
    }
    if cli.no_zotero {
        config.zotero.enabled = false;
    }

    let providers: Vec<Arc<dyn BibliographyProvider>> = vec![
        Arc::new(LocalFileProvider::new(config.local.clone())),
        Arc::new(ZoteroProvider::new(config.zotero.clone())),
    ];

    let bibliographies: Vec<String> = cli
        .bibliographies
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    let context = DocumentContext::new(cli.document, cwd)
        .with_metadata(json!({ "bibliography": bibliographies }));

    let manager = BibliographyManager::new(providers, config);
    let summary = manager.load(&context).await;
    tracing::debug!("Load summary: {:?}", summary);

    for provider in manager.providers() {
        if let Some(warning) = manager.warning_for_provider(provider.key()) {
            eprintln!("warning: {}", warning);
        }
    }

    if let Some(id) = cli.cite {
        let record = manager
            .search(None, cli.provider.as_deref(), None)
            .into_iter()
            .find(|record| record.id() == id)
            .ok_or_else(|| format!("no source with id '{}'", id))?;
        let citation = manager
            .generate_citation(&context, &id, &record.source, Some(record.provider_key()))
            .await;
        println!("{}", citation);
        return Ok(());
    }

    let limit = cli.limit.unwrap_or(manager.config().search.limit);
    let results = manager.search_with_limit(
        cli.query.as_deref(),
        cli.provider.as_deref(),
        cli.collection.as_deref(),
        limit,
    );

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_records(&results);
    }

    Ok(())
}
