use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use similar::TextDiff;

use checkwiki_core::config::{CheckwikiConfig, load_config};
use checkwiki_core::external::{CheckWikiTracker, MediaWikiStore};
use checkwiki_core::process::{ErrorTracker, PageStore, ProcessOptions, process_batch};
use checkwiki_core::report::SeverityCatalogue;
use checkwiki_core::{PageContext, insert_references, process_text, process_text_with};

#[derive(Debug, Parser)]
#[command(
    name = "checkwiki",
    version,
    about = "Fixes WikiProject CheckWiki defects on a MediaWiki site"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        help = "Persist pages whose only fixes are minor"
    )]
    minor: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Fix the given pages")]
    Fix(FixArgs),
    #[command(name = "fix-file", about = "Fix pages listed in files, one title per line")]
    FixFile(FixFileArgs),
    #[command(name = "fix-defect", about = "Fix pages the tracker lists for a defect id")]
    FixDefect(FixDefectArgs),
    #[command(
        name = "add-references",
        about = "Insert a missing references section, then fix defects"
    )]
    AddReferences(AddReferencesArgs),
    #[command(about = "Show what would change on a page, without saving")]
    Preview(PreviewArgs),
}

#[derive(Debug, Args)]
struct FixArgs {
    #[arg(required = true, value_name = "TITLE")]
    titles: Vec<String>,
}

#[derive(Debug, Args)]
struct FixFileArgs {
    #[arg(required = true, value_name = "PATH")]
    files: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct FixDefectArgs {
    #[arg(value_name = "ID")]
    defect_id: String,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(long, value_name = "N", help = "Process at most N pages")]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct AddReferencesArgs {
    #[arg(required = true, value_name = "TITLE")]
    titles: Vec<String>,
}

#[derive(Debug, Args)]
struct PreviewArgs {
    title: String,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("checkwiki.toml"));
    let config = load_config(&config_path)?;

    match &cli.command {
        Commands::Fix(args) => run_fix(&cli, &config, args.titles.clone()),
        Commands::FixFile(args) => {
            let mut titles = Vec::new();
            for path in &args.files {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                titles.extend(content.lines().map(ToString::to_string));
            }
            run_fix(&cli, &config, titles)
        }
        Commands::FixDefect(args) => {
            let tracker = CheckWikiTracker::new(&config)?;
            let mut titles = tracker.list_titles(&args.defect_id, args.offset)?;
            if let Some(limit) = args.limit {
                titles.truncate(limit);
            }
            if titles.is_empty() {
                println!("tracker returned no pages for defect {}", args.defect_id);
                return Ok(());
            }
            run_fix(&cli, &config, titles)
        }
        Commands::AddReferences(args) => run_add_references(&config, &args.titles),
        Commands::Preview(args) => run_preview(&config, &args.title),
    }
}

fn run_add_references(config: &CheckwikiConfig, titles: &[String]) -> Result<()> {
    let store = build_store(config)?;
    let tracker = CheckWikiTracker::new(config)?;

    for title in titles {
        let text = store.load(title)?;
        let (text, inserted) =
            insert_references(&text, None, config.fixes.unsafe_missing_references);
        if !inserted {
            println!("{title} ... skip");
            continue;
        }
        let (text, fired) = process_text(&text, Some(title.as_str()));
        store.save(title, &text, "Added missing references section.")?;
        for id in &fired {
            let _ = tracker.mark_resolved(id, title);
        }
        println!("{title} - [{}] ... ok", fired.join(", "));
    }
    Ok(())
}

fn build_store(config: &CheckwikiConfig) -> Result<MediaWikiStore> {
    let mut store = MediaWikiStore::new(config)?;
    if let (Ok(user), Ok(password)) = (env::var("WIKI_BOT_USER"), env::var("WIKI_BOT_PASSWORD")) {
        store
            .login(&user, &password)
            .context("bot login failed")?;
    }
    Ok(store)
}

fn run_fix(cli: &Cli, config: &CheckwikiConfig, titles: Vec<String>) -> Result<()> {
    let store = build_store(config)?;
    let tracker = CheckWikiTracker::new(config)?;
    let options = ProcessOptions {
        persist_minor: cli.minor,
        unsafe_extlinks: config.fixes.unsafe_extlinks,
    };

    let persisted = process_batch(&store, &tracker, &titles, &options);
    println!("fixed {persisted} of {} pages", titles.len());
    Ok(())
}

fn run_preview(config: &CheckwikiConfig, title: &str) -> Result<()> {
    let store = build_store(config)?;
    let old = store.load(title)?;

    let ctx = PageContext {
        title: Some(title.to_string()),
        unsafe_extlinks: config.fixes.unsafe_extlinks,
    };
    let (new, fired) = process_text_with(&old, &ctx);

    if fired.is_empty() {
        println!("{title}: nothing to fix");
        return Ok(());
    }

    let catalogue = SeverityCatalogue::standard();
    println!("{title} - [{}]", fired.join(", "));
    println!(
        "severity: {}{}",
        if catalogue.has_major(&fired) { "major" } else { "minor" },
        if catalogue.has_major(&fired) && catalogue.has_minor(&fired) {
            " + minor"
        } else {
            ""
        }
    );
    println!("summary: {}", catalogue.build_summary(&fired));
    println!();

    let diff = TextDiff::from_lines(old.as_str(), new.as_str());
    print!("{}", diff.unified_diff().context_radius(2).header(title, title));
    Ok(())
}
