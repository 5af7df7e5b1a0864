use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use genepack::cli::{Cli, Command, PackArgs, PushArgs, SweepArgs, UnpackArgs};
use genepack::config::Config;
use genepack::pack::{self, Architecture, CodecSettings, GeneId, GenePacker, PackRequest, PackerConfig};
use genepack::progress::{BarProgress, ProgressObserver};
use genepack::store::GeneStore;
use genepack::transfer::{GenePusher, HttpRemoteStore, PushOptions, RemoteStore};
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    genepack::logging::init(cli.verbose, cli.quiet);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(store) = &cli.store {
        config.store_dir = store.clone();
    }
    let store = GeneStore::open(&config.store_dir)
        .with_context(|| format!("Failed to open store at {}", config.store_dir.display()))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping");
            on_signal.cancel();
        }
    });

    let progress = progress_observer(cli.quiet);
    match cli.command {
        Command::Pack(args) => pack_command(args, &config, store, progress, cancel).await,
        Command::Push(args) => push_command(args, &config, store, progress, &cancel).await,
        Command::Unpack(args) => unpack_command(args, store, cancel).await,
        Command::List => list_command(&store),
        Command::Sweep(args) => sweep_command(args, &store),
    }
}

fn progress_observer(quiet: bool) -> Arc<dyn ProgressObserver> {
    if quiet || !std::io::stderr().is_terminal() {
        Arc::new(BarProgress::hidden())
    } else {
        Arc::new(BarProgress::new())
    }
}

fn parse_gene(text: &str) -> Result<GeneId> {
    text.parse::<GeneId>()
        .with_context(|| format!("Invalid gene identity: {text}"))
}

async fn pack_command(
    args: PackArgs,
    config: &Config,
    store: GeneStore,
    progress: Arc<dyn ProgressObserver>,
    cancel: CancellationToken,
) -> Result<()> {
    let architecture: Architecture = args.arch.parse()?;
    let source_document = match &args.source_doc {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let packer = GenePacker::new(
        store,
        PackerConfig {
            chunk_size: args.chunk_size.unwrap_or(config.chunk_size),
            ..PackerConfig::default()
        },
    )?;
    let request = PackRequest {
        source: args.source.clone(),
        name: args.name,
        gene_type: args.gene_type,
        version: args.version,
        architecture,
        max_compression: args.max_compression,
        source_document,
    };

    let packed = packer
        .pack_async(request, progress, cancel)
        .await
        .with_context(|| format!("Failed to pack {}", args.source.display()))?;

    eprintln!(
        "{} {} ({} parts, {} -> {} bytes, {})",
        "Packed".green().bold(),
        packed.manifest.name,
        packed.manifest.parts.len(),
        packed.manifest.original_size,
        packed.manifest.size,
        packed.manifest.format
    );
    println!("{}", packed.id);
    Ok(())
}

async fn push_command(
    args: PushArgs,
    config: &Config,
    store: GeneStore,
    progress: Arc<dyn ProgressObserver>,
    cancel: &CancellationToken,
) -> Result<()> {
    let gene = parse_gene(&args.gene)?;
    let server = args
        .server
        .or_else(|| config.server.clone())
        .context("No server configured (use --server or GENEPACK_SERVER)")?;
    let token = args.token.or_else(|| config.token.clone());
    let remote: Arc<dyn RemoteStore> = Arc::new(HttpRemoteStore::new(&server, token)?);

    let mut options = PushOptions {
        reconciler: config.reconciler(),
        poller: config.poller(),
        no_wait: args.no_wait,
    };
    if let Some(parallelism) = args.parallelism {
        options.reconciler.parallelism = parallelism.max(1);
    }
    if let Some(timeout) = args.timeout {
        options.poller.timeout = Duration::from_secs(timeout);
    }

    let summary = GenePusher::new(store, remote, options)
        .push(&gene, progress, cancel)
        .await
        .with_context(|| format!("Failed to push {gene}"))?;

    let report = &summary.first_round;
    eprintln!(
        "{} {} ({} uploaded, {} already in progress, {} bytes)",
        "Pushed".green().bold(),
        gene,
        report.uploaded.len(),
        report.conflicted.len(),
        report.bytes_uploaded
    );
    if let Some(poll) = &summary.poll {
        eprintln!(
            "{} after {}s ({} extra rounds)",
            "Available".green().bold(),
            poll.waited.as_secs(),
            poll.rounds
        );
    }
    Ok(())
}

async fn unpack_command(args: UnpackArgs, store: GeneStore, cancel: CancellationToken) -> Result<()> {
    let gene = parse_gene(&args.gene)?;
    let dest = args.dest.clone();
    let written = tokio::task::spawn_blocking(move || {
        pack::unpack(&store, &gene, &dest, &CodecSettings::detect(), &cancel)
    })
    .await?
    .with_context(|| format!("Failed to unpack {}", args.gene))?;

    eprintln!(
        "{} {} bytes to {}",
        "Restored".green().bold(),
        written,
        args.dest.display()
    );
    Ok(())
}

fn list_command(store: &GeneStore) -> Result<()> {
    let genes = store.list()?;
    if genes.is_empty() {
        eprintln!("{}", "No genes in store".dimmed());
        return Ok(());
    }
    for id in genes {
        match store.load_manifest(&id) {
            Ok(manifest) => println!(
                "{}  {} {}  {}  {} parts  {} bytes",
                id.to_string().cyan(),
                manifest.name.bold(),
                manifest.version,
                manifest.format,
                manifest.parts.len(),
                manifest.original_size
            ),
            Err(e) => println!("{}  {}", id.to_string().cyan(), e.to_string().red()),
        }
    }
    Ok(())
}

fn sweep_command(args: SweepArgs, store: &GeneStore) -> Result<()> {
    let removed = store.sweep_scratch(Duration::from_secs(args.older_than))?;
    let noun = if removed == 1 { "directory" } else { "directories" };
    eprintln!("{} {} scratch {}", "Removed".green().bold(), removed, noun);
    Ok(())
}
