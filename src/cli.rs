use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "genepack")]
#[command(about = "Pack large artifacts into chunked genes and push them to a gene store", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/genepack/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Local gene store directory
    #[arg(long, global = true, env = "GENEPACK_STORE")]
    pub store: Option<PathBuf>,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pack a file into the local store
    Pack(PackArgs),

    /// Upload a packed gene and wait until the remote has assembled it
    Push(PushArgs),

    /// Restore a packed gene's original bytes
    Unpack(UnpackArgs),

    /// List genes in the local store
    List,

    /// Remove scratch directories left by interrupted packs
    Sweep(SweepArgs),
}

#[derive(Args, Debug)]
pub struct PackArgs {
    /// File to pack
    pub source: PathBuf,

    #[arg(long)]
    pub name: String,

    /// Gene type tag (e.g. disk, config)
    #[arg(long = "type", default_value = "")]
    pub gene_type: String,

    /// Semantic version
    #[arg(long, default_value = "1.0.0")]
    pub version: String,

    /// Target architecture: any, x64, arm64
    #[arg(long, default_value = "any")]
    pub arch: String,

    /// Use xz instead of gzip
    #[arg(long)]
    pub max_compression: bool,

    /// Human-readable description stored as gene.yaml
    #[arg(long)]
    pub source_doc: Option<PathBuf>,

    /// Maximum chunk size in bytes (overrides config)
    #[arg(long)]
    pub chunk_size: Option<u64>,
}

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Gene identity (sha256:<hex> or bare hex)
    pub gene: String,

    /// Remote store base URL
    #[arg(long, env = "GENEPACK_SERVER")]
    pub server: Option<String>,

    /// Bearer token
    #[arg(long, env = "GENEPACK_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Concurrent chunk uploads (overrides config)
    #[arg(short = 'j', long)]
    pub parallelism: Option<usize>,

    /// Seconds to wait for availability without progress (overrides config)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Return after the first upload round
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Args, Debug)]
pub struct UnpackArgs {
    /// Gene identity (sha256:<hex> or bare hex)
    pub gene: String,

    /// Output file
    pub dest: PathBuf,
}

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Only remove scratch directories older than this many seconds
    #[arg(long, default_value_t = 3600)]
    pub older_than: u64,
}
