use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "transferd")]
#[command(about = "Multi-file transfer daemon driving an external downloader", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download every transfer in a manifest
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// TOML manifest listing transfers and their files
    #[arg(long)]
    pub manifest: PathBuf,

    /// Config file (defaults to $TRANSFERD_CONFIG or config/transferd.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Exit once no transfer has files left to download
    #[arg(long)]
    pub exit_when_idle: bool,
}
