use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "noctipede", about = "Multi-plane crawler for Tor, I2P and proxied clearnet")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl the seed list once network readiness is reached
    Crawl {
        /// Seed file, one absolute URL per line; # starts a comment
        #[arg(short, long)]
        seeds: Option<String>,

        /// Single seed URL
        #[arg(long)]
        seed: Option<String>,
    },
    /// Probe the proxies once and print the readiness snapshot
    Readiness,
}
