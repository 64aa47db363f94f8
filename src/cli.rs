use crate::config;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vxrecon")]
#[command(about = "Web reconnaissance orchestrator: containerized Nikto scan plus verification, header audit and crawl")]
#[command(long_about = r#"
vxrecon runs a containerized Nikto scan against a web target, re-checks every
advisory it reports, audits security headers and cookies, and crawls the site
for exposed sensitive files.

WARNING: Only scan systems you own or have explicit permission to test.

Examples:
  vxrecon scan --target http://localhost:8080
  vxrecon scan --target https://staging.example.com --format csv --no-crawl
  vxrecon init-config --path vxrecon.toml
"#)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a target and write a findings report
    Scan {
        /// Base URL of the target (scheme defaults to http)
        #[arg(short, long, value_name = "URL")]
        target: String,

        /// Display name for the target
        #[arg(short, long)]
        name: Option<String>,

        /// Output directory for the report
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Report format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,

        /// Skip the sensitive path crawl
        #[arg(long)]
        no_crawl: bool,

        /// HTTP request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Delay between HTTP requests in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Write the default configuration to a file
    InitConfig {
        #[arg(short, long, default_value = "vxrecon.toml")]
        path: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum OutputFormat {
    Json,
    Csv,
}

impl From<OutputFormat> for config::OutputFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => config::OutputFormat::Json,
            OutputFormat::Csv => config::OutputFormat::Csv,
        }
    }
}
