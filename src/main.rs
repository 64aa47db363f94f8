use clap::Parser;
use env_logger::Env;
use std::process;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use vxrecon::{
    cli::{Cli, Commands},
    config::Config,
    display::DisplayManager,
    job::{ScanService, VerifiedFilter},
    reporting::ReportGenerator,
    store::MemoryStore,
    types::JobStatus,
    utils, Result,
};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    let display = DisplayManager::with_quiet(cli.quiet);

    let config = match &cli.config {
        Some(path) => match Config::load_from_file(&path.to_string_lossy()) {
            Ok(config) => {
                display.print_success(&format!("Loaded configuration from {}", path.display()));
                config
            }
            Err(e) => {
                display.print_warning(&format!("Failed to load configuration: {}, using defaults", e));
                Config::default()
            }
        },
        None => Config::from_env().unwrap_or_else(|e| {
            display.print_warning(&format!("Ignoring environment configuration: {}", e));
            Config::default()
        }),
    };

    let result = match cli.command {
        Commands::Scan {
            target,
            name,
            output,
            format,
            no_crawl,
            timeout,
            delay_ms,
        } => {
            let mut config = config;
            if let Some(output) = output {
                config.reporting.output_dir = output;
            }
            if let Some(format) = format {
                config.reporting.format = format.into();
            }
            if no_crawl {
                config.crawler.enabled = false;
            }
            if let Some(timeout) = timeout {
                config.http.timeout = timeout;
            }
            if let Some(delay_ms) = delay_ms {
                config.http.delay_ms = delay_ms;
            }

            display.print_banner("VX RECON - Web Reconnaissance", Some("Authorized Testing Only"));
            display.print_warning("Ensure you have proper permission before scanning any target.");
            execute_scan(config, &display, &target, name.as_deref().unwrap_or("")).await
        }
        Commands::InitConfig { path } => match config.save_to_file(&path.to_string_lossy()) {
            Ok(()) => {
                display.print_success(&format!("Wrote default configuration to {}", path.display()));
                Ok(true)
            }
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            display.print_error(&format!("{}", e));
            process::exit(1);
        }
    }
}

/// Run one scan to completion. `Ok(false)` when the job ended in error.
async fn execute_scan(config: Config, display: &DisplayManager, target: &str, name: &str) -> Result<bool> {
    let start_time = SystemTime::now();
    let reporting = config.reporting.clone();
    let service = ScanService::from_config(config, Arc::new(MemoryStore::new()));

    let target = service.create_target(name, target).await?;
    display.print_info(&format!("Target #{}: {} ({})", target.id, target.name, target.base_url));

    let started = service.start_job(target.id).await?;
    let bar = if display.is_quiet() {
        None
    } else {
        Some(utils::progress::create_job_bar("scanning"))
    };

    let view = loop {
        let view = service.job_status(started.job_id).await?;
        if let Some(bar) = &bar {
            bar.set_position(view.progress as u64);
            bar.set_message(view.status.as_str().to_string());
        }
        if view.status.is_terminal() {
            break view;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    if view.status == JobStatus::Error {
        display.print_error(&format!("Job {} failed", view.id));
        display.print_log_tail(&view.log_tail);
    }

    let findings = service.findings(started.job_id, VerifiedFilter::All).await?;
    if !findings.is_empty() {
        display.print_section_header("FINDINGS");
        for finding in &findings {
            display.print_finding(finding);
        }
    }
    display.print_summary(&service.summary(started.job_id).await?);

    let path = ReportGenerator::new(reporting.clone())
        .write(started.job_id, &findings, reporting.format)
        .await?;
    display.print_success(&format!("Report saved to {}", path.display()));

    let elapsed = start_time.elapsed().unwrap_or_default();
    display.print_info(&format!("Finished in {}", utils::time::format_duration(elapsed)));

    Ok(view.status == JobStatus::Complete)
}
