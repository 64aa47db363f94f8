use crate::reporting::Summary;
use crate::types::{Finding, Severity};
use colored::*;

/// Terminal output for the CLI: banners, findings and the job summary
pub struct DisplayManager {
    use_colors: bool,
    quiet_mode: bool,
}

impl DisplayManager {
    pub fn new() -> Self {
        Self::with_quiet(false)
    }

    pub fn with_quiet(quiet: bool) -> Self {
        let use_colors = std::env::var("NO_COLOR").is_err()
            && std::env::var("TERM").map_or(true, |term| term != "dumb");

        Self {
            use_colors,
            quiet_mode: quiet,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet_mode
    }

    pub fn print_finding(&self, finding: &Finding) {
        if self.quiet_mode {
            return;
        }

        let path = finding.evidence.path.as_deref().unwrap_or("-");
        let status = finding
            .evidence
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let verified = if finding.evidence.verified { "verified" } else { "unverified" };

        if self.use_colors {
            let color = self.severity_color(finding.severity);
            println!(
                "  {} {} {}",
                format!("[{}]", finding.severity.as_str().to_uppercase()).color(color).bold(),
                finding.title.truncate_with_ellipsis(100).bright_white().bold(),
                format!("({})", finding.category).bright_black()
            );
            let verified = if finding.evidence.verified {
                verified.green()
            } else {
                verified.bright_black()
            };
            println!(
                "    └─ {} {} | {} {} | {}",
                "path".blue(),
                path.cyan(),
                "status".blue(),
                status.yellow(),
                verified
            );
            if let Some(error) = &finding.evidence.error {
                println!("    └─ {}: {}", "error".red(), error.truncate_with_ellipsis(100));
            }
        } else {
            println!(
                "  [{}] {} ({})",
                finding.severity.as_str().to_uppercase(),
                finding.title,
                finding.category
            );
            println!("    path: {} | status: {} | {}", path, status, verified);
            if let Some(error) = &finding.evidence.error {
                println!("    error: {}", error);
            }
        }
    }

    pub fn print_summary(&self, summary: &Summary) {
        if self.quiet_mode {
            return;
        }

        println!();
        self.print_section_header("SCAN SUMMARY");
        if self.use_colors {
            if let Some(target) = &summary.target {
                println!("  {}: {}", "Target".bright_white().bold(), target.cyan());
            }
            println!(
                "  {}: {}",
                "Status".bright_white().bold(),
                summary.status.as_str().yellow().bold()
            );
            if summary.findings_count == 0 {
                println!("  {}", "No findings recorded".bright_green().bold());
                return;
            }
            println!(
                "  {}: {} ({} verified, {} unverified)",
                "Findings".bright_white().bold(),
                summary.findings_count.to_string().yellow().bold(),
                summary.verified_count.to_string().green(),
                summary.unverified_count.to_string().bright_black()
            );
            println!();
            self.print_severity_table(summary);
        } else {
            if let Some(target) = &summary.target {
                println!("Target: {}", target);
            }
            println!("Status: {}", summary.status);
            println!(
                "Findings: {} ({} verified, {} unverified)",
                summary.findings_count, summary.verified_count, summary.unverified_count
            );
            for (severity, count) in summary.severity_distribution.rows() {
                println!("{}: {}", severity, count);
            }
        }
        println!();
    }

    fn print_severity_table(&self, summary: &Summary) {
        let rows: Vec<_> = summary
            .severity_distribution
            .rows()
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .collect();
        if rows.is_empty() {
            return;
        }

        println!("  ┌──────────┬───────┐");
        println!(
            "  │ {} │ {} │",
            "Severity".bright_white().bold(),
            "Count".bright_white().bold()
        );
        println!("  ├──────────┼───────┤");
        for (severity, count) in rows {
            let color = self.severity_color(severity);
            println!(
                "  │ {} │ {:>5} │",
                format!("{:<8}", severity.as_str()).color(color).bold(),
                count.to_string().color(color).bold()
            );
        }
        println!("  └──────────┴───────┘");
    }

    pub fn print_section_header(&self, title: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("{}", title.bright_cyan().bold());
            println!("{}", "─".repeat(title.chars().count()).bright_cyan());
        } else {
            println!("{}", title);
            println!("{}", "=".repeat(title.len()));
        }
    }

    pub fn print_success(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "✓".bright_green().bold(), message.green());
        } else {
            println!("[✓] {}", message);
        }
    }

    pub fn print_warning(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "!".bright_yellow().bold(), message.yellow());
        } else {
            println!("[!] {}", message);
        }
    }

    /// Errors are printed even in quiet mode
    pub fn print_error(&self, message: &str) {
        if self.use_colors {
            eprintln!("  {} {}", "✗".bright_red().bold(), message.red().bold());
        } else {
            eprintln!("[✗] {}", message);
        }
    }

    pub fn print_info(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "i".bright_blue().bold(), message.blue());
        } else {
            println!("[i] {}", message);
        }
    }

    /// Replay a job's log tail, dimmed
    pub fn print_log_tail(&self, log_tail: &str) {
        if self.quiet_mode {
            return;
        }

        for line in log_tail.lines().filter(|l| !l.trim().is_empty()) {
            if self.use_colors {
                println!("    {}", line.bright_black());
            } else {
                println!("    {}", line);
            }
        }
    }

    pub fn print_banner(&self, title: &str, subtitle: Option<&str>) {
        if self.quiet_mode {
            return;
        }

        let width = title.chars().count();
        if self.use_colors {
            println!();
            println!("  {}", "┌─".bright_cyan().to_string() + &"─".repeat(width + 2) + "─┐");
            println!("  {} {} {}", "│".bright_cyan(), title.bright_white().bold(), "│".bright_cyan());
            if let Some(sub) = subtitle {
                println!(
                    "  {} {} {}",
                    "│".bright_cyan(),
                    format!("{:^width$}", sub, width = width).bright_black(),
                    "│".bright_cyan()
                );
            }
            println!("  {}", "└─".bright_cyan().to_string() + &"─".repeat(width + 2) + "─┘");
            println!();
        } else {
            let border = "=".repeat(width + 4);
            println!("\n{}", border);
            println!("  {}  ", title);
            if let Some(sub) = subtitle {
                println!("  {}  ", sub);
            }
            println!("{}\n", border);
        }
    }

    fn severity_color(&self, severity: Severity) -> Color {
        match severity {
            Severity::Critical => Color::BrightRed,
            Severity::High => Color::Red,
            Severity::Medium => Color::Yellow,
            Severity::Low => Color::Green,
        }
    }
}

impl Default for DisplayManager {
    fn default() -> Self {
        Self::new()
    }
}

trait StringExt {
    fn truncate_with_ellipsis(&self, max_len: usize) -> String;
}

impl StringExt for str {
    /// Char-boundary safe
    fn truncate_with_ellipsis(&self, max_len: usize) -> String {
        if self.chars().count() <= max_len {
            self.to_string()
        } else {
            let kept: String = self.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", kept)
        }
    }
}
