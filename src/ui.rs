use colored::Colorize;
use provision::{DispatchResult, RunReport};
use std::time::Duration;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Run Summary
// ============================================================================

/// Format a duration as `1h 02m`, `3m 07s` or `12s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Print the end-of-run summary
pub fn print_report(report: &RunReport) {
    header("Provisioning summary");
    kv("Backend", report.backend);

    match &report.dispatch {
        Some(dispatch) => print_dispatch(dispatch),
        None => dim("Builds were still running when the run was abandoned."),
    }

    if let Some(config) = &report.config {
        section("Configuration");
        if config.skipped {
            dim("No run list; skipped.");
        }
        for host in &config.configured {
            println!("  {} {}", "✓".green(), host);
        }
        for (host, err) in &config.failed {
            println!("  {} {} {}", "✗".red(), host, format!("({err})").dimmed());
        }
    }

    println!();
    if report.is_aborted() {
        error("Provisioning was abandoned before all hosts finished");
    } else if report.exit_code() == 0 {
        success("All hosts built and configured");
    } else {
        error("Some hosts did not finish provisioning");
    }
}

fn print_dispatch(dispatch: &DispatchResult) {
    kv(
        "Hosts",
        &format!(
            "{} built, {} failed, {} aborted",
            dispatch.succeeded.len(),
            dispatch.failed.len(),
            dispatch.aborted.len()
        ),
    );

    if !dispatch.succeeded.is_empty() {
        section("Built");
        for host in &dispatch.succeeded {
            println!("  {} {}", "✓".green(), host);
        }
    }

    if !dispatch.failed.is_empty() {
        section("Failed");
        for outcome in &dispatch.failed {
            let detail = outcome.error.as_deref().unwrap_or("unknown error");
            println!(
                "  {} {} {} {}",
                "✗".red(),
                outcome.host,
                format!("({detail})").dimmed(),
                format_elapsed(outcome.elapsed).dimmed()
            );
        }
    }

    if !dispatch.aborted.is_empty() {
        section("Aborted");
        for outcome in &dispatch.aborted {
            println!("  {} {}", "○".dimmed(), outcome.host);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed_seconds() {
        assert_eq!(format_elapsed(Duration::ZERO), "0s");
        assert_eq!(format_elapsed(Duration::from_secs(59)), "59s");
    }

    #[test]
    fn test_format_elapsed_minutes() {
        assert_eq!(format_elapsed(Duration::from_secs(60)), "1m 00s");
        assert_eq!(format_elapsed(Duration::from_secs(187)), "3m 07s");
    }

    #[test]
    fn test_format_elapsed_hours() {
        assert_eq!(format_elapsed(Duration::from_secs(3600)), "1h 00m");
        assert_eq!(format_elapsed(Duration::from_secs(3720 + 59)), "1h 02m");
    }
}
