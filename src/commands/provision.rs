use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use provision::{
    ChefApplier, CommandRunner, DispatchOptions, HammerBackend, Host, PhysicalBackend, PollConfig,
    RunOptions, RunReport,
};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use crate::Context;
use crate::cli::{PhysicalArgs, RunArgs, VirtualArgs};
use crate::config::{Configspec, ProvisionTuning};
use crate::paths;
use crate::progress::ProvisionProgress;
use crate::schema::{Buildspec, Hostspec, validate_hosts};
use crate::ui;

const DEFAULT_JOBS: usize = 4;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u32 = 120;

// ============================================================================
// Commands
// ============================================================================

/// `overseer provision physical HOSTS...`
pub fn run_physical(ctx: &Context, args: PhysicalArgs) -> Result<i32> {
    validate_hosts(&args.hosts).context("Invalid host list")?;
    let hosts = args.hosts.iter().map(Host::new).collect();

    let options = run_options(&args.run, &ProvisionTuning::default(), Vec::new())?;
    let runner = CommandRunner::new(Arc::new(PhysicalBackend), options);

    execute(ctx, &args.run, runner, hosts)
}

/// `overseer provision virtual --buildspec NAME`
pub fn run_virtual(ctx: &Context, args: VirtualArgs) -> Result<i32> {
    if !args.hosts.is_empty() {
        bail!("Please use a hostspec instead of specifying hosts on the command line");
    }

    let config_path = paths::config_file(args.config.as_deref())?;
    let configspec = Configspec::load(&config_path)?;
    let buildspec = Buildspec::find(&paths::buildspec_dir(), &args.buildspec)?;
    let hostspec = Hostspec::load(&args.hostspec)?;

    let backend = HammerBackend::new(configspec.foreman.clone(), buildspec.virtual_build.clone())
        .context("Virtual builds need Foreman's hammer CLI")?;

    let run_list = buildspec.chef.run_list.clone();
    let options = run_options(&args.run, &configspec.provision, run_list.clone())?;
    let mut runner = CommandRunner::new(Arc::new(backend), options);

    if !run_list.is_empty() {
        match configspec.chef {
            Some(chef) => {
                let applier = ChefApplier::new(chef).context("Configuring hosts needs knife")?;
                runner = runner.with_applier(Arc::new(applier));
            }
            None => ui::warn(&format!(
                "Buildspec '{}' has a run list but the configspec has no [chef] section; hosts will not be configured",
                args.buildspec
            )),
        }
    }

    execute(ctx, &args.run, runner, hostspec.to_hosts())
}

// ============================================================================
// Shared
// ============================================================================

/// Merge CLI flags over configspec tuning over built-in defaults.
fn run_options(
    args: &RunArgs,
    tuning: &ProvisionTuning,
    run_list: Vec<String>,
) -> Result<RunOptions> {
    let jobs = args.jobs.or(tuning.jobs).unwrap_or(DEFAULT_JOBS);
    if jobs == 0 {
        bail!("--jobs must be at least 1");
    }

    let interval = args
        .poll_interval
        .or(tuning.poll_interval_secs)
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    let max_attempts = args
        .max_attempts
        .or(tuning.max_attempts)
        .unwrap_or(DEFAULT_MAX_ATTEMPTS);
    if max_attempts == 0 {
        bail!("--max-attempts must be at least 1");
    }

    Ok(RunOptions {
        dispatch: DispatchOptions {
            workers: jobs,
            queue_capacity: jobs,
            poll: PollConfig::new(Duration::from_secs(interval), max_attempts),
        },
        shutdown_grace: args
            .shutdown_grace
            .or(tuning.shutdown_grace_secs)
            .map(Duration::from_secs),
        run_list,
    })
}

fn execute(ctx: &Context, args: &RunArgs, runner: CommandRunner, hosts: Vec<Host>) -> Result<i32> {
    // Progress output would interleave with -v logging.
    let interactive = !ctx.quiet && !args.json && ctx.verbose == 0;
    let progress = Arc::new(if interactive {
        ProvisionProgress::new()
    } else {
        ProvisionProgress::hidden()
    });

    let runner = runner.with_observer(progress.clone());
    let interrupts = runner.interrupt_handle();
    ctrlc::set_handler(move || interrupts.interrupt())
        .context("Failed to set interrupt handler")?;

    if interactive {
        ui::info(&format!("Provisioning {} hosts", hosts.len()));
    }

    let result = runner.run(hosts);
    progress.finish();
    let report = result?;

    emit_report(ctx, args, &report, &mut io::stdout(), &mut io::stderr())?;
    Ok(report.exit_code())
}

/// Print the report for the chosen output mode.
///
/// The data-loss warning is written to `err` in every mode, `--quiet` and
/// `--json` included.
fn emit_report(
    ctx: &Context,
    args: &RunArgs,
    report: &RunReport,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<()> {
    if let Some(warning) = report.data_loss_warning() {
        writeln!(err, "{} {}", "⚠".yellow(), warning)?;
    }

    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(report)?)?;
    } else if !ctx.quiet {
        ui::print_report(report);
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
