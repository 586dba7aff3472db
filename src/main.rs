mod cli;
mod commands;
mod config;
mod paths;
mod progress;
mod schema;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, ProvisionCommand};
use std::{io, process};

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() {
    let cli = match Cli::try_parse_from(cli::normalize_help(std::env::args_os())) {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and are not failures.
            let code = i32::from(e.use_stderr());
            let _ = e.print();
            process::exit(code);
        }
    };

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    let code = match run(&ctx, cli.command) {
        Ok(code) => code,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            1
        }
    };
    process::exit(code);
}

fn run(ctx: &Context, command: Command) -> Result<i32> {
    match command {
        Command::Provision(ProvisionCommand::Physical(args)) => {
            commands::provision::run_physical(ctx, args)
        }
        Command::Provision(ProvisionCommand::Virtual(args)) => {
            commands::provision::run_virtual(ctx, args)
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "overseer", &mut io::stdout());
            Ok(0)
        }
    }
}
