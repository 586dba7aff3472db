use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "overseer")]
#[command(version)]
#[command(about = "Provision physical and virtual infrastructure", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Provision hosts and hand them to configuration management
    #[command(subcommand)]
    Provision(ProvisionCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Provision Commands
// ============================================================================

#[derive(Subcommand)]
pub enum ProvisionCommand {
    /// Provision physical infrastructure
    #[command(arg_required_else_help = true)]
    Physical(PhysicalArgs),

    /// Provision virtual infrastructure through Foreman
    #[command(arg_required_else_help = true)]
    Virtual(VirtualArgs),
}

#[derive(Args)]
pub struct PhysicalArgs {
    /// Hosts to provision
    #[arg(required = true)]
    pub hosts: Vec<String>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args)]
pub struct VirtualArgs {
    /// Buildspec to build hosts from (e.g., indy.prod.kafka)
    #[arg(short, long)]
    pub buildspec: String,

    /// Hostspec listing the hosts to build
    #[arg(long, default_value = "./hostspec")]
    pub hostspec: PathBuf,

    /// Path to the overseer configspec
    #[arg(short, long, env = "OVERSEER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Hosts are read from the hostspec; listing them here is an error
    #[arg(hide = true)]
    pub hosts: Vec<String>,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Tuning shared by every provision command.
#[derive(Args, Default)]
pub struct RunArgs {
    /// Number of hosts to build in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Seconds between build status checks
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Status checks before a build is considered timed out
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// After the first interrupt, abort running builds after this many seconds
    #[arg(long)]
    pub shutdown_grace: Option<u64>,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Rewrite the single-dash `-help` spelling to `--help`.
///
/// Only in flag position: a `-help` that is the value of an option such as
/// `--buildspec`, or that follows `--`, is passed through untouched.
pub fn normalize_help<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let takes_value = value_options(&Cli::command());
    let mut normalized = Vec::new();
    let mut is_value = false;
    let mut after_separator = false;

    for arg in args {
        let in_flag_position = !is_value && !after_separator;
        is_value = in_flag_position && arg.to_str().is_some_and(|a| takes_value.contains(a));
        if in_flag_position && arg == "--" {
            after_separator = true;
        }

        if in_flag_position && arg == "-help" {
            normalized.push(OsString::from("--help"));
        } else {
            normalized.push(arg);
        }
    }

    normalized
}

/// Spellings of every option that consumes the following argument.
fn value_options(cmd: &clap::Command) -> HashSet<String> {
    let mut options = HashSet::new();

    for arg in cmd.get_arguments() {
        if arg.is_positional() || !arg.get_action().takes_values() {
            continue;
        }
        if let Some(long) = arg.get_long() {
            options.insert(format!("--{long}"));
        }
        if let Some(short) = arg.get_short() {
            options.insert(format!("-{short}"));
        }
    }
    for sub in cmd.get_subcommands() {
        options.extend(value_options(sub));
    }

    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        let args = normalize_help(args.iter().map(OsString::from));
        Cli::try_parse_from(args)
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_virtual_parses_tuning_flags() {
        let cli = parse(&[
            "overseer",
            "provision",
            "virtual",
            "--buildspec",
            "indy.prod.kafka",
            "-j",
            "8",
            "--poll-interval",
            "10",
            "--json",
        ])
        .unwrap();

        let Command::Provision(ProvisionCommand::Virtual(args)) = cli.command else {
            panic!("expected provision virtual");
        };
        assert_eq!(args.buildspec, "indy.prod.kafka");
        assert_eq!(args.hostspec, PathBuf::from("./hostspec"));
        assert_eq!(args.run.jobs, Some(8));
        assert_eq!(args.run.poll_interval, Some(10));
        assert!(args.run.json);
        assert!(args.hosts.is_empty());
    }

    #[test]
    fn test_virtual_keeps_stray_hosts_for_rejection() {
        let cli = parse(&["overseer", "provision", "virtual", "-b", "web", "web01"]).unwrap();

        let Command::Provision(ProvisionCommand::Virtual(args)) = cli.command else {
            panic!("expected provision virtual");
        };
        assert_eq!(args.hosts, vec!["web01"]);
    }

    #[test]
    fn test_physical_takes_positional_hosts() {
        let cli = parse(&["overseer", "-v", "provision", "physical", "db01", "db02"]).unwrap();

        assert_eq!(cli.verbose, 1);
        let Command::Provision(ProvisionCommand::Physical(args)) = cli.command else {
            panic!("expected provision physical");
        };
        assert_eq!(args.hosts, vec!["db01", "db02"]);
    }

    #[test]
    fn test_help_spellings_are_not_errors() {
        for flag in ["-h", "--help", "-help"] {
            let err = parse(&["overseer", "provision", "virtual", flag])
                .err()
                .unwrap();
            assert_eq!(err.kind(), ErrorKind::DisplayHelp, "{flag}");
            assert!(!err.use_stderr());
        }
    }

    #[test]
    fn test_missing_buildspec_is_an_error() {
        let err = parse(&["overseer", "provision", "virtual", "--json"])
            .err()
            .unwrap();
        assert!(err.use_stderr());
    }

    #[test]
    fn test_help_spelling_as_option_value_is_kept() {
        for option in ["--buildspec", "-b", "--hostspec"] {
            let args =
                normalize_help(["overseer", "provision", "virtual", option, "-help"].map(OsString::from));
            assert_eq!(args[4], "-help", "{option}");
        }

        // A flag that takes no value does not shield what follows it.
        let args = normalize_help(["overseer", "provision", "virtual", "--json", "-help"].map(OsString::from));
        assert_eq!(args[4], "--help");
    }

    #[test]
    fn test_help_spelling_after_separator_is_kept() {
        let args = normalize_help(["overseer", "provision", "physical", "--", "-help"].map(OsString::from));
        assert_eq!(args[4], "-help");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_arguments_pass_through() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(vec![b'd', b'b', 0xff]);
        let args = normalize_help([
            OsString::from("overseer"),
            OsString::from("-help"),
            raw.clone(),
        ]);

        assert_eq!(args[1], "--help");
        assert_eq!(args[2], raw);
    }
}
