//! buildpush command-line entry point.

mod app;
mod config;
mod render;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "buildpush")]
#[command(about = "Pushes game builds as binary-diff patches")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, global = true, env = "BUILDPUSH_CONFIG")]
    config: Option<PathBuf>,

    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a new build to a channel
    Push(PushCommand),
}

#[derive(Args)]
struct PushCommand {
    /// Build directory or .zip archive
    path: PathBuf,

    /// Where to push, as user/page:channel
    target: String,

    /// Version label shown to players
    #[arg(long = "userversion", default_value = "")]
    user_version: String,

    /// Restore executable bits on binaries and scripts
    #[arg(long, default_value_t = false)]
    fix_permissions: bool,

    /// Upload chunks (256 KiB each) sent per request
    #[arg(long)]
    max_chunk_group: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = config::Config::load(cli.config.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Push(cmd) => rt.block_on(app::push(
            config,
            app::PushArgs {
                path: cmd.path,
                spec: cmd.target,
                user_version: cmd.user_version,
                fix_permissions: cmd.fix_permissions,
                max_chunk_group: cmd.max_chunk_group,
            },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_push() {
        let cli = Cli::try_parse_from([
            "buildpush",
            "-v",
            "push",
            "build/",
            "user/game:linux-64",
            "--userversion",
            "1.2.0",
            "--fix-permissions",
            "--max-chunk-group",
            "8",
        ])
        .unwrap();
        assert!(cli.verbose);

        let Commands::Push(cmd) = cli.command;
        assert_eq!(cmd.path, PathBuf::from("build/"));
        assert_eq!(cmd.target, "user/game:linux-64");
        assert_eq!(cmd.user_version, "1.2.0");
        assert!(cmd.fix_permissions);
        assert_eq!(cmd.max_chunk_group, Some(8));
    }

    #[test]
    fn push_needs_a_target() {
        assert!(Cli::try_parse_from(["buildpush", "push", "build/"]).is_err());
    }
}
