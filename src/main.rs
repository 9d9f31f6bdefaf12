use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use capstan::config::GitConfig;
use capstan::error::GitError;
use capstan::git::{GitRunner, Invocation, TranscriptSink};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "capstan")]
#[command(about = "Run git through the capstan invocation engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Start repository resolution from this directory (defaults to cwd)
    #[arg(short = 'C', long = "directory")]
    directory: Option<PathBuf>,

    /// Load engine configuration from a TOML file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mirror the live transcript to stderr while the command runs
    #[arg(long)]
    show_output: bool,

    /// The git subcommand followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

/// Transcript lines go to stderr, dimmed, so stdout stays clean for piping.
struct StderrTranscript;

impl TranscriptSink for StderrTranscript {
    fn append(&self, text: &str) {
        eprint!("{}", text.dimmed());
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GitConfig::load(path)?,
        None => GitConfig::default(),
    };

    let start = match cli.directory {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };

    let runner = GitRunner::new(config)
        .add_search_path(start)
        .with_notifier(|message| eprintln!("{}", message.red()))
        .with_transcript(Arc::new(StderrTranscript));

    let Some((subcommand, args)) = cli.command.split_first() else {
        bail!("no git subcommand given");
    };
    let mut invocation = Invocation::new(subcommand.as_str()).args(args.iter().cloned());
    if cli.show_output {
        invocation = invocation.show_output(true);
    }

    match runner.run(&invocation) {
        Ok(stdout) => {
            print!("{stdout}");
            Ok(())
        }
        Err(err @ GitError::CommandFailed { .. }) => {
            let code = match &err {
                GitError::CommandFailed { exit_code, .. } => exit_code.unwrap_or(1),
                _ => 1,
            };
            eprintln!("{}", err.to_string().red());
            std::process::exit(code);
        }
        Err(err) => Err(err.into()),
    }
}
