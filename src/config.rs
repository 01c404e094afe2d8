use std::path::PathBuf;

use clap::Args;

use crate::prelude::*;

pub const DEFAULT_WARMUP_SECONDS: u64 = 20;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// The user identity the command runs under
    #[arg(long, short = 'u')]
    pub user: String,

    /// How long the command is observed, in seconds
    #[arg(long, short = 'l')]
    pub lifetime: u64,

    /// How long the tracer gets to stabilize before the command starts, in seconds
    #[arg(long, default_value_t = DEFAULT_WARMUP_SECONDS)]
    pub warmup: u64,

    /// Path to the tracer executable
    #[arg(long, env = "BEHAVIOR_TRACER_PATH", default_value = "rstracer")]
    pub tracer_path: String,

    /// The command to analyse
    pub command: Vec<String>,
}

#[cfg(test)]
impl RunArgs {
    /// Constructs a new `RunArgs` with default values for testing purposes
    pub fn test() -> Self {
        Self {
            user: "nobody".into(),
            lifetime: 10,
            warmup: DEFAULT_WARMUP_SECONDS,
            tracer_path: "rstracer".into(),
            command: vec!["sleep".into(), "5".into()],
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub command: Vec<String>,
    pub user: String,
    pub lifetime: u64,
    pub warmup: u64,
    pub tracer_path: PathBuf,
    pub tracer_log: PathBuf,
    pub command_log: PathBuf,
}

impl TryFrom<RunArgs> for Config {
    type Error = Error;

    fn try_from(args: RunArgs) -> Result<Self> {
        if args.command.is_empty() {
            bail!("No command to analyse was provided");
        }
        if args.lifetime == 0 {
            bail!("The lifetime must be at least one second");
        }

        // A single argument may be a full quoted command line
        let command = if args.command.len() == 1 {
            shell_words::split(&args.command[0])
                .with_context(|| format!("Failed to parse the command: {}", args.command[0]))?
        } else {
            args.command
        };
        if command.is_empty() {
            bail!("No command to analyse was provided");
        }

        Ok(Self {
            command,
            user: args.user,
            lifetime: args.lifetime,
            warmup: args.warmup,
            tracer_path: PathBuf::from(args.tracer_path),
            tracer_log: PathBuf::from("rstracer.log"),
            command_log: PathBuf::from("command.log"),
        })
    }
}
