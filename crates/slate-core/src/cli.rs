use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "slate",
    version,
    about = "Slate: a small task list with custom fields and undo",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "slaterc", global = true)]
    pub slaterc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    /// Skip confirmation prompts.
    #[arg(short = 'y', long = "yes", global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a task.
    Add {
        title: String,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        status: Option<String>,
        /// Custom field value, NAME=VALUE. Repeatable.
        #[arg(long = "set", value_name = "NAME=VALUE")]
        assignments: Vec<String>,
    },
    /// Change an existing task.
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long = "set", value_name = "NAME=VALUE")]
        assignments: Vec<String>,
    },
    /// Delete one task, or several as a single undoable step.
    Delete {
        #[arg(required = true, num_args = 1..)]
        ids: Vec<i64>,
    },
    /// Show a filtered, sorted page of tasks.
    List(ListArgs),
    Undo,
    Redo,
    /// Show the undo cursor.
    History,
    /// Manage custom field definitions.
    #[command(subcommand)]
    Field(FieldCommand),
    /// Print all tasks as JSON.
    Export,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Case-insensitive title substring.
    #[arg(long)]
    pub title: Option<String>,
    /// Priority to show, or "all".
    #[arg(long)]
    pub priority: Option<String>,
    /// Status to show, or "all".
    #[arg(long)]
    pub status: Option<String>,
    /// id, title, priority, status or a custom field name.
    #[arg(long)]
    pub sort: Option<String>,
    #[arg(long, requires = "sort")]
    pub desc: bool,
    #[arg(long, default_value_t = 1)]
    pub page: usize,
    #[arg(long = "page-size")]
    pub page_size: Option<usize>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum FieldCommand {
    List,
    /// Declare a field. TYPE is text, number or checkbox.
    Add {
        name: String,
        #[arg(value_name = "TYPE")]
        kind: String,
    },
    /// Remove a field by id or name. Existing task values are kept.
    Remove { field: String },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pull positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest
                .split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()));

            if let Some((k, v)) = parsed {
                if k == "rc." {
                    return Err(anyhow!("empty rc override key in: {s}"));
                }
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}
