//! cfn-macro cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; cfn-macro ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Expand a macro request
    ///
    /// Reads the request from stdin unless --input-file is given
    #[command(alias = "process")]
    Expand(ExpandCommand),
}

#[derive(Parser, Debug)]
pub struct ExpandCommand {
    /// Read the request from a file (yaml or json)
    #[clap(short = 'f', long = "input-file")]
    pub input_file: Option<PathBuf>,

    /// The input is a bare template, not a macro request
    ///
    /// It gets wrapped into a request with id `local`.
    #[clap(long = "fragment")]
    pub fragment: bool,

    /// Engine settings (yaml or json)
    #[clap(long = "config")]
    pub config: Option<PathBuf>,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}
