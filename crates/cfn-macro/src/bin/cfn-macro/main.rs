mod cli;

use anyhow::Context;
use cfn_macro::config::Config;
use cfn_macro::engine::{Engine, Request, Response};
use cfn_macro::value::Value;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("CFN_MACRO_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Expand(expand_cli) => expand(expand_cli),
    };

    match command_result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            for error in e.chain() {
                eprintln!("{error}")
            }
            std::process::exit(1);
        }
    }
}

/// Returns whether the macro invocation succeeded
pub fn expand(cli: cli::ExpandCommand) -> anyhow::Result<bool> {
    let config = match &cli.config {
        Some(path) => Config::load_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    let request = load(&cli)?;
    tracing::info!(request_id = %request.request_id, "expanding");

    let response = Engine::new(config).process(request);
    tracing::info!(request_id = %response.request_id, status = ?response.status, "done");

    output(&cli.output, &response)?;
    Ok(response.is_success())
}

fn load(cli: &cli::ExpandCommand) -> anyhow::Result<Request> {
    let input = match &cli.input_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => std::io::read_to_string(std::io::stdin())?,
    };

    // yaml is a superset of json, one parser covers both
    if cli.fragment {
        let fragment: Value = serde_yaml::from_str(&input).context("Input is not a template")?;
        return Ok(Request::new("local", fragment));
    }

    Ok(serde_yaml::from_str(&input).context("Input is not a macro request")?)
}

fn output(output: &cli::OutputArgs, response: &Response) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), response)?,
        cli::OutputFormat::Json => {
            serde_json::to_writer_pretty(std::io::stdout(), response)?;
            println!();
        }
    };

    Ok(())
}
