//! LoanLens binary entry point.

use clap::Parser;
use loanlens::cli::{
    Cli, CliError, Command, cmd_batch, cmd_convert, cmd_explain, cmd_inspect, cmd_predict,
    cmd_recommend, cmd_serve, cmd_template, load_pipeline,
};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(Some(output)) => {
            print!("{output}");
            if !output.ends_with('\n') {
                println!();
            }
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Option<String>, CliError> {
    let options = cli.pipeline_options();
    let output = match &cli.command {
        Command::Serve(args) => {
            let config = cli.server_config(args)?;
            cmd_serve(config).await?;
            return Ok(None);
        }
        Command::Predict(args) => cmd_predict(
            &load_pipeline(&cli.models, options)?,
            &args.input,
            args.model.as_deref(),
            args.json,
        )?,
        Command::Explain(args) => cmd_explain(
            &load_pipeline(&cli.models, options)?,
            &args.input,
            args.model.as_deref(),
            args.json,
        )?,
        Command::Recommend(args) => cmd_recommend(
            &load_pipeline(&cli.models, options)?,
            &args.input,
            args.model.as_deref(),
            args.json,
        )?,
        Command::Batch {
            input,
            output,
            model,
        } => cmd_batch(
            &load_pipeline(&cli.models, options)?,
            input,
            output.as_deref(),
            model.as_deref(),
        )?,
        Command::Template { format, output } => cmd_template(*format, output.as_deref())?,
        Command::Inspect { json } => cmd_inspect(&load_pipeline(&cli.models, options)?, *json)?,
        Command::Convert { input, output, to } => cmd_convert(input, output, *to)?,
    };
    Ok(Some(output))
}
