use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    courseforge::logging::init().context("init logging")?;

    let cli = courseforge::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        courseforge::cli::Command::New(args) => {
            courseforge::commands::create(args).await.context("new")?;
        }
        courseforge::cli::Command::Generate(args) => {
            courseforge::commands::generate(args)
                .await
                .context("generate")?;
        }
        courseforge::cli::Command::Show(args) => {
            courseforge::commands::show(args).await.context("show")?;
        }
    }

    Ok(())
}
