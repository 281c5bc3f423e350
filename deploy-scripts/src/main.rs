use clap::Parser;
use deploy_scripts::cli::Cli;
use tracing::Level;

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    // Credentials may live in a `.env` file next to the invocation
    dotenv::dotenv().ok();

    let Cli {
        args,
        verbose,
        command,
    } = Cli::parse();

    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().pretty().with_max_level(level).init();

    // Dropping the command future on interrupt never commits an unconfirmed transaction
    tokio::select! {
        res = command.run(args) => res?,
        _ = tokio::signal::ctrl_c() => eyre::bail!("interrupted"),
    }

    Ok(())
}
