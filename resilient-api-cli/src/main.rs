use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;
mod config;
mod context;
mod credentials;
mod output;
mod prompt;

use cli::{Cli, Commands};
use commands::request::Verb;
use context::Context;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "resilient_api_sdk=debug,resilient_api_cli=debug"
    } else {
        "resilient_api_sdk=warn,resilient_api_cli=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let ctx = match Context::new(&cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&ctx, cli.command).await {
        ctx.output.error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(ctx: &Context, command: Commands) -> Result<()> {
    match command {
        Commands::Get(args) => commands::request::execute(ctx, Verb::Get, args, None).await,
        Commands::Delete(args) => commands::request::execute(ctx, Verb::Delete, args, None).await,
        Commands::Post(args) => commands::request::execute(ctx, Verb::Post, args.request, args.data).await,
        Commands::Put(args) => commands::request::execute(ctx, Verb::Put, args.request, args.data).await,
        Commands::Patch(args) => {
            commands::request::execute(ctx, Verb::Patch, args.request, args.data).await
        }
        Commands::Auth(cmd) => commands::auth::execute(ctx, cmd).await,
        Commands::Config(cmd) => commands::config::execute(ctx, cmd).await,
    }
}
