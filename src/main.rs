use clap::Parser;

mod catalog;
mod cli;
mod config;
mod describe;
mod engine;
mod semantic;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use engine::EngineFactory;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let args = cli::Args::parse();
    let config = Config::load_with(&args.base_path)?;

    match args.command {
        cli::Command::Serve {} => {
            let engine = EngineFactory::from_config(&config);
            web::start_daemon(engine, &config.server)
        }

        cli::Command::Recommend { query, count } => {
            let engine = EngineFactory::from_config(&config);
            let response = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(engine.respond(&query, count))?;

            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }

        cli::Command::Status {} => {
            let engine = EngineFactory::from_config(&config);
            println!("{}", serde_json::to_string_pretty(&engine.status())?);
            Ok(())
        }
    }
}
