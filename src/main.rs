use std::{net::SocketAddr, path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};

use foodgram_sdk::{actions, error::Error, routes, Config, State};

#[derive(Parser)]
#[command(name = "foodgram")]
#[command(about = "Recipe sharing backend")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API (default)
    Serve,

    /// Load `name,unit` rows from a csv file into the ingredient catalog
    ImportIngredients {
        /// Path to the csv file
        path: PathBuf,
    },
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config = Config::load()?;
    let state = State::new(&config).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::ImportIngredients { path } => {
            let count = actions::import_ingredients(&path, &state.pool, &mut state.cache()).await?;
            log::info!("Imported {count} new ingredients");
        }
        Commands::Serve => {
            if let Some(superuser) = &config.superuser {
                actions::ensure_superuser(superuser, &state.pool).await?;
            }

            let address = SocketAddr::from(([0, 0, 0, 0], config.port));
            log::info!("Listening on {address}");
            warp::serve(routes(state)).run(address).await;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
