use clap::Parser;
use tracing::error;

use orez::cli::{Cli, Commands};
use orez::config::Config;
use orez::{logger, supervisor::Supervisor};

fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => cli.apply(config),
        Err(err) => {
            eprintln!("{}: {}", cli.config.display(), err);
            std::process::exit(1);
        }
    };

    logger::init(&config.log_level, config.log_format);

    if let Some(Commands::Configcheck) = cli.command {
        println!("{}: ok", cli.config.display());
        return;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("runtime: {}", err);
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(async move {
        match Supervisor::start(config).await {
            Ok(supervisor) => supervisor.run().await,
            Err(err) => {
                error!("startup failed: {}", err);
                1
            }
        }
    });

    std::process::exit(code);
}
