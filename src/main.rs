use forgeline::cli::commands::{CliArgs, Commands};
use forgeline::cli::handlers::{handle_catalog, handle_serve};
use forgeline::util::logging;
use forgeline::VERSION;

use clap::Parser;
use tracing::{debug, error};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("forgeline v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let result = match &args.command {
        Commands::Serve(serve_args) => handle_serve(serve_args).await,
        Commands::Catalog(catalog_args) => handle_catalog(catalog_args).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging_from_args(args: &CliArgs) {
    if let Some(level) = &args.log_level {
        logging::with_level(level);
    } else if args.verbose {
        logging::with_level("debug");
    } else if args.quiet {
        logging::with_level("error");
    } else {
        logging::init_from_env();
    }
}
