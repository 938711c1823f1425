use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Message-driven build worker for agents, transports and modules
#[derive(Parser, Debug)]
#[command(
    name = "forgeline",
    about = "Message-driven build worker for agents, transports and modules",
    version,
    author,
    long_about = "forgeline loads build descriptors for one source language, then reads \
                  build requests as JSON lines on stdin. Each request runs the matching \
                  external toolchain, uploads or inlines the artifact, and produces exactly \
                  one JSON-lines notification on stdout. Settings come from FORGELINE_* \
                  environment variables."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - only log errors"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Load the catalog and process build requests from stdin",
        long_about = "Loads agent and module descriptors, optionally seeds transports from a \
                      JSON file, then processes build requests until stdin closes.\n\n\
                      Examples:\n  \
                      forgeline serve\n  \
                      forgeline serve --transports transports.json\n  \
                      FORGELINE_LANGUAGE=go forgeline serve"
    )]
    Serve(ServeArgs),

    #[command(
        about = "Load the catalog and print a summary",
        long_about = "Scans the agents and modules directories for the configured language and \
                      prints how many descriptors were imported.\n\n\
                      Examples:\n  \
                      forgeline catalog\n  \
                      forgeline catalog --json"
    )]
    Catalog(CatalogArgs),
}

#[derive(Parser, Debug, Clone, Default)]
pub struct ServeArgs {
    #[arg(
        short = 't',
        long,
        value_name = "FILE",
        help = "JSON file with transports to register before serving"
    )]
    pub transports: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone, Default)]
pub struct CatalogArgs {
    #[arg(long, help = "Print the summary as JSON")]
    pub json: bool,
}
