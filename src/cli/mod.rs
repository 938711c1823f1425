pub mod commands;
pub mod handlers;

pub use commands::{CatalogArgs, CliArgs, Commands, ServeArgs};
pub use handlers::{handle_catalog, handle_serve};
