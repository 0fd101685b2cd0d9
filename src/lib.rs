pub mod cli;
pub mod config;
pub mod embedding;
pub mod folder;
pub mod index;
mod metrics;
pub mod pipeline;
pub mod searcher;
pub mod server;
pub mod utils;

pub use config::Opts;
pub use searcher::{ImageSearch, ImageSearchBuilder, ImageSelection, SearchResult};
