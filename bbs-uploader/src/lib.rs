pub mod app;
pub mod cli;
pub mod lambda;
pub mod load_config;
pub mod logging;
pub mod portal;
pub mod rotate;
pub mod s3;

pub use cli::{run, Cli, Commands};
