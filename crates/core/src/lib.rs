pub mod config;
pub mod error;

pub use config::{Config, TaskSettings, load_dotenv};
pub use error::ConfigError;
