pub mod data;
pub mod io;


pub use data::{Config, SettingError, CONFIG_KEYS};
pub use io::ConfigError;
