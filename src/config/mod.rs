mod settings;


use config::{Config, ConfigError, Environment, File};
use std::path::Path;

pub use settings::{
    BrokerSettings, ConsumerSettings, LogSettings, NameServerAddr, ProducerSettings, Settings,
    TracerSettings,
};

/// Environment variable prefix, e.g. `DELAYCANCEL_BROKER__NAME_SERVER`.
pub const ENV_PREFIX: &str = "DELAYCANCEL";

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Loads the configuration from the default file and environment variables.
///
/// `config/default.toml` is optional; missing values keep their defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(environment());

    builder.build()?.try_deserialize()
}

/// Loads the configuration from an explicit file (which must exist), then
/// environment variables.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::from(path.as_ref()).required(true))
        .add_source(environment());

    builder.build()?.try_deserialize()
}
