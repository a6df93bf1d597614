mod settings;

use config::{Config, Environment, File};

use crate::utils::error::ConfigurationError;

pub use settings::{
    IngestorSettings, LogSettings, PartialSettings, ProcessorSettings, RabbitmqSettings,
    RetrySettings, Settings,
};

/// Loads the configuration from the optional `config/default` file and the
/// environment, merges it with the defaults and validates the result.
///
/// Environment variables use `_` as the section separator, so
/// `RABBITMQ_QUEUE=game_events` sets `rabbitmq.queue`. A `.env` file is
/// picked up by the binary before this is called.
pub fn load_config() -> Result<Settings, ConfigurationError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("_"));

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = Settings::merge(partial);
    settings.validate()?;
    Ok(settings)
}
