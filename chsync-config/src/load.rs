use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory, relative to the working directory, holding the configuration files.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried, in order, for every configuration file stem.
const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";
const ENV_NESTING_SEPARATOR: &str = "__";
const ENV_LIST_SEPARATOR: &str = ",";

/// Implemented by top level configuration structs that can be loaded with [`load_config`].
pub trait Config {
    /// Keys whose environment variable values are split on `,` into lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors raised while assembling a configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("no base configuration found in `{directory}`, tried: {attempted}")]
    MissingBaseFile { directory: PathBuf, attempted: String },

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("failed to read configuration sources: {0}")]
    Sources(#[source] config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] config::ConfigError),
}

/// Loads `T` from `./configuration` and `APP_` environment variables.
///
/// The base file is mandatory. The environment file (`dev.yaml`, `prod.yaml`, ...) is
/// layered on top when present. Nested keys in environment variables use `__`, for
/// example `APP_SYNC__BATCH_SIZE=500`.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let current_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from(&current_dir.join(CONFIGURATION_DIR), environment)
}

/// Loads `T` from an explicit configuration directory and environment.
pub fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let base_file = match find_file(directory, "base") {
        Some(path) => path,
        None => {
            let attempted = EXTENSIONS
                .iter()
                .map(|extension| format!("`base.{extension}`"))
                .collect::<Vec<_>>()
                .join(", ");

            return Err(LoadConfigError::MissingBaseFile {
                directory: directory.to_path_buf(),
                attempted,
            });
        }
    };

    let mut builder = config::Config::builder().add_source(config::File::from(base_file));

    if let Some(environment_file) = find_file(directory, environment.as_str()) {
        builder = builder.add_source(config::File::from(environment_file));
    }

    let mut env_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_NESTING_SEPARATOR);

    if !T::LIST_PARSE_KEYS.is_empty() {
        env_source = env_source
            .try_parsing(true)
            .list_separator(ENV_LIST_SEPARATOR);

        for key in T::LIST_PARSE_KEYS {
            env_source = env_source.with_list_parse_key(key);
        }
    }

    builder
        .add_source(env_source)
        .build()
        .map_err(LoadConfigError::Sources)?
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

fn find_file(directory: &Path, stem: &str) -> Option<PathBuf> {
    EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .find(|path| path.is_file())
}
