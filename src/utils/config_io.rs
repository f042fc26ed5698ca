use anyhow::Context;
use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Loads a config value from a single file (format picked by extension).
pub fn load_cfg<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(anyhow::anyhow!("file {} does not exist", path.display()));
    }

    Config::builder()
        .add_source(File::from(path))
        .build()
        .with_context(|| format!("failed to read config from {}", path.display()))?
        .try_deserialize()
        .with_context(|| format!("failed to deserialize config from {}", path.display()))
}

/// Layers several files (missing ones are skipped) and then the environment.
///
/// Environment keys use `__` as the nesting separator, e.g.
/// `STACKRT__TIMER_RESYNC_MS=500` with `env_prefix = Some("STACKRT")`.
pub fn load_cfg_merge<T, P>(
    paths: impl IntoIterator<Item = P>,
    env_prefix: Option<&str>,
) -> anyhow::Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let mut builder = Config::builder();

    for p in paths {
        let path = p.as_ref();
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            tracing::debug!("config loading: {} does not exist, skipped", path.display());
        }
    }

    let env = match env_prefix {
        Some(prefix) => Environment::with_prefix(prefix).separator("__"),
        None => Environment::default().separator("__"),
    };

    builder
        .add_source(env)
        .build()
        .context("failed to build configuration from provided sources")?
        .try_deserialize()
        .context("failed to deserialize merged configuration")
}
