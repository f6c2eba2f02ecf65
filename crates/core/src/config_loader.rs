use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};

/// Environment variable prefix. Nested keys use `__`, e.g. `HEDGE_DETECTOR__OPEN_THRESHOLD`.
pub const ENV_PREFIX: &str = "HEDGE_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging defaults, TOML, environment variables, and JSON.
    ///
    /// Missing files are skipped, so an empty `config/` directory yields `T::default()`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load<T>() -> Result<T>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let config: T = Self::base::<T>()
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .join(Json::file("config/Config.json"))
            .extract()?;

        Ok(config)
    }

    /// Loads configuration with a specific profile layered over `Config.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_with_profile<T>(profile: &str) -> Result<T>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let config: T = Self::base::<T>()
            .merge(Toml::file(format!("config/Config.{profile}.toml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .join(Json::file("config/Config.json"))
            .extract()?;

        Ok(config)
    }

    fn base<T>() -> Figment
    where
        T: Serialize + Default,
    {
        Figment::from(Serialized::defaults(T::default())).merge(Toml::file("config/Config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        threshold: u32,
        nested: Nested,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Nested {
        enabled: bool,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                name: "default".to_string(),
                threshold: 80,
                nested: Nested { enabled: false },
            }
        }
    }

    #[test]
    fn test_load_defaults_without_files() {
        figment::Jail::expect_with(|_jail| {
            let config: Sample = ConfigLoader::load().expect("load");
            assert_eq!(config, Sample::default());
            Ok(())
        });
    }

    #[test]
    fn test_toml_then_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/Config.toml",
                r#"
                    name = "from-toml"
                    threshold = 90
                "#,
            )?;
            jail.set_env("HEDGE_THRESHOLD", "95");
            jail.set_env("HEDGE_NESTED__ENABLED", "true");

            let config: Sample = ConfigLoader::load().expect("load");
            assert_eq!(config.name, "from-toml");
            assert_eq!(config.threshold, 95);
            assert!(config.nested.enabled);
            Ok(())
        });
    }

    #[test]
    fn test_profile_overrides_base() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file("config/Config.toml", "threshold = 90")?;
            jail.create_file("config/Config.paper.toml", "threshold = 40")?;

            let config: Sample = ConfigLoader::load_with_profile("paper").expect("load");
            assert_eq!(config.threshold, 40);
            assert_eq!(config.name, "default");
            Ok(())
        });
    }
}
