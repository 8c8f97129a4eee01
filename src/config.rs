use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::{error::AppError, forest::ForestParams};

const DEFAULT_CONFIG_FILE: &str = "phishguard";
const ENV_PREFIX: &str = "PHISHGUARD";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub whois: WhoisConfig,
    /// Full `public_suffix_list.dat`; the bundled snapshot is used when unset.
    #[serde(default)]
    pub psl_path: Option<PathBuf>,
    #[serde(default)]
    pub whitelist: WhitelistConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub trees: usize,
    #[serde(default)]
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl ModelConfig {
    pub fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.trees,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhoisConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub cache_ttl_seconds: u64,
    pub cache_capacity: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhitelistConfig {
    /// Registrable domains trusted in addition to the built-in set.
    #[serde(default)]
    pub extra: Vec<String>,
}

impl Config {
    /// Defaults, then `phishguard.{toml,yaml,json}` if present, then `PHISHGUARD_*`.
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(None)
    }

    /// Same layering with an explicit file, which must exist.
    pub fn load_from(path: Option<&Path>) -> Result<Self, AppError> {
        let file = match path {
            Some(path) => ::config::File::from(path).required(true),
            None => ::config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = ::config::Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 5000)?
            .set_default("model.path", "phishing_model.bin")?
            .set_default("model.trees", 100)?
            .set_default("model.min_samples_split", 2)?
            .set_default("model.seed", 42)?
            .set_default("whois.enabled", true)?
            .set_default("whois.timeout_ms", 5000)?
            .set_default("whois.cache_ttl_seconds", 86_400)?
            .set_default("whois.cache_capacity", 10_000)?
            .add_source(file)
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
psl_path = "/usr/share/publicsuffix/public_suffix_list.dat"

[server]
port = 8080

[whois]
enabled = false

[whitelist]
extra = ["example.org"]
"#
        )
        .unwrap();

        let config = Config::load_from(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(!config.whois.enabled);
        assert_eq!(config.whois.timeout_ms, 5000);
        assert_eq!(config.model.trees, 100);
        assert_eq!(config.model.max_depth, None);
        assert_eq!(config.whitelist.extra, vec!["example.org".to_string()]);
        assert_eq!(
            config.psl_path.as_deref(),
            Some(Path::new("/usr/share/publicsuffix/public_suffix_list.dat"))
        );
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::load_from(Some(Path::new("/nonexistent/phishguard.toml")));
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
