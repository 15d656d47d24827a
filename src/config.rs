use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_STORAGE_DIR: &str = "./uploads";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Flat-namespace file storage over HTTP")]
pub struct Args {
    /// Host to bind to (overrides FILE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_STORE_PORT, then PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded files are stored (overrides FILE_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Largest accepted upload request in bytes (overrides FILE_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::resolve(Args::parse(), |key| env::var(key).ok())
    }

    /// Merge CLI args over values looked up through `lookup`, over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_host = lookup("FILE_STORE_HOST").unwrap_or_else(|| DEFAULT_HOST.into());
        let env_port = match parse_var(&lookup, "FILE_STORE_PORT")? {
            Some(port) => port,
            None => parse_var(&lookup, "PORT")?.unwrap_or(DEFAULT_PORT),
        };
        let env_storage =
            lookup("FILE_STORE_STORAGE_DIR").unwrap_or_else(|| DEFAULT_STORAGE_DIR.into());
        let env_max_upload = parse_var(&lookup, "FILE_STORE_MAX_UPLOAD_BYTES")?
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", key, value))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_args_or_env() {
        let cfg = AppConfig::resolve(Args::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.storage_dir, "./uploads");
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn env_overrides_defaults_and_args_override_env() {
        let env = env_of(&[
            ("FILE_STORE_HOST", "127.0.0.1"),
            ("FILE_STORE_PORT", "8080"),
            ("PORT", "9090"),
            ("FILE_STORE_STORAGE_DIR", "/srv/files"),
        ]);
        let args = Args {
            port: Some(4000),
            ..Args::default()
        };

        let cfg = AppConfig::resolve(args, env).unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.storage_dir, "/srv/files");
    }

    #[test]
    fn plain_port_variable_is_a_fallback() {
        let cfg = AppConfig::resolve(Args::default(), env_of(&[("PORT", "5050")])).unwrap();
        assert_eq!(cfg.port, 5050);
    }

    #[test]
    fn malformed_numbers_are_errors() {
        let err = AppConfig::resolve(Args::default(), env_of(&[("FILE_STORE_PORT", "http")]))
            .unwrap_err();
        assert!(err.to_string().contains("FILE_STORE_PORT"));

        assert!(
            AppConfig::resolve(
                Args::default(),
                env_of(&[("FILE_STORE_MAX_UPLOAD_BYTES", "-1")])
            )
            .is_err()
        );
    }
}
