use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub struct Config {
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    /// Raw `CSRF_TOKEN`. Left empty when unset; the middleware warns about it.
    pub csrf_key: String,
    pub csrf_trusted_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("PARLOR_DB_PATH").unwrap_or_else(|| "parlor.db".into());
        let host = lookup("PARLOR_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = lookup("PARLOR_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("PARLOR_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .context("PARLOR_HOST/PARLOR_PORT do not form a socket address")?;

        let csrf_key = lookup("CSRF_TOKEN").unwrap_or_default();
        let csrf_trusted_origins = lookup("PARLOR_CSRF_TRUSTED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            db_path: PathBuf::from(db_path),
            addr,
            csrf_key,
            csrf_trusted_origins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("parlor.db"));
        assert_eq!(cfg.addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(cfg.csrf_key, "");
        assert!(cfg.csrf_trusted_origins.is_empty());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("PARLOR_DB_PATH", "/var/lib/parlor/chat.db"),
            ("PARLOR_HOST", "127.0.0.1"),
            ("PARLOR_PORT", "8443"),
            ("CSRF_TOKEN", "s3cret"),
            ("PARLOR_CSRF_TRUSTED_ORIGINS", "app.example.com, admin.example.com:8443,"),
        ])
        .unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/parlor/chat.db"));
        assert_eq!(cfg.addr, "127.0.0.1:8443".parse().unwrap());
        assert_eq!(cfg.csrf_key, "s3cret");
        assert_eq!(
            cfg.csrf_trusted_origins,
            vec!["app.example.com", "admin.example.com:8443"]
        );
    }

    #[test]
    fn bad_port_is_an_error() {
        assert!(config(&[("PARLOR_PORT", "http")]).is_err());
    }
}
