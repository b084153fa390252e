//! Explicit configuration structure, populated once at startup.
//!
//! Override chain is CLI -> environment -> defaults: every field is a
//! `clap` argument with an `env` fallback, so `Config::parse()` is the only
//! place that reads the environment. No other module scatters `env::var`
//! calls.

use std::path::PathBuf;

use clap::Parser;

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

#[derive(Debug, Clone, Parser)]
#[command(name = "hotgrid", about = "Taxon observation hotspot grid service")]
pub struct Config {
    /// Upstream aggregator root, e.g. https://api.artdatabanken.se/species-observations/v1
    #[arg(long, env = "HOTGRID_BASE_URL")]
    pub base_url: String,

    /// Upstream subscription key header value.
    #[arg(long, env = "HOTGRID_SUBSCRIPTION_KEY")]
    pub subscription_key: String,

    /// Upstream bearer authorization header value.
    #[arg(long, env = "HOTGRID_AUTHORIZATION")]
    pub authorization: String,

    /// Coverage exponent in `score = coverage^alpha / (obs_total+1)^beta`.
    #[arg(long, env = "HOTGRID_HOTMAP_ALPHA", default_value_t = 2.0)]
    pub hotmap_alpha: f64,

    /// Observation-penalty exponent in the same formula.
    #[arg(long, env = "HOTGRID_HOTMAP_BETA", default_value_t = 0.5)]
    pub hotmap_beta: f64,

    /// Directory holding the SQLite database file.
    #[arg(long, env = "HOTGRID_DB_DIR", default_value = "data")]
    pub db_dir: PathBuf,

    /// Directory holding taxa input lists.
    #[arg(long, env = "HOTGRID_LISTS_DIR", default_value = "lists")]
    pub lists_dir: PathBuf,

    /// Directory holding geomap-specific taxa lists (overrides `lists_dir`
    /// for pipeline runs that target a named geomap list).
    #[arg(long, env = "HOTGRID_GEOMAP_LISTS_DIR", default_value = "lists/geomap")]
    pub geomap_lists_dir: PathBuf,

    /// Directory for on-disk cache artifacts (export snapshots etc).
    #[arg(long, env = "HOTGRID_CACHE_DIR", default_value_t = default_cache_dir())]
    pub cache_dir: PathBuf,

    /// Directory for log output (rotation is handled externally, e.g. logrotate).
    #[arg(long, env = "HOTGRID_LOGS_DIR", default_value = "logs")]
    pub logs_dir: PathBuf,

    /// HTTP bind port for the service surface.
    #[arg(long, env = "PORT", default_value_t = 3101)]
    pub port: u16,
}

impl Config {
    pub fn database_url(&self) -> String {
        format!("sqlite:{}/hotgrid.db", self.db_dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_url_joins_db_dir() {
        let cfg = Config {
            base_url: "https://example".into(),
            subscription_key: "k".into(),
            authorization: "Bearer x".into(),
            hotmap_alpha: 2.0,
            hotmap_beta: 0.5,
            db_dir: PathBuf::from("/tmp/hotgrid-data"),
            lists_dir: PathBuf::from("lists"),
            geomap_lists_dir: PathBuf::from("lists/geomap"),
            cache_dir: PathBuf::from("cache"),
            logs_dir: PathBuf::from("logs"),
            port: 3101,
        };
        assert_eq!(cfg.database_url(), "sqlite:/tmp/hotgrid-data/hotgrid.db");
    }
}
