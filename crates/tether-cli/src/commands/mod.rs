pub mod check;
pub mod query;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tether_pool::{DataSource, DataSourceBuilder, TetherConfig};

/// Where to connect. Flags override values read from `--config`.
#[derive(Args, Debug, Default)]
pub struct SourceArgs {
    /// Path to a tether.toml file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Driver identifier, e.g. sqlite
    #[arg(long)]
    pub driver: Option<String>,
    /// Connection URL, e.g. sqlite:app.db or sqlite::memory:
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub password: Option<String>,
    /// Driver properties as "k1=v1;k2=v2"
    #[arg(long)]
    pub properties: Option<String>,
    /// Log every connection lifecycle event under the tether::trace target
    #[arg(long)]
    pub trace: bool,
}

pub fn data_source(args: &SourceArgs) -> Result<DataSource> {
    let mut builder = match &args.config {
        Some(path) => {
            let config = TetherConfig::from_file(path)?;
            DataSourceBuilder::from_config(&config.datasource)
        }
        None => DataSource::builder(),
    };

    if let Some(driver) = &args.driver {
        builder = builder.driver(driver.as_str());
    }
    if let Some(url) = &args.url {
        builder = builder.url(url.as_str());
    }
    if let Some(username) = &args.username {
        builder = builder.username(username.as_str());
    }
    if let Some(password) = &args.password {
        builder = builder.password(password.as_str());
    }
    if let Some(properties) = &args.properties {
        builder = builder.properties(properties.as_str());
    }
    if args.trace {
        builder = builder.trace(true);
    }

    builder.build().context("invalid data source settings")
}
