//! Runtime configuration for the `ward` binary.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use ward_store_sqlite::DefaultPermissions;

/// Deserialised from `ward.toml` and `WARD_*` environment variables.
#[derive(Deserialize, Clone, Debug)]
pub struct WardConfig {
  #[serde(default = "default_store_path")]
  pub store_path:          PathBuf,
  /// Grants applied to objects created without an explicit permission map,
  /// e.g. `read = ["analysts"]`.
  #[serde(default)]
  pub default_permissions: DefaultPermissions,
}

fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/ward/ward.db") }

impl WardConfig {
  /// Layer the optional config file under the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("WARD"))
      .build()
      .context("failed to read config file")?;

    let mut cfg: WardConfig = settings
      .try_deserialize()
      .context("failed to deserialise WardConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
