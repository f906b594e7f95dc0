use std::path::Path;

use anyhow::{Context, Result};

use crate::state::ControllerState;

/// Persisted form of the controller mirror
pub type Snapshot = ControllerState;

fn is_json(path: &Path) -> bool {
    path.extension().map_or(false, |extension| extension.eq_ignore_ascii_case("json"))
}

/// Remove null entries, and arrays holding any, from every table
fn strip_unknown(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(table) => {
            table.retain(|_, entry| match entry {
                serde_json::Value::Null => false,
                serde_json::Value::Array(items) => !items.iter().any(serde_json::Value::is_null),
                _ => true,
            });
            table.values_mut().for_each(strip_unknown);
        },
        serde_json::Value::Array(items) => items.iter_mut().for_each(strip_unknown),
        _ => (),
    }
}

impl ControllerState {
    /// Read a snapshot, JSON for `.json` files and TOML otherwise
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open snapshot file {}", path.display()))?;
        if is_json(path) {
            serde_json::from_str(&content).context("Cannot parse snapshot file")
        } else {
            toml::from_str(&content).context("Cannot parse snapshot file")
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            // TOML has no null: unknown values are left out
            let mut value = serde_json::to_value(self)?;
            strip_unknown(&mut value);
            toml::to_string_pretty(&value)?
        };
        std::fs::write(path, content).with_context(|| format!("Cannot write snapshot file {}", path.display()))?;
        log::info!("Snapshot saved to {}", path.display());
        Ok(())
    }
}
