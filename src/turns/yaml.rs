//! YAML (de)serialization for turns.

use std::path::Path;

use super::turn::Turn;
use crate::error::Result;

/// Serialize a turn to YAML. Typed map keys are written verbatim.
pub fn to_yaml(turn: &Turn) -> Result<String> {
    Ok(serde_yaml::to_string(turn)?)
}

/// Parse a turn from YAML and normalize it.
pub fn from_yaml(input: &str) -> Result<Turn> {
    let mut turn: Turn = serde_yaml::from_str(input)?;
    turn.normalize();
    Ok(turn)
}

pub fn save_turn_yaml(path: impl AsRef<Path>, turn: &Turn) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, to_yaml(turn)?)?;
    Ok(())
}

pub fn load_turn_yaml(path: impl AsRef<Path>) -> Result<Turn> {
    let raw = std::fs::read_to_string(path)?;
    from_yaml(&raw)
}
