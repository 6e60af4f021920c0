//! Fixture documents: a turn plus follow-up blocks.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::turns::{from_yaml, Block, Turn};

/// Wrapper format: an initial turn and blocks appended one per follow-up run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<Turn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub followups: Vec<Block>,
}

/// Parse either a [`FixtureDocument`] or a raw turn document.
pub fn parse_fixture_or_turn(input: &str) -> Result<(Turn, Vec<Block>)> {
    if let Ok(doc) = serde_yaml::from_str::<FixtureDocument>(input) {
        if doc.turn.is_some() || !doc.followups.is_empty() {
            let mut turn = doc.turn.unwrap_or_default();
            turn.normalize();
            return Ok((turn, doc.followups));
        }
    }
    Ok((from_yaml(input)?, Vec::new()))
}

pub fn load_fixture_or_turn(path: impl AsRef<Path>) -> Result<(Turn, Vec<Block>)> {
    let raw = std::fs::read_to_string(path)?;
    parse_fixture_or_turn(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turns::BlockKind;

    #[test]
    fn loads_wrapper_with_followups() {
        let yaml = r#"
version: 1
turn:
  id: t1
  blocks:
    - kind: user
      role: user
      payload:
        text: Hello
followups:
  - kind: user
    role: user
    payload:
      text: And again?
"#;
        let (turn, followups) = parse_fixture_or_turn(yaml).unwrap();
        assert_eq!(turn.id, "t1");
        assert_eq!(turn.blocks[0].text_content(), Some("Hello"));
        assert_eq!(followups.len(), 1);
        assert_eq!(followups[0].kind, BlockKind::User);
    }

    #[test]
    fn falls_back_to_raw_turn() {
        let yaml = r#"
id: raw
blocks:
  - kind: system
    payload:
      text: You are a LLM.
"#;
        let (turn, followups) = parse_fixture_or_turn(yaml).unwrap();
        assert_eq!(turn.id, "raw");
        assert!(followups.is_empty());
        assert!(!turn.blocks[0].id.is_empty());
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.yaml");
        std::fs::write(&path, "turn:\n  blocks: []\nfollowups: []\n").unwrap();
        let (turn, _) = load_fixture_or_turn(&path).unwrap();
        assert!(!turn.id.is_empty());
    }
}
