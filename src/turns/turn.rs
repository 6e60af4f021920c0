//! Turns and runs.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::block::{new_block_id, Block, BlockKind};
use super::keys::{TurnData, TurnMetadata};

/// An ordered sequence of blocks plus typed data and metadata maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run_id: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "TurnData::is_empty")]
    pub data: TurnData,
    #[serde(default, skip_serializing_if = "TurnMetadata::is_empty")]
    pub metadata: TurnMetadata,
}

impl Turn {
    pub fn new() -> Self {
        Self {
            id: new_block_id(),
            ..Default::default()
        }
    }

    pub fn builder() -> TurnBuilder {
        TurnBuilder::default()
    }

    /// Append a block, assigning the next order.
    pub fn append_block(&mut self, mut block: Block) {
        block.normalize();
        block.order = self.blocks.len();
        self.blocks.push(block);
    }

    pub fn append_blocks(&mut self, blocks: impl IntoIterator<Item = Block>) {
        for block in blocks {
            self.append_block(block);
        }
    }

    /// Insert a block at `index` (clamped to the end) and renumber.
    pub fn insert_block(&mut self, index: usize, mut block: Block) {
        block.normalize();
        let index = index.min(self.blocks.len());
        self.blocks.insert(index, block);
        self.renumber();
    }

    pub fn prepend_block(&mut self, block: Block) {
        self.insert_block(0, block);
    }

    /// Reassign dense orders after a structural change.
    pub fn renumber(&mut self) {
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.order = i;
        }
    }

    pub fn blocks_of_kind(&self, kind: BlockKind) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(move |b| b.kind == kind)
    }

    pub fn find_last_block_by_kind(&self, kind: BlockKind) -> Option<&Block> {
        self.blocks.iter().rev().find(|b| b.kind == kind)
    }

    /// Ids of all blocks, used to detect blocks added by inner handlers.
    pub fn block_ids(&self) -> HashSet<String> {
        self.blocks.iter().map(|b| b.id.clone()).collect()
    }

    /// Blocks whose ids are not in `before`.
    pub fn blocks_added_since<'a>(
        &'a self,
        before: &'a HashSet<String>,
    ) -> impl Iterator<Item = &'a Block> + 'a {
        self.blocks.iter().filter(move |b| !before.contains(&b.id))
    }

    /// Per-kind block counts, keyed by kind string.
    pub fn count_by_kind(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for block in &self.blocks {
            *counts.entry(block.kind.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Fill missing ids and roles and restore dense ordering.
    pub fn normalize(&mut self) {
        if self.id.is_empty() {
            self.id = new_block_id();
        }
        for block in &mut self.blocks {
            block.normalize();
        }
        self.renumber();
    }
}

/// Seeds a turn with optional system and user blocks.
#[derive(Debug, Default)]
pub struct TurnBuilder {
    id: Option<String>,
    run_id: Option<String>,
    system: Option<String>,
    blocks: Vec<Block>,
}

impl TurnBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.system = Some(text.into());
        self
    }

    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.blocks.push(Block::user_text(text));
        self
    }

    pub fn block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn build(self) -> Turn {
        let mut turn = Turn::new();
        if let Some(id) = self.id {
            turn.id = id;
        }
        if let Some(run_id) = self.run_id {
            turn.run_id = run_id;
        }
        if let Some(system) = self.system {
            turn.append_block(Block::system_text(system));
        }
        turn.append_blocks(self.blocks);
        turn
    }
}

/// A named multi-turn session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Run {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_block_id(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a turn, stamping it with this run's id when unset.
    pub fn append_turn(&mut self, mut turn: Turn) {
        if turn.run_id.is_empty() {
            turn.run_id = self.id.clone();
        }
        self.turns.push(turn);
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }
}
