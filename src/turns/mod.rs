//! The Turn/Block/Run data model.

pub mod block;
pub mod keys;
pub mod turn;
pub mod yaml;

pub use block::{
    Block, BlockKind, ImageRef, Payload, PAYLOAD_KEY_ARGS, PAYLOAD_KEY_ENCRYPTED_CONTENT,
    PAYLOAD_KEY_ERROR, PAYLOAD_KEY_ID, PAYLOAD_KEY_IMAGES, PAYLOAD_KEY_ITEM_ID, PAYLOAD_KEY_NAME,
    PAYLOAD_KEY_RESULT, PAYLOAD_KEY_TEXT, ROLE_ASSISTANT, ROLE_SYSTEM, ROLE_USER,
};
pub use keys::*;
pub use turn::{Run, Turn, TurnBuilder};
pub use yaml::{from_yaml, load_turn_yaml, save_turn_yaml, to_yaml};
