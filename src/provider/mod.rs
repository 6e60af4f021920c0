//! Provider engines and shared HTTP plumbing.

pub mod http;
pub mod openai_responses;

pub use openai_responses::ResponsesEngine;
