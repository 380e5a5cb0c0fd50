//! Inbound command handling: classification and topic resolution.
//!
//! Both steps are pure string work; no LLM is involved.

pub mod parser;
pub mod resolver;

pub use parser::{Command, parse};
pub use resolver::{Resolution, resolve};
