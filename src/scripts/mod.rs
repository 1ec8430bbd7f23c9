//! Registered store scripts and their cached hashes.

mod registry;

pub use registry::{CommandId, ResolvedScript, ScriptRegistry};
