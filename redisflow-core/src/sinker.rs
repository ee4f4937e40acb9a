/// Owns one worker's connection: setup, per-record writes and teardown.
pub mod manager;

/// The stage contract the engine drives, and the write stage built on the manager.
pub mod stage;
