//! City block subdivision.
//!
//! Derives blocks, street-facing strips and buildable lots from an editable
//! street graph, and keeps them in sync through a debounced rebuild cache.

pub mod procgen;
