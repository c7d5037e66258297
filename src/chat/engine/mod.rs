//! Turn handling: the glue between sessions, retrieval and providers.

pub mod turn;

pub use turn::{ChatEngine, ContextPolicy, TurnEvent, TurnOutcome};
