//! CitySense: a browser chat assistant over hosted LLMs with vector-store memory.

// Strict hygiene: warnings are errors, unsafe is banned, everything public is documented.
#![deny(warnings)]
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(dead_code)]
#![deny(non_camel_case_types)]
#![deny(unused_imports)]
#![deny(unused_variables)]
#![deny(unused_must_use)]
#![deny(non_snake_case)]
#![deny(non_upper_case_globals)]
#![deny(nonstandard_style)]
#![forbid(unsafe_op_in_unsafe_fn)]

// Clippy discipline
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::missing_const_for_fn)]
#![deny(clippy::unwrap_in_result)]
#![deny(clippy::module_inception)]
#![deny(clippy::redundant_clone)]
#![deny(clippy::shadow_unrelated)]
#![deny(clippy::too_many_arguments)]
#![deny(clippy::cognitive_complexity)]
#![allow(clippy::module_name_repetitions)]

#![deny(overflowing_literals)]

/// Chat domain: settings, providers, retrieval, sessions, export and turns.
pub mod chat;
/// HTTP server and API routes.
#[allow(
    clippy::missing_errors_doc,
    clippy::missing_const_for_fn,
    clippy::unused_async
)]
pub mod server;
/// Entry helpers to start the CitySense server.
pub mod start_citysense;
