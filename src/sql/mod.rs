//! SQL Rendering
//!
//! Literal escaping, the rebuilt [`Statement`] and the [`Synthesizer`] that
//! turns row changes into forward or flashback SQL.

pub mod escape;
pub mod statement;
pub mod synth;

pub use escape::{quote_ident, Escape, MySqlEscape};
pub use statement::{Provenance, Statement};
pub use synth::Synthesizer;
