//! Pipeline stages for turning one PDF into another.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ trim ──▶ ladder ──────────────────────────▶ workspace
//! (magic)   (boxes)   │  strategy 1 ─▶ invoke / builtin    (promote)
//!                     │  strategy 2 ─▶ …
//!                     └─ classify each failure
//! ```
//!
//! 1. [`input`]: existence, permissions and `%PDF` magic, before any tool runs
//!    ([`merge`] optionally concatenates several inputs first)
//! 2. [`trim`]: optional bleed removal, rewriting the page boxes
//! 3. [`strategy`]: ladders as data, plus the built-in catalogue
//! 4. [`ladder`]: try strategies in order inside a [`workspace`]
//! 5. [`invoke`]: run one external tool with timeout and cancellation
//! 6. [`classify`]: map exit codes and tool output to a [`classify::FailureKind`]
//! 7. [`builtin`]: in-process steps (copy, image recompression, page assembly)

pub mod builtin;
pub mod classify;
pub mod input;
pub mod invoke;
pub mod ladder;
pub mod merge;
pub mod strategy;
pub mod trim;
pub mod workspace;
