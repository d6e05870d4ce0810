//! Pipeline stages for submarket table extraction.
//!
//! Each submodule implements exactly one transformation step and allocates a
//! new artifact for the next one; nothing is mutated in place.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ source ──▶ extract ──▶ normalize ──▶ select ──▶ map ──▶ clean ──▶ finalize
//! (path/URL) (pdfium/JSON) (grids)   (rectangular) (oracle)  (rules)  (cells)   (CSV)
//! ```
//!
//! 1. [`input`]     : resolve the user-supplied path or URL to a local file
//! 2. [`source`]    : load a [`crate::model::Document`]; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`extract`]   : ordered candidate tables, malformed ones skipped
//! 4. [`normalize`] : rectangular grid, named first column
//! 5. [`select`]    : the submarket statistics table; the only stage that
//!    asks the oracle in rules mode
//! 6. [`map`]       : canonical columns by header synonyms (or oracle CSV)
//! 7. [`clean`]     : deterministic cell rules
//! 8. [`finalize`]  : cut canonical CSV out of surrounding text and parse it

pub mod clean;
pub mod extract;
pub mod finalize;
pub mod input;
pub mod map;
pub mod normalize;
pub mod select;
pub mod source;
