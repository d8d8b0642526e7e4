//! Lens module
//!
//! Lenses combine store lookups with answer composition, so the CLI and
//! library callers share one code path.
//!
//! Each lens module exports:
//! - A **Lens struct** (`WhoisLens`), the entry point for all operations
//! - **Args structs**, the input of lens methods
//! - **Output types**, serializable answers with a text rendering
//!
//! ```rust,ignore
//! use whoislite::lens::whois::{WhoisLens, WhoisQueryArgs, WhoisQueryType};
//! ```

pub mod utils;
pub mod whois;
