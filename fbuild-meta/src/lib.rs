//! fbuild-meta: Formula model for fbuild
//!
//! This crate provides:
//! - Parsing formula documents (YAML recipes)
//! - The bottle table and platform tag matching
//! - File checksum helpers shared by the builder and the linter

pub mod bottle;
pub mod checksum;
pub mod error;
pub mod formula;
pub mod platform;

pub use bottle::{Bottle, BottleSpec};
pub use checksum::{b3sum, compute_checksums, sha256sum, Checksums};
pub use error::{Error, Result};
pub use formula::{formula_paths, BuildSpec, Completion, Formula, HeadSpec, Shell, TestSpec};
pub use platform::{Arch, Os, Platform};
