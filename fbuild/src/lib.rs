//! fbuild: build, install and smoke-test formula packages
//!
//! A formula is staged from its release archive or development branch,
//! compiled with the declared toolchain, installed under a prefix and then
//! checked against the installed binary.

pub mod builder;
pub mod error;
pub mod inspect;
pub mod install;
pub mod logger;
pub mod stage;
pub mod toolchain;
pub mod types;
pub mod verify;

pub use builder::{BuildReport, Builder};
pub use error::{BuildError, Result};
pub use install::{InstallLayout, InstalledSet};
pub use toolchain::Toolchain;
pub use types::{Phase, Provenance};
