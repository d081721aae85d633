//! Scan byproduct discovery and packaging
//!
//! A background process (outside this crate) writes scan artifacts such as point clouds
//! next to the uploaded photos. Once a session completes, [`ArtifactScanner`] finds them
//! and [`ArtifactPackager`] bundles them into a single zip archive for the relay.

mod packager;
mod scanner;

pub use packager::{ArtifactPackager, PackedArchive};
pub use scanner::ArtifactScanner;
