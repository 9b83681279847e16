//! Crate root: lightweight module orchestration and public re-exports.
//!
//! Modules:
//! - `matrix`: flat row-major distance matrix + input validation.
//! - `io`: PHYLIP-style matrix files and gzip-aware Newick sinks.
//! - `square`: shrinking working matrix shared by the engines.
//! - `rowmin`: scalar and SIMD row-minimum scans.
//! - `cluster`: append-only merge record + Newick serialiser.
//! - `upgma`, `stitchup`, `ntcj`: the tree-construction engines.
//! - `registry`: name → builder dispatch and the shared option set.
//! - `error`: crate-wide error enum.
//! - `api`: (optional) Python bindings via `pyo3`, behind the `python`
//!   feature.

pub mod cluster;
pub mod error;
pub mod io;
pub mod matrix;
pub mod ntcj;
pub mod registry;
pub mod rowmin;
pub mod square;
pub mod stitchup;
pub mod upgma;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use error::{Result, TreeBuildError};
pub use matrix::FlatMatrix;
pub use registry::{build_tree, BuildOptions, Registry, TreeBuilder};
