//! Python binding layer for distance-matrix tree construction.
//!
//! Provides Python functions for building Newick trees from a taxon list
//! and a flat row-major distance matrix.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::registry::{BuildOptions, Registry};

/// Build a phylogenetic tree and return it as a Newick string.
///
/// Args:
///     names: Taxon names; their order defines matrix row/column indices
///     distances: Flat row-major N·N distance matrix
///     algorithm: Registry name, e.g. "UPGMA", "STITCH", "NTCJ"
///         (default: "UPGMA")
///     precision: Digits after the decimal point for branch lengths
///         (default: 6)
///     verbosity: 0 silent, 1 milestones, >1 diagnostic echoes
///         (default: 0)
///
/// Raises:
///     ValueError: On invalid input, an unknown algorithm name, or an
///         engine failure.
#[pyfunction]
#[pyo3(signature = (names, distances, algorithm=None, precision=6, verbosity=0))]
fn build_tree(
    names: Vec<String>,
    distances: Vec<f64>,
    algorithm: Option<String>,
    precision: usize,
    verbosity: u32,
) -> PyResult<String> {
    let algorithm = algorithm.unwrap_or_else(|| "UPGMA".to_string());
    let options = BuildOptions {
        precision,
        verbosity,
        ..BuildOptions::default()
    };
    Registry::with_default_builders()
        .lookup(&algorithm)
        .and_then(|builder| builder.build_tree(&names, &distances, &options))
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

/// List the registered algorithms as (name, description) pairs.
#[pyfunction]
fn available_algorithms() -> Vec<(String, String)> {
    Registry::with_default_builders()
        .available()
        .map(|(name, description)| (name.to_string(), description.to_string()))
        .collect()
}

/// Python module definition
#[pymodule]
fn distance_matrix_trees(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(build_tree, m)?)?;
    m.add_function(wrap_pyfunction!(available_algorithms, m)?)?;
    Ok(())
}
