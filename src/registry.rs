//! String-keyed registry mapping algorithm names to tree builders.
//!
//! Every builder accepts the same inputs (taxon names, an N·N row-major
//! distance slice, and a `BuildOptions`) and produces Newick, either as
//! a `String` or straight into a sink or file. Engines differ only in
//! how they choose and weight joins.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, TreeBuildError};
use crate::io::{write_newick_file, MAX_PRECISION};
use crate::ntcj::NtcjEngine;
use crate::stitchup::StitchupEngine;
use crate::upgma::UpgmaEngine;

/// Output and behaviour knobs shared by every builder.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Fractional digits for branch lengths (1..=10).
    pub precision: usize,
    /// 0 = silent, 1 = milestones, >1 = diagnostic echo of inputs.
    pub verbosity: u32,
    /// Gzip file output.
    pub zipped_output: bool,
    /// Gzip level 0..=9, used when `zipped_output` is set.
    pub compression_level: u32,
    /// Merge down to two clusters instead of three (NTCJ only).
    pub rooted: bool,
    /// Open output files without truncating.
    pub append: bool,
    /// Emit the tree without outer brackets or semicolon (Stitch-up only).
    pub subtree_only: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            precision: 6,
            verbosity: 1,
            zipped_output: false,
            compression_level: 6,
            rooted: false,
            append: false,
            subtree_only: false,
        }
    }
}

fn effective_precision(options: &BuildOptions) -> Result<usize> {
    if options.precision < 1 {
        return Err(TreeBuildError::invalid_input(format!(
            "precision must be at least 1, got {}",
            options.precision
        )));
    }
    Ok(options.precision.min(MAX_PRECISION))
}

fn echo_inputs(name: &str, names: &[String], distances: &[f64], options: &BuildOptions) {
    if options.verbosity > 1 {
        eprintln!(
            "{name}: {} taxa, {} distances, taxa {:?}",
            names.len(),
            distances.len(),
            names
        );
    }
}

/// One tree-construction algorithm behind a common capability set.
pub trait TreeBuilder: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// Builds and returns the Newick string (no trailing newline).
    fn build_tree(
        &self,
        names: &[String],
        distances: &[f64],
        options: &BuildOptions,
    ) -> Result<String>;

    /// Builds and writes Newick plus a line break into `sink`.
    fn build_tree_to(
        &self,
        names: &[String],
        distances: &[f64],
        options: &BuildOptions,
        sink: &mut dyn Write,
    ) -> Result<()> {
        let newick = self.build_tree(names, distances, options)?;
        sink.write_all(newick.as_bytes())?;
        sink.write_all(b"\n")?;
        sink.flush()?;
        Ok(())
    }

    /// Builds and writes Newick to `path`, honouring the gzip and append
    /// options.
    fn build_tree_file(
        &self,
        names: &[String],
        distances: &[f64],
        options: &BuildOptions,
        path: &Path,
    ) -> Result<()> {
        let newick = self.build_tree(names, distances, options)?;
        write_newick_file(
            &newick,
            path,
            options.zipped_output,
            options.append,
            options.compression_level,
        )
    }
}

/// UPGMA over `f32` with the vectorised row scan.
#[derive(Debug)]
struct UpgmaBuilder;

impl TreeBuilder for UpgmaBuilder {
    fn name(&self) -> &'static str {
        "UPGMA"
    }
    fn description(&self) -> &'static str {
        "UPGMA (average linkage, vectorised single precision)"
    }
    fn build_tree(
        &self,
        names: &[String],
        distances: &[f64],
        options: &BuildOptions,
    ) -> Result<String> {
        let precision = effective_precision(options)?;
        echo_inputs(self.name(), names, distances, options);
        let mut engine: UpgmaEngine<f32> = UpgmaEngine::new();
        engine.set_silent(options.verbosity == 0);
        engine.load_matrix(names, distances)?;
        engine.construct_tree()?;
        Ok(engine.newick(precision))
    }
}

/// UPGMA over `f64`, scalar row scans.
#[derive(Debug)]
struct UpgmaFp64Builder;

impl TreeBuilder for UpgmaFp64Builder {
    fn name(&self) -> &'static str {
        "UPGMA-FP64"
    }
    fn description(&self) -> &'static str {
        "UPGMA (average linkage, double precision)"
    }
    fn build_tree(
        &self,
        names: &[String],
        distances: &[f64],
        options: &BuildOptions,
    ) -> Result<String> {
        let precision = effective_precision(options)?;
        echo_inputs(self.name(), names, distances, options);
        let mut engine: UpgmaEngine<f64> = UpgmaEngine::new();
        engine.set_silent(options.verbosity == 0);
        engine.load_matrix(names, distances)?;
        engine.construct_tree()?;
        Ok(engine.newick(precision))
    }
}

#[derive(Debug)]
struct StitchupBuilder;

impl TreeBuilder for StitchupBuilder {
    fn name(&self) -> &'static str {
        "STITCH"
    }
    fn description(&self) -> &'static str {
        "Family stitch-up (lowest cost)"
    }
    fn build_tree(
        &self,
        names: &[String],
        distances: &[f64],
        options: &BuildOptions,
    ) -> Result<String> {
        let precision = effective_precision(options)?;
        echo_inputs(self.name(), names, distances, options);
        let mut engine: StitchupEngine<f64> = StitchupEngine::new();
        engine.set_silent(options.verbosity == 0);
        engine.load_matrix(names, distances)?;
        engine.construct_tree()?;
        if options.subtree_only {
            Ok(engine.newick_subtree(precision))
        } else {
            Ok(engine.newick(precision))
        }
    }
}

#[derive(Debug)]
struct NtcjBuilder;

impl TreeBuilder for NtcjBuilder {
    fn name(&self) -> &'static str {
        "NTCJ"
    }
    fn description(&self) -> &'static str {
        "Cluster joining by nearest (NJ-corrected) taxon distance"
    }
    fn build_tree(
        &self,
        names: &[String],
        distances: &[f64],
        options: &BuildOptions,
    ) -> Result<String> {
        let precision = effective_precision(options)?;
        echo_inputs(self.name(), names, distances, options);
        let mut engine: NtcjEngine<f64> = NtcjEngine::new();
        engine.set_silent(options.verbosity == 0);
        engine.set_rooted(options.rooted);
        engine.load_matrix(names, distances)?;
        engine.construct_tree()?;
        Ok(engine.newick(precision))
    }
}

pub struct Registry {
    builders: BTreeMap<&'static str, Box<dyn TreeBuilder>>,
}

impl Registry {
    pub fn with_default_builders() -> Self {
        let mut registry = Registry {
            builders: BTreeMap::new(),
        };
        registry.advertise(Box::new(UpgmaBuilder));
        registry.advertise(Box::new(UpgmaFp64Builder));
        registry.advertise(Box::new(StitchupBuilder));
        registry.advertise(Box::new(NtcjBuilder));
        registry
    }

    pub fn advertise(&mut self, builder: Box<dyn TreeBuilder>) {
        self.builders.insert(builder.name(), builder);
    }

    /// Case-insensitive lookup; the error names every registered builder.
    pub fn lookup(&self, name: &str) -> Result<&dyn TreeBuilder> {
        let key = name.to_ascii_uppercase();
        self.builders
            .get(key.as_str())
            .map(|b| b.as_ref())
            .ok_or_else(|| TreeBuildError::UnknownAlgorithm {
                name: name.to_string(),
                available: self
                    .builders
                    .keys()
                    .copied()
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    pub fn available(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.builders.values().map(|b| (b.name(), b.description()))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_default_builders()
    }
}

/// One-shot convenience over a default registry.
pub fn build_tree(
    algorithm: &str,
    names: &[String],
    distances: &[f64],
    options: &BuildOptions,
) -> Result<String> {
    Registry::with_default_builders()
        .lookup(algorithm)?
        .build_tree(names, distances, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect()
    }

    #[rustfmt::skip]
    const DISTANCES: [f64; 16] = [
        0.0,  5.0,  9.0,  9.0,
        5.0,  0.0, 10.0, 10.0,
        9.0, 10.0,  0.0,  8.0,
        9.0, 10.0,  8.0,  0.0,
    ];

    fn quiet() -> BuildOptions {
        BuildOptions {
            verbosity: 0,
            ..BuildOptions::default()
        }
    }

    #[test]
    fn every_registered_algorithm_builds() {
        let registry = Registry::with_default_builders();
        for (name, _description) in registry.available() {
            let newick = registry
                .lookup(name)
                .unwrap()
                .build_tree(&names(), &DISTANCES, &quiet())
                .unwrap();
            assert!(newick.ends_with(';'), "{name} produced '{newick}'");
            for taxon in ["A", "B", "C", "D"] {
                assert!(newick.contains(taxon), "{name} lost taxon {taxon}");
            }
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = Registry::with_default_builders();
        assert_eq!(registry.lookup("upgma").unwrap().name(), "UPGMA");
        assert_eq!(registry.lookup("stitch").unwrap().name(), "STITCH");
    }

    #[test]
    fn unknown_algorithm_lists_the_registered_ones() {
        let registry = Registry::with_default_builders();
        let error = registry.lookup("BIONJ").unwrap_err();
        match error {
            TreeBuildError::UnknownAlgorithm { name, available } => {
                assert_eq!(name, "BIONJ");
                for expected in ["NTCJ", "STITCH", "UPGMA", "UPGMA-FP64"] {
                    assert!(available.contains(expected));
                }
            }
            other => panic!("expected UnknownAlgorithm, got {other:?}"),
        }
    }

    #[test]
    fn precision_below_one_is_rejected_up_front() {
        let options = BuildOptions {
            precision: 0,
            verbosity: 0,
            ..BuildOptions::default()
        };
        assert!(matches!(
            build_tree("UPGMA", &names(), &DISTANCES, &options),
            Err(TreeBuildError::InvalidInput { .. })
        ));
    }

    #[test]
    fn sink_output_appends_a_newline() {
        let registry = Registry::with_default_builders();
        let mut sink = Vec::new();
        registry
            .lookup("STITCH")
            .unwrap()
            .build_tree_to(&names(), &DISTANCES, &quiet(), &mut sink)
            .unwrap();
        let text = String::from_utf8(sink).unwrap();
        assert!(text.ends_with(";\n"));
    }

    #[test]
    fn gzip_file_output_round_trips() {
        let path = std::env::temp_dir().join(format!("dmt_reg_{}.nwk.gz", std::process::id()));
        let options = BuildOptions {
            verbosity: 0,
            zipped_output: true,
            ..BuildOptions::default()
        };
        Registry::with_default_builders()
            .lookup("UPGMA")
            .unwrap()
            .build_tree_file(&names(), &DISTANCES, &options, &path)
            .unwrap();
        let raw = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).ok();
        let mut decoder = flate2::read::GzDecoder::new(raw.as_slice());
        let mut text = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut text).unwrap();
        assert!(text.ends_with(";\n"));
        assert!(text.contains("A:"));
    }
}
