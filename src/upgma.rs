//! UPGMA: average-linkage agglomerative clustering.
//!
//! # Overview
//! Each iteration finds the globally closest pair of live clusters,
//! joins them with equal legs of half their distance, folds row b into
//! row a with the size-weighted mean, and swap-removes row b. The
//! per-row minimum scans are independent, so they fan out over rayon
//! with each row writing only its own `row_minima` slot; the global
//! reduction over those slots is serial and breaks ties by cluster-size
//! imbalance, which keeps near-identical taxa from degenerating into
//! caterpillars.

use aligned_vec::{AVec, ConstAlign};
use rayon::prelude::*;

use crate::cluster::ClusterTree;
use crate::error::{Result, TreeBuildError};
use crate::matrix::validate_input;
use crate::rowmin::{Position, RowScan};
use crate::square::{Distance, SquareMatrix};

fn imbalance<T: Distance>(
    clusters: &ClusterTree<T>,
    row_to_cluster: &[usize],
    row_a: usize,
    row_b: usize,
) -> usize {
    let size_a = clusters.exterior_count(row_to_cluster[row_a]);
    let size_b = clusters.exterior_count(row_to_cluster[row_b]);
    size_a.abs_diff(size_b)
}

pub struct UpgmaEngine<T: RowScan> {
    matrix: SquareMatrix<T>,
    clusters: ClusterTree<T>,
    row_to_cluster: Vec<usize>,
    row_minima: Vec<Position<T>>,
    column_numbers: AVec<T, ConstAlign<32>>,
    silent: bool,
}

impl<T: RowScan> UpgmaEngine<T> {
    pub fn new() -> Self {
        UpgmaEngine {
            matrix: SquareMatrix::new(),
            clusters: ClusterTree::new(),
            row_to_cluster: Vec::new(),
            row_minima: Vec::new(),
            column_numbers: AVec::new(32),
            silent: false,
        }
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Validates and copies (names, N·N distances) into the working
    /// matrix; one leaf cluster per taxon, row i mapped to cluster i.
    pub fn load_matrix(&mut self, names: &[String], distances: &[f64]) -> Result<()> {
        let n = validate_input(names, distances)?;
        self.matrix.set_size(n);
        self.matrix.load_distances_from_flat_array(distances);
        self.clusters = ClusterTree::new();
        for name in names {
            self.clusters.add_leaf(name.clone());
        }
        self.row_to_cluster = (0..n).collect();
        self.column_numbers = AVec::from_iter(32, (0..n).map(T::from_usize));
        Ok(())
    }

    /// Runs the merge loop down to three rows, then the trifurcation.
    pub fn construct_tree(&mut self) -> Result<()> {
        if self.matrix.row_count() < 3 {
            return Err(TreeBuildError::internal(format!(
                "clustering requested on a collapsed matrix ({} rows)",
                self.matrix.row_count()
            )));
        }
        if !self.silent {
            eprintln!("Constructing UPGMA tree ({} taxa)", self.matrix.row_count());
        }
        while 3 < self.matrix.row_count() {
            let best = self.minimum_entry()?;
            self.cluster(best.column, best.row);
        }
        self.finish_clustering()
    }

    /// Newick for the constructed tree; the root is the last join.
    pub fn newick(&self, precision: usize) -> String {
        self.clusters.write_newick(precision)
    }

    fn get_row_minima(&mut self) {
        let row_count = self.matrix.row_count();
        self.row_minima.clear();
        self.row_minima.resize(row_count, Position::unset());
        let matrix = &self.matrix;
        let clusters = &self.clusters;
        let row_to_cluster = &self.row_to_cluster;
        let column_numbers = &self.column_numbers;
        self.row_minima[1..]
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, slot)| {
                let row = i + 1;
                let (column, value) = T::scan_row(&matrix.row(row)[..row], column_numbers);
                *slot = Position {
                    row,
                    column,
                    value,
                    imbalance: imbalance(clusters, row_to_cluster, row, column),
                };
            });
    }

    fn minimum_entry(&mut self) -> Result<Position<T>> {
        self.get_row_minima();
        let mut best = Position::unset();
        for here in &self.row_minima {
            if here.row != here.column && here.better_than(&best) {
                best = *here;
            }
        }
        if best.row == best.column {
            return Err(TreeBuildError::internal(
                "no joinable pair found in row minima".to_string(),
            ));
        }
        Ok(best)
    }

    /// Joins rows a < b: both legs are half the pair distance, and every
    /// other row's distance becomes the exterior-count-weighted mean.
    fn cluster(&mut self, a: usize, b: usize) {
        let ab = self.matrix.cell(b, a);
        let a_length = ab * T::HALF;
        let b_length = a_length;
        let a_count = self.clusters.exterior_count(self.row_to_cluster[a]);
        let b_count = self.clusters.exterior_count(self.row_to_cluster[b]);
        let lambda = T::from_usize(a_count) / T::from_usize(a_count + b_count);
        let mu = T::ONE - lambda;
        for i in 0..self.matrix.row_count() {
            if i != a && i != b {
                let d_ai = self.matrix.cell(a, i);
                let d_bi = self.matrix.cell(b, i);
                let d_ci = lambda * d_ai + mu * d_bi;
                self.matrix.set_cell(a, i, d_ci);
                self.matrix.set_cell(i, a, d_ci);
            }
        }
        let joined = self
            .clusters
            .join(self.row_to_cluster[a], a_length, self.row_to_cluster[b], b_length);
        self.row_to_cluster[a] = joined;
        self.row_to_cluster[b] = self.row_to_cluster[self.matrix.row_count() - 1];
        self.matrix.remove_row_and_column(b);
    }

    /// Emits the root trifurcation over the last three rows. The length
    /// mix ŵ_i = w_i/(2S) is historical behaviour, kept as-is;
    /// Felsenstein (2004) ch. 11 only covers the rooted case.
    fn finish_clustering(&mut self) -> Result<()> {
        if self.matrix.row_count() != 3 {
            return Err(TreeBuildError::internal(format!(
                "trifurcation requested with {} rows live",
                self.matrix.row_count()
            )));
        }
        let mut weights = [T::ZERO; 3];
        let mut denominator = T::ZERO;
        for (i, weight) in weights.iter_mut().enumerate() {
            *weight = T::from_usize(self.clusters.exterior_count(self.row_to_cluster[i]));
            denominator += *weight;
        }
        for weight in weights.iter_mut() {
            *weight = *weight / (T::from_usize(2) * denominator);
        }
        let d01 = self.matrix.cell(0, 1);
        let d02 = self.matrix.cell(0, 2);
        let d12 = self.matrix.cell(1, 2);
        self.clusters.join3(
            self.row_to_cluster[0],
            weights[1] * d01 + weights[2] * d02,
            self.row_to_cluster[1],
            weights[0] * d01 + weights[2] * d12,
            self.row_to_cluster[2],
            weights[0] * d02 + weights[1] * d12,
        );
        Ok(())
    }
}

impl<T: RowScan> Default for UpgmaEngine<T> {
    fn default() -> Self {
        Self::new()
    }
}
