//! Nearest Taxon Cluster Joining.
//!
//! A mash-up of the stitch-up driver and neighbour-joining: every taxon
//! pair is scored once, up front, with the NJ-corrected distance
//! d*(r,c) = D[r][c] − (T[r]+T[c])/N and pushed through a min-heap.
//! Popped edges whose taxa already share a cluster representative are
//! skipped; accepted edges merge the two representatives' rows with the
//! NJ branch-length and row-update rules. Faster than NJ proper, and
//! generally worse; it is kept for its deterministic trajectory.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use rayon::prelude::*;

use crate::cluster::ClusterTree;
use crate::error::{Result, TreeBuildError};
use crate::matrix::validate_input;
use crate::square::{Distance, SquareMatrix};

/// Unordered taxon pair with its corrected distance; heap order is by
/// length alone.
#[derive(Debug, Clone, Copy)]
struct TaxonEdge<T> {
    taxon1: usize,
    taxon2: usize,
    length: T,
}

impl<T: Distance> PartialEq for TaxonEdge<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Distance> Eq for TaxonEdge<T> {}

impl<T: Distance> PartialOrd for TaxonEdge<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Distance> Ord for TaxonEdge<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.length
            .partial_cmp(&other.length)
            .unwrap_or(Ordering::Equal)
    }
}

pub struct NtcjEngine<T: Distance> {
    matrix: SquareMatrix<T>,
    clusters: ClusterTree<T>,
    row_to_cluster: Vec<usize>,
    rooted: bool,
    silent: bool,
}

impl<T: Distance> NtcjEngine<T> {
    pub fn new() -> Self {
        NtcjEngine {
            matrix: SquareMatrix::new(),
            clusters: ClusterTree::new(),
            row_to_cluster: Vec::new(),
            rooted: false,
            silent: false,
        }
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Rooted runs merge down to two clusters, unrooted stop at three.
    pub fn set_rooted(&mut self, rooted: bool) {
        self.rooted = rooted;
    }

    pub fn load_matrix(&mut self, names: &[String], distances: &[f64]) -> Result<()> {
        let n = validate_input(names, distances)?;
        self.matrix.set_size(n);
        self.matrix.load_distances_from_flat_array(distances);
        self.matrix.calculate_row_totals();
        self.clusters = ClusterTree::new();
        for name in names {
            self.clusters.add_leaf(name.clone());
        }
        self.row_to_cluster = (0..n).collect();
        Ok(())
    }

    pub fn construct_tree(&mut self) -> Result<()> {
        let taxon_count = self.matrix.row_count();
        if taxon_count < 3 {
            return Err(TreeBuildError::internal(format!(
                "cluster joining requested on a collapsed matrix ({taxon_count} rows)"
            )));
        }
        if !self.silent {
            eprintln!("Assembling NTCJ tree ({taxon_count} taxa)");
        }

        let multiplier = T::ONE / T::from_usize(taxon_count);
        let mut edges = Vec::with_capacity(taxon_count * (taxon_count - 1) / 2);
        {
            let totals = self.matrix.row_totals();
            for row in 1..taxon_count {
                for col in 0..row {
                    let corrected =
                        self.matrix.cell(row, col) - (totals[row] + totals[col]) * multiplier;
                    edges.push(TaxonEdge {
                        taxon1: col,
                        taxon2: row,
                        length: corrected,
                    });
                }
            }
        }
        let mut heap: BinaryHeap<Reverse<TaxonEdge<T>>> = edges.into_iter().map(Reverse).collect();

        let mut taxon_to_row: Vec<usize> = (0..taxon_count).collect();
        let degree_of_root = if self.rooted { 2 } else { 3 };

        // the heap is consumed prefix-first across joins; no re-heapify
        while degree_of_root < self.matrix.row_count() {
            let edge = loop {
                let Reverse(edge) = heap.pop().ok_or_else(|| {
                    TreeBuildError::internal(
                        "edge heap exhausted with clusters still unmerged".to_string(),
                    )
                })?;
                if taxon_to_row[edge.taxon1] != taxon_to_row[edge.taxon2] {
                    break edge;
                }
            };
            let row_a = taxon_to_row[edge.taxon1];
            let row_b = taxon_to_row[edge.taxon2];
            let r1 = row_a.min(row_b);
            let r2 = row_a.max(row_b);
            self.cluster(r1, r2);

            // the old last row was swapped into r2's slot by the merge
            let moved_row = self.matrix.row_count();
            taxon_to_row.par_iter_mut().for_each(|slot| {
                if *slot == r2 {
                    *slot = r1;
                } else if *slot == moved_row {
                    *slot = r2;
                }
            });
        }
        self.finish_clustering()
    }

    pub fn newick(&self, precision: usize) -> String {
        self.clusters.write_newick(precision)
    }

    /// Neighbour-joining merge of rows a < b: legs are half the pair
    /// distance shifted by the row-total fudge, other rows move to the
    /// midpoint correction, and row totals are updated incrementally.
    fn cluster(&mut self, a: usize, b: usize) {
        let row_count = self.matrix.row_count();
        let d_ab = self.matrix.cell(b, a);
        let t_multiplier = if row_count < 3 {
            T::ZERO
        } else {
            T::HALF / T::from_usize(row_count - 2)
        };
        let lambda = T::HALF;
        let mu = T::ONE - lambda;
        let fudge = {
            let totals = self.matrix.row_totals();
            (totals[a] - totals[b]) * t_multiplier
        };
        let a_length = d_ab * T::HALF + fudge;
        let b_length = d_ab * T::HALF - fudge;
        let d_correction = -(lambda * a_length) - mu * b_length;
        let mut total_a = T::ZERO;
        for i in 0..row_count {
            if i != a && i != b {
                let d_ai = self.matrix.cell(a, i);
                let d_bi = self.matrix.cell(b, i);
                let d_ci = lambda * d_ai + mu * d_bi + d_correction;
                self.matrix.set_cell(a, i, d_ci);
                self.matrix.set_cell(i, a, d_ci);
                self.matrix.row_totals_mut()[i] += d_ci - d_ai - d_bi;
                total_a += d_ci;
            }
        }
        self.matrix.row_totals_mut()[a] = total_a;
        let joined = self.clusters.join(
            self.row_to_cluster[a],
            a_length,
            self.row_to_cluster[b],
            b_length,
        );
        self.row_to_cluster[a] = joined;
        self.row_to_cluster[b] = self.row_to_cluster[row_count - 1];
        self.matrix.remove_row_and_column(b);
    }

    fn finish_clustering(&mut self) -> Result<()> {
        match self.matrix.row_count() {
            3 => {
                let d01 = self.matrix.cell(0, 1);
                let d02 = self.matrix.cell(0, 2);
                let d12 = self.matrix.cell(1, 2);
                self.clusters.join3(
                    self.row_to_cluster[0],
                    T::HALF * (d01 + d02 - d12),
                    self.row_to_cluster[1],
                    T::HALF * (d01 + d12 - d02),
                    self.row_to_cluster[2],
                    T::HALF * (d02 + d12 - d01),
                );
                Ok(())
            }
            2 => {
                let half = self.matrix.cell(0, 1) * T::HALF;
                self.clusters
                    .join(self.row_to_cluster[0], half, self.row_to_cluster[1], half);
                Ok(())
            }
            other => Err(TreeBuildError::internal(format!(
                "clustering finished with {other} rows live"
            ))),
        }
    }
}

impl<T: Distance> Default for NtcjEngine<T> {
    fn default() -> Self {
        Self::new()
    }
}
