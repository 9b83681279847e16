//! Family Stitch-up tree construction.
//!
//! # Overview
//! Every pairwise distance is treated as a candidate edge. Edges come out
//! of a min-heap shortest-first; an edge whose endpoints are already in
//! the same connected component is discarded, otherwise the two leaves
//! are "stapled": a fresh interior node is stacked on the end of each
//! leaf's caterpillar chain, the two new nodes are linked by an arch
//! edge, and the components are merged. After N−1 staples the graph is a
//! tree whose interior nodes of degree 2 are bookkeeping left-overs;
//! contracting them yields the final topology.
//!
//! Equal-length edges are ordered by a deterministic LCG tiebreak that is
//! local to the engine run, so output is byte-identical across runs.

use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::Write as _;

use crate::error::{Result, TreeBuildError};
use crate::matrix::validate_input;
use crate::square::{Distance, SquareMatrix};

/// Fraction of a join's distance spent on the arch between the two fresh
/// interior nodes; the rest is split between the two legs.
pub const STAPLE_ARCH: f64 = 1.0 / 3.0;
pub const STAPLE_LEG: f64 = 0.5 * (1.0 - STAPLE_ARCH);

/// Engine-local tiebreak sequence for equal-length edges.
/// Stepped exactly once per stitch constructed.
struct TieBreaker {
    state: u64,
}

impl TieBreaker {
    fn new() -> Self {
        TieBreaker { state: 1 }
    }

    fn next(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(2862933555777941757)
            .wrapping_add(3037000493);
        self.state
    }
}

/// A directed edge in the stitch-up graph. Each undirected edge is stored
/// in both directions; ordering is lexicographic by (source, destination)
/// so that one sort groups every node's incident edges together.
#[derive(Debug, Clone, Copy)]
struct Stitch<T> {
    source: usize,
    dest: usize,
    length: T,
}

impl<T> PartialEq for Stitch<T> {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.dest == other.dest
    }
}

impl<T> Eq for Stitch<T> {}

impl<T> PartialOrd for Stitch<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Stitch<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.source, self.dest).cmp(&(other.source, other.dest))
    }
}

/// A candidate edge ordered by (length, tiebreak) for the build heap.
#[derive(Debug, Clone, Copy)]
struct LengthSortedStitch<T> {
    source: usize,
    dest: usize,
    length: T,
    tiebreak: u64,
}

impl<T: Distance> LengthSortedStitch<T> {
    fn new(source: usize, dest: usize, length: T, sequence: &mut TieBreaker) -> Self {
        LengthSortedStitch {
            source,
            dest,
            length,
            tiebreak: sequence.next(),
        }
    }
}

impl<T: Distance> PartialEq for LengthSortedStitch<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Distance> Eq for LengthSortedStitch<T> {}

impl<T: Distance> PartialOrd for LengthSortedStitch<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Distance> Ord for LengthSortedStitch<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.length
            .partial_cmp(&other.length)
            .unwrap_or(Ordering::Equal)
            .then(self.tiebreak.cmp(&other.tiebreak))
    }
}

/// The growing graph: leaves 0..N, then two interior nodes per staple.
pub struct StitchupGraph<T> {
    leaf_names: Vec<String>,
    stitches: Vec<Stitch<T>>,
    taxon_to_set: Vec<usize>,
    taxon_to_node: Vec<usize>,
    taxon_to_distance: Vec<T>,
    set_members: Vec<Vec<usize>>,
    node_count: usize,
}

impl<T: Distance> StitchupGraph<T> {
    pub fn new() -> Self {
        StitchupGraph {
            leaf_names: Vec::new(),
            stitches: Vec::new(),
            taxon_to_set: Vec::new(),
            taxon_to_node: Vec::new(),
            taxon_to_distance: Vec::new(),
            set_members: Vec::new(),
            node_count: 0,
        }
    }

    pub fn add_leaf(&mut self, name: impl Into<String>) {
        self.leaf_names.push(name.into());
        self.taxon_to_set.push(self.node_count);
        self.taxon_to_node.push(self.node_count);
        self.taxon_to_distance.push(T::ZERO);
        self.set_members.push(vec![self.node_count]);
        self.node_count += 1;
    }

    /// True iff a path of stitches connects the two leaves.
    pub fn are_leaves_in_same_set(&self, leaf_a: usize, leaf_b: usize) -> bool {
        self.taxon_to_set[leaf_a] == self.taxon_to_set[leaf_b]
    }

    /// Joins two leaves at distance `length`: one fresh interior node on
    /// the end of each caterpillar chain, an arch between them, and a
    /// weighted union of the two components.
    pub fn staple(&mut self, leaf_a: usize, leaf_b: usize, length: T) -> usize {
        let leg = T::from_f64(STAPLE_LEG);

        let interior_a = self.node_count;
        let leg_length_a = (length - self.taxon_to_distance[leaf_a]) * leg;
        self.stitch_link(self.taxon_to_node[leaf_a], interior_a, leg_length_a);
        self.taxon_to_node[leaf_a] = interior_a;
        self.taxon_to_distance[leaf_a] = leg_length_a;
        self.node_count += 1;

        let interior_b = self.node_count;
        let leg_length_b = (length - self.taxon_to_distance[leaf_b]) * leg;
        self.stitch_link(self.taxon_to_node[leaf_b], interior_b, leg_length_b);
        self.taxon_to_node[leaf_b] = interior_b;
        self.taxon_to_distance[leaf_b] = leg_length_b;
        self.node_count += 1;

        self.stitch_link(interior_a, interior_b, length * T::from_f64(STAPLE_ARCH));

        let set_a = self.taxon_to_set[leaf_a];
        let set_b = self.taxon_to_set[leaf_b];
        self.merge_sets(set_a, set_b)
    }

    fn stitch_link(&mut self, node_a: usize, node_b: usize, length: T) {
        self.stitches.push(Stitch {
            source: node_a,
            dest: node_b,
            length,
        });
        self.stitches.push(Stitch {
            source: node_b,
            dest: node_a,
            length,
        });
    }

    /// Weighted union: the smaller member list is retagged and appended
    /// to the larger; the larger set's label survives.
    fn merge_sets(&mut self, set_a: usize, set_b: usize) -> usize {
        if set_a == set_b {
            return set_a;
        }
        let (from, into) = if self.set_members[set_a].len() < self.set_members[set_b].len() {
            (set_a, set_b)
        } else {
            (set_b, set_a)
        };
        let moved = std::mem::take(&mut self.set_members[from]);
        for &member in &moved {
            self.taxon_to_set[member] = into;
        }
        self.set_members[into].extend(moved);
        into
    }

    /// Splices out every interior node of degree 2, replacing its two
    /// incident edges with one direct edge of their summed length.
    ///
    /// Two passes over the (source, dest)-sorted edge vector: the first
    /// finds each node's degree from runs of equal sources and marks
    /// degree-2 nodes with their first (minimum) neighbour when that
    /// neighbour is numbered below them; the second rewrites every edge
    /// through the replacement map, folding in the marked lengths and
    /// dropping self-loops.
    pub fn remove_through_through_nodes(&mut self) {
        self.stitches.sort_unstable();
        let mut replacements: Vec<usize> = (0..self.node_count).collect();
        let mut replacement_lengths: Vec<T> = vec![T::ZERO; self.node_count];

        let mut node: Option<usize> = None;
        let mut degree = 0usize;
        for stitch in &self.stitches {
            if node != Some(stitch.source) {
                if let Some(previous) = node {
                    if degree != 2 {
                        replacements[previous] = previous;
                        replacement_lengths[previous] = T::ZERO;
                    }
                }
                node = Some(stitch.source);
                degree = 1;
                if stitch.dest < stitch.source {
                    replacements[stitch.source] = stitch.dest;
                    replacement_lengths[stitch.source] = stitch.length;
                }
            } else {
                degree += 1;
            }
        }
        if degree != 2 {
            if let Some(previous) = node {
                replacements[previous] = previous;
                replacement_lengths[previous] = T::ZERO;
            }
        }

        let old_stitches = std::mem::take(&mut self.stitches);
        for stitch in old_stitches {
            let source = replacements[stitch.source];
            let dest = replacements[stitch.dest];
            if source != dest {
                let length = stitch.length
                    + replacement_lengths[stitch.source]
                    + replacement_lengths[stitch.dest];
                self.stitches.push(Stitch {
                    source,
                    dest,
                    length,
                });
            }
        }
        self.stitches.sort_unstable();
    }

    /// Newick rooted (for traversal only) at the highest-numbered interior
    /// node. `subtree_only` leaves off the outermost brackets and the
    /// terminating semicolon.
    pub fn write_newick_with(&self, precision: usize, subtree_only: bool) -> String {
        let mut out = String::new();
        let Some(last) = self.stitches.last() else {
            out.push(';');
            return out;
        };
        let root = last.source;
        let sentinel = self.stitches.len();
        let mut node_to_edge = vec![sentinel; root + 1];
        for (j, stitch) in self.stitches.iter().enumerate() {
            if node_to_edge[stitch.source] == sentinel {
                node_to_edge[stitch.source] = j;
            }
        }
        self.write_subtree(root, None, None, subtree_only, precision, &node_to_edge, &mut out);
        if !subtree_only {
            out.push(';');
        }
        out
    }

    pub fn write_newick(&self, precision: usize) -> String {
        self.write_newick_with(precision, false)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_subtree(
        &self,
        node: usize,
        parent: Option<usize>,
        backstop: Option<T>,
        no_brackets: bool,
        precision: usize,
        node_to_edge: &[usize],
        out: &mut String,
    ) {
        if node < self.leaf_names.len() {
            out.push_str(&self.leaf_names[node]);
        } else {
            if !no_brackets {
                out.push('(');
            }
            let mut first = true;
            let mut x = node_to_edge[node];
            while x < self.stitches.len() && self.stitches[x].source == node {
                let child = self.stitches[x].dest;
                if Some(child) != parent {
                    if !first {
                        out.push(',');
                    }
                    first = false;
                    self.write_subtree(
                        child,
                        Some(node),
                        Some(self.stitches[x].length),
                        false,
                        precision,
                        node_to_edge,
                        out,
                    );
                }
                x += 1;
            }
            if !no_brackets {
                out.push(')');
            }
        }
        if let Some(length) = backstop {
            let _ = write!(out, ":{:.*}", precision, length.to_f64());
        }
    }
}

impl<T: Distance> Default for StitchupGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Heap-driven driver over `StitchupGraph`.
pub struct StitchupEngine<T: Distance> {
    matrix: SquareMatrix<T>,
    graph: StitchupGraph<T>,
    silent: bool,
}

impl<T: Distance> StitchupEngine<T> {
    pub fn new() -> Self {
        StitchupEngine {
            matrix: SquareMatrix::new(),
            graph: StitchupGraph::new(),
            silent: false,
        }
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    pub fn load_matrix(&mut self, names: &[String], distances: &[f64]) -> Result<()> {
        let n = validate_input(names, distances)?;
        self.matrix.set_size(n);
        self.matrix.load_distances_from_flat_array(distances);
        self.graph = StitchupGraph::new();
        for name in names {
            self.graph.add_leaf(name.clone());
        }
        Ok(())
    }

    /// Performs exactly N−1 cross-component joins shortest-edge-first,
    /// then contracts the degree-2 interior nodes.
    pub fn construct_tree(&mut self) -> Result<()> {
        let row_count = self.matrix.row_count();
        if row_count < 3 {
            return Err(TreeBuildError::internal(format!(
                "stitch-up requested on a collapsed matrix ({row_count} rows)"
            )));
        }
        if !self.silent {
            eprintln!("Assembling stitch-up graph ({row_count} taxa)");
        }
        let mut sequence = TieBreaker::new();
        let mut candidates = Vec::with_capacity(row_count * (row_count - 1) / 2);
        for row in 1..row_count {
            for col in 0..row {
                candidates.push(LengthSortedStitch::new(
                    row,
                    col,
                    self.matrix.cell(row, col),
                    &mut sequence,
                ));
            }
        }
        let mut heap: BinaryHeap<Reverse<LengthSortedStitch<T>>> =
            candidates.into_iter().map(Reverse).collect();

        for _join in 0..row_count - 1 {
            let shortest = loop {
                let Reverse(shortest) = heap.pop().ok_or_else(|| {
                    TreeBuildError::internal(
                        "edge heap exhausted before all taxa were connected".to_string(),
                    )
                })?;
                if !self
                    .graph
                    .are_leaves_in_same_set(shortest.source, shortest.dest)
                {
                    break shortest;
                }
            };
            self.graph
                .staple(shortest.source, shortest.dest, shortest.length);
        }
        self.graph.remove_through_through_nodes();
        Ok(())
    }

    pub fn newick(&self, precision: usize) -> String {
        self.graph.write_newick(precision)
    }

    pub fn newick_subtree(&self, precision: usize) -> String {
        self.graph.write_newick_with(precision, true)
    }
}

impl<T: Distance> Default for StitchupEngine<T> {
    fn default() -> Self {
        Self::new()
    }
}
