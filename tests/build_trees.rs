//! End-to-end scenarios: build trees with every registered algorithm and
//! cross-check the emitted Newick by parsing it back with `phylotree`.

use distance_matrix_trees::io::{read_distance_file, write_distance_file};
use distance_matrix_trees::matrix::FlatMatrix;
use distance_matrix_trees::registry::{build_tree, BuildOptions};
use itertools::Itertools;
use phylotree::tree::Tree;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ALGORITHMS: [&str; 4] = ["UPGMA", "UPGMA-FP64", "STITCH", "NTCJ"];

fn quiet(precision: usize) -> BuildOptions {
    BuildOptions {
        precision,
        verbosity: 0,
        ..BuildOptions::default()
    }
}

fn build(algorithm: &str, names: &[&str], distances: &[f64], precision: usize) -> String {
    let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
    build_tree(algorithm, &names, distances, &quiet(precision)).unwrap()
}

fn leaf_names(tree: &Tree) -> Vec<String> {
    tree.get_leaves()
        .iter()
        .filter_map(|id| tree.get(id).ok().and_then(|node| node.name.clone()))
        .sorted()
        .collect()
}

fn leaf_id(tree: &Tree, name: &str) -> usize {
    tree.get_leaves()
        .into_iter()
        .find(|id| tree.get(id).ok().and_then(|node| node.name.as_deref()) == Some(name))
        .unwrap()
}

/// (node, accumulated length) for every ancestor up to the root.
fn ancestors(tree: &Tree, mut node: usize) -> Vec<(usize, f64)> {
    let mut path = vec![(node, 0.0)];
    let mut accumulated = 0.0;
    while let Some(parent) = tree.get(&node).unwrap().parent {
        accumulated += tree.get(&node).unwrap().parent_edge.unwrap_or(0.0);
        node = parent;
        path.push((node, accumulated));
    }
    path
}

fn path_length(tree: &Tree, name_a: &str, name_b: &str) -> f64 {
    let from_a = ancestors(tree, leaf_id(tree, name_a));
    let from_b = ancestors(tree, leaf_id(tree, name_b));
    for (node_a, dist_a) in &from_a {
        if let Some((_, dist_b)) = from_b.iter().find(|(node_b, _)| node_b == node_a) {
            return dist_a + dist_b;
        }
    }
    panic!("no common ancestor of {name_a} and {name_b}");
}

fn all_branch_lengths(tree: &Tree) -> Vec<f64> {
    let mut seen = std::collections::HashSet::new();
    let mut lengths = Vec::new();
    for leaf in tree.get_leaves() {
        for (node, _) in ancestors(tree, leaf) {
            if seen.insert(node) {
                if let Some(edge) = tree.get(&node).unwrap().parent_edge {
                    lengths.push(edge);
                }
            }
        }
    }
    lengths
}

#[test]
fn upgma_three_taxa_lengths() {
    let d = [0.0, 2.0, 4.0, 2.0, 0.0, 4.0, 4.0, 4.0, 0.0];
    let newick = build("UPGMA", &["A", "B", "C"], &d, 6);
    let tree = Tree::from_newick(&newick).unwrap();
    assert_eq!(leaf_names(&tree), ["A", "B", "C"]);
    let edge = |name: &str| {
        tree.get(&leaf_id(&tree, name))
            .unwrap()
            .parent_edge
            .unwrap()
    };
    assert!((edge("A") - 1.0).abs() <= 1e-6);
    assert!((edge("B") - 1.0).abs() <= 1e-6);
    // the trifurcation mix gives (4+4)/6 for the third leg
    assert!((edge("C") - 4.0 / 3.0).abs() <= 1e-6);
}

#[test]
fn stitchup_four_taxa_groups_cherries() {
    #[rustfmt::skip]
    let d = [
        0.0,  5.0,  9.0,  9.0,
        5.0,  0.0, 10.0, 10.0,
        9.0, 10.0,  0.0,  8.0,
        9.0, 10.0,  8.0,  0.0,
    ];
    let newick = build("STITCH", &["A", "B", "C", "D"], &d, 6);
    let tree = Tree::from_newick(&newick).unwrap();
    assert_eq!(leaf_names(&tree), ["A", "B", "C", "D"]);
    // {A,B} and {C,D} are cherries
    let parent = |name: &str| tree.get(&leaf_id(&tree, name)).unwrap().parent.unwrap();
    assert_eq!(parent("A"), parent("B"));
    assert_eq!(parent("C"), parent("D"));
    assert_ne!(parent("A"), parent("C"));
    assert!((path_length(&tree, "A", "B") - 5.0).abs() <= 1e-6);
    assert!((path_length(&tree, "C", "D") - 8.0).abs() <= 1e-6);
}

#[test]
fn identical_taxa_make_star_like_trees() {
    let n = 5;
    let names = ["T1", "T2", "T3", "T4", "T5"];
    let d = vec![0.0; n * n];
    for algorithm in ALGORITHMS {
        let newick = build(algorithm, &names, &d, 6);
        let tree = Tree::from_newick(&newick).unwrap();
        assert_eq!(
            leaf_names(&tree),
            ["T1", "T2", "T3", "T4", "T5"],
            "{algorithm} lost a taxon"
        );
        for length in all_branch_lengths(&tree) {
            assert!(
                length.abs() <= 1e-9,
                "{algorithm} emitted non-zero length {length}"
            );
        }
    }
}

#[test]
fn phylip_square_round_trip() {
    let n = 4;
    let mut rng = StdRng::seed_from_u64(42);
    let mut data = vec![0.0; n * n];
    for i in 0..n {
        for j in i + 1..n {
            let value: f64 = rng.gen();
            data[i * n + j] = value;
            data[j * n + i] = value;
        }
    }
    let names: Vec<String> = (1..=n).map(|i| format!("taxon_{i}")).collect();
    let matrix = FlatMatrix::from_parts(names.clone(), data.clone()).unwrap();

    let path = std::env::temp_dir().join(format!("dmt_e2e_{}.square", std::process::id()));
    write_distance_file(&matrix, "square", 6, 6, false, &path).unwrap();
    let back = read_distance_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(back.names(), names.as_slice());
    for i in 0..n {
        for j in 0..n {
            assert!(
                (back.cell(i, j) - data[i * n + j]).abs() <= 1e-6,
                "cell ({i},{j}) drifted"
            );
        }
    }
}

#[test]
fn upper_and_lower_files_rebuild_the_same_matrix() {
    let n = 5;
    let mut rng = StdRng::seed_from_u64(7);
    let mut data = vec![0.0; n * n];
    for i in 0..n {
        for j in i + 1..n {
            let value: f64 = rng.gen();
            data[i * n + j] = value;
            data[j * n + i] = value;
        }
    }
    let names: Vec<String> = (1..=n).map(|i| format!("s{i}")).collect();
    let matrix = FlatMatrix::from_parts(names, data).unwrap();

    let dir = std::env::temp_dir();
    let upper_path = dir.join(format!("dmt_e2e_{}.upper", std::process::id()));
    let lower_path = dir.join(format!("dmt_e2e_{}.lower", std::process::id()));
    write_distance_file(&matrix, "upper", 6, 6, false, &upper_path).unwrap();
    write_distance_file(&matrix, "lower", 6, 6, false, &lower_path).unwrap();
    let from_upper = read_distance_file(&upper_path).unwrap();
    let from_lower = read_distance_file(&lower_path).unwrap();
    std::fs::remove_file(&upper_path).ok();
    std::fs::remove_file(&lower_path).ok();

    assert_eq!(from_upper.names(), from_lower.names());
    assert_eq!(from_upper.distances(), from_lower.distances());
    for i in 0..n {
        for j in 0..n {
            assert_eq!(from_upper.cell(i, j), from_upper.cell(j, i));
        }
    }
}

#[test]
fn degenerate_heap_ties_stay_bounded() {
    let d = [0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0];
    let names = ["A", "B", "C"];
    let newick = build("STITCH", &names, &d, 6);
    let tree = Tree::from_newick(&newick).unwrap();
    assert_eq!(leaf_names(&tree), ["A", "B", "C"]);
    // every pairwise path stays within one join plus two legs
    let bound = 1.0 + 2.0 * (1.0 / 3.0) + 1e-6;
    for pair in names.iter().combinations(2) {
        let length = path_length(&tree, pair[0], pair[1]);
        assert!(length <= bound, "path {pair:?} = {length}");
        assert!(length >= 0.0);
    }
}

#[test]
fn all_engines_preserve_leaves_and_emit_finite_lengths() {
    let n = 7;
    let mut rng = StdRng::seed_from_u64(1234);
    let mut data = vec![0.0; n * n];
    for i in 0..n {
        for j in i + 1..n {
            let value: f64 = 0.05 + rng.gen::<f64>();
            data[i * n + j] = value;
            data[j * n + i] = value;
        }
    }
    let names: Vec<&str> = vec!["a1", "a2", "a3", "a4", "a5", "a6", "a7"];
    for algorithm in ALGORITHMS {
        let newick = build(algorithm, &names, &data, 6);
        let tree = Tree::from_newick(&newick).unwrap();
        assert_eq!(
            leaf_names(&tree),
            names.iter().map(|s| s.to_string()).sorted().collect::<Vec<_>>(),
            "{algorithm} changed the leaf set"
        );
        for length in all_branch_lengths(&tree) {
            assert!(length.is_finite(), "{algorithm} emitted {length}");
            // NJ-corrected joins may dip negative on non-additive data
            if algorithm != "NTCJ" {
                assert!(length >= -1e-9, "{algorithm} emitted negative {length}");
            }
        }
    }
}

#[test]
fn repeated_runs_are_byte_identical() {
    #[rustfmt::skip]
    let d = [
        0.0,  5.0,  9.0,  9.0, 11.0,
        5.0,  0.0, 10.0, 10.0, 12.0,
        9.0, 10.0,  0.0,  8.0, 11.5,
        9.0, 10.0,  8.0,  0.0, 12.5,
       11.0, 12.0, 11.5, 12.5,  0.0,
    ];
    let names = ["A", "B", "C", "D", "E"];
    for algorithm in ALGORITHMS {
        let first = build(algorithm, &names, &d, 6);
        let second = build(algorithm, &names, &d, 6);
        assert_eq!(first, second, "{algorithm} is not deterministic");
    }
}
