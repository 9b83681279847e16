use clap::Parser;
use distance_matrix_trees::io::{read_distance_file, write_newick_file};
use distance_matrix_trees::registry::{BuildOptions, Registry};
use std::path::PathBuf;
use std::time::Instant;

/// Build a phylogenetic tree from a PHYLIP-style distance matrix file
/// (square, upper, or lower triangle; `.gz` accepted) and write it in
/// Newick notation.
#[derive(Parser, Debug)]
#[command(
    name = "dist-trees",
    version,
    about = "Distance-matrix phylogenetic tree construction"
)]
struct Args {
    /// Path to the distance matrix file
    #[arg(short = 'i', long = "input", required_unless_present = "list")]
    input: Option<PathBuf>,

    /// Output path for the Newick tree ('-' for stdout)
    #[arg(short = 'o', long = "output", required_unless_present = "list")]
    output: Option<PathBuf>,

    /// Tree construction algorithm (see --list)
    #[arg(short = 'a', long = "algorithm", default_value = "UPGMA")]
    algorithm: String,

    /// List the registered algorithms and exit
    #[arg(long = "list", default_value_t = false)]
    list: bool,

    /// Digits after the decimal point for branch lengths
    #[arg(short = 'p', long = "precision", default_value_t = 6)]
    precision: usize,

    /// Gzip-compress the output file
    #[arg(short = 'z', long = "gzip", default_value_t = false)]
    gzip: bool,

    /// Open the output file for appending instead of truncating
    #[arg(long = "append", default_value_t = false)]
    append: bool,

    /// Build a rooted tree where the algorithm supports it (NTCJ)
    #[arg(long = "rooted", default_value_t = false)]
    rooted: bool,

    /// Quiet mode: suppresses progress messages on stdout
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,

    /// Echo inputs back as diagnostics (repeatable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    let registry = Registry::with_default_builders();

    if args.list {
        for (name, description) in registry.available() {
            println!("{name:<12} {description}");
        }
        return;
    }
    // clap guarantees both paths are present past this point
    let (Some(input), Some(output)) = (args.input, args.output) else {
        eprintln!("--input and --output are required");
        std::process::exit(2);
    };

    let t0 = Instant::now();
    let matrix = match read_distance_file(&input) {
        Ok(matrix) => matrix,
        Err(e) => {
            eprintln!("Failed to read {input:?}: {e}");
            std::process::exit(2);
        }
    };
    let read_s = t0.elapsed().as_secs_f64();
    log_if(
        !args.quiet,
        format!("Read {} taxa from {input:?} in {read_s:.3}s", matrix.size()),
    );

    let builder = match registry.lookup(&args.algorithm) {
        Ok(builder) => builder,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(3);
        }
    };

    let options = BuildOptions {
        precision: args.precision,
        verbosity: if args.quiet {
            0
        } else {
            1 + u32::from(args.verbose)
        },
        zipped_output: args.gzip,
        rooted: args.rooted,
        append: args.append,
        ..BuildOptions::default()
    };

    let t1 = Instant::now();
    let newick = match builder.build_tree(matrix.names(), matrix.distances(), &options) {
        Ok(newick) => newick,
        Err(e) => {
            eprintln!("Constructing {} tree failed: {e}", builder.name());
            std::process::exit(4);
        }
    };
    let build_s = t1.elapsed().as_secs_f64();
    log_if(
        !args.quiet,
        format!("Constructed {} tree in {build_s:.3}s", builder.name()),
    );

    let t2 = Instant::now();
    if output.as_os_str() == "-" {
        println!("{newick}");
    } else if let Err(e) = write_newick_file(
        &newick,
        &output,
        args.gzip,
        args.append,
        options.compression_level,
    ) {
        eprintln!("Failed to write output {output:?}: {e}");
        std::process::exit(5);
    }
    log_write_done(!args.quiet, &output, t2.elapsed().as_secs_f64());
}

fn log_if(show: bool, msg: String) {
    if show {
        println!("{}", msg);
    }
}

fn log_write_done(show: bool, output: &PathBuf, secs: f64) {
    if !show {
        return;
    }
    let is_stdout = output.as_os_str() == "-";
    if is_stdout {
        println!("Writing to stdout {secs:.3}s");
    } else {
        println!("Writing to output {secs:.3}s");
    }
}
