//! Reading and writing PHYLIP-style distance matrix files, and the
//! gzip-aware sinks used for Newick output.
//!
//! The on-disk layout is the classic one: a header line holding N, then
//! one line per taxon, the name left-justified in a field of
//! `max(10, longest name)` characters, followed by one space-prefixed
//! distance per included column. `square` includes every column, `upper`
//! the columns after the diagonal, `lower` the columns before it.
//! A `.gz` suffix on the format tag (or, when reading, on the path)
//! selects gzip compression.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, TreeBuildError};
use crate::matrix::{validate_input, FlatMatrix};

/// Distances are never written with more than this many fractional digits.
pub const MAX_PRECISION: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixFormat {
    Square,
    Upper,
    Lower,
}

/// Splits a format tag such as `"lower.gz"` into layout and compression.
/// The layout is matched on the leading five characters; anything that is
/// neither `upper` nor `lower` means `square`.
pub fn parse_format_tag(tag: &str) -> (MatrixFormat, bool) {
    let zipped = tag.contains(".gz");
    let format = match tag.get(..5) {
        Some("upper") => MatrixFormat::Upper,
        Some("lower") => MatrixFormat::Lower,
        _ => MatrixFormat::Square,
    };
    (format, zipped)
}

fn checked_precision(precision: usize) -> Result<usize> {
    if precision < 1 {
        return Err(TreeBuildError::invalid_input(format!(
            "precision must be at least 1, got {precision}"
        )));
    }
    Ok(precision.min(MAX_PRECISION))
}

/// Writes `matrix` to `path` in the requested format, gzip-compressed when
/// the tag asks for it. `report_progress` prints a milestone line once the
/// file is on disk.
pub fn write_distance_file(
    matrix: &FlatMatrix,
    format_tag: &str,
    precision: usize,
    compression_level: u32,
    report_progress: bool,
    path: impl AsRef<Path>,
) -> Result<()> {
    let (format, zipped) = parse_format_tag(format_tag);
    let path = path.as_ref();
    let mut out: Box<dyn Write> = if zipped {
        let file = File::create(path)?;
        let encoder = GzEncoder::new(file, Compression::new(compression_level.min(9)));
        Box::new(BufWriter::new(encoder))
    } else {
        Box::new(BufWriter::new(File::create(path)?))
    };
    write_distances_to_open_file(matrix, format, precision, &mut out)?;
    if report_progress {
        eprintln!(
            "Wrote {0}x{0} distance matrix to {1}",
            matrix.size(),
            path.display()
        );
    }
    Ok(())
}

/// Streams the matrix into an already-open sink and flushes it.
pub fn write_distances_to_open_file(
    matrix: &FlatMatrix,
    format: MatrixFormat,
    precision: usize,
    out: &mut dyn Write,
) -> Result<()> {
    let precision = checked_precision(precision)?;
    validate_input(matrix.names(), matrix.distances())?;
    let nseqs = matrix.size();
    let name_width = matrix.max_seq_name_length().max(10);

    writeln!(out, "{nseqs}")?;
    let mut line = String::new();
    for seq1 in 0..nseqs {
        line.clear();
        let _ = write!(line, "{:<name_width$}", matrix.name(seq1));
        let (start, stop) = match format {
            MatrixFormat::Square => (0, nseqs),
            MatrixFormat::Upper => (seq1 + 1, nseqs),
            MatrixFormat::Lower => (0, seq1),
        };
        for seq2 in start..stop {
            let value = matrix.cell(seq1, seq2);
            if value <= 0.0 {
                line.push_str(" 0");
            } else {
                let _ = write!(line, " {value:.precision$}");
            }
        }
        line.push('\n');
        out.write_all(line.as_bytes())?;
    }
    out.flush()?;
    Ok(())
}

/// Reads a distance file back into an owning, symmetric `FlatMatrix`,
/// auto-detecting the square/upper/lower layout from the per-row value
/// counts and mirroring triangles. A `.gz` path is decompressed.
pub fn read_distance_file(path: impl AsRef<Path>) -> Result<FlatMatrix<'static>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let is_gz = path.to_string_lossy().ends_with(".gz");
    if is_gz {
        read_distances_from(BufReader::new(GzDecoder::new(file)))
    } else {
        read_distances_from(BufReader::new(file))
    }
}

/// Parses a PHYLIP matrix from any buffered reader.
pub fn read_distances_from(reader: impl BufRead) -> Result<FlatMatrix<'static>> {
    let mut lines = reader.lines();
    let header = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => {
                return Err(TreeBuildError::invalid_input(
                    "distance file is empty".to_string(),
                ))
            }
        }
    };
    let n: usize = header
        .split_whitespace()
        .next()
        .and_then(|tok| tok.parse().ok())
        .ok_or_else(|| {
            TreeBuildError::invalid_input(format!("bad taxon count line: '{header}'"))
        })?;

    let mut names = Vec::with_capacity(n);
    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(n);
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let name = fields
            .next()
            .ok_or_else(|| TreeBuildError::invalid_input("row with no taxon name".to_string()))?;
        let mut values = Vec::new();
        for field in fields {
            let value: f64 = field.parse().map_err(|_| {
                TreeBuildError::invalid_input(format!(
                    "non-numeric distance '{field}' in row for '{name}'"
                ))
            })?;
            values.push(value);
        }
        names.push(name.to_string());
        rows.push(values);
        if rows.len() == n {
            break;
        }
    }
    if rows.len() != n {
        return Err(TreeBuildError::invalid_input(format!(
            "expected {n} matrix rows, found {}",
            rows.len()
        )));
    }

    let square = rows.iter().all(|r| r.len() == n);
    let upper = rows.iter().enumerate().all(|(i, r)| r.len() == n - 1 - i);
    let lower = rows.iter().enumerate().all(|(i, r)| r.len() == i);

    let mut data = vec![0.0; n * n];
    if square {
        for (i, row) in rows.iter().enumerate() {
            data[i * n..(i + 1) * n].copy_from_slice(row);
        }
    } else if upper {
        for (i, row) in rows.iter().enumerate() {
            for (k, &value) in row.iter().enumerate() {
                let j = i + 1 + k;
                data[i * n + j] = value;
                data[j * n + i] = value;
            }
        }
    } else if lower {
        for (i, row) in rows.iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                data[i * n + j] = value;
                data[j * n + i] = value;
            }
        }
    } else {
        return Err(TreeBuildError::invalid_input(
            "row lengths match none of square/upper/lower layouts".to_string(),
        ));
    }
    FlatMatrix::from_parts(names, data)
}

/// Writes a Newick string (plus the terminating line break) to `path`.
/// `zipped` selects gzip, `append` opens without truncating.
pub fn write_newick_file(
    newick: &str,
    path: impl AsRef<Path>,
    zipped: bool,
    append: bool,
    compression_level: u32,
) -> Result<()> {
    let file = if append {
        OpenOptions::new().create(true).append(true).open(path)?
    } else {
        File::create(path)?
    };
    let mut out: Box<dyn Write> = if zipped {
        Box::new(BufWriter::new(GzEncoder::new(
            file,
            Compression::new(compression_level.min(9)),
        )))
    } else {
        Box::new(BufWriter::new(file))
    };
    out.write_all(newick.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}
