//! Row-minimum scans for the agglomerative engines.
//!
//! Each engine iteration needs, for every row r, the column c < r with the
//! smallest distance. The scalar scan works for any `Distance` type; `f32`
//! overrides it with an 8-lane block scan (`wide::f32x8`) that tracks the
//! running minima and their column numbers in parallel lanes, with a
//! scalar tail for the leftover columns. Column numbers come in as a
//! precomputed `0,1,2,…` scratch array so the lane update is a pair of
//! blends.

use wide::{f32x8, CmpLt};

use crate::square::Distance;

/// A candidate join: the minimum of row `row` at column `column`, with the
/// cluster-size imbalance used to break ties between rows.
#[derive(Debug, Clone, Copy)]
pub struct Position<T> {
    pub row: usize,
    pub column: usize,
    pub value: T,
    pub imbalance: usize,
}

impl<T: Distance> Position<T> {
    pub fn unset() -> Self {
        Position {
            row: 0,
            column: 0,
            value: T::INFINITE,
            imbalance: 0,
        }
    }

    /// Lexicographic (value, imbalance) ordering.
    pub fn better_than(&self, rhs: &Self) -> bool {
        self.value < rhs.value || (self.value == rhs.value && self.imbalance < rhs.imbalance)
    }
}

/// Linear scan keeping the first strict minimum.
pub fn scan_row_scalar<T: Distance>(row: &[T]) -> (usize, T) {
    let mut best_column = 0;
    let mut best_value = T::INFINITE;
    for (c, &v) in row.iter().enumerate() {
        if v < best_value {
            best_column = c;
            best_value = v;
        }
    }
    (best_column, best_value)
}

/// Minimum-entry scan over one row, specialised per scalar type.
pub trait RowScan: Distance {
    /// Returns (column, value) of the smallest entry in `row`.
    /// `column_numbers` must hold at least `row.len()` entries of
    /// `0, 1, 2, …` converted to `Self`; the scalar path ignores it.
    fn scan_row(row: &[Self], column_numbers: &[Self]) -> (usize, Self);
}

impl RowScan for f64 {
    fn scan_row(row: &[f64], _column_numbers: &[f64]) -> (usize, f64) {
        scan_row_scalar(row)
    }
}

impl RowScan for f32 {
    fn scan_row(row: &[f32], column_numbers: &[f32]) -> (usize, f32) {
        let mut min_v = f32x8::splat(f32::INFINITY);
        let mut ix_v = f32x8::splat(-1.0);

        let mut k = 0;
        while k + 8 <= row.len() {
            let row_arr: &[f32; 8] = row[k..k + 8].try_into().unwrap();
            let col_arr: &[f32; 8] = column_numbers[k..k + 8].try_into().unwrap();
            let row_v = f32x8::from(*row_arr);
            let less = row_v.cmp_lt(min_v);
            ix_v = less.blend(f32x8::from(*col_arr), ix_v);
            min_v = less.blend(row_v, min_v);
            k += 8;
        }

        let mut best_column = 0;
        let mut best_value = f32::INFINITY;
        let min_lanes = min_v.to_array();
        let ix_lanes = ix_v.to_array();
        for lane in 0..8 {
            if min_lanes[lane] < best_value {
                best_value = min_lanes[lane];
                best_column = ix_lanes[lane] as usize;
            }
        }
        for (c, &v) in row.iter().enumerate().skip(k) {
            if v < best_value {
                best_column = c;
                best_value = v;
            }
        }
        (best_column, best_value)
    }
}
