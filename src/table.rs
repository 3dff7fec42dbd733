//! Embedding lookup tables.
//!
//! A table is a row-major `rows x cols` matrix shared by every training
//! thread. Rows are updated Hogwild-style: each weight is an `AtomicU32`
//! accessed with relaxed loads and stores, so concurrent updates to the same
//! row never block but may occasionally lose an addition.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU32, Ordering};

use aligned_box::AlignedBox;

use crate::error::{Error, Result};
use crate::real;
use crate::rng::Rng;

const ALIGNMENT: usize = 128;

/// One weight. Loads and stores are relaxed atomics; `add` is a plain
/// load-then-store, not a read-modify-write.
#[derive(Default)]
#[repr(transparent)]
pub struct Real {
    bits: AtomicU32,
}

impl Real {
    pub fn get(&self) -> real {
        real::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: real) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, x: real) {
        let a = self.get();
        self.set(a + x);
    }
}

pub struct EmbeddingTable {
    rows: usize,
    cols: usize,
    /// `weights[k * cols..(k+1) * cols]` is row `k`.
    weights: AlignedBox<[Real]>,
    /// When false, scatters leave the weights untouched.
    update: bool,
    /// Replaces the global learning rate for this table when set.
    learning_rate: Option<real>,
}

impl fmt::Debug for EmbeddingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingTable")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("update", &self.update)
            .field("learning_rate", &self.learning_rate)
            .finish()
    }
}

impl EmbeddingTable {
    /// Allocate a zero-filled table.
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        let len = rows
            .checked_mul(cols)
            .filter(|&n| n > 0)
            .ok_or(Error::Allocation { rows, cols })?;
        let weights = AlignedBox::<[Real]>::slice_from_default(ALIGNMENT, len)
            .map_err(|_| Error::Allocation { rows, cols })?;
        Ok(EmbeddingTable {
            rows,
            cols,
            weights,
            update: true,
            learning_rate: None,
        })
    }

    /// Build a table from row-major weights, as saved by `to_vec`.
    pub fn from_vec(rows: usize, cols: usize, values: &[real]) -> Result<Self> {
        if values.len() != rows * cols {
            return Err(Error::Format(format!(
                "expected {} weights for a {rows}x{cols} table, got {}",
                rows * cols,
                values.len()
            )));
        }
        let table = Self::new(rows, cols)?;
        for (w, &v) in table.weights.iter().zip(values) {
            w.set(v);
        }
        Ok(table)
    }

    /// Fill with values uniform in `[-0.5 / cols, 0.5 / cols)`.
    pub fn init_uniform(&self, rng: &mut Rng) {
        let cols = self.cols as real;
        for w in self.weights.iter() {
            w.set((rng.rand_real() - 0.5) / cols);
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn update(&self) -> bool {
        self.update
    }

    pub fn set_update(&mut self, update: bool) {
        self.update = update;
    }

    pub fn set_learning_rate(&mut self, rate: Option<real>) {
        self.learning_rate = rate;
    }

    /// The rate this table trains at when the global rate is `alpha`.
    pub fn rate(&self, alpha: real) -> real {
        self.learning_rate.unwrap_or(alpha)
    }

    pub fn row(&self, index: usize) -> &[Real] {
        &self.weights[index * self.cols..][..self.cols]
    }

    pub fn get(&self, row: usize, col: usize) -> real {
        self.weights[row * self.cols + col].get()
    }

    pub fn set(&self, row: usize, col: usize, value: real) {
        self.weights[row * self.cols + col].set(value);
    }

    pub fn to_vec(&self) -> Vec<real> {
        self.weights.iter().map(Real::get).collect()
    }

    /// Hash of every weight's bit pattern. Two tables with equal
    /// fingerprints hold (with overwhelming probability) identical weights.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        hasher.write_usize(self.rows);
        hasher.write_usize(self.cols);
        for w in self.weights.iter() {
            hasher.write_u32(w.bits.load(Ordering::Relaxed));
        }
        hasher.finish()
    }

    /// Copy row `index` into `out`.
    pub fn gather_one(&self, index: usize, out: &mut [real]) {
        for (o, w) in out[..self.cols].iter_mut().zip(self.row(index)) {
            *o = w.get();
        }
    }

    /// Overwrite `out` with the sum of the rows at `indices`.
    pub fn gather_sum(&self, indices: &[usize], out: &mut [real]) {
        out[..self.cols].fill(0.0);
        for &i in indices {
            self.add_scaled_row(i, 1.0, out);
        }
    }

    /// Overwrite `out` with the elementwise mean of the rows at `indices`.
    pub fn gather_avg(&self, indices: &[usize], out: &mut [real]) {
        self.gather_sum(indices, out);
        if !indices.is_empty() {
            let n = indices.len() as real;
            for o in &mut out[..self.cols] {
                *o /= n;
            }
        }
    }

    /// Write the rows at `indices` one after another into `out`, in order.
    ///
    /// To reserve a leading slot for another table's row, pass the tail of
    /// the caller's buffer.
    pub fn gather_concat(&self, indices: &[usize], out: &mut [real]) {
        for (k, &i) in indices.iter().enumerate() {
            self.gather_one(i, &mut out[k * self.cols..][..self.cols]);
        }
    }

    /// `out += scale * row[index]`
    pub fn add_scaled_row(&self, index: usize, scale: real, out: &mut [real]) {
        for (o, w) in out[..self.cols].iter_mut().zip(self.row(index)) {
            *o += scale * w.get();
        }
    }

    /// Dot product of row `index` with `v`.
    pub fn dot(&self, index: usize, v: &[real]) -> real {
        self.row(index)
            .iter()
            .zip(&v[..self.cols])
            .map(|(w, &x)| w.get() * x)
            .sum()
    }

    /// `row[index] += lr * grad`
    pub fn scatter_one(&self, index: usize, grad: &[real], lr: real) {
        if !self.update {
            return;
        }
        for (w, &g) in self.row(index).iter().zip(&grad[..self.cols]) {
            w.add(lr * g);
        }
    }

    /// Backward pass of `gather_avg` (and `gather_sum`): every contributing
    /// row receives the whole `lr * grad`, as in word2vec's CBOW.
    pub fn scatter(&self, indices: &[usize], grad: &[real], lr: real) {
        for &i in indices {
            self.scatter_one(i, grad, lr);
        }
    }

    /// Backward pass of `gather_concat`: row `indices[k]` receives slot `k`
    /// of `grad`.
    pub fn scatter_concat(&self, indices: &[usize], grad: &[real], lr: real) {
        for (k, &i) in indices.iter().enumerate() {
            self.scatter_one(i, &grad[k * self.cols..][..self.cols], lr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: usize, cols: usize) -> EmbeddingTable {
        let t = EmbeddingTable::new(rows, cols).unwrap();
        t.init_uniform(&mut Rng::new(42));
        t
    }

    #[test]
    fn new_is_zeroed() {
        let t = EmbeddingTable::new(4, 3).unwrap();
        assert!(t.to_vec().iter().all(|&w| w == 0.0));
        assert!(t.update());
    }

    #[test]
    fn empty_table_is_an_allocation_error() {
        assert!(matches!(
            EmbeddingTable::new(0, 10),
            Err(Error::Allocation { rows: 0, cols: 10 })
        ));
    }

    #[test]
    fn uniform_init_range() {
        let t = table(50, 8);
        let bound = 0.5 / 8.0;
        for w in t.to_vec() {
            assert!(w >= -bound && w < bound, "{w} out of range");
        }
    }

    #[test]
    fn gather_avg_is_mean_of_rows() {
        let t = table(10, 5);
        let indices = [1, 4, 4, 9];
        let mut avg = vec![0.0; 5];
        t.gather_avg(&indices, &mut avg);

        let mut expected = vec![0.0; 5];
        let mut row = vec![0.0; 5];
        for &i in &indices {
            t.gather_one(i, &mut row);
            for (e, r) in expected.iter_mut().zip(&row) {
                *e += r;
            }
        }
        for (a, e) in avg.iter().zip(&expected) {
            assert!((a - e / 4.0).abs() < 1e-7);
        }
    }

    #[test]
    fn gather_concat_is_ordered_rows() {
        let t = table(6, 3);
        let indices = [5, 0, 2];
        let mut out = vec![0.0; 9];
        t.gather_concat(&indices, &mut out);

        let mut row = vec![0.0; 3];
        for (k, &i) in indices.iter().enumerate() {
            t.gather_one(i, &mut row);
            assert_eq!(&out[k * 3..][..3], &row[..]);
        }
    }

    #[test]
    fn dot_matches_gathered_row() {
        let t = table(3, 4);
        let v = [1.0, -2.0, 0.5, 3.0];
        let mut row = vec![0.0; 4];
        t.gather_one(2, &mut row);
        let expected: real = row.iter().zip(&v).map(|(a, b)| a * b).sum();
        assert_eq!(t.dot(2, &v), expected);
    }

    #[test]
    fn frozen_scatter_is_bit_identical() {
        let mut t = table(8, 4);
        t.set_update(false);
        let before = t.to_vec();
        let grad = [1e3, -7.5, real::NAN, 0.25];
        t.scatter_one(3, &grad, 0.1);
        t.scatter(&[0, 1, 1, 7], &grad, 1.0);
        t.scatter_concat(&[2, 5], &[1.0; 8], 1.0);
        let after = t.to_vec();
        assert!(before
            .iter()
            .zip(&after)
            .all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    #[test]
    fn scatter_adds_scaled_gradient() {
        let t = EmbeddingTable::new(3, 2).unwrap();
        t.scatter(&[0, 2], &[1.0, -1.0], 0.5);
        assert_eq!(t.to_vec(), vec![0.5, -0.5, 0.0, 0.0, 0.5, -0.5]);

        t.scatter_concat(&[1, 0], &[1.0, 2.0, 3.0, 4.0], 1.0);
        assert_eq!(t.to_vec(), vec![3.5, 3.5, 1.0, 2.0, 0.5, -0.5]);
    }

    #[test]
    fn learning_rate_override() {
        let mut t = EmbeddingTable::new(1, 1).unwrap();
        assert_eq!(t.rate(0.025), 0.025);
        t.set_learning_rate(Some(0.1));
        assert_eq!(t.rate(0.025), 0.1);
    }

    #[test]
    fn fingerprint_tracks_changes() {
        let t = table(4, 4);
        let a = t.fingerprint();
        assert_eq!(a, t.fingerprint());
        t.set(1, 1, t.get(1, 1) + 1.0);
        assert_ne!(a, t.fingerprint());
    }

    #[test]
    fn from_vec_round_trip() {
        let t = table(3, 3);
        let copy = EmbeddingTable::from_vec(3, 3, &t.to_vec()).unwrap();
        assert_eq!(t.fingerprint(), copy.fingerprint());
        assert!(EmbeddingTable::from_vec(3, 3, &[0.0; 8]).is_err());
    }
}
