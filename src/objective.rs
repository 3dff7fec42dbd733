//! Output layers: hierarchical softmax and negative sampling.
//!
//! Both score a first-layer vector `hidden` against rows of their own
//! second-layer table, add `err * row` into the caller's gradient
//! accumulator, and (if their table is updatable) move each scored row by
//! `lr * err * hidden`. The accumulator is not scaled by any learning rate;
//! the caller applies the first layer's rate when scattering it.

use crate::error::{Error, Result};
use crate::real;
use crate::rng::Rng;
use crate::table::EmbeddingTable;
use crate::vocab::{Vocab, VocabWord};

pub const EXP_TABLE_SIZE: usize = 1000;
pub const MAX_EXP: real = 6.0;

/// Precomputed logistic function over `[-MAX_EXP, MAX_EXP]`.
#[derive(Debug, Clone)]
pub struct ExpTable {
    table: Vec<real>,
}

impl Default for ExpTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpTable {
    pub fn new() -> Self {
        let table = (0..EXP_TABLE_SIZE)
            .map(|i| {
                let j = (i as real / EXP_TABLE_SIZE as real * 2.0 - 1.0) * MAX_EXP;
                let e = (j as f64).exp() as real; // Precompute the exp() table
                e / (e + 1.0) // Precompute f(x) = x / (x + 1)
            })
            .collect();
        ExpTable { table }
    }

    /// Approximate the logistic function, 1 / (1 + e^-x), for `x` inside
    /// `(-MAX_EXP, MAX_EXP)`.
    pub fn sigmoid(&self, x: real) -> real {
        let i = ((x + MAX_EXP) * (EXP_TABLE_SIZE as real / MAX_EXP / 2.0)) as usize;
        self.table[i.min(EXP_TABLE_SIZE - 1)]
    }
}

/// Predicts a word by walking its Huffman path; one binary decision per
/// internal node.
#[derive(Debug)]
pub struct HierarchicalSoftmax {
    pub table: EmbeddingTable,
}

impl HierarchicalSoftmax {
    /// `cols` is the width of the first-layer vector. Rows are zero.
    pub fn new(vocab_size: usize, cols: usize) -> Result<Self> {
        Ok(HierarchicalSoftmax {
            table: EmbeddingTable::new(vocab_size.saturating_sub(1).max(1), cols)?,
        })
    }

    pub fn train(
        &self,
        target: &VocabWord,
        hidden: &[real],
        grad: &mut [real],
        alpha: real,
        sigmoid: &ExpTable,
    ) {
        let lr = self.table.rate(alpha);
        for (&point, &code) in target.point.iter().zip(&target.code) {
            let l2 = point as usize;
            // Propagate hidden -> output
            let f = self.table.dot(l2, hidden);
            if f <= -MAX_EXP || f >= MAX_EXP {
                continue;
            }
            let f = sigmoid.sigmoid(f);
            let err = 1.0 - code as real - f;
            // Propagate errors output -> hidden
            self.table.add_scaled_row(l2, err, grad);
            // Learn weights hidden -> output
            self.table.scatter_one(l2, hidden, lr * err);
        }
    }
}

/// Contrasts the target against `negative` words drawn from the unigram
/// noise distribution.
#[derive(Debug)]
pub struct NegativeSampling {
    pub table: EmbeddingTable,
    noise: Vec<u32>,
    negative: usize,
    vocab_size: usize,
}

impl NegativeSampling {
    pub const POWER: f64 = 0.75;

    /// `cols` is the width of the first-layer vector. Rows are zero.
    pub fn new(vocab: &Vocab, cols: usize, negative: usize, noise_table_size: usize) -> Result<Self> {
        let table = EmbeddingTable::new(vocab.size(), cols)?;
        Self::with_table(table, vocab, negative, noise_table_size)
    }

    /// Wrap existing weights; the noise table is rebuilt from `vocab`.
    pub fn with_table(
        table: EmbeddingTable,
        vocab: &Vocab,
        negative: usize,
        noise_table_size: usize,
    ) -> Result<Self> {
        if table.rows() != vocab.size() {
            return Err(Error::Format(format!(
                "negative sampling table has {} rows for a vocabulary of {}",
                table.rows(),
                vocab.size()
            )));
        }
        if vocab.size() < 2 {
            return Err(Error::Config(
                "negative sampling needs at least one word besides </s>".to_string(),
            ));
        }
        if noise_table_size == 0 {
            return Err(Error::Config("noise table size must be positive".to_string()));
        }
        Ok(NegativeSampling {
            table,
            noise: vocab.negative_table(noise_table_size, Self::POWER),
            negative,
            vocab_size: vocab.size(),
        })
    }

    /// Draw one noise word. Index 0 (`</s>`) is replaced by a uniformly
    /// random word; a draw equal to `target` is discarded.
    pub fn draw(&self, rng: &mut Rng, target: usize) -> Option<usize> {
        let r = rng.rand_u64();
        let mut word = self.noise[(r >> 16) as usize % self.noise.len()] as usize;
        if word == 0 {
            word = r as usize % (self.vocab_size - 1) + 1;
        }
        if word == target {
            None
        } else {
            Some(word)
        }
    }

    /// Prediction for score `f`. Outside the table range the output is
    /// taken as exactly 0 or 1, without a sigmoid lookup.
    pub fn output(f: real, sigmoid: &ExpTable) -> real {
        if f >= MAX_EXP {
            1.0
        } else if f <= -MAX_EXP {
            0.0
        } else {
            sigmoid.sigmoid(f)
        }
    }

    pub fn train(
        &self,
        target: usize,
        hidden: &[real],
        grad: &mut [real],
        alpha: real,
        rng: &mut Rng,
        sigmoid: &ExpTable,
    ) {
        let lr = self.table.rate(alpha);
        for d in 0..=self.negative {
            let (word, label) = if d == 0 {
                (target, 1.0)
            } else {
                match self.draw(rng, target) {
                    Some(word) => (word, 0.0),
                    None => continue,
                }
            };
            let f = self.table.dot(word, hidden);
            let err = label - Self::output(f, sigmoid);
            self.table.add_scaled_row(word, err, grad);
            self.table.scatter_one(word, hidden, lr * err);
        }
    }
}
