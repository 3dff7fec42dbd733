//! word2vec-compatible vector files.
//!
//! Both formats start with a `"<rows> <cols>"` header line. Each row is then
//! its token, a space, and either the values as decimal text separated by
//! spaces (text) or `cols` raw native-endian `f32`s (binary, as word2vec
//! writes them), then a newline. Paragraph rows are named `*_<row>`.

use std::cmp::Reverse;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::ops::Index;
use std::path::Path;

use clap::ValueEnum;
use ordered_float::OrderedFloat;

use crate::error::{Error, Result};
use crate::real;
use crate::table::{EmbeddingTable, Real};
use crate::vocab::Vocab;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Binary,
}

/// Token used for paragraph `row`.
pub fn paragraph_token(row: usize) -> String {
    format!("*_{row}")
}

/// Write `table` to `path`. Rows are labelled with words from `vocab`, or as
/// paragraphs when `vocab` is `None`.
pub fn export_vectors(
    table: &EmbeddingTable,
    format: Format,
    vocab: Option<&Vocab>,
    path: &Path,
) -> Result<()> {
    let mut fo = BufWriter::new(File::create(path)?);
    write_vectors(table, format, vocab, &mut fo)?;
    fo.flush()?;
    Ok(())
}

pub fn write_vectors<W: Write>(
    table: &EmbeddingTable,
    format: Format,
    vocab: Option<&Vocab>,
    mut fo: W,
) -> Result<()> {
    if let Some(vocab) = vocab {
        if vocab.size() != table.rows() {
            return Err(Error::Config(format!(
                "vocabulary of {} words can't label a table of {} rows",
                vocab.size(),
                table.rows()
            )));
        }
    }

    writeln!(fo, "{} {}", table.rows(), table.cols())?;
    let mut row = vec![0.0; table.cols()];
    for a in 0..table.rows() {
        match vocab {
            Some(vocab) => write!(fo, "{} ", vocab.at(a).word)?,
            None => write!(fo, "{} ", paragraph_token(a))?,
        }
        match format {
            Format::Binary => {
                table.gather_one(a, &mut row);
                fo.write_all(bytemuck::cast_slice::<real, u8>(&row))?;
            }
            Format::Text => {
                let values = table.row(a).iter().map(Real::get);
                for (i, f) in values.enumerate() {
                    if i > 0 {
                        write!(fo, " ")?;
                    }
                    write!(fo, "{f}")?;
                }
            }
        }
        writeln!(fo)?;
    }
    Ok(())
}

pub fn norm(v: &[f32]) -> f32 {
    v.iter().copied().map(|e| e * e).sum::<f32>().sqrt()
}

pub fn normalize(v: &mut [f32]) {
    let len = norm(v);
    if len > 0.0 {
        for e in v {
            *e /= len;
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&a, &b)| a * b).sum()
}

/// A vector file loaded for similarity queries. Every vector is normalized
/// to unit length on load.
pub struct Vectors {
    /// Embedding vector length (number of dimensions).
    size: usize,

    /// The token of each row.
    vocab: Vec<String>,

    /// `embeddings[k * size..(k+1) * size]` is the vector for row `k`.
    embeddings: Vec<f32>,
}

impl Index<usize> for Vectors {
    type Output = [f32];

    fn index(&self, i: usize) -> &[f32] {
        &self.embeddings[i * self.size..][..self.size]
    }
}

fn invalid(msg: &str) -> Error {
    Error::Format(msg.to_string())
}

impl Vectors {
    pub fn load(file_name: &Path, format: Format) -> Result<Self> {
        Self::read(BufReader::new(File::open(file_name)?), format)
    }

    pub fn read<R: BufRead>(mut f: R, format: Format) -> Result<Self> {
        let mut line = String::new();
        f.read_line(&mut line)?;
        let mut fields = line.split_whitespace();
        let mut header = || -> Result<usize> {
            fields
                .next()
                .ok_or_else(|| invalid("missing header"))?
                .parse()
                .map_err(|_| invalid("bad header"))
        };
        let num_words = header()?;
        let size = header()?;

        let mut vocab: Vec<String> = Vec::with_capacity(num_words);
        let mut m = vec![0.0; num_words * size];
        for b in 0..num_words {
            let row = &mut m[b * size..][..size];
            match format {
                Format::Binary => {
                    let mut vocab_word = Vec::<u8>::new();
                    let count = f.read_until(b' ', &mut vocab_word)?;
                    if count == 0 {
                        return Err(invalid("file ends before the last vector"));
                    }
                    if vocab_word.last() == Some(&b' ') {
                        vocab_word.pop();
                    }
                    vocab_word.retain(|c| *c != b'\n');
                    vocab.push(
                        String::from_utf8(vocab_word).map_err(|_| invalid("token is not UTF-8"))?,
                    );
                    f.read_exact(bytemuck::cast_slice_mut::<f32, u8>(row))?;
                }
                Format::Text => {
                    line.clear();
                    if f.read_line(&mut line)? == 0 {
                        return Err(invalid("file ends before the last vector"));
                    }
                    let mut fields = line.split_whitespace();
                    let word = fields.next().ok_or_else(|| invalid("empty line"))?;
                    vocab.push(word.to_string());
                    for x in row.iter_mut() {
                        *x = fields
                            .next()
                            .ok_or_else(|| invalid("short vector"))?
                            .parse()
                            .map_err(|_| invalid("bad number"))?;
                    }
                }
            }
            normalize(row);
        }

        Ok(Vectors {
            size,
            vocab,
            embeddings: m,
        })
    }

    pub fn num_words(&self) -> usize {
        self.vocab.len()
    }

    /// Returns the vector size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the index for a word as string. Exact match only, case-sensitive.
    pub fn lookup_word(&self, word: &str) -> Option<usize> {
        self.vocab.iter().position(|v| v == word)
    }

    /// Get the word for a word-index. Panics if `word` is out of range.
    pub fn word(&self, word: usize) -> &str {
        &self.vocab[word]
    }

    /// The `n` rows most cosine-similar to `query`, best first, skipping
    /// the rows in `exclude`.
    pub fn nearest(&self, query: &[real], n: usize, exclude: &[usize]) -> Vec<(usize, real)> {
        let mut q = query.to_vec();
        normalize(&mut q);
        let mut scored: Vec<(usize, real)> = (0..self.num_words())
            .filter(|i| !exclude.contains(i))
            .map(|i| (i, dot(&q, &self[i])))
            .collect();
        scored.sort_by_key(|&(_, d)| Reverse(OrderedFloat(d)));
        scored.truncate(n);
        scored
    }
}
