//! The vocabulary: word counts, Huffman codes for hierarchical softmax, and
//! the unigram noise table for negative sampling.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Token standing for end-of-line. Always vocabulary index 0.
pub const END_OF_LINE: &str = "</s>";

pub const MAX_CODE_LENGTH: usize = 40;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabWord {
    pub word: String,
    pub count: u64,
    /// Huffman code, root first. `code[d]` is the branch taken at `point[d]`.
    pub code: Vec<u8>,
    /// Internal tree nodes on the path from the root to this word, root
    /// first. Each is a row of the hierarchical softmax table.
    pub point: Vec<u32>,
}

impl VocabWord {
    fn new(word: String, count: u64) -> Self {
        VocabWord {
            word,
            count,
            code: Vec::new(),
            point: Vec::new(),
        }
    }

    pub fn code_length(&self) -> usize {
        self.code.len()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vocab {
    words: Vec<VocabWord>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    /// Sum of all counts.
    train_words: u64,
}

impl Vocab {
    /// Count the words of `lines`. Each line also counts one `</s>`.
    ///
    /// Words seen fewer than `min_count` times are dropped.
    pub fn learn<I, S>(lines: I, min_count: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts: HashMap<String, u64> = HashMap::new();
        let mut eol = 0;
        for line in lines {
            for word in line.as_ref().split_whitespace() {
                *counts.entry(word.to_string()).or_default() += 1;
            }
            eol += 1;
        }
        counts.remove(END_OF_LINE);
        let vocab = Self::build(eol, counts.into_iter().collect(), min_count);
        info!(
            words = vocab.size(),
            train_words = vocab.train_words,
            "learned vocabulary"
        );
        vocab
    }

    /// Build a vocabulary from explicit `(word, count)` pairs. `</s>` is
    /// added at index 0 if it isn't listed.
    pub fn from_counts<S: Into<String>>(counts: impl IntoIterator<Item = (S, u64)>) -> Self {
        let mut eol = 0;
        let mut rest = vec![];
        for (word, count) in counts {
            let word = word.into();
            if word == END_OF_LINE {
                eol = count;
            } else {
                rest.push((word, count));
            }
        }
        Self::build(eol, rest, 0)
    }

    fn build(eol_count: u64, mut counts: Vec<(String, u64)>, min_count: u64) -> Self {
        // Ties broken by word so the order doesn't depend on hashing.
        counts.sort_by(|a, b| Reverse(a.1).cmp(&Reverse(b.1)).then_with(|| a.0.cmp(&b.0)));

        let mut words = vec![VocabWord::new(END_OF_LINE.to_string(), eol_count)];
        words.extend(
            counts
                .into_iter()
                .filter(|&(_, count)| count >= min_count)
                .map(|(word, count)| VocabWord::new(word, count)),
        );

        let mut vocab = Vocab {
            train_words: words.iter().map(|vw| vw.count).sum(),
            words,
            index: HashMap::new(),
        };
        vocab.rebuild_index();
        vocab.create_binary_tree();
        vocab
    }

    /// Must be called after deserializing.
    pub(crate) fn rebuild_index(&mut self) {
        self.index = self
            .words
            .iter()
            .enumerate()
            .map(|(i, vw)| (vw.word.clone(), i))
            .collect();
    }

    pub fn size(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn at(&self, index: usize) -> &VocabWord {
        &self.words[index]
    }

    pub fn words(&self) -> &[VocabWord] {
        &self.words
    }

    /// Returns position of a word in the vocabulary; if the word is not found, returns None.
    pub fn lookup(&self, word: &str) -> Option<usize> {
        self.index.get(word).copied()
    }

    pub fn train_words(&self) -> u64 {
        self.train_words
    }

    // Create binary Huffman tree using the word counts.
    // Frequent words will have short unique binary codes.
    //
    // The two-queue construction below is word2vec's: for the same sorted
    // counts it yields the same codes and points.
    fn create_binary_tree(&mut self) {
        let vocab_size = self.words.len();
        if vocab_size < 2 {
            return;
        }
        let mut count = vec![0u64; vocab_size * 2 + 1];
        let mut binary = vec![0u8; vocab_size * 2 + 1]; // which child a node is of its parent (0 or 1)
        let mut parent_node = vec![0usize; vocab_size * 2 + 1];

        for (c, vw) in count.iter_mut().zip(&self.words) {
            *c = vw.count;
        }
        for c in &mut count[vocab_size..vocab_size * 2] {
            *c = 1_000_000_000_000_000;
        }

        let mut pos1 = vocab_size;
        let mut pos2 = vocab_size;
        // Following algorithm constructs the Huffman tree by adding one node at a time
        for a in 0..(vocab_size - 1) {
            // First, find two smallest nodes 'min1, min2'
            let min1i;
            if pos1 > 0 && count[pos1 - 1] < count[pos2] {
                pos1 -= 1;
                min1i = pos1;
            } else {
                min1i = pos2;
                pos2 += 1;
            }

            let min2i;
            if pos1 > 0 && count[pos1 - 1] < count[pos2] {
                pos1 -= 1;
                min2i = pos1;
            } else {
                min2i = pos2;
                pos2 += 1;
            }

            count[vocab_size + a] = count[min1i] + count[min2i];
            parent_node[min1i] = vocab_size + a;
            parent_node[min2i] = vocab_size + a;
            binary[min2i] = 1;
        }

        // Now assign binary code to each vocabulary word. Internal node
        // `vocab_size + k` becomes hierarchical softmax row `k`; the root
        // is row `vocab_size - 2`.
        let root = vocab_size * 2 - 2;
        for (a, vw) in self.words.iter_mut().enumerate() {
            let mut code = Vec::with_capacity(MAX_CODE_LENGTH);
            let mut point = Vec::with_capacity(MAX_CODE_LENGTH);
            let mut b = a;
            while b != root {
                code.push(binary[b]);
                b = parent_node[b];
                point.push((b - vocab_size) as u32);
            }
            code.reverse();
            point.reverse();
            vw.code = code;
            vw.point = point;
        }
    }

    /// A table of `size` word indices in which each word appears in
    /// proportion to `count^power`.
    pub fn negative_table(&self, size: usize, power: f64) -> Vec<u32> {
        let mut table = Vec::with_capacity(size);
        if self.words.is_empty() {
            return table;
        }
        let train_words_pow = self
            .words
            .iter()
            .map(|v| (v.count as f64).powf(power))
            .sum::<f64>();

        let last = self.words.len() - 1;
        let mut i = 0;
        let mut d1 = (self.words[i].count as f64).powf(power) / train_words_pow;
        for a in 0..size {
            table.push(i as u32);
            if (a as f64 / size as f64) > d1 && i < last {
                i += 1;
                d1 += (self.words[i].count as f64).powf(power) / train_words_pow;
            }
        }
        table
    }

    pub fn save(&self, vocab_file: &Path) -> Result<()> {
        let mut fo = BufWriter::new(File::create(vocab_file)?);
        for vw in &self.words {
            writeln!(fo, "{} {}", vw.word, vw.count)?;
        }
        fo.flush()?;
        Ok(())
    }

    /// Read a vocabulary saved by `save`, dropping words below `min_count`.
    pub fn read(vocab_file: &Path, min_count: u64) -> Result<Self> {
        let fin = BufReader::new(File::open(vocab_file)?);
        let mut eol = 0;
        let mut counts = vec![];
        for (line_num, line) in fin.lines().enumerate() {
            let line = line?;
            let fields = line.split_whitespace().collect::<Vec<&str>>();
            if fields.is_empty() {
                continue;
            }
            if fields.len() != 2 {
                return Err(Error::Format(format!(
                    "vocabulary file syntax error on line {}",
                    line_num + 1
                )));
            }
            let count = fields[1].parse::<u64>().map_err(|_| {
                Error::Format(format!(
                    "unrecognized frequency number format on line {}",
                    line_num + 1
                ))
            })?;
            if fields[0] == END_OF_LINE {
                eol = count;
            } else {
                counts.push((fields[0].to_string(), count));
            }
        }
        Ok(Self::build(eol, counts, min_count))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn six_words() -> Vocab {
        Vocab::from_counts([
            ("</s>", 10),
            ("the", 40),
            ("cat", 12),
            ("sat", 9),
            ("on", 6),
            ("mat", 3),
        ])
    }

    #[test]
    fn sorted_with_eol_first() {
        let v = six_words();
        let words: Vec<&str> = v.words().iter().map(|vw| vw.word.as_str()).collect();
        assert_eq!(words, ["</s>", "the", "cat", "sat", "on", "mat"]);
        assert_eq!(v.train_words(), 80);
        assert_eq!(v.lookup("sat"), Some(3));
        assert_eq!(v.lookup("dog"), None);
    }

    #[test]
    fn learn_counts_lines_and_min_count() {
        let v = Vocab::learn(["a b a", "a c", "b a"], 2);
        assert_eq!(v.at(0).word, END_OF_LINE);
        assert_eq!(v.at(0).count, 3);
        assert_eq!(v.at(1).word, "a");
        assert_eq!(v.at(1).count, 4);
        assert_eq!(v.at(2).word, "b");
        assert_eq!(v.lookup("c"), None);
    }

    #[test]
    fn huffman_paths_are_consistent() {
        let v = six_words();
        let n = v.size();
        let mut seen_codes = HashSet::new();
        for vw in v.words() {
            assert_eq!(vw.code.len(), vw.point.len());
            assert!(!vw.code.is_empty());
            assert_eq!(vw.point[0] as usize, n - 2, "paths start at the root");
            assert!(vw.point.iter().all(|&p| (p as usize) < n - 1));
            assert!(vw.code.iter().all(|&c| c <= 1));
            assert!(seen_codes.insert(vw.code.clone()), "codes are unique");
        }
        assert!(v.at(1).code_length() < v.at(5).code_length());
    }

    #[test]
    fn huffman_codes_are_prefix_free() {
        let v = six_words();
        for a in v.words() {
            for b in v.words() {
                if a.word != b.word {
                    assert!(!b.code.starts_with(&a.code));
                }
            }
        }
    }

    #[test]
    fn negative_table_follows_unigram_power() {
        let v = six_words();
        let table = v.negative_table(100_000, 0.75);
        assert_eq!(table.len(), 100_000);
        let mut hist = vec![0usize; v.size()];
        for &i in &table {
            hist[i as usize] += 1;
        }
        let z: f64 = v.words().iter().map(|w| (w.count as f64).powf(0.75)).sum();
        for (i, vw) in v.words().iter().enumerate() {
            let expected = (vw.count as f64).powf(0.75) / z;
            let got = hist[i] as f64 / table.len() as f64;
            assert!((expected - got).abs() < 0.01, "word {i}: {expected} vs {got}");
        }
    }

    #[test]
    fn save_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        let v = six_words();
        v.save(&path).unwrap();
        let w = Vocab::read(&path, 0).unwrap();
        assert_eq!(v.words(), w.words());

        let pruned = Vocab::read(&path, 9).unwrap();
        assert_eq!(pruned.size(), 4);
    }

    #[test]
    fn read_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        std::fs::write(&path, "the 10\ncat lots\n").unwrap();
        assert!(matches!(Vocab::read(&path, 0), Err(Error::Format(_))));
    }

    #[test]
    fn huffman_codes_for_small_vocabulary() {
        let v = Vocab::from_counts([("a", 4), ("b", 2), ("c", 1)]);
        let paths: Vec<(&str, Vec<u8>, Vec<u32>)> = v
            .words()
            .iter()
            .map(|vw| (vw.word.as_str(), vw.code.clone(), vw.point.clone()))
            .collect();
        assert_eq!(
            paths,
            vec![
                ("</s>", vec![0], vec![2]),
                ("a", vec![1, 1], vec![2, 1]),
                ("b", vec![1, 0, 1], vec![2, 1, 0]),
                ("c", vec![1, 0, 0], vec![2, 1, 0]),
            ]
        );
    }
}
