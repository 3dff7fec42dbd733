//! Training text, already mapped to vocabulary indices.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::vocab::Vocab;

/// Lines longer than this are split into several lines with the same
/// paragraph id.
pub const MAX_SENTENCE_LENGTH: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub words: Vec<usize>,
    /// Row of the paragraph table this line belongs to.
    pub paragraph: usize,
}

impl Line {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Corpus {
    lines: Vec<Line>,
    /// Total number of words in all lines.
    count: u64,
    paragraphs: usize,
}

impl Corpus {
    /// Each input line is one paragraph, numbered from 0. Words missing from
    /// the vocabulary are dropped.
    pub fn from_lines<I, S>(lines: I, vocab: &Vocab) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut corpus = Corpus::default();
        for line in lines {
            let words = line
                .as_ref()
                .split_whitespace()
                .filter_map(|word| vocab.lookup(word))
                .collect();
            corpus.push_paragraph(words);
        }
        corpus
    }

    /// Build a corpus from lines of vocabulary indices, one paragraph each.
    pub fn from_indices(lines: Vec<Vec<usize>>) -> Self {
        let mut corpus = Corpus::default();
        for words in lines {
            corpus.push_paragraph(words);
        }
        corpus
    }

    pub fn load(path: &Path, vocab: &Vocab) -> Result<Self> {
        let f = BufReader::new(File::open(path)?);
        let lines = f.lines().collect::<std::io::Result<Vec<String>>>()?;
        let corpus = Self::from_lines(lines, vocab);
        info!(
            path = %path.display(),
            lines = corpus.len(),
            paragraphs = corpus.paragraph_count(),
            words = corpus.count(),
            "loaded corpus"
        );
        Ok(corpus)
    }

    fn push_paragraph(&mut self, words: Vec<usize>) {
        let paragraph = self.paragraphs;
        self.paragraphs += 1;
        self.count += words.len() as u64;
        if words.len() <= MAX_SENTENCE_LENGTH {
            self.lines.push(Line { words, paragraph });
        } else {
            for chunk in words.chunks(MAX_SENTENCE_LENGTH) {
                self.lines.push(Line {
                    words: chunk.to_vec(),
                    paragraph,
                });
            }
        }
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Number of lines (after splitting long ones).
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn paragraph_count(&self) -> usize {
        self.paragraphs
    }
}
