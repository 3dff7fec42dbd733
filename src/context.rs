//! Turning a line of word indices into training examples.

use crate::corpus::MAX_SENTENCE_LENGTH;
use crate::model::ModelType;
use crate::real;
use crate::rng::Rng;
use crate::vocab::Vocab;

/// Word index used to pad concatenated windows past the ends of a line.
pub const PADDING: usize = 0;

/// One training example: predict `target` from `window`.
///
/// Word slots always come first; paragraph slots (flagged in
/// `is_paragraph`) trail them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    pub target: usize,
    pub window: Vec<usize>,
    pub is_paragraph: Vec<bool>,
}

impl Context {
    pub fn with_capacity(capacity: usize) -> Self {
        Context {
            target: 0,
            window: Vec::with_capacity(capacity),
            is_paragraph: Vec::with_capacity(capacity),
        }
    }

    pub fn size(&self) -> usize {
        self.window.len()
    }

    fn num_words(&self) -> usize {
        self.is_paragraph.iter().take_while(|&&p| !p).count()
    }

    pub fn word_slots(&self) -> &[usize] {
        &self.window[..self.num_words()]
    }

    pub fn paragraph_slots(&self) -> &[usize] {
        &self.window[self.num_words()..]
    }

    fn reset(&mut self, target: usize) {
        self.target = target;
        self.window.clear();
        self.is_paragraph.clear();
    }

    fn push(&mut self, index: usize, is_paragraph: bool) {
        self.window.push(index);
        self.is_paragraph.push(is_paragraph);
    }
}

/// The windowing policy of one model.
#[derive(Debug, Clone, Copy)]
pub struct ContextGenerator {
    model: ModelType,
    window: usize,
    dbow_words: bool,
}

impl ContextGenerator {
    /// `dbow_words` makes PVDBOW train skip-gram word windows alongside
    /// the paragraph vector.
    pub fn new(model: ModelType, window: usize, dbow_words: bool) -> Self {
        ContextGenerator {
            model,
            window,
            dbow_words,
        }
    }

    /// Largest window any example can have.
    pub fn window_capacity(&self) -> usize {
        2 * self.window + 1
    }

    /// Context buffers for the longest possible line.
    pub fn buffers(&self) -> Vec<Context> {
        (0..MAX_SENTENCE_LENGTH)
            .map(|_| Context::with_capacity(self.window_capacity()))
            .collect()
    }

    /// Fill `contexts[..n]` with the examples for `line` and return `n`.
    ///
    /// `contexts` only grows if `line` is longer than any line before it.
    /// Lines with fewer than two words produce nothing.
    pub fn generate(
        &self,
        line: &[usize],
        paragraph: Option<usize>,
        contexts: &mut Vec<Context>,
    ) -> usize {
        if line.len() < 2 {
            return 0;
        }
        if contexts.len() < line.len() {
            let capacity = self.window_capacity();
            contexts.resize_with(line.len(), || Context::with_capacity(capacity));
        }

        let w = self.window;
        for (i, (&target, ctx)) in line.iter().zip(contexts.iter_mut()).enumerate() {
            ctx.reset(target);
            let start = i.saturating_sub(w);
            let stop = (i + w + 1).min(line.len());
            let neighbours = (start..stop).filter(|&c| c != i).map(|c| line[c]);

            match self.model {
                ModelType::Cbow | ModelType::Skipgram | ModelType::PvDm => {
                    for word in neighbours {
                        ctx.push(word, false);
                    }
                }
                ModelType::PvDbow => {
                    if self.dbow_words {
                        for word in neighbours {
                            ctx.push(word, false);
                        }
                    }
                }
                ModelType::PvDmConcat => {
                    // Fixed-width window, padded at both ends of the line.
                    for c in (i as isize - w as isize)..=(i + w) as isize {
                        if c == i as isize {
                            continue;
                        }
                        let word = if c < 0 || c as usize >= line.len() {
                            PADDING
                        } else {
                            line[c as usize]
                        };
                        ctx.push(word, false);
                    }
                }
            }

            if self.model.uses_paragraphs() {
                if let Some(p) = paragraph {
                    ctx.push(p, true);
                }
            }
        }
        line.len()
    }
}

/// Randomly drops frequent words while keeping the ranking the same.
#[derive(Debug, Clone, Copy)]
pub struct Subsampler {
    /// `sample * train_words`; zero disables subsampling.
    threshold: real,
}

impl Subsampler {
    pub fn new(sample: real, train_words: u64) -> Self {
        Subsampler {
            threshold: if sample > 0.0 {
                sample * train_words as real
            } else {
                0.0
            },
        }
    }

    /// Decide whether to keep one occurrence of a word seen `count` times.
    pub fn keep(&self, count: u64, rng: &mut Rng) -> bool {
        if self.threshold <= 0.0 {
            return true;
        }
        let f = count as real;
        let k = self.threshold;
        let ran = ((f / k).sqrt() + 1.0) * k / f;
        ran >= rng.rand_real()
    }

    /// Replace `out` with the surviving words of `line`.
    pub fn subsample(&self, line: &[usize], vocab: &Vocab, rng: &mut Rng, out: &mut Vec<usize>) {
        out.clear();
        out.extend(
            line.iter()
                .copied()
                .filter(|&word| self.keep(vocab.at(word).count, rng)),
        );
    }
}
