//! Multi-threaded training and paragraph-vector inference.
//!
//! The corpus is split into one contiguous range of lines per thread. Each
//! thread loops over its own range `epochs` times with no synchronization
//! beyond a shared, relaxed word counter that drives the learning-rate
//! schedule; weight updates are lock-free (see `table`).

use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info};

use crate::context::{ContextGenerator, Subsampler};
use crate::corpus::{Corpus, MAX_SENTENCE_LENGTH};
use crate::error::{Error, Result};
use crate::model::{self, Scratch};
use crate::net::NeuralNet;
use crate::real;
use crate::rng::Rng;
use crate::table::EmbeddingTable;

/// The learning rate never decays below this fraction of its start.
pub const LEARNING_RATE_FLOOR: real = 0.0001;

/// Words a thread processes between updates of the shared counter.
const REPORT_INTERVAL: u64 = 10_000;

/// Linear decay from `starting_alpha` towards the floor as `words_done`
/// approaches `words_total`.
pub fn learning_rate(starting_alpha: real, words_done: u64, words_total: u64) -> real {
    starting_alpha
        * (1.0 - words_done as real / (words_total + 1) as real).max(LEARNING_RATE_FLOOR)
}

/// Split `lines` lines into `threads` contiguous ranges; the last range
/// takes the remainder.
pub fn partition(lines: usize, threads: usize) -> Vec<Range<usize>> {
    let threads = threads.max(1);
    let chunk = lines / threads;
    (0..threads)
        .map(|i| {
            let start = i * chunk;
            let end = if i + 1 == threads { lines } else { start + chunk };
            start..end
        })
        .collect()
}

fn resolve_threads(num_threads: usize) -> usize {
    if num_threads > 0 {
        num_threads
    } else {
        thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }
}

/// Train `net` on `corpus` for `net.options.epochs` epochs, blocking until
/// every thread is done.
///
/// The three flags choose which tables learn; the others are still used
/// for the forward pass. `num_threads == 0` uses one thread per core.
pub fn train(
    net: &mut NeuralNet,
    corpus: &Corpus,
    update_words: bool,
    update_paragraphs: bool,
    update_layer2: bool,
    num_threads: usize,
) -> Result<()> {
    net.words.set_update(update_words);
    if let Some(paragraphs) = &mut net.paragraphs {
        paragraphs.set_update(update_paragraphs);
    }
    net.set_layer2_update(update_layer2);

    let net: &NeuralNet = net;
    run(
        net,
        net.paragraphs.as_ref(),
        corpus,
        net.options.epochs,
        num_threads,
    )
}

/// Fit fresh paragraph vectors for `corpus` (one row per paragraph)
/// without changing the word vectors or output layers. Their update flags
/// are restored afterwards, whether or not the run succeeds.
///
/// Uses `net.options.threads` threads.
pub fn infer_paragraph_vectors(
    net: &mut NeuralNet,
    corpus: &Corpus,
    epochs: usize,
) -> Result<EmbeddingTable> {
    if !net.options.model.uses_paragraphs() {
        return Err(Error::Config(format!(
            "{} model has no paragraph vectors to infer",
            net.options.model
        )));
    }
    if epochs == 0 {
        return Err(Error::Config("epoch count must be positive".to_string()));
    }
    if corpus.paragraph_count() == 0 {
        return Err(Error::Config("no paragraphs to infer".to_string()));
    }

    let paragraphs = EmbeddingTable::new(corpus.paragraph_count(), net.options.size)?;
    paragraphs.init_uniform(&mut Rng::new(net.options.seed));

    let (words_update, layer2_update) = (net.words.update(), net.layer2_update());
    net.words.set_update(false);
    net.set_layer2_update(false);
    info!(paragraphs = paragraphs.rows(), epochs, "inferring paragraph vectors");
    let result = run(net, Some(&paragraphs), corpus, epochs, net.options.threads);
    net.words.set_update(words_update);
    net.set_layer2_update(layer2_update);

    result.map(|()| paragraphs)
}

/// Infer the vector of a single paragraph.
pub fn infer_line(net: &mut NeuralNet, words: &[usize], epochs: usize) -> Result<Vec<real>> {
    let corpus = Corpus::from_indices(vec![words.to_vec()]);
    let table = infer_paragraph_vectors(net, &corpus, epochs)?;
    let mut v = vec![0.0; table.cols()];
    table.gather_one(0, &mut v);
    Ok(v)
}

fn run(
    net: &NeuralNet,
    paragraphs: Option<&EmbeddingTable>,
    corpus: &Corpus,
    epochs: usize,
    num_threads: usize,
) -> Result<()> {
    let model = net.options.model;
    match paragraphs {
        None if model.uses_paragraphs() => {
            return Err(Error::Config(format!(
                "{model} model needs a paragraph table; create the network with a paragraph count"
            )));
        }
        Some(p) if model.uses_paragraphs() && p.rows() < corpus.paragraph_count() => {
            return Err(Error::Config(format!(
                "corpus has {} paragraphs but the paragraph table only {} rows",
                corpus.paragraph_count(),
                p.rows()
            )));
        }
        _ => {}
    }
    if corpus.is_empty() {
        return Ok(());
    }

    let num_threads = resolve_threads(num_threads);
    let session = Session::new(net, paragraphs, corpus, epochs);
    info!(
        model = %model,
        threads = num_threads,
        lines = corpus.len(),
        words = corpus.count(),
        epochs,
        alpha = session.starting_alpha,
        "starting training"
    );

    let start = Instant::now();
    let ranges = partition(corpus.len(), num_threads);
    debug!(?ranges, "partitioned corpus");
    let mut failed = None;
    thread::scope(|s| {
        let session = &session;
        let threads = ranges
            .into_iter()
            .enumerate()
            .map(|(id, lines)| s.spawn(move || session.worker(id, lines)))
            .collect::<Vec<_>>();
        for (id, thread) in threads.into_iter().enumerate() {
            if thread.join().is_err() {
                error!(thread = id, "worker thread panicked");
                failed.get_or_insert(id);
            }
        }
    });
    session.progress.finish_and_clear();

    if let Some(id) = failed {
        return Err(Error::Worker(id));
    }
    info!(
        elapsed = ?start.elapsed(),
        words = session.word_count_actual.load(Ordering::Relaxed),
        "training finished"
    );
    Ok(())
}

/// State shared by the threads of one run.
struct Session<'a> {
    net: &'a NeuralNet,
    paragraphs: Option<&'a EmbeddingTable>,
    corpus: &'a Corpus,
    generator: ContextGenerator,
    subsampler: Subsampler,
    epochs: usize,
    starting_alpha: real,
    total_words: u64,
    /// Words processed by all threads so far. Updated with relaxed atomics;
    /// threads may see slightly stale values.
    word_count_actual: AtomicU64,
    progress: ProgressBar,
}

impl<'a> Session<'a> {
    fn new(
        net: &'a NeuralNet,
        paragraphs: Option<&'a EmbeddingTable>,
        corpus: &'a Corpus,
        epochs: usize,
    ) -> Self {
        let options = &net.options;
        let total_words = epochs as u64 * corpus.count();
        let progress = if options.progress {
            let style = ProgressStyle::with_template(
                "{elapsed_precise} [{bar:40}] {percent}% {per_sec} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            ProgressBar::new(total_words).with_style(style)
        } else {
            ProgressBar::hidden()
        };
        Session {
            net,
            paragraphs,
            corpus,
            generator: ContextGenerator::new(options.model, options.window, options.dbow_words),
            subsampler: Subsampler::new(options.sample, net.vocab.train_words()),
            epochs,
            starting_alpha: options.starting_alpha(),
            total_words,
            word_count_actual: AtomicU64::new(0),
            progress,
        }
    }

    /// Add `n` words to the shared count and return the learning rate for
    /// the new total.
    fn report_progress(&self, n: u64) -> real {
        let word_count_actual = self.word_count_actual.fetch_add(n, Ordering::Relaxed) + n;
        let alpha = learning_rate(self.starting_alpha, word_count_actual, self.total_words);
        self.progress.set_position(word_count_actual);
        self.progress.set_message(format!("alpha {alpha:.6}"));
        debug!(words = word_count_actual, alpha, "progress");
        alpha
    }

    fn worker(&self, id: usize, lines: Range<usize>) {
        if lines.is_empty() {
            return;
        }
        let net = self.net;
        let rng = Rng::new(net.options.seed.wrapping_add(id as u64));
        let mut scratch = Scratch::new(net, rng);
        let mut contexts = self.generator.buffers();
        let mut sentence: Vec<usize> = Vec::with_capacity(MAX_SENTENCE_LENGTH);

        let mut alpha = self.starting_alpha;
        let mut word_count: u64 = 0;
        let mut last_word_count: u64 = 0;
        let mut epoch = 0;
        let mut cursor = lines.start;
        loop {
            if word_count - last_word_count > REPORT_INTERVAL {
                alpha = self.report_progress(word_count - last_word_count);
                last_word_count = word_count;
            }

            if cursor == lines.end {
                self.word_count_actual
                    .fetch_add(word_count - last_word_count, Ordering::Relaxed);
                word_count = 0;
                last_word_count = 0;
                epoch += 1;
                if epoch == self.epochs {
                    break;
                }
                cursor = lines.start;
                continue;
            }

            let line = &self.corpus.lines()[cursor];
            cursor += 1;
            word_count += line.len() as u64;

            self.subsampler
                .subsample(&line.words, &net.vocab, &mut scratch.rng, &mut sentence);
            let n = self
                .generator
                .generate(&sentence, Some(line.paragraph), &mut contexts);
            for ctx in &contexts[..n] {
                model::train_example(net, self.paragraphs, ctx, alpha, &mut scratch);
            }
        }
    }
}
