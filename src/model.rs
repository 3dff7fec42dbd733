//! The five models and their per-example update rules.
//!
//! Every update has the same shape: gather the first-layer vector from the
//! input tables, run the output layers into a gradient accumulator, then
//! scatter the accumulator back into the input tables. Tables that are
//! frozen ignore the scatter.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::Error;
use crate::net::NeuralNet;
use crate::real;
use crate::rng::Rng;
use crate::table::EmbeddingTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum ModelType {
    /// Continuous bag of words: predict a word from its averaged window.
    #[value(name = "cbow")]
    Cbow,
    /// Predict a word from each word of its window in turn.
    #[value(name = "skipgram")]
    Skipgram,
    /// Paragraph vector, distributed bag of words: predict every word of a
    /// paragraph from the paragraph vector.
    #[value(name = "pvdbow")]
    PvDbow,
    /// Paragraph vector, distributed memory: CBOW with the paragraph vector
    /// averaged into the window.
    #[value(name = "pvdm")]
    PvDm,
    /// Distributed memory with the paragraph and window vectors
    /// concatenated instead of averaged.
    #[value(name = "pvdm-concat")]
    PvDmConcat,
}

impl ModelType {
    pub fn name(self) -> &'static str {
        match self {
            ModelType::Cbow => "cbow",
            ModelType::Skipgram => "skipgram",
            ModelType::PvDbow => "pvdbow",
            ModelType::PvDm => "pvdm",
            ModelType::PvDmConcat => "pvdm-concat",
        }
    }

    pub fn uses_paragraphs(self) -> bool {
        matches!(
            self,
            ModelType::PvDbow | ModelType::PvDm | ModelType::PvDmConcat
        )
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        <ModelType as ValueEnum>::from_str(s, true).map_err(|_| Error::UnknownModel(s.to_string()))
    }
}

/// Per-thread buffers for one update at a time.
pub struct Scratch {
    pub rng: Rng,
    /// First-layer vector ("neu1").
    hidden: Vec<real>,
    /// Gradient accumulator for the first layer ("neu1e").
    grad: Vec<real>,
}

impl Scratch {
    pub fn new(net: &NeuralNet, rng: Rng) -> Self {
        let width = net.options.layer1_size();
        Scratch {
            rng,
            hidden: vec![0.0; width],
            grad: vec![0.0; width],
        }
    }
}

/// Run one example through the network.
///
/// `paragraphs` is the paragraph table to read and train; paragraph models
/// must be given one.
pub fn train_example(
    net: &NeuralNet,
    paragraphs: Option<&EmbeddingTable>,
    ctx: &Context,
    alpha: real,
    scratch: &mut Scratch,
) {
    match (net.options.model, paragraphs) {
        (ModelType::Cbow, _) => cbow(net, ctx, alpha, scratch),
        (ModelType::Skipgram, _) => skipgram(net, ctx, alpha, scratch),
        (ModelType::PvDbow, Some(p)) => pvdbow(net, p, ctx, alpha, scratch),
        (ModelType::PvDm, Some(p)) => pvdm(net, p, ctx, alpha, scratch),
        (ModelType::PvDmConcat, Some(p)) => pvdm_concat(net, p, ctx, alpha, scratch),
        (model, None) => panic!("{model} model trained without a paragraph table"),
    }
}

/// Hierarchical softmax, then negative sampling, both accumulating into
/// `grad`.
fn objectives(
    net: &NeuralNet,
    target: usize,
    hidden: &[real],
    grad: &mut [real],
    alpha: real,
    rng: &mut Rng,
) {
    if let Some(hs) = &net.hs {
        hs.train(net.vocab.at(target), hidden, grad, alpha, net.sigmoid());
    }
    if let Some(neg) = &net.neg {
        neg.train(target, hidden, grad, alpha, rng, net.sigmoid());
    }
}

fn cbow(net: &NeuralNet, ctx: &Context, alpha: real, s: &mut Scratch) {
    let words = ctx.word_slots();
    if words.is_empty() {
        return;
    }
    let dim = net.words.cols();
    let hidden = &mut s.hidden[..dim];
    let grad = &mut s.grad[..dim];

    // in -> hidden
    net.words.gather_avg(words, hidden);
    grad.fill(0.0);
    objectives(net, ctx.target, hidden, grad, alpha, &mut s.rng);
    // hidden -> in
    net.words.scatter(words, grad, net.words.rate(alpha));
}

/// Skip-gram over whichever table each window slot points into.
fn skipgram_slots<'a>(
    net: &NeuralNet,
    slots: impl Iterator<Item = (usize, &'a EmbeddingTable)>,
    target: usize,
    alpha: real,
    s: &mut Scratch,
) {
    let dim = net.options.size;
    let hidden = &mut s.hidden[..dim];
    let grad = &mut s.grad[..dim];
    for (index, table) in slots {
        table.gather_one(index, hidden);
        grad.fill(0.0);
        objectives(net, target, hidden, grad, alpha, &mut s.rng);
        // Learn weights input -> hidden
        table.scatter_one(index, grad, table.rate(alpha));
    }
}

fn skipgram(net: &NeuralNet, ctx: &Context, alpha: real, s: &mut Scratch) {
    let slots = ctx.word_slots().iter().map(|&w| (w, &net.words));
    skipgram_slots(net, slots, ctx.target, alpha, s);
}

fn pvdbow(net: &NeuralNet, paragraphs: &EmbeddingTable, ctx: &Context, alpha: real, s: &mut Scratch) {
    let slots = ctx
        .window
        .iter()
        .zip(&ctx.is_paragraph)
        .map(|(&index, &is_paragraph)| {
            let table = if is_paragraph { paragraphs } else { &net.words };
            (index, table)
        });
    skipgram_slots(net, slots, ctx.target, alpha, s);
}

fn pvdm(net: &NeuralNet, paragraphs: &EmbeddingTable, ctx: &Context, alpha: real, s: &mut Scratch) {
    let n = ctx.size();
    if n == 0 {
        return;
    }
    let dim = net.options.size;
    let hidden = &mut s.hidden[..dim];
    let grad = &mut s.grad[..dim];

    net.words.gather_sum(ctx.word_slots(), hidden);
    for &p in ctx.paragraph_slots() {
        paragraphs.add_scaled_row(p, 1.0, hidden);
    }
    for h in hidden.iter_mut() {
        *h /= n as real;
    }

    grad.fill(0.0);
    objectives(net, ctx.target, hidden, grad, alpha, &mut s.rng);

    net.words.scatter(ctx.word_slots(), grad, net.words.rate(alpha));
    paragraphs.scatter(ctx.paragraph_slots(), grad, paragraphs.rate(alpha));
}

/// The paragraph vector occupies the first slot of the concatenation,
/// followed by the window words in order.
fn pvdm_concat(
    net: &NeuralNet,
    paragraphs: &EmbeddingTable,
    ctx: &Context,
    alpha: real,
    s: &mut Scratch,
) {
    let dim = net.options.size;
    let width = net.options.layer1_size();
    if ctx.size() * dim != width {
        return;
    }
    let split = ctx.paragraph_slots().len() * dim;
    let hidden = &mut s.hidden[..width];
    let grad = &mut s.grad[..width];

    paragraphs.gather_concat(ctx.paragraph_slots(), &mut hidden[..split]);
    net.words.gather_concat(ctx.word_slots(), &mut hidden[split..]);

    grad.fill(0.0);
    objectives(net, ctx.target, hidden, grad, alpha, &mut s.rng);

    paragraphs.scatter_concat(ctx.paragraph_slots(), &grad[..split], paragraphs.rate(alpha));
    net.words.scatter_concat(ctx.word_slots(), &grad[split..], net.words.rate(alpha));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextGenerator;
    use crate::net::{create_network, TrainOptions};
    use crate::vocab::Vocab;

    fn vocab() -> Vocab {
        Vocab::from_counts([("a", 8), ("b", 6), ("c", 5), ("d", 3), ("e", 2)])
    }

    fn net(model: ModelType, hs: bool, negative: usize) -> NeuralNet {
        let options = TrainOptions {
            model,
            size: 3,
            window: 1,
            hs,
            negative,
            noise_table_size: 1000,
            ..TrainOptions::default()
        };
        create_network(options, vocab(), 2).unwrap()
    }

    fn contexts(net: &NeuralNet, line: &[usize], paragraph: usize) -> Vec<Context> {
        let gen = ContextGenerator::new(net.options.model, net.options.window, false);
        let mut contexts = vec![];
        let n = gen.generate(line, Some(paragraph), &mut contexts);
        contexts.truncate(n);
        contexts
    }

    /// Rows of `table` whose weights differ between the two snapshots.
    fn changed_rows(table: &EmbeddingTable, before: &[real]) -> Vec<usize> {
        let after = table.to_vec();
        let cols = table.cols();
        (0..table.rows())
            .filter(|&r| before[r * cols..][..cols] != after[r * cols..][..cols])
            .collect()
    }

    #[test]
    fn model_names_round_trip() {
        for model in ModelType::value_variants() {
            assert_eq!(model.name().parse::<ModelType>().unwrap(), *model);
            assert_eq!(model.to_string(), model.name());
        }
        assert!(matches!(
            "lstm".parse::<ModelType>(),
            Err(Error::UnknownModel(name)) if name == "lstm"
        ));
    }

    #[test]
    fn cbow_touches_only_the_window() {
        let net = net(ModelType::Cbow, true, 0);
        // Give the output layer something to push against.
        net.hs.as_ref().unwrap().table.init_uniform(&mut Rng::new(8));
        let ctxs = contexts(&net, &[1, 2, 3], 0);
        let before = net.words.to_vec();
        let mut s = Scratch::new(&net, Rng::new(1));
        train_example(&net, None, &ctxs[0], 0.05, &mut s);
        // target 1, window [2]
        assert_eq!(changed_rows(&net.words, &before), vec![2]);
    }

    /// Weight deltas of the word and HS tables after one CBOW example
    /// trained at `alpha = 0.05`.
    fn cbow_step(words_rate: Option<real>, hs_rate: Option<real>) -> (Vec<real>, Vec<real>) {
        let mut net = net(ModelType::Cbow, true, 0);
        net.words.set_learning_rate(words_rate);
        net.hs.as_mut().unwrap().table.set_learning_rate(hs_rate);
        net.hs.as_ref().unwrap().table.init_uniform(&mut Rng::new(8));
        let ctxs = contexts(&net, &[1, 2, 3], 0);
        let words = net.words.to_vec();
        let hs = net.hs.as_ref().unwrap().table.to_vec();
        let mut s = Scratch::new(&net, Rng::new(1));
        train_example(&net, None, &ctxs[0], 0.05, &mut s);

        let delta = |before: Vec<real>, after: Vec<real>| -> Vec<real> {
            after.iter().zip(&before).map(|(a, b)| a - b).collect()
        };
        (
            delta(words, net.words.to_vec()),
            delta(hs, net.hs.as_ref().unwrap().table.to_vec()),
        )
    }

    #[test]
    fn table_learning_rates_replace_alpha() {
        let (words, hs) = cbow_step(None, None);
        assert!(words.iter().any(|&d| d != 0.0));
        assert!(hs.iter().any(|&d| d != 0.0));

        // A zero rate on the word table stops it learning; HS is unaffected.
        let (still_words, same_hs) = cbow_step(Some(0.0), None);
        assert!(still_words.iter().all(|&d| d == 0.0));
        assert_eq!(same_hs, hs);

        // Doubling the HS rate doubles its step and leaves the words alone.
        let (same_words, fast_hs) = cbow_step(None, Some(0.1));
        assert_eq!(same_words, words);
        for (fast, slow) in fast_hs.iter().zip(&hs) {
            assert!((fast - 2.0 * slow).abs() < 1e-6, "{fast} vs 2 * {slow}");
        }
    }

    #[test]
    fn skipgram_updates_each_window_word() {
        let net = net(ModelType::Skipgram, true, 0);
        net.hs.as_ref().unwrap().table.init_uniform(&mut Rng::new(8));
        let ctxs = contexts(&net, &[1, 2, 3], 0);
        let before = net.words.to_vec();
        let mut s = Scratch::new(&net, Rng::new(1));
        train_example(&net, None, &ctxs[1], 0.05, &mut s);
        assert_eq!(changed_rows(&net.words, &before), vec![1, 3]);
    }

    #[test]
    fn pvdbow_trains_only_the_paragraph() {
        let net = net(ModelType::PvDbow, false, 3);
        net.neg.as_ref().unwrap().table.init_uniform(&mut Rng::new(8));
        let paragraphs = net.paragraphs.as_ref().unwrap();
        let ctxs = contexts(&net, &[1, 2, 3], 1);
        let words = net.words.fingerprint();
        let before = paragraphs.to_vec();
        let mut s = Scratch::new(&net, Rng::new(1));
        for ctx in &ctxs {
            train_example(&net, Some(paragraphs), ctx, 0.05, &mut s);
        }
        assert_eq!(net.words.fingerprint(), words);
        assert_eq!(changed_rows(paragraphs, &before), vec![1]);
    }

    #[test]
    fn pvdm_updates_words_and_paragraph() {
        let net = net(ModelType::PvDm, true, 2);
        net.hs.as_ref().unwrap().table.init_uniform(&mut Rng::new(8));
        let paragraphs = net.paragraphs.as_ref().unwrap();
        let ctxs = contexts(&net, &[4, 5], 0);
        let words = net.words.to_vec();
        let paras = paragraphs.to_vec();
        let mut s = Scratch::new(&net, Rng::new(1));
        train_example(&net, Some(paragraphs), &ctxs[0], 0.05, &mut s);
        assert_eq!(changed_rows(&net.words, &words), vec![5]);
        assert_eq!(changed_rows(paragraphs, &paras), vec![0]);
    }

    #[test]
    fn pvdm_concat_gradient_lands_in_matching_slots() {
        let net = net(ModelType::PvDmConcat, true, 0);
        net.hs.as_ref().unwrap().table.init_uniform(&mut Rng::new(8));
        let paragraphs = net.paragraphs.as_ref().unwrap();
        let ctxs = contexts(&net, &[2, 3], 1);
        // Window of target 2: [padding, 3], paragraph 1.
        assert_eq!(ctxs[0].window, vec![0, 3, 1]);
        let words = net.words.to_vec();
        let paras = paragraphs.to_vec();
        let mut s = Scratch::new(&net, Rng::new(1));
        train_example(&net, Some(paragraphs), &ctxs[0], 0.05, &mut s);
        assert_eq!(changed_rows(&net.words, &words), vec![0, 3]);
        assert_eq!(changed_rows(paragraphs, &paras), vec![1]);
    }

    #[test]
    fn frozen_tables_stay_put() {
        let mut net = net(ModelType::PvDm, true, 2);
        net.hs.as_ref().unwrap().table.init_uniform(&mut Rng::new(8));
        net.words.set_update(false);
        net.set_layer2_update(false);
        let ctxs = contexts(&net, &[1, 2, 3, 4], 1);
        let (w, h, n) = (
            net.words.fingerprint(),
            net.hs.as_ref().unwrap().table.fingerprint(),
            net.neg.as_ref().unwrap().table.fingerprint(),
        );
        let paragraphs = net.paragraphs.as_ref().unwrap();
        let p = paragraphs.fingerprint();
        let mut s = Scratch::new(&net, Rng::new(1));
        for ctx in &ctxs {
            train_example(&net, Some(paragraphs), ctx, 0.05, &mut s);
        }
        assert_eq!(net.words.fingerprint(), w);
        assert_eq!(net.hs.as_ref().unwrap().table.fingerprint(), h);
        assert_eq!(net.neg.as_ref().unwrap().table.fingerprint(), n);
        assert_ne!(paragraphs.fingerprint(), p);
    }

    #[test]
    #[should_panic(expected = "without a paragraph table")]
    fn paragraph_model_needs_paragraphs() {
        let net = net(ModelType::PvDm, true, 0);
        let ctxs = contexts(&net, &[1, 2], 0);
        let mut s = Scratch::new(&net, Rng::new(1));
        train_example(&net, None, &ctxs[0], 0.05, &mut s);
    }
}
