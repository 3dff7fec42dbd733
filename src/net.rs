//! The network: options, weight tables, and snapshots.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::model::ModelType;
use crate::objective::{ExpTable, HierarchicalSoftmax, NegativeSampling};
use crate::real;
use crate::rng::Rng;
use crate::table::EmbeddingTable;
use crate::vocab::Vocab;

pub const DEFAULT_NOISE_TABLE_SIZE: usize = 100_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOptions {
    pub model: ModelType,
    /// Embedding vector length (number of dimensions).
    pub size: usize,
    /// Max skip length between words.
    pub window: usize,
    /// Threshold for occurrence of words. Those that appear with higher
    /// frequency in the training data will be randomly down-sampled.
    pub sample: real,
    /// Number of negative examples; 0 disables negative sampling.
    pub negative: usize,
    /// Use hierarchical softmax.
    pub hs: bool,
    /// Starting learning rate; `None` picks the model's default.
    pub alpha: Option<real>,
    pub epochs: usize,
    pub seed: u64,
    /// Threads for paragraph inference; 0 means one per core.
    pub threads: usize,
    pub noise_table_size: usize,
    /// Train skip-gram word vectors alongside PVDBOW paragraph vectors.
    pub dbow_words: bool,
    /// Draw a progress bar while training.
    pub progress: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        TrainOptions {
            model: ModelType::Cbow,
            size: 100,
            window: 5,
            sample: 1e-3,
            negative: 5,
            hs: false,
            alpha: None,
            epochs: 5,
            seed: 1,
            threads: 0,
            noise_table_size: DEFAULT_NOISE_TABLE_SIZE,
            dbow_words: false,
            progress: false,
        }
    }
}

impl TrainOptions {
    /// 0.05 for the averaging models, 0.025 for the skip-gram-like ones,
    /// unless `alpha` is set.
    pub fn starting_alpha(&self) -> real {
        self.alpha.unwrap_or(match self.model {
            ModelType::Cbow | ModelType::PvDm | ModelType::PvDmConcat => 0.05,
            ModelType::Skipgram | ModelType::PvDbow => 0.025,
        })
    }

    /// Width of the vector fed to the output layers.
    pub fn layer1_size(&self) -> usize {
        match self.model {
            ModelType::PvDmConcat => (2 * self.window + 1) * self.size,
            _ => self.size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Config(msg.to_string()));
        if self.size == 0 {
            return fail("vector size must be positive");
        }
        if self.window == 0 {
            return fail("window must be positive");
        }
        if self.epochs == 0 {
            return fail("epoch count must be positive");
        }
        if !self.hs && self.negative == 0 {
            return fail("enable hierarchical softmax, negative sampling, or both");
        }
        if !(self.sample >= 0.0) {
            return fail("sample rate must not be negative");
        }
        if !(self.starting_alpha() > 0.0) {
            return fail("learning rate must be positive");
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct NeuralNet {
    pub options: TrainOptions,
    pub vocab: Vocab,
    /// The learned word vectors.
    pub words: EmbeddingTable,
    /// The learned paragraph vectors, for paragraph models trained on a
    /// corpus.
    pub paragraphs: Option<EmbeddingTable>,
    pub hs: Option<HierarchicalSoftmax>,
    pub neg: Option<NegativeSampling>,
    sigmoid: ExpTable,
}

/// Allocate and initialize a network for `vocab` and (for paragraph models)
/// `paragraph_count` paragraphs.
///
/// Word and paragraph vectors start small and random; output layers start
/// at zero.
pub fn create_network(
    options: TrainOptions,
    vocab: Vocab,
    paragraph_count: usize,
) -> Result<NeuralNet> {
    options.validate()?;
    if vocab.is_empty() {
        return Err(Error::Config("empty vocabulary".to_string()));
    }
    let layer1_size = options.layer1_size();

    let mut rng = Rng::new(options.seed);
    let words = EmbeddingTable::new(vocab.size(), options.size)?;
    words.init_uniform(&mut rng);

    let paragraphs = if options.model.uses_paragraphs() && paragraph_count > 0 {
        let table = EmbeddingTable::new(paragraph_count, options.size)?;
        table.init_uniform(&mut rng);
        Some(table)
    } else {
        None
    };

    let hs = if options.hs {
        Some(HierarchicalSoftmax::new(vocab.size(), layer1_size)?)
    } else {
        None
    };
    let neg = if options.negative > 0 {
        Some(NegativeSampling::new(
            &vocab,
            layer1_size,
            options.negative,
            options.noise_table_size,
        )?)
    } else {
        None
    };

    info!(
        model = %options.model,
        vocab = vocab.size(),
        paragraphs = paragraph_count,
        size = options.size,
        hs = options.hs,
        negative = options.negative,
        "created network"
    );
    Ok(NeuralNet {
        options,
        vocab,
        words,
        paragraphs,
        hs,
        neg,
        sigmoid: ExpTable::new(),
    })
}

impl NeuralNet {
    pub fn sigmoid(&self) -> &ExpTable {
        &self.sigmoid
    }

    /// Freeze or unfreeze both output layers together.
    pub fn set_layer2_update(&mut self, update: bool) {
        if let Some(hs) = &mut self.hs {
            hs.table.set_update(update);
        }
        if let Some(neg) = &mut self.neg {
            neg.table.set_update(update);
        }
    }

    pub fn layer2_update(&self) -> bool {
        self.hs
            .iter()
            .map(|hs| &hs.table)
            .chain(self.neg.iter().map(|neg| &neg.table))
            .any(EmbeddingTable::update)
    }

    /// Save options, vocabulary and every table in bincode format.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut fo = BufWriter::new(File::create(path)?);
        let snapshot = Snapshot {
            options: self.options.clone(),
            vocab: self.vocab.clone(),
            words: TableData::from(&self.words),
            paragraphs: self.paragraphs.as_ref().map(TableData::from),
            hs: self.hs.as_ref().map(|hs| TableData::from(&hs.table)),
            neg: self.neg.as_ref().map(|neg| TableData::from(&neg.table)),
        };
        bincode::serialize_into(&mut fo, &snapshot)?;
        fo.flush()?;
        info!(path = %path.display(), "saved model");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let f = BufReader::new(File::open(path)?);
        let snapshot: Snapshot = bincode::deserialize_from(f)?;
        let Snapshot {
            options,
            mut vocab,
            words,
            paragraphs,
            hs,
            neg,
        } = snapshot;
        options.validate()?;
        vocab.rebuild_index();

        let words = words.into_table()?;
        if words.rows() != vocab.size() {
            return Err(Error::Format(format!(
                "word table has {} rows for a vocabulary of {}",
                words.rows(),
                vocab.size()
            )));
        }
        let hs = hs
            .map(|t| t.into_table().map(|table| HierarchicalSoftmax { table }))
            .transpose()?;
        let neg = neg
            .map(|t| {
                t.into_table().and_then(|table| {
                    NegativeSampling::with_table(
                        table,
                        &vocab,
                        options.negative,
                        options.noise_table_size,
                    )
                })
            })
            .transpose()?;
        let net = NeuralNet {
            paragraphs: paragraphs.map(TableData::into_table).transpose()?,
            options,
            vocab,
            words,
            hs,
            neg,
            sigmoid: ExpTable::new(),
        };
        info!(path = %path.display(), "loaded model");
        Ok(net)
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    options: TrainOptions,
    vocab: Vocab,
    words: TableData,
    paragraphs: Option<TableData>,
    hs: Option<TableData>,
    neg: Option<TableData>,
}

#[derive(Serialize, Deserialize)]
struct TableData {
    rows: usize,
    cols: usize,
    weights: Vec<real>,
}

impl From<&EmbeddingTable> for TableData {
    fn from(table: &EmbeddingTable) -> Self {
        TableData {
            rows: table.rows(),
            cols: table.cols(),
            weights: table.to_vec(),
        }
    }
}

impl TableData {
    fn into_table(self) -> Result<EmbeddingTable> {
        EmbeddingTable::from_vec(self.rows, self.cols, &self.weights)
    }
}
