//! Word and paragraph embeddings: CBOW, skip-gram, PV-DBOW, PV-DM and
//! concatenating PV-DM, trained with hierarchical softmax and/or negative
//! sampling by lock-free worker threads.

pub mod context;
pub mod corpus;
pub mod error;
pub mod export;
pub mod model;
pub mod net;
pub mod objective;
pub mod rng;
pub mod table;
pub mod train;
pub mod vocab;

#[allow(non_camel_case_types)]
pub type real = f32;

pub use corpus::Corpus;
pub use error::{Error, Result};
pub use export::{export_vectors, Format, Vectors};
pub use model::ModelType;
pub use net::{create_network, NeuralNet, TrainOptions};
pub use table::EmbeddingTable;
pub use train::{infer_line, infer_paragraph_vectors, train};
pub use vocab::Vocab;
