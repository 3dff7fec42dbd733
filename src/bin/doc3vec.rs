use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use doc3vec::net::DEFAULT_NOISE_TABLE_SIZE;
use doc3vec::{
    create_network, export_vectors, infer_paragraph_vectors, real, train, Corpus, Format,
    ModelType, NeuralNet, TrainOptions, Vocab,
};

#[derive(Parser)]
#[command(about = "Word and paragraph vector estimation toolkit", long_about = None, version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train word (and paragraph) vectors on a text file
    Train(TrainArgs),
    /// Infer paragraph vectors for new text with a saved model
    Infer(InferArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// Use text data from FILE to train the model; each line is a paragraph
    #[arg(long = "train", value_name = "FILE")]
    train_file: PathBuf,

    /// Use FILE to save the resulting word vectors
    #[arg(long = "output", value_name = "FILE")]
    output_file: PathBuf,

    /// Use FILE to save the resulting paragraph vectors (paragraph models only)
    #[arg(long = "paragraph-output", value_name = "FILE")]
    paragraph_output_file: Option<PathBuf>,

    /// Save the whole model in bincode format, for use with `infer`
    #[arg(long = "save-model", value_name = "FILE")]
    save_model_file: Option<PathBuf>,

    /// The model to train
    #[arg(long, value_enum, default_value_t = ModelType::Cbow)]
    model: ModelType,

    /// Set size of word vectors
    #[arg(long, default_value_t = 100)]
    size: usize,

    /// Set max skip length between words
    #[arg(long, default_value_t = 5)]
    window: usize,

    /// Set threshold for occurrence of words. Those that appear with higher
    /// frequency in the training data will be randomly down-sampled; useful
    /// range is (0, 1e-5)
    #[arg(long, default_value_t = 1e-3)]
    sample: real,

    /// Use Hierarchical Softmax
    #[arg(long)]
    hs: bool,

    /// Number of negative examples; common values are 3 - 10 (0 = not used)
    #[arg(long, default_value_t = 5)]
    negative: usize,

    /// Use N threads (0 = one per core)
    #[arg(long = "threads", value_name = "N", default_value_t = 0)]
    num_threads: usize,

    /// Run more training iterations
    #[arg(long, default_value_t = 5)]
    iter: usize,

    /// Discard words that appear less than N times
    #[arg(long = "min-count", value_name = "N", default_value_t = 5)]
    min_count: u64,

    /// Set the starting learning rate; default is 0.025 for skip-gram and
    /// PV-DBOW, 0.05 for the others
    #[arg(long)]
    alpha: Option<real>,

    /// Seed for weight initialization and sampling
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Entries in the negative sampling noise table
    #[arg(long, default_value_t = DEFAULT_NOISE_TABLE_SIZE)]
    noise_table_size: usize,

    /// With --model pvdbow, also train skip-gram word vectors
    #[arg(long)]
    dbow_words: bool,

    /// Format of the vector files
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// The vocabulary will be saved to FILE
    #[arg(long = "save-vocab", value_name = "FILE")]
    save_vocab_file: Option<PathBuf>,

    /// The vocabulary will be read from FILE, not constructed from the training data
    #[arg(long = "read-vocab", value_name = "FILE")]
    read_vocab_file: Option<PathBuf>,

    /// Draw a progress bar
    #[arg(long)]
    progress: bool,
}

#[derive(Args)]
struct InferArgs {
    /// A model saved by `train --save-model`
    #[arg(long = "model-file", value_name = "FILE")]
    model_file: PathBuf,

    /// Text to infer vectors for; each line is a paragraph
    #[arg(long = "input", value_name = "FILE")]
    input_file: PathBuf,

    /// Use FILE to save the inferred paragraph vectors
    #[arg(long = "output", value_name = "FILE")]
    output_file: PathBuf,

    /// Inference iterations; defaults to the model's training iterations
    #[arg(long)]
    iter: Option<usize>,

    /// Use N threads (0 = one per core)
    #[arg(long = "threads", value_name = "N")]
    num_threads: Option<usize>,

    /// Format of the vector files
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let f = BufReader::new(
        File::open(path).with_context(|| format!("error opening {}", path.display()))?,
    );
    f.lines()
        .collect::<std::io::Result<Vec<String>>>()
        .with_context(|| format!("error reading {}", path.display()))
}

fn run_train(args: TrainArgs) -> Result<()> {
    let options = TrainOptions {
        model: args.model,
        size: args.size,
        window: args.window,
        sample: args.sample,
        negative: args.negative,
        hs: args.hs,
        alpha: args.alpha,
        epochs: args.iter,
        seed: args.seed,
        threads: args.num_threads,
        noise_table_size: args.noise_table_size,
        dbow_words: args.dbow_words,
        progress: args.progress,
    };
    options.validate()?;

    let lines = read_lines(&args.train_file)?;
    let vocab = match &args.read_vocab_file {
        Some(path) => Vocab::read(path, args.min_count)
            .with_context(|| format!("error reading vocabulary from {}", path.display()))?,
        None => Vocab::learn(&lines, args.min_count),
    };
    if let Some(path) = &args.save_vocab_file {
        vocab
            .save(path)
            .with_context(|| format!("error saving vocabulary to {}", path.display()))?;
    }
    let corpus = Corpus::from_lines(&lines, &vocab);
    drop(lines);

    let mut net = create_network(options, vocab, corpus.paragraph_count())
        .context("error creating network")?;
    train(&mut net, &corpus, true, true, true, args.num_threads).context("training failed")?;

    let format = args.format;
    export_vectors(&net.words, format, Some(&net.vocab), &args.output_file)
        .with_context(|| format!("error writing {}", args.output_file.display()))?;
    info!(path = %args.output_file.display(), "wrote word vectors");

    if let Some(path) = &args.paragraph_output_file {
        let paragraphs = net
            .paragraphs
            .as_ref()
            .with_context(|| format!("{} model has no paragraph vectors", net.options.model))?;
        export_vectors(paragraphs, format, None, path)
            .with_context(|| format!("error writing {}", path.display()))?;
        info!(path = %path.display(), "wrote paragraph vectors");
    }

    if let Some(path) = &args.save_model_file {
        net.save(path)
            .with_context(|| format!("error saving model to {}", path.display()))?;
    }
    Ok(())
}

fn run_infer(args: InferArgs) -> Result<()> {
    let mut net = NeuralNet::load(&args.model_file)
        .with_context(|| format!("error loading model from {}", args.model_file.display()))?;
    if let Some(threads) = args.num_threads {
        net.options.threads = threads;
    }
    let epochs = args.iter.unwrap_or(net.options.epochs);

    let lines = read_lines(&args.input_file)?;
    let corpus = Corpus::from_lines(&lines, &net.vocab);
    let paragraphs =
        infer_paragraph_vectors(&mut net, &corpus, epochs).context("inference failed")?;

    export_vectors(&paragraphs, args.format, None, &args.output_file)
        .with_context(|| format!("error writing {}", args.output_file.display()))?;
    info!(path = %args.output_file.display(), "wrote paragraph vectors");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Train(args) => run_train(args),
        Command::Infer(args) => run_infer(args),
    };
    if let Err(err) = result {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn vector_format_flag() {
        let cli = Cli::try_parse_from([
            "doc3vec", "train", "--train", "in.txt", "--output", "out.bin", "--format", "binary",
            "--model", "pvdm-concat",
        ])
        .unwrap();
        match cli.command {
            Command::Train(args) => {
                assert_eq!(args.format, Format::Binary);
                assert_eq!(args.model, ModelType::PvDmConcat);
            }
            Command::Infer(_) => panic!("parsed as infer"),
        }

        let cli = Cli::try_parse_from([
            "doc3vec", "infer", "--model-file", "m", "--input", "i", "--output", "o",
        ])
        .unwrap();
        match cli.command {
            Command::Infer(args) => assert_eq!(args.format, Format::Text),
            Command::Train(_) => panic!("parsed as train"),
        }

        assert!(Cli::try_parse_from([
            "doc3vec", "infer", "--model-file", "m", "--input", "i", "--output", "o", "--format",
            "csv",
        ])
        .is_err());
    }
}
