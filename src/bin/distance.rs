use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;

use doc3vec::{export, Format, Vectors};

/// Number of closest entries that will be shown.
const N: usize = 40;

#[derive(Parser)]
#[command(about = "Interactive nearest neighbours over a word or paragraph vector file")]
struct Options {
    /// Vector file written by `doc3vec train` or `doc3vec infer`
    #[arg(value_name = "FILE")]
    file_name: PathBuf,

    /// Format of the vector file
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

fn run(options: Options) -> Result<()> {
    let vectors = Vectors::load(&options.file_name, options.format)
        .with_context(|| format!("error loading {}", options.file_name.display()))?;

    'outer: loop {
        print!("Enter word or sentence (EXIT to break): ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input).context("error reading stdin")? == 0 {
            break;
        }
        let input = input.trim();
        if input == "EXIT" {
            break;
        }

        let mut bi: Vec<usize> = vec![];
        for word in input.split_whitespace() {
            println!();
            match vectors.lookup_word(word) {
                None => {
                    println!("Word: {word}  Out of dictionary word!");
                    continue 'outer;
                }
                Some(i) => {
                    println!("Word: {word}  Position in vocabulary: {i}");
                    bi.push(i);
                }
            }
        }
        if bi.is_empty() {
            continue;
        }

        let mut query = vec![0.0; vectors.size()];
        for &i in &bi {
            for (q, r) in query.iter_mut().zip(&vectors[i]) {
                *q += r;
            }
        }
        export::normalize(&mut query);

        println!();
        println!("                                              Word       Cosine distance");
        println!("------------------------------------------------------------------------");
        for (i, dist) in vectors.nearest(&query, N, &bi) {
            println!("{:50}\t\t{}", vectors.word(i), dist);
        }
    }
    Ok(())
}

fn main() {
    let options = Options::parse();
    if let Err(err) = run(options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
