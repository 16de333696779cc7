//! Command-line front end: trains the chatbot, evaluates the test file and
//! optionally chats on the console.

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use seq2seq_chatbot::data::{load_prepare_data, trim_rare_words, SentencePair};
use seq2seq_chatbot::{
    checkpoint_path, Adam, ChatResult, Checkpoint, CorpusConfig, Evaluator, GreedySearchDecoder,
    ModelConfig, Seq2Seq, TrainConfig, Trainer, Vocabulary,
};
use std::io;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_ITERATIONS: usize = 4000;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(long, help = "Train the model, resuming from the loaded checkpoint with --eval")]
    train: bool,
    #[clap(long, help = "Load the checkpoint saved at --checkpoint-iter before anything else")]
    eval: bool,
    #[clap(
        long,
        default_value = "0",
        allow_negative_numbers = true,
        help = "Training iterations (4000 when not positive)"
    )]
    iter: i64,
    #[clap(long, default_value = "4000", help = "Iteration of the checkpoint loaded by --eval")]
    checkpoint_iter: usize,
    #[clap(long, help = "Chat on the console after evaluating the test file")]
    interactive: bool,
    #[clap(long, help = "Random seed (default: from entropy)")]
    seed: Option<u64>,
    #[clap(flatten)]
    model_config: ModelConfig,
    #[clap(flatten)]
    train_config: TrainConfig,
    #[clap(flatten)]
    corpus_config: CorpusConfig,
}

impl Cli {
    fn n_iteration(&self) -> usize {
        usize::try_from(self.iter)
            .ok()
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_ITERATIONS)
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_corpus(corpus: &CorpusConfig) -> ChatResult<(Vocabulary, Vec<SentencePair>)> {
    let (mut voc, pairs) = load_prepare_data(&corpus.corpus_name, &corpus.datafile, corpus.max_length)?;
    let pairs = trim_rare_words(&mut voc, pairs, corpus.min_count);
    Ok((voc, pairs))
}

fn main() -> ChatResult<()> {
    init_logging();
    let cli = Cli::parse();
    cli.model_config.validate()?;
    cli.train_config.validate()?;
    cli.corpus_config.validate()?;
    let corpus = &cli.corpus_config;

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // Pure evaluation runs on the checkpoint's vocabulary alone.
    let (mut voc, pairs) = if cli.train || !cli.eval {
        load_corpus(corpus)?
    } else {
        (Vocabulary::new(&corpus.corpus_name), Vec::new())
    };

    let checkpoint = if cli.eval {
        let path = checkpoint_path(
            &corpus.save_dir,
            &cli.model_config,
            &corpus.corpus_name,
            cli.checkpoint_iter,
        );
        let checkpoint = Checkpoint::load(&path)?;
        voc = checkpoint.voc_dict.clone();
        Some(checkpoint)
    } else {
        None
    };

    info!("Building encoder and decoder ...");
    let mut model = Seq2Seq::new(&mut rng, &cli.model_config, voc.num_words())?;
    if let Some(checkpoint) = &checkpoint {
        checkpoint.restore_model(&mut model)?;
    }
    info!(params = model.num_params(), "Models built and ready to go!");

    if cli.train {
        info!("Building optimizers ...");
        let mut trainer = Trainer::new(model, Adam::default(), cli.train_config.clone())?;
        if let Some(checkpoint) = &checkpoint {
            trainer.restore_optimizers(checkpoint);
        }
        info!("Starting Training!");
        let report = trainer.train_iters(
            &mut rng,
            &voc,
            &pairs,
            corpus,
            cli.n_iteration(),
            checkpoint.as_ref(),
        )?;
        info!(
            last_iteration = ?report.last_iteration,
            checkpoints = report.checkpoints.len(),
            "Training finished."
        );
        model = trainer.model;
    }

    let evaluator = Evaluator::new(GreedySearchDecoder::new(&model), &voc, corpus.max_length);
    let mut out = io::stdout().lock();
    evaluator.evaluate_file(&corpus.test_file, &mut out)?;
    if cli.interactive {
        evaluator.evaluate_input(io::stdin().lock(), &mut out)?;
    }
    Ok(())
}
