use rand::rngs::StdRng;
use rand::SeedableRng;
use seq2seq_chatbot::data::{load_prepare_data, trim_rare_words};
use seq2seq_chatbot::{
    Adam, AttnModel, Checkpoint, CorpusConfig, Evaluator, GreedySearchDecoder, ModelConfig,
    Seq2Seq, TrainConfig, Trainer,
};
use std::fs;

const CORPUS: &str = "\
Hi!\tHello.
Hi!\tHello.
How are you?\tFine.
How are you?\tFine.
Hi!\tHello.
How are you?\tFine.
Where is the quokka going on this fine day?\tAway.
";

#[test]
fn train_save_load_and_chat() {
    let dir = tempfile::tempdir().unwrap();
    let datafile = dir.path().join("pairs.txt");
    let test_file = dir.path().join("test.txt");
    fs::write(&datafile, CORPUS).unwrap();
    fs::write(&test_file, "hi\nhow are you\nquokka\n").unwrap();

    let corpus = CorpusConfig {
        corpus_name: "tiny".to_string(),
        datafile,
        save_dir: dir.path().join("save"),
        test_file: test_file.clone(),
        max_length: 6,
        min_count: 2,
    };
    let (mut voc, pairs) = load_prepare_data(&corpus.corpus_name, &corpus.datafile, corpus.max_length).unwrap();
    // The long line is filtered out by length.
    assert_eq!(pairs.len(), 6);
    let pairs = trim_rare_words(&mut voc, pairs, corpus.min_count);
    assert_eq!(pairs.len(), 6);
    assert_eq!(voc.indexes_from_sentence("hi !").unwrap().last(), Some(&2));

    let model_config = ModelConfig {
        model_name: "e2e".to_string(),
        attn_model: AttnModel::Dot,
        hidden_size: 16,
        encoder_n_layers: 1,
        decoder_n_layers: 1,
        dropout: 0.0,
    };
    let train_config = TrainConfig {
        batch_size: 4,
        learning_rate: 0.01,
        print_every: 10,
        save_every: Some(30),
        ..TrainConfig::default()
    };
    let mut rng = StdRng::seed_from_u64(9);
    let model = Seq2Seq::new(&mut rng, &model_config, voc.num_words()).unwrap();
    let mut trainer = Trainer::new(model, Adam::default(), train_config).unwrap();
    let report = trainer.train_iters(&mut rng, &voc, &pairs, &corpus, 60, None).unwrap();
    assert_eq!(report.checkpoints.len(), 2);
    assert!(report.last_loss.unwrap().is_finite());

    let checkpoint = Checkpoint::load(&report.checkpoints[1]).unwrap();
    assert_eq!(checkpoint.iteration, 60);
    let mut restored = Seq2Seq::new(&mut rng, &model_config, checkpoint.voc_dict.num_words()).unwrap();
    checkpoint.restore_model(&mut restored).unwrap();
    assert_eq!(restored, trainer.model);

    let voc = checkpoint.voc_dict;
    let evaluator = Evaluator::new(GreedySearchDecoder::new(&restored), &voc, corpus.max_length);
    let words = evaluator.evaluate("hi !").unwrap();
    assert_eq!(words.len(), corpus.max_length);

    let mut out = Vec::new();
    evaluator.evaluate_file(&test_file, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.matches("Bot: ").count(), 2);
    assert!(text.ends_with("\n> quokka\nError: Encountered unknown word.\n"));
}
