use rand::rngs::StdRng;
use rand::SeedableRng;
use seq2seq_chatbot::data::{batch_to_train_data, SentencePair};
use seq2seq_chatbot::{
    checkpoint_path, Adam, AttnModel, Checkpoint, ChatbotError, ModelConfig, ParamGroup, Seq2Seq,
    TrainConfig, Trainer, Vocabulary,
};

fn tiny_config() -> ModelConfig {
    ModelConfig {
        model_name: "roundtrip".to_string(),
        attn_model: AttnModel::General,
        hidden_size: 6,
        encoder_n_layers: 1,
        decoder_n_layers: 2,
        dropout: 0.1,
    }
}

fn trained() -> (Trainer<Adam>, Vocabulary) {
    let pairs = vec![
        SentencePair::new("hello", "hi there"),
        SentencePair::new("what is your name ?", "bot"),
    ];
    let mut voc = Vocabulary::new("roundtrip corpus");
    for p in &pairs {
        voc.add_sentence(&p.input);
        voc.add_sentence(&p.output);
    }
    let model = Seq2Seq::new(&mut StdRng::seed_from_u64(1), &tiny_config(), voc.num_words()).unwrap();
    let mut trainer = Trainer::new(model, Adam::default(), TrainConfig::default()).unwrap();
    let batch = batch_to_train_data(&voc, &pairs).unwrap();
    let mut rng = StdRng::seed_from_u64(2);
    trainer.train_step(&batch, &mut rng).unwrap();
    trainer.train_step(&batch, &mut rng).unwrap();
    (trainer, voc)
}

#[test]
fn save_then_load_restores_everything() {
    let (trainer, voc) = trained();
    let dir = tempfile::tempdir().unwrap();
    let path = checkpoint_path(dir.path(), trainer.model.config(), &voc.name, 2);
    assert!(path.ends_with("roundtrip/roundtrip corpus/1-2_6/2_checkpoint.bin"));

    let saved = trainer.checkpoint(2, 1.25, &voc);
    saved.save(&path).unwrap();
    assert!(path.is_file());
    assert!(!path.with_extension("tmp").exists());

    let loaded = Checkpoint::load(&path).unwrap();
    assert_eq!(loaded, saved);
    assert_eq!(loaded.iteration, 2);
    assert_eq!(loaded.loss, 1.25);
    assert_eq!(loaded.voc_dict, voc);

    for (saved_group, loaded_group) in [
        (&saved.en, &loaded.en),
        (&saved.de, &loaded.de),
        (&saved.embedding, &loaded.embedding),
    ] {
        assert!(saved_group.keys().eq(loaded_group.keys()));
    }
    assert!(saved.en_opt.state.keys().all(|k| loaded.en_opt.state.contains_key(k)));
    assert!(saved.de_opt.state.keys().all(|k| loaded.de_opt.state.contains_key(k)));
    assert_eq!(loaded.en_opt.step, 2);
}

#[test]
fn restored_model_matches_the_saved_one() {
    let (trainer, voc) = trained();
    let saved = trainer.checkpoint(2, 0.5, &voc);

    let mut fresh = Seq2Seq::new(&mut StdRng::seed_from_u64(42), &tiny_config(), voc.num_words()).unwrap();
    assert_ne!(fresh, trainer.model);
    saved.restore_model(&mut fresh).unwrap();
    assert_eq!(fresh, trainer.model);
}

#[test]
fn restoring_into_a_differently_shaped_model_fails() {
    let (trainer, voc) = trained();
    let saved = trainer.checkpoint(2, 0.5, &voc);

    let wider = ModelConfig {
        hidden_size: 8,
        ..tiny_config()
    };
    let mut other = Seq2Seq::new(&mut StdRng::seed_from_u64(3), &wider, voc.num_words()).unwrap();
    let before = other.state_dict(ParamGroup::Encoder);
    let err = saved.restore_model(&mut other).unwrap_err();
    assert!(matches!(err, ChatbotError::ParameterShape { .. }));
    assert_eq!(other.state_dict(ParamGroup::Encoder), before);
}
