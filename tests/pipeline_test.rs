// Integration test: run the full fine-tuning pipeline against a tiny local checkpoint
// Covers the success path and a failure in each early stage

mod common;

use anyhow::Result;
use std::fs;
use std::sync::mpsc;
use tempfile::TempDir;

use retune::pipeline::{Pipeline, PipelineEvent, Stage, StageStatus};
use retune::training::{inspect_artifact, read_label_mapping, read_metadata};

use common::{training_config, write_base_model, write_corrections, SENTIMENT_ROWS};

#[test]
fn test_pipeline_writes_complete_artifact() -> Result<()> {
    let tmp = TempDir::new()?;
    let config = training_config(tmp.path());
    write_base_model(&config.model_dir)?;
    write_corrections(&config.csv_path, SENTIMENT_ROWS)?;

    let (tx, rx) = mpsc::channel::<PipelineEvent>();
    let outcome = Pipeline::new(config.clone(), &tx)?.run()?;
    drop(tx);

    let stages: Vec<Stage> = outcome.records.iter().map(|r| r.stage).collect();
    assert_eq!(stages, Stage::ALL.to_vec());
    assert!(outcome
        .records
        .iter()
        .all(|r| r.status == StageStatus::Succeeded));

    for file in [
        "model.safetensors",
        "config.json",
        "tokenizer.json",
        "vocab.txt",
        "label_mapping.json",
        "metadata.json",
    ] {
        assert!(
            common::artifact_file(&config, file).is_file(),
            "{} missing from artifact",
            file
        );
    }

    // "great food" appears twice; the second row is dropped
    let labels = read_label_mapping(&config.output_dir)?;
    assert_eq!(labels.labels(), &["neg", "neu", "pos"]);
    assert_eq!(labels.id("neg"), Some(0));
    assert_eq!(labels.id("neu"), Some(1));
    assert_eq!(labels.id("pos"), Some(2));

    let metadata = read_metadata(&config.output_dir)?;
    assert_eq!(metadata.training_samples, 4);
    assert_eq!(metadata.num_labels, 3);
    assert_eq!(metadata.training_epochs, 2);
    assert_eq!(metadata.batch_size, 2);
    assert_eq!(metadata.max_length, 8);
    assert_eq!(metadata.model_type, "bert");
    assert_eq!(metadata.device, "cpu");
    assert_eq!(metadata.seed, Some(7));
    assert_eq!(metadata.label_mapping, labels);
    assert_eq!(metadata.source_model, config.model_dir.display().to_string());

    let fine_tuned_config: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(config.output_dir.join("config.json"))?)?;
    assert_eq!(fine_tuned_config["num_labels"], 3);
    assert_eq!(fine_tuned_config["id2label"]["2"], "pos");
    assert_eq!(fine_tuned_config["hidden_size"], 16);

    let inspection = inspect_artifact(&config.output_dir)?;
    assert_eq!(inspection.label_space, labels);
    assert!(inspection.parameter_count > 0);

    // 4 samples / batch 2 = 2 steps per epoch
    assert_eq!(outcome.training.epochs.len(), 2);
    assert_eq!(outcome.training.total_steps, 4);
    assert!(outcome.training.final_lr.abs() < 1e-12);

    let events: Vec<PipelineEvent> = rx.try_iter().collect();
    let batches = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::BatchFinished { .. }))
        .count();
    assert_eq!(batches, 4);
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::LabelSummary { labels } if labels.len() == 3
    )));

    println!("Final loss: {:?}", outcome.training.final_loss());
    Ok(())
}

#[test]
fn test_missing_table_fails_at_training_data_stage() -> Result<()> {
    let tmp = TempDir::new()?;
    let config = training_config(tmp.path());
    write_base_model(&config.model_dir)?;

    let failure = Pipeline::new(config.clone(), &())?.run().unwrap_err();

    assert_eq!(failure.stage, Stage::LoadTrainingData);
    assert_eq!(failure.error.kind(), "ConfigurationError");
    assert_eq!(failure.records.len(), 2);
    assert_eq!(failure.records[0].stage, Stage::LoadModel);
    assert_eq!(failure.records[0].status, StageStatus::Succeeded);
    assert_eq!(failure.records[1].status, StageStatus::Failed);
    assert!(!config.output_dir.exists());
    Ok(())
}

#[test]
fn test_missing_model_fails_at_first_stage() -> Result<()> {
    let tmp = TempDir::new()?;
    let config = training_config(tmp.path());
    write_corrections(&config.csv_path, SENTIMENT_ROWS)?;

    let failure = Pipeline::new(config.clone(), &())?.run().unwrap_err();

    assert_eq!(failure.stage, Stage::LoadModel);
    assert_eq!(failure.error.kind(), "ConfigurationError");
    assert_eq!(failure.records.len(), 1);
    assert!(failure.to_string().starts_with("stage 'load model' failed"));
    assert!(!config.output_dir.exists());
    Ok(())
}

#[test]
fn test_table_without_usable_rows_is_data_error() -> Result<()> {
    let tmp = TempDir::new()?;
    let config = training_config(tmp.path());
    write_base_model(&config.model_dir)?;
    write_corrections(&config.csv_path, &[("", "pos"), ("   ", "neg"), ("text", "")])?;

    let failure = Pipeline::new(config, &())?.run().unwrap_err();

    assert_eq!(failure.stage, Stage::LoadTrainingData);
    assert_eq!(failure.error.kind(), "DataValidationError");
    Ok(())
}

#[test]
fn test_table_missing_label_column_is_configuration_error() -> Result<()> {
    let tmp = TempDir::new()?;
    let config = training_config(tmp.path());
    write_base_model(&config.model_dir)?;
    fs::write(&config.csv_path, "text,category\ngreat food,pos\n")?;

    let failure = Pipeline::new(config, &())?.run().unwrap_err();

    assert_eq!(failure.stage, Stage::LoadTrainingData);
    assert_eq!(failure.error.kind(), "ConfigurationError");
    assert!(failure.error.to_string().contains("label"));
    Ok(())
}

#[test]
fn test_populated_output_directory_is_rejected_up_front() -> Result<()> {
    let tmp = TempDir::new()?;
    let config = training_config(tmp.path());
    fs::create_dir_all(&config.output_dir)?;
    fs::write(config.output_dir.join("model.safetensors"), b"previous run")?;

    let err = Pipeline::new(config.clone(), &()).err().unwrap();

    assert_eq!(err.kind(), "ConfigurationError");
    assert_eq!(
        fs::read(config.output_dir.join("model.safetensors"))?,
        b"previous run"
    );
    Ok(())
}

#[test]
fn test_single_sample_single_label_trains() -> Result<()> {
    let tmp = TempDir::new()?;
    let mut config = training_config(tmp.path());
    config.epochs = 1;
    write_base_model(&config.model_dir)?;
    write_corrections(&config.csv_path, &[("the food was great", "pos")])?;

    let outcome = Pipeline::new(config.clone(), &())?.run()?;

    assert_eq!(outcome.label_space.labels(), &["pos"]);
    assert_eq!(outcome.training.total_steps, 1);
    assert_eq!(read_metadata(&config.output_dir)?.num_labels, 1);
    Ok(())
}

#[test]
fn test_max_length_beyond_model_positions_is_configuration_error() -> Result<()> {
    let tmp = TempDir::new()?;
    let mut config = training_config(tmp.path());
    // Fixture checkpoint has 64 positions
    config.max_length = 128;
    write_base_model(&config.model_dir)?;
    write_corrections(&config.csv_path, SENTIMENT_ROWS)?;

    let failure = Pipeline::new(config.clone(), &())?.run().unwrap_err();

    assert_eq!(failure.stage, Stage::LoadTrainingData);
    assert_eq!(failure.error.kind(), "ConfigurationError");
    assert!(failure.error.to_string().contains("128"));
    assert!(!config.output_dir.exists());
    Ok(())
}

#[test]
fn test_unwritable_output_fails_at_write_artifact() -> Result<()> {
    let tmp = TempDir::new()?;
    let mut config = training_config(tmp.path());
    let blocker = tmp.path().join("not_a_dir");
    fs::write(&blocker, b"regular file")?;
    config.output_dir = blocker.join("out");
    write_base_model(&config.model_dir)?;
    write_corrections(&config.csv_path, SENTIMENT_ROWS)?;

    let failure = Pipeline::new(config, &())?.run().unwrap_err();

    assert_eq!(failure.stage, Stage::WriteArtifact);
    assert_eq!(failure.error.kind(), "IOError");
    let statuses: Vec<StageStatus> = failure.records.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            StageStatus::Succeeded,
            StageStatus::Succeeded,
            StageStatus::Succeeded,
            StageStatus::Failed,
        ]
    );
    Ok(())
}
