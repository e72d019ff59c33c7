// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Thomas Junier
// Modifications (c) 2026 Peter Carlton

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use itertools::Itertools;
use log::{debug, info, warn};

use crate::config::MsaCacheConfig;
use crate::document::PipelineDocument;
use crate::errors::MsaCacheError;
use crate::import::{import_document, ImportMode};
use crate::pipeline::{PipelineAdapter, PredictionFlags, PredictionMode};
use crate::seq::hash::Key;
use crate::store::MsaDb;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None) ]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the structure-prediction pipeline, optionally through the MSA cache
    Predict {
        /// Pipeline input document (JSON)
        input: PathBuf,

        /// Pipeline output directory
        output_dir: PathBuf,

        /// Pipeline stages to run
        #[arg(short, long, default_value_t = PredictionMode::Full)]
        mode: PredictionMode,

        /// GPU to run inference on
        #[arg(short, long = "gpu-id")]
        gpu_id: Option<u32>,

        /// Prediction script (overrides prediction_script in .msacacheconfig)
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// Fill the input from the cache; skip the data pipeline if nothing is missing
        #[arg(short = 'u', long = "use-cache")]
        use_cache: bool,

        /// Store the pipeline's MSAs and templates in the cache after a successful run
        #[arg(short = 'c', long = "cache-results")]
        cache_results: bool,

        /// Cache database (overrides db_path in .msacacheconfig)
        #[arg(long = "db-path")]
        db_path: Option<PathBuf>,
    },

    /// Run the validation tool on a predicted model
    Validate {
        /// Working directory for the validation tool
        work_dir: PathBuf,

        /// Model to validate
        target: PathBuf,

        /// Prefix for the tool's output files
        prefix: String,

        /// Validation script (overrides validation_script in .msacacheconfig)
        #[arg(short, long)]
        script: Option<PathBuf>,
    },

    /// Inspect and maintain the MSA cache
    Msa {
        /// Cache database (overrides db_path in .msacacheconfig)
        #[arg(long = "db-path")]
        db_path: Option<PathBuf>,

        #[command(subcommand)]
        command: MsaCommand,
    },
}

#[derive(Debug, Subcommand)]
enum MsaCommand {
    /// Show location, record count and size of the cache
    Status,

    /// Print every key, oldest first
    List,

    /// Add the protein chains of a pipeline document; fails if any is already cached
    Add {
        path: PathBuf,

        /// Leave already-cached sequences alone instead of failing
        #[arg(long = "skip-existing")]
        skip_existing: bool,
    },

    /// Merge the protein chains of a pipeline document into the cache
    Update { path: PathBuf },

    /// Print keys starting with a hex prefix
    Search {
        query: String,

        /// Maximum number of keys to print
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },

    /// Print a cached record as JSON
    Get { key: String },

    /// Complete a pipeline document from the cache
    Fill {
        path: PathBuf,

        /// Output file (default: <stem>_data.json next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Remove a record
    Delete { key: String },
}

/// `<dir>/<stem>_data.json`, the name the pipeline gives its completed documents.
fn data_json_path(dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("input"));
    dir.join(format!("{}_data.json", stem))
}

/// The job name as the pipeline uses it in output paths: lowercased, spaces turned into `_`,
/// anything outside `[a-z0-9_.-]` dropped.
fn sanitised_name(name: &str) -> String {
    name.to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_-.".contains(*c))
        .collect()
}

/// Where the pipeline writes the completed document for job `name`.
fn pipeline_output_path(output_dir: &Path, name: &str) -> PathBuf {
    let name = sanitised_name(name);
    output_dir
        .join(&name)
        .join(format!("{}_data.json", name))
}

fn open_store(config: &MsaCacheConfig, db_path: Option<&Path>) -> Result<MsaDb, MsaCacheError> {
    MsaDb::open_with(&config.store_config(db_path)?)
}

#[allow(clippy::too_many_arguments)]
fn predict(
    config: &MsaCacheConfig,
    input: &Path,
    output_dir: &Path,
    mode: PredictionMode,
    gpu_id: Option<u32>,
    script: Option<PathBuf>,
    use_cache: bool,
    cache_results: bool,
    db_path: Option<&Path>,
) -> Result<(), MsaCacheError> {
    let adapter = PipelineAdapter::new(
        script.or_else(|| config.prediction_script.clone()),
        None,
    );
    let mut flags = PredictionFlags::for_mode(mode, gpu_id);
    let doc = PipelineDocument::from_file(input)?;
    let mut pipeline_input = input.to_path_buf();

    if use_cache {
        let mut filled = doc.clone();
        let mut db = open_store(config, db_path)?;
        let report = filled.fill_from_store(&db)?;
        db.close()?;
        std::fs::create_dir_all(output_dir)?;
        pipeline_input = data_json_path(output_dir, input);
        filled.to_file(&pipeline_input)?;
        println!(
            "cache: {} of {} protein chains found, {} complete",
            report.hits, report.protein_chains, report.complete
        );
        if report.rna_without_msa > 0 {
            info!(
                "{} RNA chain(s) still need the data pipeline",
                report.rna_without_msa
            );
        }
        if report.is_complete() && flags.run_data_pipeline {
            info!("Every chain is complete; skipping the data pipeline");
            flags.run_data_pipeline = false;
        }
        if !flags.run_data_pipeline && !flags.run_inference {
            println!("nothing left to run; wrote {}", pipeline_input.display());
            return Ok(());
        }
    }

    adapter.run_prediction(&pipeline_input, output_dir, &flags)?;
    println!("prediction finished: {}", output_dir.display());

    if cache_results {
        let name = doc.name.as_deref().ok_or_else(|| {
            MsaCacheError::Format(format!("{} has no 'name'", input.display()))
        })?;
        let results = pipeline_output_path(output_dir, name);
        if !results.exists() {
            warn!("No pipeline output at {}", results.display());
            return Err(MsaCacheError::Format(format!(
                "pipeline output not found: {}",
                results.display()
            )));
        }
        let out_doc = PipelineDocument::from_file(&results)?;
        let mut db = open_store(config, db_path)?;
        let report = import_document(&mut db, &out_doc, ImportMode::Upsert)?;
        db.close()?;
        println!("cached {}: {}", results.display(), report);
    }
    Ok(())
}

fn msa(
    config: &MsaCacheConfig,
    db_path: Option<&Path>,
    command: MsaCommand,
) -> Result<(), MsaCacheError> {
    let mut db = open_store(config, db_path)?;
    debug!("Using store {}", db.path().display());
    match command {
        MsaCommand::Status => {
            let status = db.status()?;
            println!(
                "{}: {} records, {}",
                status.path.display(),
                status.count,
                status.human_size()
            );
        }
        MsaCommand::List => {
            let mut corrupt = 0;
            for key in db.list()? {
                match key {
                    Ok(key) => println!("{}", key),
                    Err(e @ MsaCacheError::CorruptRecord { .. }) => {
                        warn!("{}", e);
                        corrupt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            if corrupt > 0 {
                warn!("{} corrupt rows skipped", corrupt);
            }
        }
        MsaCommand::Add {
            path,
            skip_existing,
        } => {
            let doc = PipelineDocument::from_file(&path)?;
            let mode = if skip_existing {
                ImportMode::SkipExisting
            } else {
                ImportMode::Add
            };
            let report = import_document(&mut db, &doc, mode)?;
            println!("{}: {}", path.display(), report);
        }
        MsaCommand::Update { path } => {
            let doc = PipelineDocument::from_file(&path)?;
            let report = import_document(&mut db, &doc, ImportMode::Upsert)?;
            println!("{}: {}", path.display(), report);
        }
        MsaCommand::Search { query, limit } => {
            let hits = db.search(&query)?;
            if hits.len() > limit {
                info!("{} matches; showing the first {}", hits.len(), limit);
            }
            let shown = hits.iter().take(limit).join("\n");
            if !shown.is_empty() {
                println!("{}", shown);
            }
        }
        MsaCommand::Get { key } => {
            let key = Key::parse(&key)?;
            let record = db.get(&key)?;
            let header = db.header(&key)?;
            info!(
                "{}: created {}, updated {}",
                key, header.created_at, header.updated_at
            );
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        MsaCommand::Fill { path, output } => {
            let mut doc = PipelineDocument::from_file(&path)?;
            let report = doc.fill_from_store(&db)?;
            let output = output.unwrap_or_else(|| {
                data_json_path(path.parent().unwrap_or(Path::new(".")), &path)
            });
            doc.to_file(&output)?;
            let misses = report.misses.iter().map(|k| k.short(12)).join(", ");
            println!(
                "{}: filled {} of {} protein chains, {} complete{}",
                output.display(),
                report.filled,
                report.protein_chains,
                report.complete,
                if misses.is_empty() {
                    String::new()
                } else {
                    format!(" (not cached: {})", misses)
                }
            );
        }
        MsaCommand::Delete { key } => {
            let key = Key::parse(&key)?;
            if !db.delete(&key)? {
                return Err(MsaCacheError::NotFound(key));
            }
            println!("deleted {}", key);
        }
    }
    db.close()
}

pub fn run() -> Result<(), MsaCacheError> {
    env_logger::init();
    info!("Starting log");

    let cli = Cli::parse();
    let config = MsaCacheConfig::load()?;

    match cli.command {
        Command::Predict {
            input,
            output_dir,
            mode,
            gpu_id,
            script,
            use_cache,
            cache_results,
            db_path,
        } => predict(
            &config,
            &input,
            &output_dir,
            mode,
            gpu_id,
            script,
            use_cache,
            cache_results,
            db_path.as_deref(),
        ),
        Command::Validate {
            work_dir,
            target,
            prefix,
            script,
        } => {
            let adapter = PipelineAdapter::new(
                None,
                script.or_else(|| config.validation_script.clone()),
            );
            adapter.run_validation(&work_dir, &target, &prefix)?;
            println!("validation finished: {}", work_dir.display());
            Ok(())
        }
        Command::Msa { db_path, command } => msa(&config, db_path.as_deref(), command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_predict() {
        let cli = Cli::try_parse_from([
            "msacache",
            "predict",
            "job.json",
            "out",
            "--mode",
            "infer",
            "--gpu-id",
            "2",
            "--use-cache",
        ])
        .unwrap();
        match cli.command {
            Command::Predict {
                mode,
                gpu_id,
                use_cache,
                cache_results,
                ..
            } => {
                assert_eq!(mode, PredictionMode::Infer);
                assert_eq!(gpu_id, Some(2));
                assert!(use_cache);
                assert!(!cache_results);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_msa_search() {
        let cli =
            Cli::try_parse_from(["msacache", "msa", "--db-path", "x.sqlite", "search", "ab"])
                .unwrap();
        match cli.command {
            Command::Msa {
                db_path,
                command: MsaCommand::Search { query, limit },
            } => {
                assert_eq!(db_path, Some(PathBuf::from("x.sqlite")));
                assert_eq!(query, "ab");
                assert_eq!(limit, 50);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_bad_mode_rejected() {
        assert!(Cli::try_parse_from(["msacache", "predict", "a", "b", "--mode", "fast"]).is_err());
    }

    #[test]
    fn test_output_paths() {
        assert_eq!(
            data_json_path(Path::new("out"), Path::new("jobs/2PV7.json")),
            PathBuf::from("out/2PV7_data.json")
        );
        assert_eq!(
            pipeline_output_path(Path::new("out"), "2PV7"),
            PathBuf::from("out/2pv7/2pv7_data.json")
        );
        assert_eq!(
            pipeline_output_path(Path::new("out"), "My Job (v2)!"),
            PathBuf::from("out/my_job_v2/my_job_v2_data.json")
        );
    }

    #[test]
    fn test_sanitised_name() {
        assert_eq!(sanitised_name("My Job"), "my_job");
        assert_eq!(sanitised_name("2pv7-A.b_c"), "2pv7-a.b_c");
        assert_eq!(sanitised_name("Kinase/ATP #3"), "kinaseatp_3");
    }

    #[test]
    fn test_predict_from_cache_runs_pipeline_for_rna() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rna.json");
        std::fs::write(
            &input,
            r#"{"name": "rna", "sequences": [{"rna": {"id": "A", "sequence": "ACGUACGU"}}]}"#,
        )
        .unwrap();

        // No script configured, so reaching the pipeline fails.
        let result = predict(
            &MsaCacheConfig::default(),
            &input,
            &dir.path().join("out"),
            PredictionMode::Msa,
            None,
            None,
            true,
            false,
            Some(&dir.path().join("msa.sqlite")),
        );
        assert!(matches!(result, Err(MsaCacheError::Format(_))), "{:?}", result);
    }

    #[test]
    fn test_predict_from_cache_skips_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("msa.sqlite");
        let input = dir.path().join("job.json");
        std::fs::write(
            &input,
            r#"{"name": "job", "sequences": [{"protein": {"id": "A", "sequence": "MKTAYIAKQR"}}]}"#,
        )
        .unwrap();
        let mut db = MsaDb::open(&db_path).unwrap();
        db.add(
            &crate::seq::record::MsaRecord::new("MKTAYIAKQR")
                .with_unpaired_msa("u")
                .with_paired_msa("p")
                .with_templates(vec![serde_json::json!("T1")]),
        )
        .unwrap();
        db.close().unwrap();

        // No script configured: reaching the pipeline would be an error.
        let out = dir.path().join("out");
        predict(
            &MsaCacheConfig::default(),
            &input,
            &out,
            PredictionMode::Msa,
            None,
            None,
            true,
            false,
            Some(&db_path),
        )
        .unwrap();

        let filled = PipelineDocument::from_file(out.join("job_data.json")).unwrap();
        let chain = filled.sequences[0].protein.as_ref().unwrap();
        assert_eq!(chain.paired_msa, Some(serde_json::json!("p")));
    }
}
