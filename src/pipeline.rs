// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Peter Carlton

// Boundary to the external programs: the structure-prediction pipeline and the validation
// tool. Both run synchronously with the caller's stdin/stdout/stderr; nothing is retried and
// nothing they write is interpreted here.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use clap::ValueEnum;
use itertools::Itertools;
use log::info;

use crate::errors::MsaCacheError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PredictionMode {
    /// Data pipeline (MSA/template search) followed by inference
    #[clap(name = "full")]
    Full,
    /// Data pipeline only
    #[clap(name = "msa")]
    Msa,
    /// Inference only (the input must already carry MSAs and templates)
    #[clap(name = "infer")]
    Infer,
}

impl fmt::Display for PredictionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PredictionMode::Full => "full",
            PredictionMode::Msa => "msa",
            PredictionMode::Infer => "infer",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictionFlags {
    pub run_data_pipeline: bool,
    pub run_inference: bool,
    pub gpu_id: Option<u32>,
}

impl PredictionFlags {
    pub fn for_mode(mode: PredictionMode, gpu_id: Option<u32>) -> Self {
        let (run_data_pipeline, run_inference) = match mode {
            PredictionMode::Full => (true, true),
            PredictionMode::Msa => (true, false),
            PredictionMode::Infer => (false, true),
        };
        PredictionFlags {
            run_data_pipeline,
            run_inference,
            gpu_id,
        }
    }

    fn args(&self) -> Result<[String; 3], MsaCacheError> {
        if !self.run_data_pipeline && !self.run_inference {
            return Err(MsaCacheError::Format(String::from(
                "at least one of the data pipeline and inference must run",
            )));
        }
        Ok([
            self.run_data_pipeline.to_string(),
            self.run_inference.to_string(),
            self.gpu_id
                .map(|g| g.to_string())
                .unwrap_or_else(|| String::from("None")),
        ])
    }
}

#[derive(Debug, Clone)]
pub struct PipelineAdapter {
    prediction_script: Option<PathBuf>,
    validation_script: Option<PathBuf>,
    shell: String,
}

impl PipelineAdapter {
    pub fn new(prediction_script: Option<PathBuf>, validation_script: Option<PathBuf>) -> Self {
        PipelineAdapter {
            prediction_script,
            validation_script,
            shell: String::from("bash"),
        }
    }

    /// Runs `bash <script> <input> <output_dir> <data_pipeline> <inference> <gpu>`.
    pub fn run_prediction(
        &self,
        input: &Path,
        output_dir: &Path,
        flags: &PredictionFlags,
    ) -> Result<ExitStatus, MsaCacheError> {
        let script = required(&self.prediction_script, "prediction")?;
        let [data_pipeline, inference, gpu] = flags.args()?;
        let mut cmd = Command::new(&self.shell);
        cmd.arg(script)
            .arg(input)
            .arg(output_dir)
            .arg(data_pipeline)
            .arg(inference)
            .arg(gpu);
        run(cmd)
    }

    /// Runs `<script> <work_dir> <target> <prefix>`.
    pub fn run_validation(
        &self,
        work_dir: &Path,
        target: &Path,
        prefix: &str,
    ) -> Result<ExitStatus, MsaCacheError> {
        let script = required(&self.validation_script, "validation")?;
        let mut cmd = Command::new(script);
        cmd.arg(work_dir).arg(target).arg(prefix);
        run(cmd)
    }
}

fn required<'a>(script: &'a Option<PathBuf>, what: &str) -> Result<&'a Path, MsaCacheError> {
    let script = script.as_deref().ok_or_else(|| {
        MsaCacheError::Format(format!(
            "no {} script configured (use --script or set {}_script in .msacacheconfig)",
            what, what
        ))
    })?;
    if !script.exists() {
        return Err(MsaCacheError::Format(format!(
            "{} script not found: {}",
            what,
            script.display()
        )));
    }
    Ok(script)
}

fn run(mut cmd: Command) -> Result<ExitStatus, MsaCacheError> {
    info!(
        "Running command: {} {}",
        cmd.get_program().to_string_lossy(),
        cmd.get_args().map(|a| a.to_string_lossy()).join(" ")
    );
    let status = cmd
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()?;
    if !status.success() {
        return Err(MsaCacheError::PipelineFailed {
            exit_code: status.code(),
        });
    }
    Ok(status)
}
