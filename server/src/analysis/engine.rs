//! Boundary to the external Winston-Lutz analysis engine.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tracing::{debug, info};

use super::AnalysisError;

/// Parameters forwarded to the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineParams {
    pub bb_size_mm: f64,
    pub low_density_bb: bool,
}

/// One image as the engine saw it.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EngineImage {
    pub base_path: String,
}

/// Something that can run a Winston-Lutz analysis over a directory.
pub trait WinstonLutzEngine: Send + Sync {
    fn analyze(&self, dir: &Path, params: &EngineParams) -> Result<Box<dyn EngineRun>, AnalysisError>;
}

/// The outcome of one engine invocation.
///
/// `images()` and the entries of `keyed_image_details` in `results_data()`
/// are in the engine's own order and line up position by position.
pub trait EngineRun: Send {
    fn results_data(&self) -> &Map<String, Value>;
    fn images(&self) -> &[EngineImage];
    fn save_plot(&self, index: usize, dest: &Path) -> Result<(), AnalysisError>;
}

/// Drives the engine as an external program.
///
/// The program is invoked as
/// `<program> <args...> --dir <images> --bb-size <mm> [--low-density] --plots <scratch>`
/// and must print `{"results": {...}, "images": [{"base_path", "plot"}]}` on
/// stdout, writing each plot under the scratch directory.
#[derive(Clone, Debug)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[derive(Deserialize)]
struct CommandOutput {
    results: Map<String, Value>,
    #[serde(default)]
    images: Vec<CommandImage>,
}

#[derive(Deserialize)]
struct CommandImage {
    base_path: String,
    plot: PathBuf,
}

struct CommandRun {
    results: Map<String, Value>,
    images: Vec<EngineImage>,
    plots: Vec<PathBuf>,
    // Holds the plots until the run is dropped.
    _scratch: TempDir,
}

impl WinstonLutzEngine for CommandEngine {
    fn analyze(&self, dir: &Path, params: &EngineParams) -> Result<Box<dyn EngineRun>, AnalysisError> {
        let scratch = tempfile::tempdir().map_err(|e| AnalysisError::Io {
            path: std::env::temp_dir(),
            source: e,
        })?;
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--dir")
            .arg(dir)
            .arg("--bb-size")
            .arg(params.bb_size_mm.to_string());
        if params.low_density_bb {
            cmd.arg("--low-density");
        }
        cmd.arg("--plots").arg(scratch.path());
        debug!("engine command {:?}", cmd);

        let start = Instant::now();
        let output = cmd.output().map_err(|e| {
            AnalysisError::Engine(format!("failed to start {}: {}", self.program.display(), e))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalysisError::Engine(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        let parsed: CommandOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| AnalysisError::Engine(format!("unreadable engine output: {}", e)))?;
        info!(
            "engine finished dir={} images={} ms={}",
            dir.display(),
            parsed.images.len(),
            start.elapsed().as_millis()
        );

        let mut images = Vec::with_capacity(parsed.images.len());
        let mut plots = Vec::with_capacity(parsed.images.len());
        for image in parsed.images {
            plots.push(scratch.path().join(image.plot));
            images.push(EngineImage {
                base_path: image.base_path,
            });
        }
        Ok(Box::new(CommandRun {
            results: parsed.results,
            images,
            plots,
            _scratch: scratch,
        }))
    }
}

impl EngineRun for CommandRun {
    fn results_data(&self) -> &Map<String, Value> {
        &self.results
    }

    fn images(&self) -> &[EngineImage] {
        &self.images
    }

    fn save_plot(&self, index: usize, dest: &Path) -> Result<(), AnalysisError> {
        let src = self
            .plots
            .get(index)
            .ok_or_else(|| AnalysisError::Engine(format!("no plot for image index {}", index)))?;
        fs::copy(src, dest).map_err(|e| AnalysisError::Io {
            path: src.clone(),
            source: e,
        })?;
        Ok(())
    }
}
