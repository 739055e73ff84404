//! Winston-Lutz analysis adapter.
//!
//! Runs the external engine over the uploaded images and reshapes its output
//! into the per-image dictionaries the results page consumes. Every map keyed
//! by `image<N>` keeps N order when serialized.

pub mod angles;
pub mod engine;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::info;

use crate::files::{clear_dir, list_dir, FileStoreError};
use angles::{normalize_angle, parse_angle_key, AngleKeyError};
pub use engine::{CommandEngine, EngineImage, EngineParams, EngineRun, WinstonLutzEngine};

pub const DEFAULT_ANGLE_TOLERANCE: f64 = 1.0;
pub const NO_IMAGES_MESSAGE: &str = "No images have been uploaded to analyze.";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("No images have been uploaded to analyze.")]
    NoImages,
    #[error("{0}")]
    Engine(String),
    #[error("engine result has no '{0}' object")]
    MissingField(&'static str),
    #[error("image '{key}' has no numeric cax2bb_distance")]
    MissingDistance { key: String },
    #[error(transparent)]
    AngleKey(#[from] AngleKeyError),
    #[error(transparent)]
    Files(#[from] FileStoreError),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Request parameters for one analysis run.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AnalysisParams {
    #[serde(rename = "BB_size")]
    pub bb_size_mm: f64,
    #[serde(rename = "lowdensity", default)]
    pub low_density_bb: bool,
    /// Degrees; only used to snap angles near 0/360.
    #[serde(default)]
    pub tolerance: Option<f64>,
}

impl AnalysisParams {
    fn angle_tolerance(&self) -> f64 {
        self.tolerance.unwrap_or(DEFAULT_ANGLE_TOLERANCE)
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct AnalysisResult {
    pub results: Map<String, Value>,
    pub gantry_dict: Map<String, Value>,
    pub collimator_dict: Map<String, Value>,
    pub table_dict: Map<String, Value>,
    pub caxtobb_dict: Map<String, Value>,
    pub names_dict: Map<String, Value>,
    pub key_mapping: Map<String, Value>,
}

/// Analyze every image in `image_dir`, writing one annotated plot per image
/// into `plot_dir` as `image<N>.png`.
///
/// `plot_dir` is wiped first. Nothing is returned unless every step succeeds.
pub fn run_analysis(
    engine: &dyn WinstonLutzEngine,
    image_dir: &Path,
    plot_dir: &Path,
    params: &AnalysisParams,
) -> Result<AnalysisResult, AnalysisError> {
    if list_dir(image_dir)?.is_empty() {
        return Err(AnalysisError::NoImages);
    }

    clear_dir(plot_dir)?;
    std::fs::create_dir_all(plot_dir).map_err(|source| AnalysisError::Io {
        path: plot_dir.to_path_buf(),
        source,
    })?;

    let run = engine.analyze(
        image_dir,
        &EngineParams {
            bb_size_mm: params.bb_size_mm,
            low_density_bb: params.low_density_bb,
        },
    )?;

    let mut out = AnalysisResult {
        results: format_results(run.results_data()),
        ..Default::default()
    };

    let details = run
        .results_data()
        .get("keyed_image_details")
        .and_then(Value::as_object)
        .ok_or(AnalysisError::MissingField("keyed_image_details"))?;

    let tolerance = params.angle_tolerance();
    for (i, (key, detail)) in details.iter().enumerate() {
        let image_key = image_key(i);
        let angles = parse_angle_key(key)?;
        let distance = detail
            .get("cax2bb_distance")
            .and_then(Value::as_f64)
            .ok_or_else(|| AnalysisError::MissingDistance { key: key.clone() })?;

        out.gantry_dict
            .insert(image_key.clone(), normalize_angle(angles.gantry, tolerance).into());
        out.collimator_dict
            .insert(image_key.clone(), normalize_angle(angles.collimator, tolerance).into());
        out.table_dict
            .insert(image_key.clone(), normalize_angle(angles.table, tolerance).into());
        out.caxtobb_dict
            .insert(image_key.clone(), number_value(round2(distance)));
        out.key_mapping.insert(image_key, Value::String(key.clone()));
    }

    for (i, image) in run.images().iter().enumerate() {
        let image_key = image_key(i);
        let dest = plot_dir.join(format!("{}.png", image_key));
        run.save_plot(i, &dest)?;
        out.names_dict
            .insert(image_key, Value::String(image.base_path.clone()));
    }

    info!(
        "analysis complete dir={} images={} details={}",
        image_dir.display(),
        run.images().len(),
        details.len()
    );
    Ok(out)
}

/// Render every top-level number as two-decimal text. Other values are left
/// alone; booleans stay `true`/`false` rather than becoming `"1.00"`/`"0.00"`.
pub fn format_results(raw: &Map<String, Value>) -> Map<String, Value> {
    raw.iter()
        .map(|(k, v)| {
            let v = match v {
                Value::Number(n) => Value::String(format!("{:.2}", n.as_f64().unwrap_or_default())),
                other => other.clone(),
            };
            (k.clone(), v)
        })
        .collect()
}

fn image_key(index: usize) -> String {
    format!("image{}", index + 1)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

fn number_value(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}
