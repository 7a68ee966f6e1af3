//! One-step predictors.
//!
//! A predictor maps a normalized [`Window`] to the next normalized value.
//! [`OnnxPredictor`] runs a pre-trained sequence model through ONNX Runtime;
//! closures implement the trait too, which is how tests stand in for a model.

use crate::buffer::Window;
use crate::config::ModelConfig;
use crate::error::BoxError;
use crate::Result;
use ndarray::Array3;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Capability to predict the next normalized value from a window.
pub trait OneStepPredictor {
    /// Predict the value that follows `window`, in normalized units.
    fn predict_one_step(&mut self, window: &Window) -> std::result::Result<f64, BoxError>;
}

impl<F> OneStepPredictor for F
where
    F: FnMut(&Window) -> std::result::Result<f64, BoxError>,
{
    fn predict_one_step(&mut self, window: &Window) -> std::result::Result<f64, BoxError> {
        self(window)
    }
}

/// Location of the model artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Model file already on disk
    File(PathBuf),

    /// Model fetched over HTTP(S) once and kept at `cache_path`
    Url { url: String, cache_path: PathBuf },
}

impl ModelSource {
    /// Pick the source described by the model configuration.
    pub fn from_config(config: &ModelConfig) -> Self {
        match &config.url {
            Some(url) => ModelSource::Url {
                url: url.clone(),
                cache_path: config.path.clone(),
            },
            None => ModelSource::File(config.path.clone()),
        }
    }

    /// Return a local path to the model, downloading it first if needed.
    pub fn resolve(&self, timeout: Duration) -> Result<PathBuf> {
        match self {
            ModelSource::File(path) => {
                if !path.exists() {
                    anyhow::bail!("Model file not found: {}", path.display());
                }
                Ok(path.clone())
            }
            ModelSource::Url { url, cache_path } => {
                if cache_path.exists() {
                    info!(path = %cache_path.display(), "Using cached model");
                    return Ok(cache_path.clone());
                }
                download(url, cache_path, timeout)?;
                Ok(cache_path.clone())
            }
        }
    }
}

/// Fetch `url` into `dest`, writing through a temporary file so a failed
/// download never leaves a truncated model behind.
fn download(url: &str, dest: &Path, timeout: Duration) -> Result<()> {
    info!(url, dest = %dest.display(), "Downloading model");

    let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
    let response = client.get(url).send()?.error_for_status()?;
    let bytes = response.bytes()?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = dest.with_extension("part");
    fs::write(&partial, &bytes)?;
    fs::rename(&partial, dest)?;

    info!(bytes = bytes.len(), "Model downloaded");
    Ok(())
}

/// Sequence-to-one model served by ONNX Runtime.
///
/// The model takes a `[1, lookback, 1]` `f32` tensor and returns the next
/// normalized value as the first element of its first output.
pub struct OnnxPredictor {
    /// ONNX Runtime session
    session: Session,

    /// Name of the output tensor read after each run
    output_name: String,

    /// Window length the model was trained on
    lookback: usize,
}

impl OnnxPredictor {
    /// Load an ONNX model and initialize the session.
    ///
    /// # Example
    /// ```no_run
    /// use stockie_forecast::{config::ModelConfig, OnnxPredictor};
    /// use std::path::Path;
    ///
    /// let predictor = OnnxPredictor::new(
    ///     Path::new("models/stoc.onnx"),
    ///     60,
    ///     &ModelConfig::default(),
    /// ).unwrap();
    /// ```
    pub fn new(model_path: &Path, lookback: usize, config: &ModelConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(if config.optimize_graph {
                GraphOptimizationLevel::Level3
            } else {
                GraphOptimizationLevel::Level1
            })?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(model_path)?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| anyhow::anyhow!("Model declares no outputs"))?;

        info!(
            path = %model_path.display(),
            lookback,
            output = %output_name,
            "Model loaded"
        );

        Ok(Self {
            session,
            output_name,
            lookback,
        })
    }

    /// Resolve the configured source and load the model from it.
    pub fn from_config(config: &ModelConfig, lookback: usize) -> Result<Self> {
        let source = ModelSource::from_config(config);
        let path = source.resolve(Duration::from_secs(config.download_timeout_secs))?;
        Self::new(&path, lookback, config)
    }

    /// Window length expected by the model.
    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Shape a window as a single-batch, single-feature sequence.
    fn prepare_input(window: &Window) -> Array3<f32> {
        let mut input = Array3::<f32>::zeros((1, window.len(), 1));
        for (i, value) in window.iter().enumerate() {
            input[[0, i, 0]] = value as f32;
        }
        input
    }

    fn run(&mut self, input: Array3<f32>) -> Result<f64> {
        let tensor = Tensor::from_array(input)?;
        let outputs = self.session.run(ort::inputs![tensor])?;

        let output = outputs
            .get(&self.output_name)
            .ok_or_else(|| anyhow::anyhow!("Missing model output '{}'", self.output_name))?;
        let (_, data) = output.try_extract_tensor::<f32>()?;

        let value = data
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Model output '{}' is empty", self.output_name))?;

        Ok(value as f64)
    }
}

impl OneStepPredictor for OnnxPredictor {
    fn predict_one_step(&mut self, window: &Window) -> std::result::Result<f64, BoxError> {
        if window.len() != self.lookback {
            return Err(format!(
                "window has {} values, model expects {}",
                window.len(),
                self.lookback
            )
            .into());
        }

        let input = Self::prepare_input(window);
        self.run(input).map_err(Into::into)
    }
}
