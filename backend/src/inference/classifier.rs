use super::preprocess::{to_chw, to_tensor};
use super::{Classification, InferenceError, LesionClassifier};
use crate::config::preprocessing::ImageSpec;
use crate::ingest;
use dermai_shared::LabelCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tch::{CModule, Device, Kind, Tensor};

/// Subset of the Hugging Face `config.json` shipped with the classifier.
#[derive(Debug, Deserialize)]
struct ModelConfig {
    id2label: HashMap<String, String>,
}

/// TorchScript image classifier. Forward passes are serialized through the
/// module lock.
#[derive(Clone)]
pub struct SkinClassifier {
    model: Arc<Mutex<CModule>>,
    device: Device,
    spec: ImageSpec,
    labels: Vec<LabelCode>,
}

impl SkinClassifier {
    /// Loads `model.pt` and `config.json` from `model_dir`.
    pub fn load(model_dir: &Path, spec: ImageSpec) -> Result<Self, InferenceError> {
        let config_path = model_dir.join("config.json");
        let config_str = std::fs::read_to_string(&config_path).map_err(|e| {
            InferenceError::ModelLoad {
                path: config_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        let labels = parse_labels(&config_str)?;

        let weights_path = model_dir.join("model.pt");
        let device = Device::cuda_if_available();
        let model = CModule::load_on_device(&weights_path, device).map_err(|e| {
            InferenceError::ModelLoad {
                path: weights_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        log::info!(
            "Loaded classifier from {} on {:?} with {} labels",
            weights_path.display(),
            device,
            labels.len()
        );

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            device,
            spec,
            labels,
        })
    }

    fn probabilities(&self, tensor: &Tensor) -> Result<Vec<f32>, InferenceError> {
        let model = self
            .model
            .lock()
            .map_err(|_| InferenceError::Poisoned)?;
        let logits = tch::no_grad(|| model.forward_ts(&[tensor]))?;
        let probabilities = logits
            .softmax(-1, Kind::Float)
            .to_device(Device::Cpu)
            .view([-1]);
        Ok(Vec::<f32>::try_from(&probabilities)?)
    }
}

impl LesionClassifier for SkinClassifier {
    fn classify(&self, image: &Path) -> Result<Classification, InferenceError> {
        let image = ingest::load_rgb(image)?;
        let pixels = to_chw(&image, &self.spec)?;
        let tensor = to_tensor(&pixels, self.device)?;
        let probabilities = self.probabilities(&tensor)?;
        top_class(&probabilities, &self.labels)
    }
}

/// Builds the index-ordered label table from `id2label`. Every index in
/// `0..n` must be present and name one of the known codes.
fn parse_labels(config_str: &str) -> Result<Vec<LabelCode>, InferenceError> {
    let config: ModelConfig = serde_json::from_str(config_str)
        .map_err(|e| InferenceError::ModelConfig(e.to_string()))?;

    let mut labels = vec![None; config.id2label.len()];
    for (id, name) in &config.id2label {
        let index: usize = id
            .parse()
            .map_err(|_| InferenceError::ModelConfig(format!("invalid label id {id}")))?;
        let slot = labels
            .get_mut(index)
            .ok_or_else(|| InferenceError::ModelConfig(format!("label id {id} out of range")))?;
        let code = LabelCode::from_str(name)
            .map_err(|_| InferenceError::ModelConfig(format!("unknown label code {name}")))?;
        *slot = Some(code);
    }

    labels
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .filter(|labels| !labels.is_empty())
        .ok_or_else(|| InferenceError::ModelConfig("id2label has gaps or is empty".into()))
}

/// Picks the most probable class. Ties keep the lowest index.
fn top_class(
    probabilities: &[f32],
    labels: &[LabelCode],
) -> Result<Classification, InferenceError> {
    if probabilities.len() != labels.len() {
        return Err(InferenceError::ModelOutput(format!(
            "model produced {} scores for {} labels",
            probabilities.len(),
            labels.len()
        )));
    }

    let (index, confidence) = probabilities
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
            Some((_, best_p)) if best_p >= p => best,
            _ => Some((i, p)),
        })
        .ok_or_else(|| InferenceError::ModelOutput("model produced no scores".into()))?;

    if !confidence.is_finite() {
        return Err(InferenceError::ModelOutput("model produced non-finite scores".into()));
    }

    Ok(Classification {
        code: labels[index],
        confidence: confidence.clamp(0.0, 1.0),
    })
}
