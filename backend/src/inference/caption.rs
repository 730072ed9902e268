use super::preprocess::{to_chw, to_tensor};
use super::sampling::{SamplingConfig, sample_next};
use super::{CaptionGenerator, Cancellation, InferenceError};
use crate::config::preprocessing::ImageSpec;
use crate::ingest;
use rand::Rng;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tch::{CModule, Device, Kind, Tensor};
use tokenizers::Tokenizer;

pub const ANSWER_DELIMITER: &str = "Answer:";
const EOS_TOKEN: &str = "</s>";

pub const CAPTION_PROMPT: &str = concat!(
    "resposta em portugues",
    "Question: Provide a comprehensive clinical description of the skin lesion depicted in the image, detailing the following aspects:\n",
    "- Morphology (e.g., macule, papule, plaque, nodule, vesicle, pustule)\n",
    "- Size and shape\n",
    "- Color and pigmentation patterns\n",
    "- Border characteristics (well-defined or ill-defined)\n",
    "- Surface features (e.g., scaling, crusting, ulceration)\n",
    "- Texture (e.g., smooth, rough, indurated)\n",
    "- Distribution and anatomical location\n",
    "- Presence of secondary changes (e.g., lichenification, atrophy)\n",
    "- Any additional notable features\n",
    "Answer:",
);

/// Vision-language captioner over a TorchScript export whose
/// `forward(pixel_values, input_ids)` returns `[1, seq, vocab]` logits.
#[derive(Clone)]
pub struct BlipCaptioner {
    model: Arc<Mutex<CModule>>,
    tokenizer: Arc<Tokenizer>,
    eos_token_id: u32,
    device: Device,
    spec: ImageSpec,
    sampling: SamplingConfig,
}

impl BlipCaptioner {
    /// Loads `model.pt` and `tokenizer.json` from `model_dir`.
    pub fn load(model_dir: &Path, spec: ImageSpec) -> Result<Self, InferenceError> {
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(|e| InferenceError::ModelLoad {
                path: tokenizer_path.display().to_string(),
                reason: e.to_string(),
            })?;
        let eos_token_id = tokenizer.token_to_id(EOS_TOKEN).ok_or_else(|| {
            InferenceError::Tokenizer(format!("tokenizer has no {EOS_TOKEN} token"))
        })?;

        let weights_path = model_dir.join("model.pt");
        let device = Device::cuda_if_available();
        let model = CModule::load_on_device(&weights_path, device).map_err(|e| {
            InferenceError::ModelLoad {
                path: weights_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        log::info!(
            "Loaded caption model from {} on {:?}",
            weights_path.display(),
            device
        );

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            tokenizer: Arc::new(tokenizer),
            eos_token_id,
            device,
            spec,
            sampling: SamplingConfig::CAPTION,
        })
    }

    fn generate(
        &self,
        pixel_values: &Tensor,
        prompt_ids: Vec<u32>,
        cancel: &Cancellation,
    ) -> Result<Vec<u32>, InferenceError> {
        let model = self.model.lock().map_err(|_| InferenceError::Poisoned)?;
        let mut rng = rand::rng();

        tch::no_grad(|| {
            generate_tokens(
                prompt_ids,
                self.eos_token_id,
                &self.sampling,
                cancel,
                &mut rng,
                |ids| {
                    let input: Vec<i64> = ids.iter().map(|&id| id as i64).collect();
                    let input_ids =
                        Tensor::from_slice(&input).unsqueeze(0).to_device(self.device);
                    let logits = model.forward_ts(&[pixel_values, &input_ids])?;
                    let last = logits
                        .select(1, -1)
                        .to_kind(Kind::Float)
                        .to_device(Device::Cpu)
                        .view([-1]);
                    Ok(Vec::<f32>::try_from(&last)?)
                },
            )
        })
    }
}

/// Autoregressive decoding loop. `step` maps the full id sequence so far to
/// next-token logits. Stops at `eos_token_id` (not appended), after
/// `max_new_tokens` ids past the prompt, or when `cancel` is raised.
pub fn generate_tokens<R, F>(
    prompt_ids: Vec<u32>,
    eos_token_id: u32,
    sampling: &SamplingConfig,
    cancel: &Cancellation,
    rng: &mut R,
    mut step: F,
) -> Result<Vec<u32>, InferenceError>
where
    R: Rng,
    F: FnMut(&[u32]) -> Result<Vec<f32>, InferenceError>,
{
    let mut ids = prompt_ids;
    let prompt_len = ids.len();

    while ids.len() - prompt_len < sampling.max_new_tokens {
        if cancel.is_cancelled() {
            return Err(InferenceError::Cancelled);
        }
        let logits = step(&ids)?;
        let next = sample_next(&logits, &ids, sampling, rng).ok_or_else(|| {
            InferenceError::ModelOutput("caption model returned empty logits".into())
        })?;
        if next == eos_token_id {
            break;
        }
        ids.push(next);
    }
    Ok(ids)
}

impl CaptionGenerator for BlipCaptioner {
    fn caption(&self, image: &Path, cancel: &Cancellation) -> Result<String, InferenceError> {
        let image = ingest::load_rgb(image)?;
        let pixels = to_chw(&image, &self.spec)?;
        let pixel_values = to_tensor(&pixels, self.device)?;

        let encoding = self
            .tokenizer
            .encode(CAPTION_PROMPT, true)
            .map_err(|e| InferenceError::Tokenizer(e.to_string()))?;
        let ids = self.generate(&pixel_values, encoding.get_ids().to_vec(), cancel)?;
        log::debug!("Caption model produced {} tokens", ids.len());

        let decoded = self
            .tokenizer
            .decode(&ids, true)
            .map_err(|e| InferenceError::Tokenizer(e.to_string()))?;
        Ok(extract_answer(&decoded).to_string())
    }
}

/// Text after the last answer delimiter, trimmed. Without a delimiter the
/// whole decoded text is kept.
pub fn extract_answer(decoded: &str) -> &str {
    decoded
        .rsplit_once(ANSWER_DELIMITER)
        .map_or(decoded, |(_, answer)| answer)
        .trim()
}
