use rand::Rng;

/// Decoding parameters for stochastic text generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub max_new_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: usize,
    pub repetition_penalty: f32,
}

impl SamplingConfig {
    pub const CAPTION: SamplingConfig = SamplingConfig {
        max_new_tokens: 150,
        temperature: 0.7,
        top_p: 0.9,
        top_k: 50,
        repetition_penalty: 1.2,
    };
}

/// Penalizes every token already present in `context`: positive logits are
/// divided by `penalty`, negative ones multiplied.
pub fn apply_repetition_penalty(logits: &mut [f32], context: &[u32], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    let mut seen = vec![false; logits.len()];
    for &token in context {
        let Some(logit) = logits.get_mut(token as usize) else {
            continue;
        };
        if std::mem::replace(&mut seen[token as usize], true) {
            continue;
        }
        *logit = if *logit > 0.0 {
            *logit / penalty
        } else {
            *logit * penalty
        };
    }
}

/// Samples the next token id from raw `logits`.
///
/// Applies, in order: repetition penalty over `context`, temperature, top-k
/// truncation and nucleus (top-p) truncation, then draws from the renormalized
/// distribution. Returns `None` only when `logits` is empty.
pub fn sample_next<R: Rng>(
    logits: &[f32],
    context: &[u32],
    config: &SamplingConfig,
    rng: &mut R,
) -> Option<u32> {
    if logits.is_empty() {
        return None;
    }

    let mut scores = logits.to_vec();
    apply_repetition_penalty(&mut scores, context, config.repetition_penalty);

    let temperature = config.temperature.max(f32::EPSILON);
    let mut candidates: Vec<(usize, f32)> = scores
        .into_iter()
        .map(|s| if s.is_nan() { f32::NEG_INFINITY } else { s / temperature })
        .enumerate()
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    if config.top_k > 0 {
        candidates.truncate(config.top_k);
    }

    let max = candidates[0].1;
    let mut probs: Vec<f32> = candidates.iter().map(|(_, s)| (s - max).exp()).collect();
    let total: f32 = probs.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Some(candidates[0].0 as u32);
    }
    probs.iter_mut().for_each(|p| *p /= total);

    // Keep the smallest prefix whose mass reaches top_p.
    let mut keep = probs.len();
    let mut cumulative = 0.0;
    for (i, p) in probs.iter().enumerate() {
        cumulative += p;
        if cumulative >= config.top_p {
            keep = i + 1;
            break;
        }
    }
    probs.truncate(keep);

    let mass: f32 = probs.iter().sum();
    let mut target = rng.random::<f32>() * mass;
    for (i, p) in probs.iter().enumerate() {
        if target < *p {
            return Some(candidates[i].0 as u32);
        }
        target -= p;
    }
    Some(candidates[keep - 1].0 as u32)
}
