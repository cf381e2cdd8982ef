//! Local ONNX Runtime embedding provider.
//!
//! Runs all-MiniLM-L6-v2 through `ort`: tokenization, inference, mean pooling
//! over the attention mask, then L2 normalization.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use super::{l2_normalize, EmbeddingModelSpec, EmbeddingProvider};

/// Number of dimensions in the embedding vectors (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Maximum sequence length for all-MiniLM-L6-v2 (trained at 256).
const MAX_SEQ_LEN: usize = 256;

/// Output names tried in order; ONNX exports disagree on the name.
const OUTPUT_NAMES: [&str; 2] = ["token_embeddings", "last_hidden_state"];

pub struct LocalEmbeddingProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model: String,
}

// Safety: Tokenizer is Send+Sync. Session is only reached through the Mutex.
unsafe impl Send for LocalEmbeddingProvider {}
unsafe impl Sync for LocalEmbeddingProvider {}

/// Flattened `[batch, seq]` model inputs.
struct BatchInputs {
    batch: usize,
    seq_len: usize,
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
}

impl LocalEmbeddingProvider {
    pub fn new(spec: &EmbeddingModelSpec) -> Result<Self> {
        let model_path = spec.cache_dir.join("model.onnx");
        let tokenizer_path = spec.cache_dir.join("tokenizer.json");

        for (what, path) in [("ONNX model", &model_path), ("Tokenizer", &tokenizer_path)] {
            anyhow::ensure!(
                path.exists(),
                "{what} not found at {}. Run `kpack model download` first.",
                path.display()
            );
        }

        let session = load_session(&model_path)?;
        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let tokenizer = load_tokenizer(&tokenizer_path)?;
        tracing::info!(tokenizer = %tokenizer_path.display(), "tokenizer loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model: spec.model.clone(),
        })
    }

    fn tokenize(&self, texts: &[&str]) -> Result<BatchInputs> {
        let encodings: Vec<Encoding> = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let seq_len = encodings.first().map_or(0, |e| e.get_ids().len());
        let mut input_ids = Vec::with_capacity(encodings.len() * seq_len);
        let mut attention_mask = Vec::with_capacity(encodings.len() * seq_len);
        for encoding in &encodings {
            input_ids.extend(encoding.get_ids().iter().map(|&id| i64::from(id)));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| i64::from(m)));
        }

        Ok(BatchInputs {
            batch: encodings.len(),
            seq_len,
            input_ids,
            attention_mask,
        })
    }
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let inputs = self.tokenize(texts)?;
        let shape = vec![inputs.batch as i64, inputs.seq_len as i64];
        let input_ids = Tensor::from_array((shape.clone(), inputs.input_ids.clone().into_boxed_slice()))?;
        let attention_mask =
            Tensor::from_array((shape.clone(), inputs.attention_mask.clone().into_boxed_slice()))?;
        // single segment, so token types are all zero
        let token_type_ids = Tensor::from_array((
            shape,
            vec![0i64; inputs.batch * inputs.seq_len].into_boxed_slice(),
        ))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

        let outputs = session.run(ort::inputs! {
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
            "token_type_ids" => token_type_ids,
        })?;

        let hidden = OUTPUT_NAMES
            .iter()
            .find_map(|name| outputs.get(*name))
            .unwrap_or(&outputs[0]);
        let (dims, data) = hidden
            .try_extract_tensor::<f32>()
            .context("failed to extract token embeddings tensor")?;

        let dims: &[i64] = &dims;
        anyhow::ensure!(
            dims.len() == 3 && dims[2] == EMBEDDING_DIM as i64,
            "unexpected token embeddings shape: {dims:?}, expected [batch, seq, {EMBEDDING_DIM}]"
        );

        Ok(mean_pool(&inputs, data, dims[1] as usize))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn load_session(model_path: &Path) -> Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(model_path)
        .context("failed to load ONNX model")
}

fn load_tokenizer(tokenizer_path: &Path) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(tokenizer_path)
        .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: MAX_SEQ_LEN,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        ..Default::default()
    }));

    Ok(tokenizer)
}

/// Average token vectors under the attention mask, then L2-normalize each row.
fn mean_pool(inputs: &BatchInputs, hidden: &[f32], out_seq_len: usize) -> Vec<Vec<f32>> {
    (0..inputs.batch)
        .map(|b| {
            let mut sum = vec![0.0f32; EMBEDDING_DIM];
            let mut count = 0.0f32;
            for s in 0..out_seq_len.min(inputs.seq_len) {
                if inputs.attention_mask[b * inputs.seq_len + s] == 0 {
                    continue;
                }
                let offset = (b * out_seq_len + s) * EMBEDDING_DIM;
                for (acc, value) in sum.iter_mut().zip(&hidden[offset..offset + EMBEDDING_DIM]) {
                    *acc += value;
                }
                count += 1.0;
            }
            if count > 0.0 {
                sum.iter_mut().for_each(|v| *v /= count);
            }
            l2_normalize(&sum)
        })
        .collect()
}
