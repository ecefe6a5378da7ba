//! Local ONNX Runtime embedding provider.
//!
//! Implements [`EmbeddingProvider`] with all-MiniLM-L6-v2 via `ort`:
//! tokenize, run the transformer, mean-pool over the attention mask,
//! L2-normalize. The session is behind a mutex; inference is exclusive.

use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;

/// all-MiniLM-L6-v2 was trained at sequence length 256.
const MAX_SEQ_LEN: usize = 256;

pub struct LocalEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

// Safety: Tokenizer is Send+Sync; the Session mutex guarantees exclusive
// access during run().
unsafe impl Send for LocalEmbedder {}
unsafe impl Sync for LocalEmbedder {}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        anyhow::ensure!(
            model_path.exists(),
            "ONNX model not found at {}. Run `engram model download` first.",
            model_path.display()
        );
        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer not found at {}. Run `engram model download` first.",
            tokenizer_path.display()
        );

        let session = Session::builder()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .with_intra_threads(4)
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        let tokenizer = load_tokenizer(&tokenizer_path)?;
        tracing::info!(model = %model_path.display(), "embedding model loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

fn load_tokenizer(path: &std::path::Path) -> Result<Tokenizer> {
    let mut tokenizer =
        Tokenizer::from_file(path).map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

    tokenizer
        .with_truncation(Some(tokenizers::TruncationParams {
            max_length: MAX_SEQ_LEN,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

    tokenizer.with_padding(Some(tokenizers::PaddingParams {
        strategy: tokenizers::PaddingStrategy::BatchLongest,
        ..Default::default()
    }));

    Ok(tokenizer)
}

impl EmbeddingProvider for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text])?;
        Ok(results.into_iter().next().expect("batch had one input"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let mut input_ids = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_len);
        for encoding in &encodings {
            input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))?;
        let mask_tensor =
            Tensor::from_array((shape.clone(), attention_mask.clone().into_boxed_slice()))?;
        // token_type_ids: all zeros (single sentence, no segment B)
        let token_types = vec![0i64; batch_size * seq_len];
        let token_types_tensor = Tensor::from_array((shape, token_types.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

        let outputs = session.run(ort::inputs! {
            "input_ids" => input_ids_tensor,
            "attention_mask" => mask_tensor,
            "token_type_ids" => token_types_tensor,
        })?;

        // Output name varies by ONNX export; try common names, then index 0.
        let token_embeddings = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);

        let (out_shape, data) = token_embeddings
            .try_extract_tensor::<f32>()
            .context("failed to extract token embeddings")?;

        let dims: &[i64] = &out_shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[2] == EMBEDDING_DIM as i64,
            "unexpected embeddings shape {dims:?}, expected [batch, seq, {EMBEDDING_DIM}]"
        );
        let actual_seq_len = dims[1] as usize;

        let mut results = Vec::with_capacity(batch_size);
        for b in 0..batch_size {
            let pooled = mean_pool(
                data,
                &attention_mask[b * seq_len..(b + 1) * seq_len],
                b,
                actual_seq_len,
            );
            results.push(l2_normalize(&pooled));
        }
        Ok(results)
    }
}

/// Mean-pool one batch row's token embeddings, weighted by attention mask.
fn mean_pool(data: &[f32], mask: &[i64], batch: usize, seq_len: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; EMBEDDING_DIM];
    let mut count = 0.0f32;

    for (s, &m) in mask.iter().take(seq_len).enumerate() {
        if m > 0 {
            let offset = (batch * seq_len + s) * EMBEDDING_DIM;
            for (d, acc) in sum.iter_mut().enumerate() {
                *acc += data[offset + d];
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        for acc in &mut sum {
            *acc /= count;
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_pool_weights_by_mask() {
        // 1 batch, 2 tokens, but only the first is attended
        let dim = EMBEDDING_DIM;
        let mut data = vec![0.0f32; 2 * dim];
        data[0] = 2.0; // token 0, dim 0
        data[dim] = 100.0; // token 1, dim 0 — masked out

        let pooled = mean_pool(&data, &[1, 0], 0, 2);
        assert!((pooled[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn mean_pool_empty_mask_is_zero() {
        let data = vec![1.0f32; 2 * EMBEDDING_DIM];
        let pooled = mean_pool(&data, &[0, 0], 0, 2);
        assert!(pooled.iter().all(|&x| x == 0.0));
    }

    fn model_config() -> EmbeddingConfig {
        EmbeddingConfig::default()
    }

    #[test]
    #[ignore] // Requires model files — run with: cargo test -- --ignored
    fn embed_produces_unit_norm_384() {
        let provider = LocalEmbedder::new(&model_config()).unwrap();
        let embedding = provider.embed("Direct language works better.").unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIM);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    #[ignore]
    fn similar_texts_embed_closer_than_different() {
        let provider = LocalEmbedder::new(&model_config()).unwrap();
        let a = provider.embed("The deploy failed on Friday").unwrap();
        let b = provider.embed("Friday's deployment was a failure").unwrap();
        let c = provider.embed("Quantum computing uses qubits").unwrap();

        let sim_ab = super::super::cosine_similarity(&a, &b);
        let sim_ac = super::super::cosine_similarity(&a, &c);
        assert!(sim_ab > sim_ac);
    }
}
