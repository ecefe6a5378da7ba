#![allow(dead_code)]

use std::path::PathBuf;

use engram::config::EngramConfig;
use engram::embedding::{l2_normalize, EmbeddingProvider, EMBEDDING_DIM};
use engram::engine::Engine;
use tempfile::TempDir;

/// Deterministic embedder for tests: texts sharing most words land near
/// the same spike pattern, unrelated texts land elsewhere. No model files
/// needed.
pub struct WordHashEmbedder;

impl EmbeddingProvider for WordHashEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        let mut words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 3)
            .collect();
        words.sort_unstable();
        words.dedup();
        for w in words {
            let mut h: u32 = 2166136261;
            for b in w.bytes() {
                h = (h ^ b as u32).wrapping_mul(16777619);
            }
            v[(h as usize) % EMBEDDING_DIM] += 1.0;
        }
        Ok(l2_normalize(&v))
    }
}

/// Config rooted in a temp directory.
pub fn test_config(dir: &TempDir) -> EngramConfig {
    let mut config = EngramConfig::default();
    config.storage.project_id = "alpha".into();
    config.storage.memory_dir = dir.path().join("memories").to_string_lossy().into_owned();
    config.storage.session_db = dir.path().join("session.db").to_string_lossy().into_owned();
    config.storage.fsrs_db = dir.path().join("fsrs.db").to_string_lossy().into_owned();
    config.storage.intelligence_db = dir
        .path()
        .join("intelligence.db")
        .to_string_lossy()
        .into_owned();
    config
}

/// Fresh engine over a temp directory with the deterministic embedder.
pub fn test_engine() -> (TempDir, Engine) {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut engine = Engine::open(config).unwrap();
    engine.set_embedder(Box::new(WordHashEmbedder));
    (dir, engine)
}

/// Write a JSONL transcript of user messages and return its path.
pub fn write_transcript(dir: &TempDir, name: &str, user_lines: &[&str]) -> PathBuf {
    let path = dir.path().join(name);
    let body: String = user_lines
        .iter()
        .map(|line| {
            serde_json::json!({"role": "user", "content": line}).to_string() + "\n"
        })
        .collect();
    std::fs::write(&path, body).unwrap();
    path
}
