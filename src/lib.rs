//! Local-first knowledge memory engine.
//!
//! engram turns conversational session transcripts into a durable,
//! searchable corpus of atomic memories — markdown files with YAML
//! frontmatter as the source of truth, SQLite sidecars for everything
//! derived. Memories decay unless reinforced, get scheduled for review on
//! an FSRS-inspired curve, and graduate from project to global scope once
//! enough independent projects reconfirm them.
//!
//! # Architecture
//!
//! - **Storage**: one markdown file per memory ([`store`]); three sidecar
//!   SQLite databases ([`db`]) carrying the derived index, FTS5 keyword
//!   index, [sqlite-vec](https://github.com/asg017/sqlite-vec) vectors,
//!   the FSRS scheduler, and the ingestion queue
//! - **Embeddings**: local ONNX Runtime with all-MiniLM-L6-v2
//!   (384 dimensions) behind [`embedding::EmbeddingProvider`]
//! - **Search**: hybrid BM25 + cosine fusion with multi-factor ranking,
//!   a TTL'd result cache, and click-through analytics ([`search`])
//! - **Ingestion**: a session-end hook enqueues ([`hook`], [`queue`]); the
//!   consolidator extracts, dedupes, and reinforces ([`consolidate`])
//! - **Lifecycle**: importance decay and archival ([`importance`],
//!   [`maintenance`]), spaced repetition ([`scheduler`]), cross-project
//!   promotion ([`promotion`]), and a typed relationship graph ([`graph`])
//! - **Resilience**: every outbound LLM call runs behind a named, durable
//!   circuit breaker ([`breaker`])

pub mod breaker;
pub mod cli;
pub mod config;
pub mod consolidate;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod hook;
pub mod importance;
pub mod index;
pub mod maintenance;
pub mod promotion;
pub mod queue;
pub mod scheduler;
pub mod search;
pub mod store;
pub mod vector;
