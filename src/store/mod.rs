//! File-backed memory store — one markdown file per memory.
//!
//! The markdown tree is the source of truth; every sidecar database derives
//! from it and can be rebuilt. Writes are atomic (temp file + fsync +
//! rename) and serialized per memory id. Unparsable files are moved to a
//! quarantine directory and counted, never silently dropped.

pub mod frontmatter;
pub mod types;

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{EngramError, Result};
use self::types::{Frontmatter, ListFilter, Memory, MemoryDraft, MemoryPatch, MemoryVersion, Scope};

/// Outcome of a directory scan: parsed records plus quarantine count.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub quarantined: usize,
}

pub struct MemoryStore {
    root: PathBuf,
    /// Serializes writers on the same memory id.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Write path ────────────────────────────────────────────────────────

    /// Create a new memory from a draft. Returns the materialized record.
    ///
    /// Fails with `InvalidInput` when importance is outside `[0, 1]` or the
    /// content is empty.
    pub fn create(&self, draft: MemoryDraft) -> Result<Memory> {
        if draft.content.trim().is_empty() {
            return Err(EngramError::InvalidInput("empty memory content".into()));
        }
        let importance = draft.importance.unwrap_or(0.5);
        if !(0.0..=1.0).contains(&importance) {
            return Err(EngramError::InvalidInput(format!(
                "importance must be in [0, 1], got {importance}"
            )));
        }

        let now = Utc::now();
        let id = make_id(&draft.content, now);
        let meta = Frontmatter {
            id: id.clone(),
            scope: draft.scope,
            project: draft.project,
            tags: draft.tags,
            importance,
            created: now,
            last_reinforced: now,
            reinforcement_count: 1,
            source_session: draft.source_session.unwrap_or_else(|| "unknown".into()),
            archived: false,
            archive_reason: None,
            promoted_at: None,
            superseded_by: None,
        };

        let memory = Memory {
            meta,
            content: draft.content,
        };

        let guard = self.id_lock(&id);
        let _held = guard.lock().map_err(|_| EngramError::ConflictingEdit(id.clone()))?;
        self.write_file(&memory)?;
        debug!(id = %id, project = %memory.meta.project, "memory created");
        Ok(memory)
    }

    /// Read a single memory by id.
    pub fn read(&self, id: &str) -> Result<Memory> {
        let path = self.path_for(id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngramError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let (meta, content) = frontmatter::parse(&raw).map_err(|e| EngramError::Corruption {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Memory { meta, content })
    }

    /// Apply a partial update. Content edits snapshot the previous file into
    /// the versions area first, so `versions(id)` can replay history.
    pub fn update(&self, id: &str, patch: MemoryPatch) -> Result<Memory> {
        let guard = self.id_lock(id);
        let _held = guard.lock().map_err(|_| EngramError::ConflictingEdit(id.to_string()))?;

        let mut memory = self.read(id)?;

        if let Some(content) = patch.content {
            if content.trim().is_empty() {
                return Err(EngramError::InvalidInput("empty memory content".into()));
            }
            if content != memory.content {
                self.snapshot_version(&memory)?;
                memory.content = content;
            }
        }
        if let Some(tags) = patch.tags {
            memory.meta.tags = tags;
        }
        if let Some(importance) = patch.importance {
            if !(0.0..=1.0).contains(&importance) {
                return Err(EngramError::InvalidInput(format!(
                    "importance must be in [0, 1], got {importance}"
                )));
            }
            memory.meta.importance = importance;
        }
        if let Some(scope) = patch.scope {
            // Scope only widens; restore() is the explicit narrowing path.
            if memory.meta.scope == Scope::Global && scope == Scope::Project {
                return Err(EngramError::InvalidInput(
                    "cannot demote a global memory to project scope".into(),
                ));
            }
            memory.meta.scope = scope;
        }
        if let Some(promoted_at) = patch.promoted_at {
            memory.meta.promoted_at = Some(promoted_at);
        }
        if let Some(superseded_by) = patch.superseded_by {
            memory.meta.superseded_by = Some(superseded_by);
        }

        self.write_file(&memory)?;
        Ok(memory)
    }

    /// Record a reinforcement event: strictly increments the count, bumps
    /// `last_reinforced`, and boosts importance by `factor` up to `cap`.
    pub fn reinforce(&self, id: &str, factor: f64, cap: f64) -> Result<Memory> {
        let guard = self.id_lock(id);
        let _held = guard.lock().map_err(|_| EngramError::ConflictingEdit(id.to_string()))?;

        let mut memory = self.read(id)?;
        memory.meta.reinforcement_count += 1;
        memory.meta.last_reinforced = Utc::now();
        memory.meta.importance = crate::importance::reinforce(memory.meta.importance, factor, cap);
        self.write_file(&memory)?;
        debug!(id = %id, count = memory.meta.reinforcement_count, "memory reinforced");
        Ok(memory)
    }

    /// Archive a memory. Idempotent — archiving an archived memory is a no-op.
    pub fn archive(&self, id: &str, reason: &str) -> Result<Memory> {
        let guard = self.id_lock(id);
        let _held = guard.lock().map_err(|_| EngramError::ConflictingEdit(id.to_string()))?;

        let mut memory = self.read(id)?;
        if memory.meta.archived {
            return Ok(memory);
        }
        memory.meta.archived = true;
        memory.meta.archive_reason = Some(reason.to_string());
        if !memory.meta.tags.iter().any(|t| t == "archived") {
            memory.meta.tags.push("archived".into());
        }
        self.write_file(&memory)?;
        Ok(memory)
    }

    /// Bring an archived memory back into circulation.
    pub fn restore(&self, id: &str) -> Result<Memory> {
        let guard = self.id_lock(id);
        let _held = guard.lock().map_err(|_| EngramError::ConflictingEdit(id.to_string()))?;

        let mut memory = self.read(id)?;
        memory.meta.archived = false;
        memory.meta.archive_reason = None;
        memory.meta.tags.retain(|t| t != "archived");
        self.write_file(&memory)?;
        Ok(memory)
    }

    // ── Read path ─────────────────────────────────────────────────────────

    /// List frontmatter for memories matching `filter`. Bodies are not
    /// materialized — the cost is O(files), not O(total content size).
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<Frontmatter>> {
        let mut out = Vec::new();
        for entry in self.memory_files()? {
            match self.read_meta(&entry) {
                Ok(meta) => {
                    if filter.matches(&meta) {
                        out.push(meta);
                    }
                }
                Err(EngramError::Corruption { path, reason }) => {
                    warn!(path = %path.display(), %reason, "skipping corrupt memory file");
                }
                Err(e) => return Err(e),
            }
        }
        out.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(out)
    }

    /// Materialize full records matching `filter` — used by the dedup pass
    /// and brute-force search fallbacks.
    pub fn list_full(&self, filter: &ListFilter) -> Result<Vec<Memory>> {
        self.list(filter)?
            .into_iter()
            .map(|meta| self.read(&meta.id))
            .collect()
    }

    /// Case-insensitive substring search over bodies.
    pub fn search_by_substring(&self, query: &str, filter: &ListFilter) -> Result<Vec<Memory>> {
        let needle = query.to_lowercase();
        let mut out = Vec::new();
        for meta in self.list(filter)? {
            let memory = self.read(&meta.id)?;
            if memory.content.to_lowercase().contains(&needle) {
                out.push(memory);
            }
        }
        Ok(out)
    }

    /// Prior versions of a memory, oldest first.
    pub fn versions(&self, id: &str) -> Result<Vec<MemoryVersion>> {
        // Verify the memory exists so absent ids surface as NotFound.
        self.read(id)?;
        let dir = self.versions_dir(id);
        let mut out = Vec::new();
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Ok(saved_at) = stem.parse::<i64>() {
                        if let Some(ts) = DateTime::<Utc>::from_timestamp_millis(saved_at) {
                            out.push(MemoryVersion { saved_at: ts, path });
                        }
                    }
                }
            }
        }
        out.sort_by_key(|v| v.saved_at);
        Ok(out)
    }

    // ── Health ────────────────────────────────────────────────────────────

    /// Scan the tree, moving unparsable files into `quarantine/`.
    pub fn quarantine_corrupt(&self) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let quarantine = self.root.join("quarantine");
        for path in self.memory_files()? {
            if self.read_meta(&path).is_err() {
                fs::create_dir_all(&quarantine)?;
                let dest = quarantine.join(path.file_name().unwrap_or_default());
                fs::rename(&path, &dest)?;
                warn!(from = %path.display(), to = %dest.display(), "quarantined corrupt memory file");
                report.quarantined += 1;
            }
        }
        Ok(report)
    }

    /// Count files whose frontmatter fails to parse, without moving them.
    pub fn count_corrupt(&self) -> Result<usize> {
        let mut corrupt = 0;
        for path in self.memory_files()? {
            if self.read_meta(&path).is_err() {
                corrupt += 1;
            }
        }
        Ok(corrupt)
    }

    pub fn file_count(&self) -> Result<usize> {
        Ok(self.memory_files()?.len())
    }

    // ── Internal ──────────────────────────────────────────────────────────

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.md"))
    }

    fn versions_dir(&self, id: &str) -> PathBuf {
        self.root.join(".versions").join(id)
    }

    fn id_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn memory_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("md") {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn read_meta(&self, path: &Path) -> Result<Frontmatter> {
        let raw = fs::read_to_string(path)?;
        frontmatter::parse_meta(&raw).map_err(|e| EngramError::Corruption {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Atomic write: temp file in the same directory, fsync, rename.
    fn write_file(&self, memory: &Memory) -> Result<()> {
        let raw = frontmatter::render(&memory.meta, &memory.content)?;
        let dest = self.path_for(memory.id());
        let tmp = dest.with_extension("md.tmp");

        let mut file = fs::File::create(&tmp)?;
        file.write_all(raw.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &dest)?;
        Ok(())
    }

    fn snapshot_version(&self, memory: &Memory) -> Result<()> {
        let dir = self.versions_dir(memory.id());
        fs::create_dir_all(&dir)?;
        let raw = frontmatter::render(&memory.meta, &memory.content)?;
        let name = format!("{}.md", Utc::now().timestamp_millis());
        fs::write(dir.join(name), raw)?;
        Ok(())
    }
}

/// Stable id: millisecond timestamp plus a short hash of the content.
pub fn make_id(content: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", now.timestamp_millis(), content_hash_short(content))
}

/// First 8 hex chars of the content's SHA-256.
pub fn content_hash_short(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    hex
}

/// Full SHA-256 hex of the content — the embedding-cache key.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
