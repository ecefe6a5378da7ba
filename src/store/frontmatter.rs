//! YAML frontmatter fencing for memory files.
//!
//! A memory file is `---\n<yaml>\n---\n<body>`. Splitting is separate from
//! parsing so listings can inspect metadata without materializing bodies.

use crate::error::{EngramError, Result};
use crate::store::types::Frontmatter;

/// Split a memory file into its raw YAML header and markdown body.
///
/// Returns `InvalidInput` when the fences are missing — callers decide
/// whether that means quarantine.
pub fn split(raw: &str) -> Result<(&str, &str)> {
    let rest = raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
        .ok_or_else(|| EngramError::InvalidInput("missing frontmatter fence".into()))?;

    let end = rest
        .find("\n---")
        .ok_or_else(|| EngramError::InvalidInput("unterminated frontmatter".into()))?;

    let yaml = &rest[..end];
    let after = &rest[end + 4..];
    let body = after.strip_prefix('\n').unwrap_or(after);
    Ok((yaml, body))
}

/// Parse just the frontmatter of a memory file.
pub fn parse_meta(raw: &str) -> Result<Frontmatter> {
    let (yaml, _) = split(raw)?;
    Ok(serde_yaml::from_str(yaml)?)
}

/// Parse frontmatter and body together.
pub fn parse(raw: &str) -> Result<(Frontmatter, String)> {
    let (yaml, body) = split(raw)?;
    let meta: Frontmatter = serde_yaml::from_str(yaml)?;
    Ok((meta, body.trim_end().to_string()))
}

/// Render a memory back to its on-disk form.
pub fn render(meta: &Frontmatter, body: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(meta)?;
    Ok(format!("---\n{yaml}---\n\n{}\n", body.trim_end()))
}
