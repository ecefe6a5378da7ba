//! LLM extraction adapter.
//!
//! The provider is a replaceable shell command (`claude -p` by default)
//! that receives the prompt on stdin and prints its answer to stdout. The
//! only contract is `extract(prompt, context) -> text` with a hard timeout;
//! every call site wraps it in a circuit breaker.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::config::ConsolidationConfig;

pub trait LlmExtractor: Send + Sync {
    fn extract(&self, prompt: &str, context: &str) -> anyhow::Result<String>;
}

/// Shell-callable extractor with a hard timeout. The child is killed when
/// the deadline passes; a timeout counts as a failure for the breaker.
pub struct ShellExtractor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ShellExtractor {
    pub fn from_config(config: &ConsolidationConfig) -> anyhow::Result<Self> {
        let mut parts = config.llm_command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("llm_command is empty"))?
            .to_string();
        Ok(Self {
            program,
            args: parts.map(String::from).collect(),
            timeout: Duration::from_millis(config.llm_timeout_ms),
        })
    }
}

impl LlmExtractor for ShellExtractor {
    fn extract(&self, prompt: &str, context: &str) -> anyhow::Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        {
            let mut stdin = child.stdin.take().expect("stdin piped");
            if !context.is_empty() {
                stdin.write_all(context.as_bytes())?;
                stdin.write_all(b"\n\n")?;
            }
            stdin.write_all(prompt.as_bytes())?;
            // Dropping stdin closes the pipe so the child sees EOF.
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait()? {
                Some(status) => {
                    let output = child.wait_with_output()?;
                    anyhow::ensure!(status.success(), "extractor exited with {status}");
                    return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
                }
                None if Instant::now() >= deadline => {
                    child.kill().ok();
                    child.wait().ok();
                    anyhow::bail!("extractor timed out after {:?}", self.timeout);
                }
                None => std::thread::sleep(Duration::from_millis(50)),
            }
        }
    }
}

/// One learning as returned by the extractor.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmLearning {
    pub content: String,
    pub importance: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub category: String,
}

/// Build the extraction prompt. The conversation is bounded so the call
/// stays inside the provider's context window.
pub fn extraction_prompt(conversation: &str) -> String {
    let bounded = truncate_chars(conversation, 15_000);
    format!(
        "Analyze this session transcript and extract learnings worth remembering.\n\n\
         CONVERSATION:\n{bounded}\n\n\
         EXTRACT learnings in these categories:\n\
         1. Preferences - stated user preferences\n\
         2. Corrections - the user corrected something important\n\
         3. Technical - solutions, patterns, approaches that worked\n\
         4. Process - workflows and methods that were effective\n\
         5. Project-specific - patterns tied to a named project\n\n\
         For each learning:\n\
         - Write 1-2 clear sentences\n\
         - Rate importance: 0.5=minor tip, 0.7=useful pattern, 0.85=critical insight, 0.95=game-changer\n\
         - Corrections rate 0.8+, preferences 0.7+\n\n\
         Skip generic advice. If nothing significant, return [].\n\n\
         Return ONLY a JSON array:\n\
         [{{\"content\": \"...\", \"importance\": 0.75, \"reasoning\": \"...\", \"category\": \"technical\"}}]"
    )
}

/// Parse the extractor's response: tolerate code fences and surrounding
/// prose, reject anything that is not a JSON array of learnings.
pub fn parse_learnings(response: &str) -> anyhow::Result<Vec<LlmLearning>> {
    let trimmed = response.trim();
    let json = strip_code_fence(trimmed);

    // Fall back to the first [...] span when the model added prose.
    let json = match json.find('[') {
        Some(start) => {
            let end = json.rfind(']').map(|i| i + 1).unwrap_or(json.len());
            &json[start..end]
        }
        None => json,
    };

    let learnings: Vec<LlmLearning> = serde_json::from_str(json)?;
    Ok(learnings
        .into_iter()
        .filter(|l| !l.content.trim().is_empty() && (0.0..=1.0).contains(&l.importance))
        .collect())
}

fn strip_code_fence(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

fn truncate_chars(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_json_array() {
        let response = r#"[{"content": "Use exponential backoff", "importance": 0.7, "reasoning": "retries", "category": "technical"}]"#;
        let learnings = parse_learnings(response).unwrap();
        assert_eq!(learnings.len(), 1);
        assert_eq!(learnings[0].content, "Use exponential backoff");
        assert_eq!(learnings[0].importance, 0.7);
    }

    #[test]
    fn parse_fenced_json_with_prose() {
        let response = "Here are the learnings:\n```json\n[{\"content\": \"A\", \"importance\": 0.8}]\n```";
        let learnings = parse_learnings(response).unwrap();
        assert_eq!(learnings.len(), 1);
    }

    #[test]
    fn parse_empty_array_and_garbage() {
        assert!(parse_learnings("[]").unwrap().is_empty());
        assert!(parse_learnings("no json at all").is_err());
        // Out-of-range importance rows are dropped, not fatal
        let mixed = r#"[{"content": "ok", "importance": 0.5}, {"content": "bad", "importance": 7.0}]"#;
        assert_eq!(parse_learnings(mixed).unwrap().len(), 1);
    }

    #[test]
    fn prompt_bounds_conversation_length() {
        let long = "x".repeat(40_000);
        let prompt = extraction_prompt(&long);
        assert!(prompt.len() < 17_000);
    }

    #[test]
    fn shell_extractor_runs_a_command() {
        let extractor = ShellExtractor {
            program: "cat".into(),
            args: vec![],
            timeout: Duration::from_secs(5),
        };
        let out = extractor.extract("hello prompt", "").unwrap();
        assert_eq!(out.trim(), "hello prompt");
    }

    #[test]
    fn shell_extractor_times_out() {
        let extractor = ShellExtractor {
            program: "sleep".into(),
            args: vec!["5".into()],
            timeout: Duration::from_millis(100),
        };
        let err = extractor.extract("prompt", "").unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn shell_extractor_propagates_failure_status() {
        let extractor = ShellExtractor {
            program: "false".into(),
            args: vec![],
            timeout: Duration::from_secs(5),
        };
        assert!(extractor.extract("prompt", "").is_err());
    }
}
