//! Command validation against a deny-list of dangerous shell patterns.
//!
//! Matching is case-insensitive and regex based. It is a heuristic layer in
//! front of the agent process, not a shell parser and not a sandbox.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::{AppError, Result};

/// Maximum accepted command length in characters.
pub const MAX_COMMAND_CHARS: usize = 5000;

/// Built-in deny rules as `(category, pattern)` pairs.
const BUILTIN_RULES: &[(&str, &str)] = &[
    // Recursive deletion of the filesystem root or the home directory,
    // including quoted, doubled-slash and `/.` spellings of the root.
    (
        "recursive root deletion",
        r#"\brm\s+(?:-{1,2}[a-z-]+\s+)+['"]?(?:/+(?:\.{1,2}|\*)?/*|~/?|\$home/?|\$\{home\}/?)['"]?(?:[\s;&|]|$)"#,
    ),
    ("recursive root deletion", r"--no-preserve-root"),
    // Privilege escalation.
    ("privilege escalation", r"\b(?:sudo|doas|pkexec)\b"),
    (
        "privilege escalation",
        r"(?:^|[\s;&|(])su(?:\s+-|\s+root\b|\s*(?:$|[;&|]))",
    ),
    // Permission-mode and ownership changes.
    (
        "permission change",
        r"\bchmod\s+(?:-\S+\s+)*(?:0?777|[246][0-7]{3}|[ugoa]*\+[rwxt]*s[rwxt]*|a?\+rwx)(?:\s|$)",
    ),
    ("permission change", r"\bchown\s+(?:-\S+\s+)*root\b"),
    ("permission change", r"\bchattr\b"),
    // Dynamic code evaluation.
    ("dynamic code evaluation", r"\beval\b"),
    ("dynamic code evaluation", r"\bexec\s*\("),
    (
        "dynamic code evaluation",
        r"\b(?:python[0-9.]*|node|perl|ruby|php)\s+(?:-\S+\s+)*-(?:c|e|r)\b",
    ),
    (
        "dynamic code evaluation",
        r"\bbase64\s+(?:-d|--decode)\b[^;&]*\|\s*(?:ba|z|da|k)?sh\b",
    ),
    // Network downloads executed directly or dropped into executable paths.
    (
        "network exfiltration",
        r"\b(?:curl|wget)\b[^;&]*\|\s*(?:sudo\s+)?(?:ba|z|da|k|fi)?sh\b",
    ),
    (
        "network exfiltration",
        r"\b(?:curl|wget)\b[^;&|]*\s(?:-o|-O|--output|--output-document)(?:\s+|=)?\S*/(?:usr/)?(?:local/)?s?bin/",
    ),
    ("network exfiltration", r"\b(?:nc|ncat|netcat)\b[^;&|]*\s-e\b"),
    ("network exfiltration", r">\s*/(?:usr/)?(?:local/)?s?bin/"),
    // Environment tampering.
    (
        "environment tampering",
        r"\bexport\s+(?:PATH|LD_PRELOAD|LD_LIBRARY_PATH|DYLD_\w+|HOME|SHELL|IFS)=",
    ),
    (
        "environment tampering",
        r"(?:^|[\s;&|])(?:LD_PRELOAD|LD_LIBRARY_PATH|DYLD_INSERT_LIBRARIES|PATH|IFS)=",
    ),
    ("environment tampering", r"\bunset\s+(?:PATH|HOME)\b"),
    ("environment tampering", r"\benv\s+-i\b"),
    // Destructive system operations.
    ("destructive system operation", r"\bmkfs(?:\.\w+)?\b"),
    ("destructive system operation", r"\bdd\s+[^;&|]*\bof=/dev/"),
    ("destructive system operation", r">\s*/dev/(?:sd|nvme|hd)"),
    (
        "destructive system operation",
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
    ),
];

/// A compiled deny rule.
#[derive(Debug, Clone)]
struct DenyRule {
    category: String,
    pattern: Regex,
}

/// Validates command text before it reaches the agent process.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    rules: Vec<DenyRule>,
}

impl CommandPolicy {
    /// Compile the built-in deny-list only.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a built-in pattern fails to compile.
    pub fn builtin() -> Result<Self> {
        Self::new(&[])
    }

    /// Compile the built-in deny-list plus operator-supplied patterns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any pattern fails to compile.
    pub fn new(extra_patterns: &[String]) -> Result<Self> {
        let builtin = BUILTIN_RULES
            .iter()
            .map(|&(category, pattern)| compile(category, pattern));
        let extra = extra_patterns
            .iter()
            .map(|pattern| compile("operator deny-list", pattern));

        let rules = builtin.chain(extra).collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Validate and normalize `input`.
    ///
    /// Rejects over-length input, strips NUL bytes, trims surrounding
    /// whitespace, rejects empty results and finally checks the deny-list.
    /// Returns the normalized command text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` naming the violated category.
    pub fn validate(&self, input: &str) -> Result<String> {
        if input.chars().count() > MAX_COMMAND_CHARS {
            return Err(AppError::Validation(format!(
                "command exceeds {MAX_COMMAND_CHARS} characters"
            )));
        }

        let stripped: String = input.chars().filter(|c| *c != '\0').collect();
        let command = stripped.trim();

        if command.is_empty() {
            return Err(AppError::Validation("command must not be empty".into()));
        }

        if let Some(rule) = self.rules.iter().find(|r| r.pattern.is_match(command)) {
            warn!(category = %rule.category, "command rejected by deny-list");
            return Err(AppError::Validation(format!(
                "command rejected: {}",
                rule.category
            )));
        }

        Ok(command.to_owned())
    }
}

fn compile(category: &str, pattern: &str) -> Result<DenyRule> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|err| AppError::Config(format!("invalid deny pattern {pattern:?}: {err}")))?;
    Ok(DenyRule {
        category: category.to_owned(),
        pattern: regex,
    })
}
