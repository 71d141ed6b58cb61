//! Argument sanitizer: regex/blocklist validation of tool arguments (C8).

use crate::error::{GateError, GateErrorKind, GateResult};
use crate::events::EventBus;
use regex::Regex;

const MAX_DEPTH: usize = 10;

/// Built-in patterns flagging common shell/path/script/SQL injection shapes.
fn default_global_patterns() -> Vec<(&'static str, &'static str)> {
    vec![
        (r"[;&|`$]", "shell metacharacter"),
        (r"\.\./", "path traversal"),
        (r"(?i)<script[\s>]", "script tag"),
        (r"(?i)\b(drop|delete)\s+table\b", "SQL mutation shape"),
        (r"(?i)\brm\s+-rf\b", "filesystem mutation command"),
    ]
}

struct CompiledPattern {
    regex: Regex,
    reason: &'static str,
}

pub struct ArgSanitizer {
    global: Vec<CompiledPattern>,
    tool_specific: std::collections::HashMap<String, Vec<Regex>>,
    user_patterns: Vec<Regex>,
    blocked_values: Vec<String>,
    audit_only_mode: bool,
    events: EventBus,
}

#[derive(Default, Clone)]
pub struct SanitizerConfig {
    pub tool_patterns: std::collections::HashMap<String, Vec<String>>,
    pub user_patterns: Vec<String>,
    pub blocked_values: Vec<String>,
    pub audit_only_mode: bool,
}

impl ArgSanitizer {
    pub fn new(config: SanitizerConfig, events: EventBus) -> Self {
        let global = default_global_patterns()
            .into_iter()
            .filter_map(|(pattern, reason)| match Regex::new(pattern) {
                Ok(regex) => Some(CompiledPattern { regex, reason }),
                Err(_) => {
                    events.emit(
                        "security:pattern_error",
                        serde_json::json!({"pattern": pattern, "scope": "global"}),
                    );
                    None
                }
            })
            .collect();

        let tool_specific = config
            .tool_patterns
            .into_iter()
            .map(|(tool, patterns)| {
                let compiled = patterns
                    .into_iter()
                    .filter_map(|p| match Regex::new(&p) {
                        Ok(r) => Some(r),
                        Err(_) => {
                            events.emit(
                                "security:pattern_error",
                                serde_json::json!({"pattern": p, "scope": "tool", "tool": tool}),
                            );
                            None
                        }
                    })
                    .collect();
                (tool, compiled)
            })
            .collect();

        let user_patterns = config
            .user_patterns
            .into_iter()
            .filter_map(|p| match Regex::new(&p) {
                Ok(r) => Some(r),
                Err(_) => {
                    events.emit(
                        "security:pattern_error",
                        serde_json::json!({"pattern": p, "scope": "user"}),
                    );
                    None
                }
            })
            .collect();

        Self {
            global,
            tool_specific,
            user_patterns,
            blocked_values: config.blocked_values,
            audit_only_mode: config.audit_only_mode,
            events,
        }
    }

    /// Checks `args` against the global, configured-tool, user, and the
    /// tool's own `sanitizer_patterns` (spec.md §4.7(b): patterns come from
    /// configuration *or* the tool's own metadata).
    pub fn check(&self, tool_name: &str, args: &serde_json::Value, tool_metadata_patterns: &[String]) -> GateResult<()> {
        let metadata_patterns: Vec<Regex> = tool_metadata_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(r) => Some(r),
                Err(_) => {
                    self.events.emit(
                        "security:pattern_error",
                        serde_json::json!({"pattern": p, "scope": "tool_metadata", "tool": tool_name}),
                    );
                    None
                }
            })
            .collect();

        let mut violations = Vec::new();
        self.walk(tool_name, args, 0, &mut violations, &metadata_patterns);

        if violations.is_empty() {
            return Ok(());
        }

        if self.audit_only_mode {
            self.events.emit(
                "security:sanitizer_violation",
                serde_json::json!({"tool": tool_name, "violations": violations}),
            );
            return Ok(());
        }

        Err(GateError::new(
            GateErrorKind::DangerousArgs,
            format!("argument sanitizer rejected call to '{tool_name}': {}", violations.join("; ")),
        ))
    }

    fn walk(
        &self,
        tool_name: &str,
        value: &serde_json::Value,
        depth: usize,
        violations: &mut Vec<String>,
        metadata_patterns: &[Regex],
    ) {
        if depth > MAX_DEPTH {
            crate::log(&format!(
                "argument sanitizer: traversal for '{tool_name}' exceeded max depth {MAX_DEPTH}"
            ));
            return;
        }
        match value {
            serde_json::Value::String(s) => self.check_leaf(tool_name, s, violations, metadata_patterns),
            serde_json::Value::Array(items) => {
                for item in items {
                    self.walk(tool_name, item, depth + 1, violations, metadata_patterns);
                }
            }
            serde_json::Value::Object(map) => {
                for item in map.values() {
                    self.walk(tool_name, item, depth + 1, violations, metadata_patterns);
                }
            }
            _ => {}
        }
    }

    fn check_leaf(&self, tool_name: &str, s: &str, violations: &mut Vec<String>, metadata_patterns: &[Regex]) {
        for blocked in &self.blocked_values {
            if s.contains(blocked.as_str()) {
                violations.push(format!("contains blocked value '{blocked}'"));
            }
        }
        for pattern in &self.global {
            if pattern.regex.is_match(s) {
                violations.push(pattern.reason.to_string());
            }
        }
        if let Some(patterns) = self.tool_specific.get(tool_name) {
            for regex in patterns {
                if regex.is_match(s) {
                    violations.push(format!("matched tool-specific pattern '{}'", regex.as_str()));
                }
            }
        }
        for regex in metadata_patterns {
            if regex.is_match(s) {
                violations.push(format!("matched tool metadata pattern '{}'", regex.as_str()));
            }
        }
        for regex in &self.user_patterns {
            if regex.is_match(s) {
                violations.push(format!("matched user pattern '{}'", regex.as_str()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_metacharacters_are_rejected() {
        let sanitizer = ArgSanitizer::new(SanitizerConfig::default(), EventBus::new());
        let args = serde_json::json!({"command": "ls; rm -rf /"});
        assert!(sanitizer.check("bash", &args, &[]).is_err());
    }

    #[test]
    fn benign_arguments_pass() {
        let sanitizer = ArgSanitizer::new(SanitizerConfig::default(), EventBus::new());
        let args = serde_json::json!({"city": "London"});
        assert!(sanitizer.check("get_weather", &args, &[]).is_ok());
    }

    #[test]
    fn audit_only_mode_logs_but_allows() {
        let config = SanitizerConfig {
            audit_only_mode: true,
            ..Default::default()
        };
        let sanitizer = ArgSanitizer::new(config, EventBus::new());
        let args = serde_json::json!({"command": "../etc/passwd"});
        assert!(sanitizer.check("bash", &args, &[]).is_ok());
    }

    #[test]
    fn blocked_values_are_rejected() {
        let config = SanitizerConfig {
            blocked_values: vec!["DROP DATABASE".to_string()],
            ..Default::default()
        };
        let sanitizer = ArgSanitizer::new(config, EventBus::new());
        let args = serde_json::json!({"query": "DROP DATABASE prod"});
        assert!(sanitizer.check("sql", &args, &[]).is_err());
    }

    #[test]
    fn nested_values_are_traversed() {
        let sanitizer = ArgSanitizer::new(SanitizerConfig::default(), EventBus::new());
        let args = serde_json::json!({"nested": {"list": ["ok", "rm -rf /"]}});
        assert!(sanitizer.check("bash", &args, &[]).is_err());
    }

    #[test]
    fn tool_metadata_pattern_is_checked_alongside_configured_patterns() {
        let sanitizer = ArgSanitizer::new(SanitizerConfig::default(), EventBus::new());
        let args = serde_json::json!({"path": "/srv/secrets.yaml"});
        let patterns = vec!["secrets\\.yaml".to_string()];
        assert!(sanitizer.check("read_file", &args, &[]).is_ok());
        assert!(sanitizer.check("read_file", &args, &patterns).is_err());
    }
}
