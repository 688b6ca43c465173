//! Maps a tool call to one of a closed set of topics, grounded on
//! `session.py::TopicClassifier` — tool-name pattern match first,
//! argument-string pattern match as a fallback, `"general"` otherwise.

/// The closed topic set from spec.md §4.9.
pub const TOPICS: &[&str] = &[
    "file_operations",
    "git_operations",
    "database",
    "testing",
    "deployment",
    "research",
    "code_generation",
    "refactoring",
    "debugging",
    "documentation",
    "general",
];

const PATTERNS: &[(&str, &[&str])] = &[
    ("file_operations", &["write_file", "read_file", "delete_file", "move_file", "copy_file"]),
    ("git_operations", &["git_commit", "git_push", "git_pull", "git_branch", "git_merge"]),
    ("database", &["query", "insert", "update", "delete", "migrate", "sql"]),
    ("testing", &["test", "pytest", "unittest", "assertion", "mock"]),
    ("deployment", &["deploy", "build", "docker", "kubernetes", "ci_cd", "pipeline"]),
    ("research", &["search", "fetch", "web", "api", "http", "request"]),
    ("code_generation", &["generate", "create", "scaffold", "template"]),
    ("refactoring", &["refactor", "rename", "extract", "inline", "move"]),
    ("debugging", &["debug", "fix", "error", "exception", "trace"]),
    ("documentation", &["doc", "readme", "comment", "markdown"]),
];

pub struct TopicClassifier;

impl TopicClassifier {
    pub fn classify(&self, tool_name: &str, arguments: &serde_json::Value) -> String {
        let tool_lower = tool_name.to_lowercase();
        for (topic, patterns) in PATTERNS {
            if patterns.iter().any(|p| tool_lower.contains(p)) {
                return topic.to_string();
            }
        }
        let arg_str = arguments.to_string().to_lowercase();
        for (topic, patterns) in PATTERNS {
            if patterns.iter().any(|p| arg_str.contains(p)) {
                return topic.to_string();
            }
        }
        "general".to_string()
    }
}

impl Default for TopicClassifier {
    fn default() -> Self {
        Self
    }
}

/// `memory_type` inference from the tool name (spec.md's
/// `{episodic, semantic, procedural}` memory types), grounded on
/// `session.py::_infer_memory_type`.
pub fn infer_memory_type(tool_name: &str) -> &'static str {
    let tool_lower = tool_name.to_lowercase();
    const EPISODIC: &[&str] = &["write", "delete", "run", "execute", "commit", "deploy"];
    const SEMANTIC: &[&str] = &["search", "read", "fetch", "query", "get"];
    const PROCEDURAL: &[&str] = &["generate", "create", "refactor", "template"];

    if EPISODIC.iter().any(|kw| tool_lower.contains(kw)) {
        return "episodic";
    }
    if SEMANTIC.iter().any(|kw| tool_lower.contains(kw)) {
        return "semantic";
    }
    if PROCEDURAL.iter().any(|kw| tool_lower.contains(kw)) {
        return "procedural";
    }
    "episodic"
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_by_tool_name() {
        let classifier = TopicClassifier;
        assert_eq!(classifier.classify("git_commit", &json!({})), "git_operations");
        assert_eq!(classifier.classify("run_pytest_suite", &json!({})), "testing");
    }

    #[test]
    fn falls_back_to_argument_inspection() {
        let classifier = TopicClassifier;
        let topic = classifier.classify("do_thing", &json!({"target": "docker-compose.yml"}));
        assert_eq!(topic, "deployment");
    }

    #[test]
    fn unmatched_tool_is_general() {
        let classifier = TopicClassifier;
        assert_eq!(classifier.classify("frobnicate", &json!({})), "general");
    }

    #[test]
    fn infers_memory_type_from_tool_name() {
        assert_eq!(infer_memory_type("write_file"), "episodic");
        assert_eq!(infer_memory_type("search_docs"), "semantic");
        assert_eq!(infer_memory_type("generate_scaffold"), "procedural");
        assert_eq!(infer_memory_type("ping"), "episodic");
    }
}
