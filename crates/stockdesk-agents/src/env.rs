use std::collections::{BTreeMap, HashMap};

/// Source of environment variables. Lets provider resolution and tool
/// connection run against a fixed map in tests.
pub trait Env: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;

    /// Like [`Env::var`], but treats blank values as unset.
    fn non_empty(&self, key: &str) -> Option<String> {
        self.var(key).filter(|v| !v.trim().is_empty())
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl Env for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl Env for BTreeMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_count_as_unset() {
        let mut env = BTreeMap::new();
        env.insert("ANTHROPIC_API_KEY".to_string(), "  ".to_string());
        env.insert("OPENAI_API_KEY".to_string(), "sk-test".to_string());

        assert_eq!(env.var("ANTHROPIC_API_KEY").as_deref(), Some("  "));
        assert!(env.non_empty("ANTHROPIC_API_KEY").is_none());
        assert_eq!(env.non_empty("OPENAI_API_KEY").as_deref(), Some("sk-test"));
        assert!(env.non_empty("MISSING").is_none());
    }
}
