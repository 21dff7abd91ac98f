//! Review-run configuration, with defaults matching the documented key list
//! and a builder matching the teacher's `with_*` construction idiom.

use serde::{Deserialize, Serialize};

/// Tunables for one review run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub style_guide: Option<String>,
    pub security_rules: Vec<String>,
    pub max_findings: usize,
    pub block_on_critical: bool,
    pub include_metrics: bool,
    pub severity_filter: Option<String>,
    pub working_dir: Option<String>,
    pub ignore_patterns: Vec<String>,
    pub max_file_size: u64,
    pub custom_rules_path: Option<String>,
    pub use_neuro_symbolic: bool,
    pub max_hypotheses: usize,
    pub min_confidence: f64,
    pub impact_depth_limit: u32,
    pub batch_size: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            style_guide: None,
            security_rules: Vec::new(),
            max_findings: 100,
            block_on_critical: true,
            include_metrics: true,
            severity_filter: None,
            working_dir: None,
            ignore_patterns: vec![
                "vendor/".to_string(),
                "node_modules/".to_string(),
                ".git/".to_string(),
                "*.min.js".to_string(),
            ],
            max_file_size: 1_048_576,
            custom_rules_path: None,
            use_neuro_symbolic: true,
            max_hypotheses: 50,
            min_confidence: 0.3,
            impact_depth_limit: 3,
            batch_size: 10,
        }
    }
}

impl ReviewConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_style_guide(mut self, style_guide: impl Into<String>) -> Self {
        self.style_guide = Some(style_guide.into());
        self
    }

    pub fn with_security_rules(mut self, rules: Vec<String>) -> Self {
        self.security_rules = rules;
        self
    }

    pub fn with_max_findings(mut self, max_findings: usize) -> Self {
        self.max_findings = max_findings;
        self
    }

    pub fn with_block_on_critical(mut self, block: bool) -> Self {
        self.block_on_critical = block;
        self
    }

    pub fn with_severity_filter(mut self, filter: impl Into<String>) -> Self {
        self.severity_filter = Some(filter.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_custom_rules_path(mut self, path: impl Into<String>) -> Self {
        self.custom_rules_path = Some(path.into());
        self
    }

    pub fn with_use_neuro_symbolic(mut self, enabled: bool) -> Self {
        self.use_neuro_symbolic = enabled;
        self
    }

    pub fn with_max_hypotheses(mut self, max: usize) -> Self {
        self.max_hypotheses = max;
        self
    }

    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = min;
        self
    }

    pub fn with_impact_depth_limit(mut self, limit: u32) -> Self {
        self.impact_depth_limit = limit;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }
}
