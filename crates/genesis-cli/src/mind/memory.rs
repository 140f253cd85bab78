//! Memory distillation: old memories become knowledge

use genesis_core::config::MemoryConfig;
use tracing::{info, warn};

use super::DecisionPort;

/// Compresses the memory list once it outgrows its limit
#[derive(Debug, Clone, Copy)]
pub struct MemoryDistiller {
    limit: usize,
    keep_count: usize,
}

impl MemoryDistiller {
    pub fn new(limit: usize, keep_count: usize) -> Self {
        Self { limit, keep_count }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.limit, config.keep_count)
    }

    pub fn should_distill(&self, memory_count: usize) -> bool {
        memory_count > self.limit
    }

    /// Returns `(new_knowledge, retained_memories)`.
    ///
    /// Never fails: an unreachable port leaves the memories untouched.
    pub async fn distill(&self, memories: &[String], port: &dyn DecisionPort) -> (Vec<String>, Vec<String>) {
        if memories.len() <= self.keep_count {
            return (Vec::new(), memories.to_vec());
        }

        let split = memories.len() - self.keep_count;
        let (to_distill, retained) = memories.split_at(split);
        info!(count = to_distill.len(), "Distilling memories");

        match port.extract_insights(to_distill).await {
            Ok(text) => {
                let insights = parse_insights(&text);
                info!(insights = insights.len(), "Distillation finished");
                (insights, retained.to_vec())
            }
            Err(e) => {
                warn!(error = %e, "Distillation skipped, memories kept");
                (Vec::new(), memories.to_vec())
            }
        }
    }
}

impl Default for MemoryDistiller {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

/// One insight per non-empty line, bullets removed
fn parse_insights(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim().trim_start_matches(['-', '*', '•', ' ']).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
