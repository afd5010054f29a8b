//! Root-cause analysis: turn an event into a remediation hypothesis.
//!
//! Two implementations share the [`HypothesisGenerator`] seam. The rule-based
//! analyzer is always available; the language-model analyzer is selected by
//! configuration and needs an API key. Which one runs is decided once, at
//! construction, by [`build_analyzer`].

pub mod llm;
pub mod rules;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{AnalyzerConfig, AnalyzerKind};
use crate::event::Event;
use crate::storage::IncidentMemory;

pub use self::llm::LlmAnalyzer;
pub use self::rules::{rule_for, RuleBasedAnalyzer};

const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Produces a natural-language root cause and first remediation step.
#[async_trait]
pub trait HypothesisGenerator: Send + Sync {
    async fn analyze(&self, event: &Event) -> Result<String>;
}

/// Build the analyzer selected by `config`.
///
/// Selecting `llm` without an API key (neither `analyzer.api_key` nor
/// `OPENAI_API_KEY`) falls back to the rule-based analyzer.
pub fn build_analyzer(
    config: &AnalyzerConfig,
    memory: Arc<dyn IncidentMemory>,
) -> Result<Arc<dyn HypothesisGenerator>> {
    match config.kind {
        AnalyzerKind::Rules => {
            info!("using rule-based analyzer");
            Ok(Arc::new(RuleBasedAnalyzer::new(memory, config.similar_k)))
        }
        AnalyzerKind::Llm => {
            let api_key = config
                .api_key
                .clone()
                .or_else(|| std::env::var(OPENAI_API_KEY_ENV).ok())
                .filter(|k| !k.trim().is_empty());
            match api_key {
                Some(key) => {
                    info!(model = %config.model, "using language-model analyzer");
                    Ok(Arc::new(LlmAnalyzer::new(config, key, memory)?))
                }
                None => {
                    warn!("analyzer.kind = \"llm\" but no API key configured, falling back to rules");
                    Ok(Arc::new(RuleBasedAnalyzer::new(memory, config.similar_k)))
                }
            }
        }
    }
}
