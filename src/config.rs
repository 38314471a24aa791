//! Process-wide engine configuration (§6, `SPEC_FULL.md` §10.3).
//!
//! Loaded from an optional TOML file with `ANALYZER_*` environment variable
//! overrides, following the same `load()` → `apply_env_overrides()` →
//! `validate()` shape used for the rest of this codebase's ambient config.
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on token count in more-like-this clauses.
    pub max_query_terms: u32,
    /// Tokens shorter than this are dropped from similarity scoring.
    pub min_word_length: usize,
    /// Default `minShouldMatch` threshold string (e.g. `"80%"`) used when an
    /// analyzer config doesn't specify one.
    pub min_should_match: String,
    /// Boost applied to same-launch-name documents when launch name is used
    /// as a soft signal rather than a hard filter.
    pub boost_launch: f32,
    /// On-disk location of per-project boosting models.
    pub boost_model_folder: String,
    /// Threshold for the no-defect short-circuit (§4.5 step 1).
    pub no_defect_min_similarity: f32,
    /// Base threshold for clustering (§4.3/§4.6).
    pub cluster_logs_min_similarity: f32,
    /// Base threshold for [`crate::search_service`] (§4.7).
    pub search_logs_min_similarity: f32,
    /// Probability of picking a project-specific model over the global one.
    pub probability_for_custom_model_auto_analysis: f64,
    /// On-disk location of the similarity scorer's token weights artifact.
    pub similarity_weights_folder: String,
    /// Index name prefix: project `P` maps to index `"<prefix><P>"`.
    pub es_project_index_prefix: String,
    /// Number of shards/chunks requested when the backend indexes a project.
    pub es_chunk_number: u32,
    pub app_version: String,
    /// AMQP URL for the stats sink; absent disables publishing.
    pub amqp_url: Option<String>,
    pub exchange_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_query_terms: 50,
            min_word_length: 2,
            min_should_match: "80%".to_string(),
            boost_launch: 2.0,
            boost_model_folder: "models/boost".to_string(),
            no_defect_min_similarity: 0.95,
            cluster_logs_min_similarity: 0.95,
            search_logs_min_similarity: 0.95,
            probability_for_custom_model_auto_analysis: 0.0,
            similarity_weights_folder: "models/weights".to_string(),
            es_project_index_prefix: String::new(),
            es_chunk_number: 1,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            amqp_url: None,
            exchange_name: "stats".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from `path` if it exists (else defaults), then apply `ANALYZER_*`
    /// environment overrides, then validate.
    pub fn load(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let mut cfg = if path.as_ref().exists() {
            Self::from_toml(path.as_ref())?
        } else {
            tracing::warn!("engine config file not found, using defaults");
            EngineConfig::default()
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_toml(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::AnalyzerError::Config(e.to_string()))?;
        toml::from_str(&content).map_err(|e| crate::error::AnalyzerError::Config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ANALYZER_AMQP_URL") {
            self.amqp_url = Some(v);
        }
        if let Ok(v) = std::env::var("ANALYZER_EXCHANGE_NAME") {
            self.exchange_name = v;
        }
        if let Ok(v) = std::env::var("ANALYZER_ES_PROJECT_INDEX_PREFIX") {
            self.es_project_index_prefix = v;
        }
        if let Ok(v) = std::env::var("ANALYZER_NO_DEFECT_MIN_SIMILARITY")
            && let Ok(parsed) = v.parse()
        {
            self.no_defect_min_similarity = parsed;
        }
        if let Ok(v) = std::env::var("ANALYZER_CLUSTER_LOGS_MIN_SIMILARITY")
            && let Ok(parsed) = v.parse()
        {
            self.cluster_logs_min_similarity = parsed;
        }
        if let Ok(v) = std::env::var("ANALYZER_SEARCH_LOGS_MIN_SIMILARITY")
            && let Ok(parsed) = v.parse()
        {
            self.search_logs_min_similarity = parsed;
        }
    }

    fn validate(&self) -> crate::error::Result<()> {
        if !(0.0..=1.0).contains(&self.no_defect_min_similarity) {
            return Err(crate::error::AnalyzerError::Config(
                "no_defect_min_similarity must be in [0,1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cluster_logs_min_similarity) {
            return Err(crate::error::AnalyzerError::Config(
                "cluster_logs_min_similarity must be in [0,1]".to_string(),
            ));
        }
        if self.es_chunk_number == 0 {
            return Err(crate::error::AnalyzerError::Config(
                "es_chunk_number must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Index name for project `P` (§6 "Index naming").
    pub fn index_name(&self, project: &str) -> String {
        format!("{}{}", self.es_project_index_prefix, project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn index_name_prefixes_project() {
        let mut cfg = EngineConfig::default();
        cfg.es_project_index_prefix = "triage_".to_string();
        assert_eq!(cfg.index_name("demo"), "triage_demo");
    }
}
