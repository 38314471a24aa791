//! External ranking collaborators (§2 "boosting classifier and per-project
//! model selection", §9 "Model selection"). Both are out of scope as
//! implementations — this module only fixes their shape as traits, with a
//! minimal real adapter (score-based, no learned weights) so the pipeline
//! runs end to end, and the decision rule (`choose_issue_type`) that §4.5
//! step 3 names as an "external utility" but that belongs to this engine's
//! own ranking logic.
use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;

use crate::model::AnalysisCandidate;
use crate::similarity::SimilarityScorer;

/// Opaque per-candidate feature rows. Row order matches
/// [`FeaturizeOutput::issue_type_names`].
#[derive(Debug, Clone, Default)]
pub struct FeatureMatrix {
    pub rows: Vec<Vec<f32>>,
}

impl FeatureMatrix {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeaturizeOutput {
    pub features: FeatureMatrix,
    pub issue_type_names: Vec<String>,
    pub scores_by_issue_type: HashMap<String, f32>,
    /// `model_info()` of the defect-type model consulted for this
    /// featurization (§9 "Model selection": the defect-type namespace,
    /// distinct from the auto-analysis model that drives `predict`).
    pub defect_type_model_info: String,
}

/// `predict(featureMatrix) → (labels, probabilities)` (§2, §4.5 step 3).
pub trait Model: Send + Sync + std::fmt::Debug {
    fn predict(&self, features: &FeatureMatrix) -> (Vec<bool>, Vec<f32>);
    fn feature_ids(&self) -> Vec<usize>;
    fn model_info(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    AutoAnalysis,
    DefectType,
}

/// `choose_model(project, kind) → model` (§2, §9 "Model selection"). Each
/// project has two model kinds, cached per run by callers.
pub trait ModelChooser: Send + Sync {
    fn choose_model(&self, project: &str, kind: ModelKind) -> Arc<dyn Model>;
}

/// Featurizes candidates using only the similarity scorer and backend
/// scores — a real, minimal adapter standing in for the learned boosting
/// classifier's feature extraction (§2). `feature_ids` comes from the
/// `auto_analysis_model`; `defect_type_model` is the sibling model kind
/// (§9 "Model selection") consulted for the defect-type namespace this
/// featurization run is scoped to.
pub trait Featurizer: Send + Sync {
    fn featurize(
        &self,
        candidate: &AnalysisCandidate,
        scorer: &SimilarityScorer,
        feature_ids: &[usize],
        defect_type_model: &dyn Model,
    ) -> FeaturizeOutput;
}

/// Fixed feature vector computed per issue type before `feature_ids`
/// selects a subset: `[hit_count, avg_similarity, max_similarity,
/// avg_backend_score, max_backend_score]`.
const RAW_FEATURE_COUNT: usize = 5;

#[derive(Debug, Default)]
pub struct ScoreFeaturizer;

impl Featurizer for ScoreFeaturizer {
    fn featurize(
        &self,
        candidate: &AnalysisCandidate,
        scorer: &SimilarityScorer,
        feature_ids: &[usize],
        defect_type_model: &dyn Model,
    ) -> FeaturizeOutput {
        let mut per_type: HashMap<String, Vec<(f32, f32)>> = HashMap::new(); // (similarity, backend score)

        for (log, hits) in &candidate.candidates {
            for hit in hits {
                if hit.issue_type.is_empty() {
                    continue;
                }
                let text_sim = scorer.score(&log.message, &hit.message);
                let similarity = if text_sim.both_empty {
                    scorer.score(&log.merged_small_logs, &hit.merged_small_logs).similarity
                } else {
                    text_sim.similarity
                };
                per_type.entry(hit.issue_type.clone()).or_default().push((similarity, hit.score));
            }
        }

        let mut issue_type_names: Vec<String> = per_type.keys().cloned().collect();
        issue_type_names.sort();

        let mut rows = Vec::with_capacity(issue_type_names.len());
        let mut scores_by_issue_type = HashMap::new();

        for name in &issue_type_names {
            let pairs = &per_type[name];
            let count = pairs.len() as f32;
            let avg_sim = pairs.iter().map(|(s, _)| s).sum::<f32>() / count;
            let max_sim = pairs.iter().map(|(s, _)| *s).fold(0.0f32, f32::max);
            let avg_score = pairs.iter().map(|(_, b)| b).sum::<f32>() / count;
            let max_score = pairs.iter().map(|(_, b)| *b).fold(0.0f32, f32::max);
            let raw = [count, avg_sim, max_sim, avg_score, max_score];

            scores_by_issue_type.insert(name.clone(), max_sim * max_score.max(1.0));

            let row = if feature_ids.is_empty() {
                raw.to_vec()
            } else {
                feature_ids.iter().map(|&id| raw.get(id % RAW_FEATURE_COUNT).copied().unwrap_or(0.0)).collect()
            };
            rows.push(row);
        }

        FeaturizeOutput {
            features: FeatureMatrix { rows },
            issue_type_names,
            scores_by_issue_type,
            defect_type_model_info: defect_type_model.model_info(),
        }
    }
}

/// A model that always predicts "no positive label" — the safe default when
/// no learned model is configured; never panics, so the pipeline degrades
/// to `not_found` rather than erroring (§7).
#[derive(Debug, Default)]
pub struct NoopModel;

impl Model for NoopModel {
    fn predict(&self, features: &FeatureMatrix) -> (Vec<bool>, Vec<f32>) {
        let n = features.rows.len();
        (vec![false; n], vec![0.0; n])
    }

    fn feature_ids(&self) -> Vec<usize> {
        Vec::new()
    }

    fn model_info(&self) -> String {
        "noop".to_string()
    }
}

/// Picks a project-specific model over the global one with probability
/// `probability_for_custom`, per project and kind (§6
/// `ProbabilityForCustomModelAutoAnalysis`).
pub struct WeightedModelChooser {
    global: Arc<dyn Model>,
    per_project: HashMap<(String, ModelKind), Arc<dyn Model>>,
    probability_for_custom: f64,
}

impl WeightedModelChooser {
    pub fn new(global: Arc<dyn Model>, probability_for_custom: f64) -> Self {
        Self {
            global,
            per_project: HashMap::new(),
            probability_for_custom,
        }
    }

    pub fn with_project_model(mut self, project: impl Into<String>, kind: ModelKind, model: Arc<dyn Model>) -> Self {
        self.per_project.insert((project.into(), kind), model);
        self
    }
}

impl ModelChooser for WeightedModelChooser {
    fn choose_model(&self, project: &str, kind: ModelKind) -> Arc<dyn Model> {
        match self.per_project.get(&(project.to_string(), kind)) {
            Some(custom) if rand::rng().random_bool(self.probability_for_custom.clamp(0.0, 1.0)) => {
                custom.clone()
            }
            _ => self.global.clone(),
        }
    }
}

/// Picks the highest-probability positive label, breaking ties by the
/// per-issue-type aggregate score (§4.5 step 3).
pub fn choose_issue_type(
    labels: &[bool],
    probabilities: &[f32],
    issue_type_names: &[String],
    scores_by_issue_type: &HashMap<String, f32>,
) -> Option<String> {
    let mut best: Option<(usize, f32, f32)> = None; // (index, probability, tiebreak score)

    for (i, &positive) in labels.iter().enumerate() {
        if !positive {
            continue;
        }
        let probability = probabilities.get(i).copied().unwrap_or(0.0);
        let name = issue_type_names.get(i)?;
        let tiebreak = scores_by_issue_type.get(name).copied().unwrap_or(0.0);

        let better = match best {
            None => true,
            Some((_, best_prob, best_tiebreak)) => {
                probability > best_prob || (probability == best_prob && tiebreak > best_tiebreak)
            }
        };
        if better {
            best = Some((i, probability, tiebreak));
        }
    }

    best.map(|(i, _, _)| issue_type_names[i].clone())
}
