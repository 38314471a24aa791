//! Greedy single-link grouping of log messages (§4.3).
use crate::similarity::SimilarityScorer;

/// Partition `messages` into equivalence classes under `threshold`: iterate
/// in input order, joining the first existing group whose first member is
/// similar enough, else starting a new group. Deterministic given input
/// order (§4.3, §8 property 1). Returns groups as lists of indices into
/// `messages`.
pub fn cluster(messages: &[String], threshold: f32, scorer: &SimilarityScorer) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for (i, msg) in messages.iter().enumerate() {
        let mut joined = None;
        for (g, group) in groups.iter().enumerate() {
            let representative = &messages[group[0]];
            let result = scorer.score(msg, representative);
            if result.similarity >= threshold {
                joined = Some(g);
                break;
            }
        }
        match joined {
            Some(g) => groups[g].push(i),
            None => groups.push(vec![i]),
        }
    }

    groups
}
