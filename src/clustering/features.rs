// Turns cluster labels back into named feature candidates.
//
// Each cluster is named after its shortest piece of feedback. Reach is how
// many feedback entries landed in the cluster.

use std::collections::BTreeMap;

use serde::Serialize;

use super::error::ClusterError;
use crate::db::models::FeedbackItem;
use crate::output::truncate_chars;

/// Name given to a cluster that ends up with no members.
pub const UNNAMED_FEATURE: &str = "Unnamed Feature";

/// A feature derived from one cluster, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureCandidate {
    pub feature_name: String,
    /// Number of feedback entries in the cluster
    pub reach: usize,
    pub cluster_id: usize,
}

/// Group feedback by cluster label and produce one candidate per cluster,
/// ordered by reach (largest first), then cluster id.
pub fn aggregate(
    items: &[FeedbackItem],
    labels: &[usize],
    max_name_len: usize,
) -> Result<Vec<FeatureCandidate>, ClusterError> {
    if items.len() != labels.len() {
        return Err(ClusterError::LabelCountMismatch {
            items: items.len(),
            labels: labels.len(),
        });
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (index, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(index);
    }

    let texts: Vec<&str> = items.iter().map(|item| item.text.as_str()).collect();

    let mut candidates: Vec<FeatureCandidate> = groups
        .into_iter()
        .map(|(cluster_id, members)| FeatureCandidate {
            feature_name: representative_text(&texts, &members, max_name_len),
            reach: members.len(),
            cluster_id,
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.reach
            .cmp(&a.reach)
            .then_with(|| a.cluster_id.cmp(&b.cluster_id))
    });

    Ok(candidates)
}

/// The shortest member text (by character count, earliest wins ties),
/// truncated to `max_len` characters.
pub fn representative_text(texts: &[&str], members: &[usize], max_len: usize) -> String {
    members
        .iter()
        .filter_map(|&i| texts.get(i).copied())
        .min_by_key(|text| text.chars().count())
        .map(|text| truncate_chars(text, max_len))
        .unwrap_or_else(|| UNNAMED_FEATURE.to_string())
}
