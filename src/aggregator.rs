// src/aggregator.rs
// Folds the unordered cross-batch pool into a ranked, capped persona set.
//
// Clustering is greedy and seeded: each unassigned record opens a cluster and pulls in
// every later unassigned record whose name is similar to the *seed's* name. Members are
// never compared with each other, so the grouping is not transitive.

use std::collections::HashMap;

use crate::persona::{
    unique_capped, KeyFeedback, PersonaRecord, PersonaSet, MAX_FEEDBACK, MAX_KEY_FEEDBACK_COMMENTS,
};
use crate::similarity::{name_similarity, normalize_name, DEFAULT_SIMILARITY_THRESHOLD};

/// Deduplicate, merge, rank by summed share and keep the top `max_personas`.
pub fn aggregate(pool: Vec<PersonaRecord>, max_personas: usize) -> PersonaSet {
    let pool_size = pool.len();
    let clusters = cluster(pool, DEFAULT_SIMILARITY_THRESHOLD);
    let cluster_count = clusters.len();

    let mut merged: Vec<PersonaRecord> = clusters.into_iter().filter_map(merge_group).collect();
    // Stable: equal shares keep cluster order.
    merged.sort_by(|a, b| b.share.cmp(&a.share));
    merged.truncate(max_personas);

    tracing::debug!(
        pool_size = pool_size,
        clusters = cluster_count,
        kept = merged.len(),
        "Personas aggregated"
    );

    PersonaSet { personas: merged }
}

/// Group records by name similarity to each cluster's seed, in pool order.
pub fn cluster(pool: Vec<PersonaRecord>, threshold: f64) -> Vec<Vec<PersonaRecord>> {
    let keys: Vec<String> = pool.iter().map(|p| normalize_name(&p.name)).collect();
    let mut assignment: Vec<Option<usize>> = vec![None; pool.len()];
    let mut cluster_count = 0;

    for seed in 0..pool.len() {
        if assignment[seed].is_some() {
            continue;
        }
        assignment[seed] = Some(cluster_count);
        for candidate in seed + 1..pool.len() {
            if assignment[candidate].is_none()
                && name_similarity(&keys[seed], &keys[candidate]) >= threshold
            {
                assignment[candidate] = Some(cluster_count);
            }
        }
        cluster_count += 1;
    }

    let mut clusters: Vec<Vec<PersonaRecord>> = vec![Vec::new(); cluster_count];
    for (record, slot) in pool.into_iter().zip(assignment) {
        if let Some(index) = slot {
            clusters[index].push(record);
        }
    }
    clusters
}

/// Merge one cluster. The first member is the seed and supplies the labels.
///
/// Returns `None` for an empty group.
pub fn merge_group(group: Vec<PersonaRecord>) -> Option<PersonaRecord> {
    let seed = group.first()?;
    let count = group.len() as u64;

    let total_share: u32 = group.iter().fold(0u32, |acc, p| acc.saturating_add(p.share));
    let sentiment_sum: u64 = group.iter().map(|p| p.sentiment_percent as u64).sum();
    let avg_sentiment = (sentiment_sum / count) as u32;

    let feedback = unique_capped(
        group.iter().flat_map(|p| p.feedback.iter().cloned()),
        MAX_FEEDBACK,
    );
    let key_feedback = merge_key_feedback(group.iter().flat_map(|p| p.key_feedback.iter()));

    Some(PersonaRecord {
        name: seed.name.clone(),
        description: seed.description.clone(),
        share: total_share,
        sentiment_label: seed.sentiment_label,
        sentiment_percent: avg_sentiment,
        theme: seed.theme.clone(),
        focus: seed.focus,
        feedback,
        key_feedback,
    })
}

/// Merge insight entries by exact label: comments are unioned and capped,
/// the first recommendation seen for a label wins.
pub fn merge_key_feedback<'a, I>(items: I) -> Vec<KeyFeedback>
where
    I: IntoIterator<Item = &'a KeyFeedback>,
{
    let mut order: Vec<KeyFeedback> = Vec::new();
    let mut index_by_label: HashMap<String, usize> = HashMap::new();
    let mut all_comments: Vec<Vec<String>> = Vec::new();

    for item in items {
        match index_by_label.get(&item.label) {
            Some(&index) => all_comments[index].extend(item.comments.iter().cloned()),
            None => {
                index_by_label.insert(item.label.clone(), order.len());
                order.push(KeyFeedback {
                    label: item.label.clone(),
                    comments: Vec::new(),
                    recommendation: item.recommendation.clone(),
                });
                all_comments.push(item.comments.clone());
            }
        }
    }

    order
        .into_iter()
        .zip(all_comments)
        .map(|(mut entry, comments)| {
            entry.comments = unique_capped(comments, MAX_KEY_FEEDBACK_COMMENTS);
            entry
        })
        .collect()
}
