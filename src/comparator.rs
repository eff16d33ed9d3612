// src/comparator.rs
// Cross-video persona comparison.
// Matching is first-fit and one-to-one: each persona of A takes the first remaining
// persona of B whose name clears the threshold. The outcome depends on input order.

use serde::{Deserialize, Serialize};

use crate::persona::PersonaRecord;
use crate::similarity::names_match;

pub use crate::similarity::DEFAULT_SIMILARITY_THRESHOLD;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPersona {
    /// Name as it appears on the A side.
    pub name: String,
    pub a: PersonaRecord,
    pub b: PersonaRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub matched: Vec<MatchedPersona>,
    pub unique_a: Vec<PersonaRecord>,
    pub unique_b: Vec<PersonaRecord>,
}

pub fn compare(
    personas_a: &[PersonaRecord],
    personas_b: &[PersonaRecord],
    similarity_threshold: f64,
) -> ComparisonResult {
    let mut result = ComparisonResult::default();
    let mut remaining_b: Vec<PersonaRecord> = personas_b.to_vec();

    for a in personas_a {
        let hit = remaining_b
            .iter()
            .position(|b| names_match(&a.name, &b.name, similarity_threshold));

        match hit {
            Some(index) => {
                let b = remaining_b.remove(index);
                result.matched.push(MatchedPersona {
                    name: a.name.clone(),
                    a: a.clone(),
                    b,
                });
            }
            None => result.unique_a.push(a.clone()),
        }
    }

    result.unique_b = remaining_b;

    tracing::debug!(
        matched = result.matched.len(),
        unique_a = result.unique_a.len(),
        unique_b = result.unique_b.len(),
        "Persona sets compared"
    );
    result
}
