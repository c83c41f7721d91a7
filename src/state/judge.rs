//! Consensus estimator suggesting a score for a revealed round.
//!
//! The judge only works on numeric scales: every estimate option except the
//! abstain glyphs must parse as a number. Votes that are not numeric are
//! tracked as abstentions and never take part in the aggregation.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::state::room::{ABSTAIN_VOTES, RoomSettings};

const EPSILON: f64 = 1e-9;

/// Aggregation policy used to turn votes into a suggested score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JudgeAlgorithm {
    /// Mean of the votes, snapped to the closest option.
    SimpleAverage,
    /// Strict-majority value, otherwise the median of the votes without extremes.
    #[default]
    SmartConsensus,
    /// Median rounded up to the next option.
    ConservativeMode,
    /// Median rounded down to the previous option.
    OptimisticMode,
}

/// How much the team agrees on the suggested score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Confidence {
    /// Votes are within one option of each other.
    High,
    /// Votes are spread over a few options.
    Medium,
    /// Votes are far apart or mostly abstentions.
    Low,
}

/// Everything the judge reports next to the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeMetadata {
    /// Algorithm that produced the score.
    pub algorithm: JudgeAlgorithm,
    /// Agreement level.
    pub confidence: Confidence,
    /// Set when the spread calls for a conversation before moving on.
    pub needs_discussion: bool,
    /// Human-readable explanation.
    pub reasoning: String,
    /// Every vote cast.
    pub total_votes: usize,
    /// Votes that map to a number on the scale.
    pub numeric_votes: usize,
    /// Non-numeric votes such as `?`.
    pub abstentions: usize,
    /// Lowest numeric vote.
    pub min: Option<f64>,
    /// Highest numeric vote.
    pub max: Option<f64>,
    /// Distance, in scale positions, between the lowest and highest vote.
    pub spread: usize,
}

/// Result of a judge run.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeVerdict {
    /// Suggested estimate, snapped to the scale.
    pub score: Option<f64>,
    /// How the score was reached.
    pub metadata: JudgeMetadata,
}

/// Sorted numeric values of the scale, or `None` when the scale is not numeric.
pub fn numeric_scale(options: &[String]) -> Option<Vec<f64>> {
    let mut scale = Vec::with_capacity(options.len());
    for option in options {
        if ABSTAIN_VOTES.contains(&option.as_str()) {
            continue;
        }
        scale.push(parse_number(option)?);
    }
    if scale.is_empty() {
        return None;
    }
    scale.sort_by(f64::total_cmp);
    scale.dedup_by(|a, b| (*a - *b).abs() < EPSILON);
    Some(scale)
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Render a score the way options are written (`5`, `0.5`).
pub fn format_points(value: f64) -> String {
    if (value - value.round()).abs() < EPSILON {
        format!("{}", value.round() as i64)
    } else {
        format!("{value}")
    }
}

/// Closest value of the scale; ties go to the larger value.
pub fn snap_nearest(scale: &[f64], value: f64) -> f64 {
    let mut best = scale[0];
    for candidate in scale {
        if (candidate - value).abs() <= (best - value).abs() + EPSILON {
            best = *candidate;
        }
    }
    best
}

fn snap_up(scale: &[f64], value: f64) -> f64 {
    scale
        .iter()
        .copied()
        .find(|candidate| *candidate + EPSILON >= value)
        .unwrap_or(scale[scale.len() - 1])
}

fn snap_down(scale: &[f64], value: f64) -> f64 {
    scale
        .iter()
        .rev()
        .copied()
        .find(|candidate| *candidate - EPSILON <= value)
        .unwrap_or(scale[0])
}

fn position(scale: &[f64], value: f64) -> usize {
    let snapped = snap_nearest(scale, value);
    scale
        .iter()
        .position(|candidate| (candidate - snapped).abs() < EPSILON)
        .unwrap_or(0)
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn majority(sorted: &[f64]) -> Option<f64> {
    let mut best: Option<(f64, usize)> = None;
    let mut index = 0;
    while index < sorted.len() {
        let value = sorted[index];
        let count = sorted[index..]
            .iter()
            .take_while(|other| (**other - value).abs() < EPSILON)
            .count();
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
        index += count;
    }
    best.filter(|(_, count)| count * 2 > sorted.len())
        .map(|(value, _)| value)
}

fn aggregate(algorithm: JudgeAlgorithm, scale: &[f64], sorted: &[f64]) -> f64 {
    match algorithm {
        JudgeAlgorithm::SimpleAverage => {
            let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
            snap_nearest(scale, mean)
        }
        JudgeAlgorithm::SmartConsensus => {
            if let Some(value) = majority(sorted) {
                return snap_nearest(scale, value);
            }
            let trimmed = if sorted.len() >= 4 {
                &sorted[1..sorted.len() - 1]
            } else {
                sorted
            };
            snap_nearest(scale, median(trimmed))
        }
        JudgeAlgorithm::ConservativeMode => snap_up(scale, median(sorted)),
        JudgeAlgorithm::OptimisticMode => snap_down(scale, median(sorted)),
    }
}

/// Suggest a score for the given votes, or `None` when the scale is not numeric
/// or nobody voted.
pub fn judge(votes: &IndexMap<String, String>, settings: &RoomSettings) -> Option<JudgeVerdict> {
    let scale = numeric_scale(&settings.estimate_options)?;
    if votes.is_empty() {
        return None;
    }

    let mut numeric: Vec<f64> = votes
        .values()
        .filter(|vote| !ABSTAIN_VOTES.contains(&vote.as_str()))
        .filter_map(|vote| parse_number(vote))
        .collect();
    numeric.sort_by(f64::total_cmp);

    let total_votes = votes.len();
    let abstentions = total_votes - numeric.len();
    let algorithm = settings.judge_algorithm;

    if numeric.is_empty() {
        return Some(JudgeVerdict {
            score: None,
            metadata: JudgeMetadata {
                algorithm,
                confidence: Confidence::Low,
                needs_discussion: true,
                reasoning: "No numeric estimates were cast".into(),
                total_votes,
                numeric_votes: 0,
                abstentions,
                min: None,
                max: None,
                spread: 0,
            },
        });
    }

    let min = numeric[0];
    let max = numeric[numeric.len() - 1];
    let spread = position(&scale, max) - position(&scale, min);
    let score = aggregate(algorithm, &scale, &numeric);

    let mut confidence = match spread {
        0 => Confidence::High,
        1 => Confidence::Medium,
        _ => Confidence::Low,
    };
    if abstentions * 2 >= total_votes {
        confidence = Confidence::Low;
    }

    let mut reasoning = match confidence {
        Confidence::High => format!("Strong consensus around {}", format_points(score)),
        Confidence::Medium => format!(
            "Votes are close ({} to {}); {} balances them",
            format_points(min),
            format_points(max),
            format_points(score)
        ),
        Confidence::Low => format!(
            "Votes range from {} to {}; discuss before settling on {}",
            format_points(min),
            format_points(max),
            format_points(score)
        ),
    };
    if abstentions > 0 {
        reasoning.push_str(&format!(" ({abstentions} abstained)"));
    }

    Some(JudgeVerdict {
        score: Some(score),
        metadata: JudgeMetadata {
            algorithm,
            confidence,
            needs_discussion: confidence == Confidence::Low,
            reasoning,
            total_votes,
            numeric_votes: numeric.len(),
            abstentions,
            min: Some(min),
            max: Some(max),
            spread,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn votes(values: &[&str]) -> IndexMap<String, String> {
        values
            .iter()
            .enumerate()
            .map(|(index, value)| (format!("user{index}"), value.to_string()))
            .collect()
    }

    fn settings(algorithm: JudgeAlgorithm) -> RoomSettings {
        RoomSettings {
            judge_algorithm: algorithm,
            ..RoomSettings::default()
        }
    }

    #[test]
    fn non_numeric_scale_disables_judge() {
        let mut settings = RoomSettings::default();
        settings.estimate_options = vec!["S".into(), "M".into(), "L".into()];
        assert!(judge(&votes(&["S", "M"]), &settings).is_none());
    }

    #[test]
    fn abstain_glyphs_keep_scale_numeric() {
        let scale = numeric_scale(&default_options()).unwrap();
        assert_eq!(scale, vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 21.0]);
    }

    fn default_options() -> Vec<String> {
        RoomSettings::default().estimate_options
    }

    #[test]
    fn unanimous_votes_are_high_confidence() {
        let verdict = judge(&votes(&["5", "5", "5"]), &settings(JudgeAlgorithm::SmartConsensus))
            .unwrap();
        assert_eq!(verdict.score, Some(5.0));
        assert_eq!(verdict.metadata.confidence, Confidence::High);
        assert!(!verdict.metadata.needs_discussion);
    }

    #[test]
    fn wide_spread_needs_discussion() {
        let verdict =
            judge(&votes(&["1", "13"]), &settings(JudgeAlgorithm::SimpleAverage)).unwrap();
        assert_eq!(verdict.score, Some(8.0));
        assert_eq!(verdict.metadata.spread, 5);
        assert_eq!(verdict.metadata.confidence, Confidence::Low);
        assert!(verdict.metadata.needs_discussion);
    }

    #[test]
    fn conservative_and_optimistic_round_opposite_ways() {
        let cast = votes(&["3", "5", "5", "8"]);
        let conservative = judge(&cast, &settings(JudgeAlgorithm::ConservativeMode)).unwrap();
        let optimistic = judge(&cast, &settings(JudgeAlgorithm::OptimisticMode)).unwrap();
        assert_eq!(conservative.score, Some(5.0));
        assert_eq!(optimistic.score, Some(5.0));

        let cast = votes(&["3", "5"]);
        let conservative = judge(&cast, &settings(JudgeAlgorithm::ConservativeMode)).unwrap();
        let optimistic = judge(&cast, &settings(JudgeAlgorithm::OptimisticMode)).unwrap();
        assert_eq!(conservative.score, Some(5.0));
        assert_eq!(optimistic.score, Some(3.0));
    }

    #[test]
    fn smart_consensus_prefers_majority() {
        let verdict = judge(
            &votes(&["8", "8", "8", "1", "21"]),
            &settings(JudgeAlgorithm::SmartConsensus),
        )
        .unwrap();
        assert_eq!(verdict.score, Some(8.0));

        let verdict = judge(
            &votes(&["1", "3", "5", "21"]),
            &settings(JudgeAlgorithm::SmartConsensus),
        )
        .unwrap();
        assert_eq!(verdict.score, Some(5.0));
    }

    #[test]
    fn abstentions_are_counted_and_lower_confidence() {
        let verdict = judge(&votes(&["5", "?", "?"]), &settings(JudgeAlgorithm::SmartConsensus))
            .unwrap();
        assert_eq!(verdict.metadata.abstentions, 2);
        assert_eq!(verdict.metadata.numeric_votes, 1);
        assert_eq!(verdict.metadata.confidence, Confidence::Low);
        assert!(verdict.metadata.reasoning.contains("2 abstained"));

        let only_abstain = judge(&votes(&["?"]), &settings(JudgeAlgorithm::SmartConsensus))
            .unwrap();
        assert_eq!(only_abstain.score, None);
    }

    #[test]
    fn format_points_drops_trailing_zeroes() {
        assert_eq!(format_points(5.0), "5");
        assert_eq!(format_points(0.5), "0.5");
    }
}
