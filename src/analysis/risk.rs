//! Risk assessment (§4.11): synthesizes a 0-100 score from detected patterns
//! and bands it into an actionable recommendation.

use super::patterns::Pattern;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recommendation {
    Monitor,
    Investigate,
    FlagForReview,
}

impl Recommendation {
    /// Bands: < 30 monitor, < 70 investigate, else flag for review.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=29 => Recommendation::Monitor,
            30..=69 => Recommendation::Investigate,
            _ => Recommendation::FlagForReview,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RiskAssessment {
    pub score: u8,
    pub recommendation: Recommendation,
    pub contributing_pattern_count: usize,
}

/// Combines each pattern's weight with its confidence, sums and caps at 100.
/// A single high-confidence circular flow (weight 30, confidence ~0.9) lands
/// just under the `investigate` threshold on its own; a second corroborating
/// pattern is what pushes an address into `investigate`/`flag_for_review`.
pub fn assess(patterns: &[Pattern]) -> RiskAssessment {
    let raw: f64 = patterns
        .iter()
        .map(|p| p.kind.weight() as f64 * p.confidence)
        .sum();
    let score = raw.round().clamp(0.0, 100.0) as u8;
    RiskAssessment {
        score,
        recommendation: Recommendation::from_score(score),
        contributing_pattern_count: patterns.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::patterns::PatternKind;
    use crate::model::Address;
    use chrono::Utc;

    fn pattern(kind: PatternKind, confidence: f64) -> Pattern {
        Pattern {
            kind,
            confidence,
            description: String::new(),
            evidence: vec![Address::parse(&"A".repeat(48)).unwrap()],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn no_patterns_means_monitor() {
        let assessment = assess(&[]);
        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.recommendation, Recommendation::Monitor);
    }

    #[test]
    fn a_single_circular_flow_alone_stays_under_the_investigate_threshold() {
        let assessment = assess(&[pattern(PatternKind::CircularFlow, 0.9)]);
        assert_eq!(assessment.score, 27);
        assert_eq!(assessment.recommendation, Recommendation::Monitor);
    }

    #[test]
    fn stacked_patterns_reach_flag_for_review() {
        let assessment = assess(&[
            pattern(PatternKind::CircularFlow, 0.9),
            pattern(PatternKind::RapidSequential, 0.8),
            pattern(PatternKind::MixingService, 0.7),
        ]);
        assert_eq!(assessment.recommendation, Recommendation::FlagForReview);
    }
}
