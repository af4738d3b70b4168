use serde::{Deserialize, Serialize};

use crate::indicators::band_for;
use crate::models::SCORE_COLUMN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    NumberLess,
    NumberGreater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Positive,
    Negative,
    Caution,
}

/// Conditional rule over one column, applied from the first data row down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatRule {
    pub column_index: usize,
    pub column: String,
    pub condition: Condition,
    pub threshold: f64,
    pub tone: Tone,
}

/// Rules for a persisted header. Later rules take precedence, so the caution
/// band of a column follows its positive band.
pub fn rules_for(header: &[String]) -> Vec<FormatRule> {
    let mut rules = Vec::new();

    for (column_index, column) in header.iter().enumerate() {
        let rule = |condition, threshold, tone| FormatRule {
            column_index,
            column: column.clone(),
            condition,
            threshold,
            tone,
        };

        if let Some(band) = band_for(column) {
            rules.push(rule(Condition::NumberLess, band.lower, Tone::Negative));
            rules.push(rule(Condition::NumberGreater, band.upper, Tone::Positive));
            if let Some(caution) = band.caution {
                rules.push(rule(Condition::NumberGreater, caution, Tone::Caution));
            }
        } else if column == SCORE_COLUMN {
            rules.push(rule(Condition::NumberLess, 0.0, Tone::Negative));
            rules.push(rule(Condition::NumberGreater, 0.0, Tone::Positive));
        }
    }

    rules
}
