use crate::models::Cell;

/// Thresholds for one indicator column: below `lower` is weak, above `upper`
/// is strong, above `caution` is overextended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorBand {
    pub column: &'static str,
    pub lower: f64,
    pub upper: f64,
    pub caution: Option<f64>,
}

pub const INDICATOR_BANDS: [IndicatorBand; 6] = [
    IndicatorBand {
        column: "4.5r",
        lower: 50.0,
        upper: 200.0,
        caution: Some(400.0),
    },
    IndicatorBand {
        column: "4.5chg",
        lower: -20.0,
        upper: 20.0,
        caution: None,
    },
    IndicatorBand {
        column: "20chg",
        lower: -20.0,
        upper: 20.0,
        caution: None,
    },
    IndicatorBand {
        column: "50chg",
        lower: -20.0,
        upper: 20.0,
        caution: None,
    },
    IndicatorBand {
        column: "20r",
        lower: 50.0,
        upper: 75.0,
        caution: None,
    },
    IndicatorBand {
        column: "50r",
        lower: 60.0,
        upper: 85.0,
        caution: None,
    },
];

pub fn band_for(column: &str) -> Option<&'static IndicatorBand> {
    INDICATOR_BANDS
        .iter()
        .find(|band| band.column.eq_ignore_ascii_case(column.trim()))
}

pub fn has_indicator_columns(columns: &[String]) -> bool {
    columns.iter().any(|column| band_for(column).is_some())
}

impl IndicatorBand {
    pub fn vote(&self, value: f64) -> i32 {
        if value < self.lower {
            -1
        } else if value > self.upper {
            1
        } else {
            0
        }
    }
}

/// Sum of per-indicator votes, each in -1..=1. Missing or textual cells vote 0.
pub fn momentum_score(columns: &[String], values: &[Cell]) -> i32 {
    columns
        .iter()
        .zip(values)
        .filter_map(|(column, cell)| Some(band_for(column)?.vote(cell.as_number()?)))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::{band_for, momentum_score};
    use crate::models::Cell;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn each_band_votes_at_most_once() {
        let columns = columns(&["Date", "4.5r", "20chg", "20r", "50r"]);
        let values = vec![
            Cell::Text("2025-12-29".to_string()),
            Cell::Number(450.0),
            Cell::Number(-25.0),
            Cell::Number(80.0),
            Cell::Number(70.0),
        ];

        assert_eq!(momentum_score(&columns, &values), 1);
    }

    #[test]
    fn missing_and_text_cells_contribute_nothing() {
        let columns = columns(&["Date", "4.5R", "50chg"]);
        let values = vec![
            Cell::Text("x".to_string()),
            Cell::Text("n/a".to_string()),
            Cell::Empty,
        ];

        assert_eq!(momentum_score(&columns, &values), 0);
        assert!(band_for(" 4.5R ").is_some());
        assert!(band_for("RSI").is_none());
    }
}
