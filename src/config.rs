use serde::{Deserialize, Serialize};

/// Operator used to combine adjacent clauses that carry no explicit
/// `AND`/`OR`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOperator {
    /// All clauses must match
    And,
    /// At least one clause must match
    #[default]
    Or,
}

impl std::fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryOperator::And => write!(f, "AND"),
            QueryOperator::Or => write!(f, "OR"),
        }
    }
}

/// Parser settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParserSettings {
    /// Operator applied to adjacent clauses without an explicit operator
    pub default_operator: QueryOperator,
    /// When false, runs of bare terms at the root or inside a group are
    /// kept together as a single multi-term node instead of separate clauses
    pub split_on_whitespace: bool,
    /// Hard cap on group/parenthesis nesting while parsing
    pub max_nesting_depth: usize,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            default_operator: QueryOperator::Or,
            split_on_whitespace: true,
            max_nesting_depth: 128,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = ParserSettings::default();
        assert_eq!(settings.default_operator, QueryOperator::Or);
        assert!(settings.split_on_whitespace);
    }

    #[test]
    fn test_operator_display() {
        assert_eq!(QueryOperator::And.to_string(), "AND");
        assert_eq!(QueryOperator::Or.to_string(), "OR");
    }
}
