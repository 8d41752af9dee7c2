//! Rule-driven roofing classifier.
//!
//! Maps a permit's type string and work description to a roofing flag using
//! the rules document embedded at compile time. Portal schemas vary too much
//! for server-side filters, so every fetched row is classified here instead.

use std::sync::LazyLock;

use serde::Deserialize;

/// The embedded default rules document.
static DEFAULT_RULES: LazyLock<RoofingRules> = LazyLock::new(|| {
    RoofingRules::from_toml_str(include_str!("../roofing_rules.toml"))
        .expect("embedded roofing_rules.toml is valid")
});

/// Returns the process-wide rules document, loaded once and immutable.
#[must_use]
pub fn default_rules() -> &'static RoofingRules {
    &DEFAULT_RULES
}

/// Permit-type match rules.
#[derive(Debug, Clone, Deserialize)]
pub struct PermitTypeRules {
    /// Full-string matches, checked first.
    pub exact_matches: Vec<String>,
    /// Substring matches, checked second.
    pub partial_matches: Vec<String>,
}

/// Work-description token lists. The three lists are matched as one union.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRules {
    /// Core roofing vocabulary.
    pub primary: Vec<String>,
    /// Material names that imply roof work.
    pub materials: Vec<String>,
    /// Action phrases that imply roof work.
    pub actions: Vec<String>,
}

/// The roofing rules document. Loaded once at startup; immutable after.
#[derive(Debug, Clone, Deserialize)]
pub struct RoofingRules {
    /// Permit-type rules.
    pub permit_types: PermitTypeRules,
    /// Work-description token lists.
    pub work_description_tokens: TokenRules,
    /// Minimum distinct token matches required for a description hit.
    #[serde(default = "default_min_token_matches")]
    pub min_token_matches: usize,
    /// Whether matching is case-sensitive.
    #[serde(default)]
    pub case_sensitive: bool,
}

const fn default_min_token_matches() -> usize {
    1
}

impl RoofingRules {
    /// Parses a rules document from TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or missing required tables.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, String> {
        toml::de::from_str(toml_str).map_err(|e| e.to_string())
    }

    /// Classifies a permit. Total over all inputs: `None` is treated as the
    /// empty string and the result is always a plain boolean.
    #[must_use]
    pub fn is_roofing(&self, permit_type: Option<&str>, work_description: Option<&str>) -> bool {
        let permit_type = self.fold(permit_type.unwrap_or(""));
        let description = self.fold(work_description.unwrap_or(""));

        for exact in &self.permit_types.exact_matches {
            if permit_type == self.fold(exact) {
                return true;
            }
        }

        for partial in &self.permit_types.partial_matches {
            let needle = self.fold(partial);
            if !needle.is_empty() && permit_type.contains(&needle) {
                return true;
            }
        }

        let mut matched = 0usize;
        let token_lists = [
            &self.work_description_tokens.primary,
            &self.work_description_tokens.materials,
            &self.work_description_tokens.actions,
        ];
        for token in token_lists.into_iter().flatten() {
            let needle = self.fold(token);
            if !needle.is_empty() && description.contains(&needle) {
                matched += 1;
                if matched >= self.min_token_matches {
                    return true;
                }
            }
        }

        false
    }

    fn fold(&self, s: &str) -> String {
        if self.case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(toml_str: &str) -> RoofingRules {
        RoofingRules::from_toml_str(toml_str).unwrap()
    }

    #[test]
    fn default_rules_parse() {
        let r = default_rules();
        assert!(!r.permit_types.exact_matches.is_empty());
        assert_eq!(r.min_token_matches, 1);
        assert!(!r.case_sensitive);
    }

    #[test]
    fn exact_match_short_circuits() {
        assert!(default_rules().is_roofing(Some("Re-Roof"), None));
        assert!(default_rules().is_roofing(Some("re-roof"), Some("unrelated text")));
    }

    #[test]
    fn partial_match_on_permit_type() {
        assert!(default_rules().is_roofing(Some("Residential Roof Repair"), None));
    }

    #[test]
    fn description_tokens_classify() {
        assert!(default_rules().is_roofing(Some("Building Permit"), Some("Tear off and install new comp shingle")));
    }

    #[test]
    fn hvac_permit_is_not_roofing() {
        assert!(!default_rules().is_roofing(
            Some("HVAC Replacement"),
            Some("Install new heat pump")
        ));
    }

    #[test]
    fn total_over_null_and_empty_inputs() {
        let r = default_rules();
        assert!(!r.is_roofing(None, None));
        assert!(!r.is_roofing(Some(""), Some("")));
        assert!(!r.is_roofing(None, Some("")));
        assert!(!r.is_roofing(Some(""), None));
    }

    #[test]
    fn min_token_matches_requires_distinct_tokens() {
        let r = rules(
            r#"
min_token_matches = 2

[permit_types]
exact_matches = []
partial_matches = []

[work_description_tokens]
primary = ["roof"]
materials = ["shingle"]
actions = ["tear off"]
"#,
        );
        assert!(!r.is_roofing(None, Some("new roof")));
        assert!(r.is_roofing(None, Some("new roof with shingle overlay")));
    }

    #[test]
    fn case_sensitive_matching_respects_case() {
        let r = rules(
            r#"
case_sensitive = true

[permit_types]
exact_matches = ["Re-Roof"]
partial_matches = []

[work_description_tokens]
primary = []
materials = []
actions = []
"#,
        );
        assert!(r.is_roofing(Some("Re-Roof"), None));
        assert!(!r.is_roofing(Some("re-roof"), None));
    }
}
