//! Allow/deny metric filtering.
//!
//! A [`MetricFilter`] is an ordered list of rules, each pairing an action with a regular expression. A metric name is
//! checked against the rules from top to bottom, skipping disabled rules, and the first rule whose pattern matches
//! decides whether the metric is kept. A name that matches no rule is rejected, as every rule table is expected to end
//! with a catch-all rule.

use std::{fmt, path::Path, str::FromStr, sync::Arc};

use harvest_config::{deser::PermissiveBool, GenericConfiguration};
use harvest_error::GenericError;
use regex::Regex;
use serde::Deserialize;
use serde_with::serde_as;
use snafu::{ResultExt as _, Snafu};
use tracing::debug;

mod defaults;

/// Metric filter errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum FilterError {
    /// The rule file could not be read.
    #[snafu(display("failed to read metric filter file '{}'", path))]
    Io {
        /// Path of the rule file.
        path: String,

        /// Error source.
        source: std::io::Error,
    },

    /// The rule table was not a JSON list of lists of strings.
    #[snafu(display("metric filter rules are not valid JSON"))]
    Json {
        /// Error source.
        source: serde_json::Error,
    },

    /// A rule did not have both an action and a pattern.
    #[snafu(display("metric filter rule {} must have at least an action and a pattern", index))]
    IncompleteRule {
        /// Index of the rule in the table.
        index: usize,
    },

    /// A rule's action was neither `allow` nor `deny`.
    #[snafu(display("metric filter rule {} has invalid action '{}' (expected 'allow' or 'deny')", index, action))]
    InvalidAction {
        /// Index of the rule in the table.
        index: usize,

        /// The offending action.
        action: String,
    },

    /// A rule's pattern was not a valid regular expression.
    #[snafu(display("metric filter rule {} has invalid pattern '{}'", index, pattern))]
    InvalidPattern {
        /// Index of the rule in the table.
        index: usize,

        /// The offending pattern.
        pattern: String,

        /// Error source.
        source: regex::Error,
    },
}

/// Action taken when a rule matches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterAction {
    /// Keep the metric.
    Allow,

    /// Reject the metric.
    Deny,
}

impl FromStr for FilterAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("allow") {
            Ok(Self::Allow)
        } else if s.eq_ignore_ascii_case("deny") {
            Ok(Self::Deny)
        } else {
            Err(())
        }
    }
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Deny => f.write_str("deny"),
        }
    }
}

/// A single filter rule.
#[derive(Clone, Debug)]
pub struct FilterRule {
    action: FilterAction,
    pattern: Regex,
    enabled: bool,
}

impl FilterRule {
    /// Creates a new, enabled rule.
    ///
    /// # Errors
    ///
    /// If `pattern` is not a valid regular expression, an error is returned.
    pub fn new(action: FilterAction, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            action,
            pattern: Regex::new(pattern)?,
            enabled: true,
        })
    }

    /// Disables this rule.
    ///
    /// Disabled rules are kept in place in the table, but never match.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Returns the action of this rule.
    pub fn action(&self) -> FilterAction {
        self.action
    }

    /// Returns the pattern of this rule.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Returns `true` if this rule is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn matches(&self, name: &str) -> bool {
        self.enabled && self.pattern.is_match(name)
    }
}

/// An ordered list of filter rules.
///
/// Cloning a `MetricFilter` is cheap, and clones share the same compiled rules.
#[derive(Clone, Debug)]
pub struct MetricFilter {
    rules: Arc<[FilterRule]>,
}

impl MetricFilter {
    /// Creates a new `MetricFilter` from the given rules, evaluated in order.
    pub fn from_rules(rules: Vec<FilterRule>) -> Self {
        Self { rules: rules.into() }
    }

    /// Loads a rule table from JSON.
    ///
    /// The table is a list of rules, where each rule is a list of strings: the action (`allow` or `deny`), the pattern,
    /// and any number of trailing elements, which are treated as comments and ignored.
    ///
    /// ```json
    /// [
    ///   ["allow", "^kube_pod_status_phase$", "pod phases"],
    ///   ["deny", "^.+$", "everything else"]
    /// ]
    /// ```
    ///
    /// # Errors
    ///
    /// If the table is not valid JSON, or any rule is incomplete, has an unknown action, or has an invalid pattern, an
    /// error is returned.
    pub fn from_json(raw: &str) -> Result<Self, FilterError> {
        let table: Vec<Vec<String>> = serde_json::from_str(raw).context(Json)?;

        let mut rules = Vec::with_capacity(table.len());
        for (index, entry) in table.iter().enumerate() {
            let (raw_action, pattern) = match entry.as_slice() {
                [action, pattern, ..] => (action, pattern),
                _ => return IncompleteRule { index }.fail(),
            };

            let action = raw_action.parse::<FilterAction>().map_err(|()| FilterError::InvalidAction {
                index,
                action: raw_action.clone(),
            })?;
            let rule = FilterRule::new(action, pattern).context(InvalidPattern { index, pattern })?;
            rules.push(rule);
        }

        Ok(Self::from_rules(rules))
    }

    /// Loads a rule table from a JSON file.
    ///
    /// See [`from_json`][Self::from_json] for the format.
    ///
    /// # Errors
    ///
    /// If the file can't be read, or its contents aren't a valid rule table, an error is returned.
    pub fn from_file<P>(path: P) -> Result<Self, FilterError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).context(Io {
            path: path.display().to_string(),
        })?;
        Self::from_json(&raw)
    }

    /// Returns the default rule table for the given cluster API version.
    ///
    /// The set of metrics exposed by the cluster's sources changes between Kubernetes releases, so the default table is
    /// selected by the cluster's minor version. Versions that can't be parsed fall back to the newest table.
    pub fn for_api_version(version: &str) -> Self {
        let rules = defaults::table_for_version(version)
            .rules()
            .filter_map(|(action, pattern)| match FilterRule::new(action, pattern) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    debug!(error = %e, pattern, "Skipping invalid built-in metric filter rule.");
                    None
                }
            })
            .collect();

        Self::from_rules(rules)
    }

    /// Returns `true` if the metric with the given name should be kept.
    ///
    /// Any encoded tags (`|ST[...]` or `|MT[...]`) are stripped from the name before matching.
    pub fn is_allowed(&self, name: &str) -> bool {
        let name = bare_name(name);

        self.rules
            .iter()
            .find(|rule| rule.matches(name))
            .map(|rule| rule.action == FilterAction::Allow)
            .unwrap_or(false)
    }

    /// Returns the rules, in evaluation order.
    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Returns the number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if there are no rules.
    ///
    /// An empty filter rejects every metric.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn bare_name(name: &str) -> &str {
    let end = [name.find("|ST["), name.find("|MT[")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(name.len());
    &name[..end]
}

/// Metric filter configuration.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MetricFilterConfiguration {
    /// Path to a JSON rule table.
    ///
    /// When set, it replaces the default rule table entirely.
    #[serde(default)]
    pub metric_filters_file: Option<String>,

    /// Kubernetes API version of the cluster, such as `v1.17`, used to pick the default rule table.
    #[serde(default)]
    pub cluster_api_version: String,

    /// Whether or not metrics from dynamically discovered endpoints are filtered.
    ///
    /// They are expected to be filtered at their source, so this defaults to `false`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub filter_dynamic: bool,
}

impl MetricFilterConfiguration {
    /// Creates a new `MetricFilterConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Builds the configured metric filter.
    ///
    /// # Errors
    ///
    /// If a rule file is configured and can't be loaded, an error is returned.
    pub fn build(&self) -> Result<MetricFilter, FilterError> {
        match &self.metric_filters_file {
            Some(path) if !path.is_empty() => MetricFilter::from_file(path),
            _ => Ok(MetricFilter::for_api_version(&self.cluster_api_version)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn first_match_wins() {
        let filter = MetricFilter::from_json(r#"[["allow","^foo$",""],["deny","^.+$",""]]"#).unwrap();

        assert!(filter.is_allowed("foo"));
        assert!(!filter.is_allowed("bar"));
        assert!(!filter.is_allowed("foobar"));
    }

    #[test]
    fn no_match_is_denied() {
        let filter = MetricFilter::from_json(r#"[["allow","^foo$"]]"#).unwrap();
        assert!(!filter.is_allowed("bar"));
        assert!(!MetricFilter::from_rules(Vec::new()).is_allowed("foo"));
    }

    #[test]
    fn tags_are_stripped_before_matching() {
        let filter = MetricFilter::from_json(r#"[["allow","^foo$"],["deny",".*"]]"#).unwrap();

        assert!(filter.is_allowed("foo|ST[namespace:default]"));
        assert!(filter.is_allowed("foo|ST[a:b]|MT[c:d]"));
        assert!(filter.is_allowed("foo|MT[c:d]"));
        assert!(!filter.is_allowed("bar|ST[foo:foo]"));
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let filter = MetricFilter::from_rules(vec![
            FilterRule::new(FilterAction::Deny, "^foo$").unwrap().disabled(),
            FilterRule::new(FilterAction::Allow, "^foo").unwrap(),
            FilterRule::new(FilterAction::Deny, ".*").unwrap(),
        ]);

        assert!(filter.is_allowed("foo"));
        assert!(!filter.rules()[0].is_enabled());
    }

    #[test]
    fn comments_are_ignored() {
        let filter = MetricFilter::from_json(r#"[["ALLOW","^a$","first","second"],["Deny",".*"]]"#).unwrap();
        assert_eq!(filter.len(), 2);
        assert_eq!(filter.rules()[0].action(), FilterAction::Allow);
        assert_eq!(filter.rules()[0].pattern(), "^a$");
    }

    #[test]
    fn load_errors_name_the_rule() {
        match MetricFilter::from_json(r#"[["allow","^a$"],["permit","^b$"]]"#) {
            Err(FilterError::InvalidAction { index, action }) => {
                assert_eq!(index, 1);
                assert_eq!(action, "permit");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        match MetricFilter::from_json(r#"[["allow","^a$"],["deny","("]]"#) {
            Err(e @ FilterError::InvalidPattern { index: 1, .. }) => {
                assert!(e.to_string().contains("rule 1"));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(matches!(
            MetricFilter::from_json(r#"[["allow"]]"#),
            Err(FilterError::IncompleteRule { index: 0 })
        ));
        assert!(matches!(
            MetricFilter::from_json(r#"{"allow":"^a$"}"#),
            Err(FilterError::Json { .. })
        ));
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"[["allow","^kube_node_info$"],["deny","^.+$"]]"#).unwrap();

        let filter = MetricFilter::from_file(file.path()).unwrap();
        assert!(filter.is_allowed("kube_node_info"));

        assert!(matches!(
            MetricFilter::from_file("/nonexistent/filters.json"),
            Err(FilterError::Io { .. })
        ));
    }

    #[test]
    fn default_tables_are_valid() {
        for table in defaults::all_tables() {
            let rules = table.rules().collect::<Vec<_>>();
            for (action, pattern) in &rules {
                assert!(FilterRule::new(*action, pattern).is_ok(), "invalid pattern: {}", pattern);
            }
            assert_eq!(rules.last().map(|(action, _)| *action), Some(FilterAction::Deny));
        }
    }

    #[test]
    fn default_table_by_version() {
        let legacy = MetricFilter::for_api_version("v1.17");
        assert!(legacy.is_allowed("kube_hpa_status_current_replicas"));
        assert!(!legacy.is_allowed("kube_horizontalpodautoscaler_status_current_replicas"));

        let current = MetricFilter::for_api_version("v1.27.3");
        assert!(current.is_allowed("kube_horizontalpodautoscaler_status_current_replicas"));
        assert!(!current.is_allowed("kube_hpa_status_current_replicas"));

        // Unparseable versions get the newest table.
        let fallback = MetricFilter::for_api_version("");
        assert!(fallback.is_allowed("kube_horizontalpodautoscaler_status_current_replicas"));

        for filter in [legacy, current, fallback] {
            assert!(filter.is_allowed("kube_pod_status_phase"));
            assert!(!filter.is_allowed("go_gc_duration_seconds"));
        }
    }

    #[test]
    fn configuration_prefers_rule_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"[["allow","^custom$"],["deny","^.+$"]]"#).unwrap();

        let config = MetricFilterConfiguration {
            metric_filters_file: Some(file.path().display().to_string()),
            cluster_api_version: "v1.17".to_string(),
            filter_dynamic: false,
        };
        let filter = config.build().unwrap();
        assert!(filter.is_allowed("custom"));
        assert!(!filter.is_allowed("kube_pod_status_phase"));

        let config = MetricFilterConfiguration {
            metric_filters_file: None,
            ..config
        };
        assert!(config.build().unwrap().is_allowed("kube_pod_status_phase"));
    }

    proptest! {
        #[test]
        fn filtering_is_idempotent(name in "[a-z_|:\\[\\]]{0,40}") {
            let filter = MetricFilter::for_api_version("v1.20");
            let shared = filter.clone();

            let first = filter.is_allowed(&name);
            prop_assert_eq!(first, filter.is_allowed(&name));
            prop_assert_eq!(first, shared.is_allowed(&name));
        }
    }
}
