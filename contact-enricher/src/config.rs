use std::collections::HashMap;
use std::str::FromStr;
use std::time;

use chrono::{FixedOffset, Offset, Utc};
use envconfig::Envconfig;

pub const DEFAULT_TZ_OFFSET_HOURS: i32 = -5;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Required to process TASK events
    pub cases_domain_id: Option<String>,

    pub sns_topic_arn: Option<String>,

    // Enrichment writes are disabled unless both the table and its key are set
    pub ddb_table_name: Option<String>,

    pub ddb_pk_name: Option<String>,

    #[envconfig(default = "ttl")]
    pub ddb_ttl_attr: String,

    // The view question catalog, written by view sync and read for answer labels
    pub view_questions_table: Option<String>,

    #[envconfig(default = "Name")]
    pub view_questions_pk_name: String,

    #[envconfig(default = "Label")]
    pub view_questions_sk_name: String,

    #[envconfig(default = "{}")]
    pub view_label_overrides: LabelOverrides,

    #[envconfig(default = "-5")]
    pub tz_offset_hours: TzOffsetHours,

    #[envconfig(default = "EST")]
    pub tz_label: String,

    #[envconfig(default = "365")]
    pub retention_days: u32,

    #[envconfig(from = "UPSTREAM_TIMEOUT_MS", default = "5000")]
    pub upstream_timeout: EnvMsDuration,

    #[envconfig(default = "")]
    pub custom_case_field_ids: CommaSeparated,

    #[envconfig(default = "3600")]
    pub field_name_cache_ttl_secs: u64,

    #[envconfig(default = "10000")]
    pub field_name_cache_size: u64,
}

impl Config {
    pub fn cases_domain_id(&self) -> Option<&str> {
        non_empty(&self.cases_domain_id)
    }

    pub fn sns_topic_arn(&self) -> Option<&str> {
        non_empty(&self.sns_topic_arn)
    }

    pub fn view_questions_table(&self) -> Option<&str> {
        non_empty(&self.view_questions_table)
    }

    /// The enrichment table and its partition key, if writes are enabled.
    pub fn enrichment_table(&self) -> Option<(&str, &str)> {
        non_empty(&self.ddb_table_name).zip(non_empty(&self.ddb_pk_name))
    }

    /// The offset used when rendering human readable timestamps. Offsets chrono can't
    /// represent fall back to the default.
    pub fn display_offset(&self) -> FixedOffset {
        self.tz_offset_hours
            .0
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .or_else(|| FixedOffset::east_opt(DEFAULT_TZ_OFFSET_HOURS * 3600))
            .unwrap_or_else(|| Utc.fix())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// Whole hours east of UTC. Values that aren't a number fall back to the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TzOffsetHours(pub i32);

impl FromStr for TzOffsetHours {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TzOffsetHours(
            s.trim().parse().unwrap_or(DEFAULT_TZ_OFFSET_HOURS),
        ))
    }
}

/// A comma separated list, with whitespace trimmed and empty entries dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommaSeparated(pub Vec<String>);

impl FromStr for CommaSeparated {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CommaSeparated(
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        ))
    }
}

/// Labels to use instead of the ones found in view templates, keyed by component name.
/// Read from a JSON object of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelOverrides(pub HashMap<String, String>);

impl LabelOverrides {
    pub fn apply<'a>(&'a self, name: &str, label: &'a str) -> &'a str {
        self.0.get(name).map(String::as_str).unwrap_or(label)
    }
}

impl FromStr for LabelOverrides {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map(LabelOverrides)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::test_config;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = test_config(&[]);

        assert_eq!(config.cases_domain_id(), None);
        assert_eq!(config.enrichment_table(), None);
        assert_eq!(config.ddb_ttl_attr, "ttl");
        assert_eq!(config.tz_label, "EST");
        assert_eq!(config.retention_days, 365);
        assert_eq!(config.upstream_timeout.0, time::Duration::from_millis(5000));
        assert!(config.custom_case_field_ids.0.is_empty());
        assert_eq!(config.display_offset(), FixedOffset::west_opt(5 * 3600).unwrap());
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let config = test_config(&[
            ("CASES_DOMAIN_ID", ""),
            ("DDB_TABLE_NAME", "ContactViewData"),
            ("DDB_PK_NAME", ""),
        ]);

        assert_eq!(config.cases_domain_id(), None);
        assert_eq!(config.enrichment_table(), None);
    }

    #[test]
    fn test_enrichment_table_needs_table_and_key() {
        let config = test_config(&[
            ("DDB_TABLE_NAME", "ContactViewData"),
            ("DDB_PK_NAME", "InitialContactId"),
        ]);

        assert_eq!(
            config.enrichment_table(),
            Some(("ContactViewData", "InitialContactId"))
        );
    }

    #[test]
    fn test_out_of_range_offset_falls_back() {
        let config = test_config(&[("TZ_OFFSET_HOURS", "99")]);

        assert_eq!(config.display_offset(), FixedOffset::west_opt(5 * 3600).unwrap());
    }

    #[test]
    fn test_unparseable_offset_falls_back() {
        let config = test_config(&[("TZ_OFFSET_HOURS", "EST")]);

        assert_eq!(config.tz_offset_hours, TzOffsetHours(DEFAULT_TZ_OFFSET_HOURS));
        assert_eq!(config.display_offset(), FixedOffset::west_opt(5 * 3600).unwrap());

        let config = test_config(&[("TZ_OFFSET_HOURS", " 2 ")]);
        assert_eq!(config.display_offset(), FixedOffset::east_opt(2 * 3600).unwrap());
    }

    #[test]
    fn test_comma_separated() {
        let parsed: CommaSeparated = " a, b ,,c ".parse().unwrap();

        assert_eq!(parsed.0, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_label_overrides() {
        let config = test_config(&[(
            "VIEW_LABEL_OVERRIDES",
            r#"{"WelcomeGuide_Q4_Yes": "Custom label"}"#,
        )]);

        let overrides = &config.view_label_overrides;

        assert_eq!(overrides.apply("WelcomeGuide_Q4_Yes", "Yes"), "Custom label");
        assert_eq!(overrides.apply("Other", "Original"), "Original");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let pairs: HashMap<String, String> =
            [("UPSTREAM_TIMEOUT_MS".to_owned(), "soon".to_owned())].into();

        assert!(Config::init_from_hashmap(&pairs).is_err());
    }
}
