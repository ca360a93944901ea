use chrono::{DateTime, Utc};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::database::error::{DatabaseError, DatabaseResult};

/// A runtime-tunable setting value, stored as text with a type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Int(i64),
    Str(String),
    Bool(bool),
    Duration(Duration),
}

impl SettingValue {
    pub fn type_tag(&self) -> &'static str {
        match self {
            SettingValue::Int(_) => "int",
            SettingValue::Str(_) => "string",
            SettingValue::Bool(_) => "bool",
            SettingValue::Duration(_) => "duration",
        }
    }

    /// Text representation written to the `value` column.
    pub fn storage_value(&self) -> String {
        match self {
            SettingValue::Int(v) => v.to_string(),
            SettingValue::Str(v) => v.clone(),
            SettingValue::Bool(v) => v.to_string(),
            SettingValue::Duration(v) => v.as_secs().to_string(),
        }
    }

    /// Parse a stored `(value, value_type)` pair back into a typed value.
    pub fn parse(tag: &str, raw: &str) -> DatabaseResult<Self> {
        match tag {
            "int" => raw
                .parse()
                .map(SettingValue::Int)
                .map_err(|_| bad_value(tag, raw)),
            "string" => Ok(SettingValue::Str(raw.to_string())),
            "bool" => raw
                .parse()
                .map(SettingValue::Bool)
                .map_err(|_| bad_value(tag, raw)),
            "duration" => raw
                .parse()
                .map(|secs| SettingValue::Duration(Duration::from_secs(secs)))
                .map_err(|_| bad_value(tag, raw)),
            other => Err(DatabaseError::ValidationError(format!(
                "unknown setting type: {}",
                other
            ))),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(v) => Some(*v),
            SettingValue::Duration(d) => Some(d.as_secs() as i64),
            _ => None,
        }
    }
}

fn bad_value(tag: &str, raw: &str) -> DatabaseError {
    DatabaseError::ValidationError(format!("setting value {:?} is not a valid {}", raw, tag))
}

impl Serialize for SettingValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SettingValue::Int(v) => serializer.serialize_i64(*v),
            SettingValue::Str(v) => serializer.serialize_str(v),
            SettingValue::Bool(v) => serializer.serialize_bool(*v),
            SettingValue::Duration(v) => serializer.serialize_u64(v.as_secs()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    pub key: String,
    pub value: SettingValue,
    pub value_type: String,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Admin settings update; only the named intervals and retention windows are
/// tunable over the API.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub collect_interval: Option<i64>,
    pub size_update_interval: Option<i64>,
    pub db_check_interval: Option<i64>,
    pub retention_months: Option<i64>,
    pub audit_retention_days: Option<i64>,
}

/// Per-setting bounds enforced on update.
pub const SETTING_LIMITS: &[(&str, i64, i64)] = &[
    ("collect_interval", 60, 86_400),
    ("size_update_interval", 300, 86_400),
    ("db_check_interval", 300, 86_400),
    ("retention_months", 1, 120),
    ("audit_retention_days", 7, 3_650),
];

impl SettingsUpdate {
    /// Validate every provided field against [`SETTING_LIMITS`] and return
    /// the `(key, value)` pairs to write.
    pub fn validated_updates(&self) -> DatabaseResult<Vec<(&'static str, i64)>> {
        let fields = [
            ("collect_interval", self.collect_interval),
            ("size_update_interval", self.size_update_interval),
            ("db_check_interval", self.db_check_interval),
            ("retention_months", self.retention_months),
            ("audit_retention_days", self.audit_retention_days),
        ];

        let mut updates = Vec::new();
        for (key, value) in fields {
            let Some(value) = value else { continue };
            let (_, min, max) = SETTING_LIMITS
                .iter()
                .find(|(k, _, _)| *k == key)
                .expect("every tunable field has limits");
            if value < *min || value > *max {
                return Err(DatabaseError::ValidationError(format!(
                    "{}: allowed range is {}..={}",
                    key, min, max
                )));
            }
            updates.push((key, value));
        }

        if updates.is_empty() {
            return Err(DatabaseError::ValidationError(
                "no settings to update".to_string(),
            ));
        }
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_round_trip() {
        let values = [
            SettingValue::Int(600),
            SettingValue::Str("hello".to_string()),
            SettingValue::Bool(true),
            SettingValue::Duration(Duration::from_secs(1800)),
        ];
        for v in values {
            let parsed = SettingValue::parse(v.type_tag(), &v.storage_value()).unwrap();
            assert_eq!(parsed, v);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SettingValue::parse("int", "twelve").is_err());
        assert!(SettingValue::parse("bool", "yes").is_err());
        assert!(SettingValue::parse("duration", "-5").is_err());
        assert!(SettingValue::parse("float", "1.5").is_err());
    }

    #[test]
    fn test_update_bounds() {
        let update = SettingsUpdate {
            collect_interval: Some(59),
            ..Default::default()
        };
        assert!(update.validated_updates().is_err());

        let update = SettingsUpdate {
            collect_interval: Some(60),
            retention_months: Some(120),
            ..Default::default()
        };
        let pairs = update.validated_updates().unwrap();
        assert_eq!(
            pairs,
            vec![("collect_interval", 60), ("retention_months", 120)]
        );

        let update = SettingsUpdate {
            retention_months: Some(121),
            ..Default::default()
        };
        assert!(update.validated_updates().is_err());
    }

    #[test]
    fn test_empty_update_is_rejected() {
        assert!(SettingsUpdate::default().validated_updates().is_err());
    }
}
