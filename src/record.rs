use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field values of a record, keyed by allow-listed field name.
pub type Fields = BTreeMap<String, Value>;

/// A JSON object submitted by a caller on create or update.
pub type Input = Map<String, Value>;

/// Dataset tag stamped on every record created locally.
pub const DATASET_ID: &str = "donnees-de-vaccination-par-commune";

/// Body key carrying the record identifier.
pub const RECORD_ID_KEY: &str = "recordid";

pub const MUNICIPALITY: &str = "commune_residence";
pub const INJECTION_WEEK: &str = "semaine_injection";
pub const AGE_BRACKET: &str = "classe_age";

/// The fixed set of field names a record may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowList(&'static [&'static str]);

/// Field names of the vaccination-by-municipality dataset.
pub const VACCINATION_FIELDS: AllowList = AllowList::new(&[
    "classe_age",
    "commune_residence",
    "date",
    "date_reference",
    "effectif_cumu_1_inj",
    "effectif_cumu_termine",
    "libelle_classe_age",
    "libelle_commune",
    "population_carto",
    "semaine_injection",
    "taux_1_inj",
    "taux_cumu_1_inj",
    "taux_cumu_termine",
    "taux_termine",
]);

impl AllowList {
    pub const fn new(names: &'static [&'static str]) -> Self {
        Self(names)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|name| *name == key)
    }

    /// Copy every allow-listed key present in `input` into `fields`,
    /// overwriting existing entries. Other keys are ignored.
    ///
    /// Returns the number of keys copied.
    pub fn merge_into(&self, fields: &mut Fields, input: &Input) -> usize {
        let mut copied = 0;
        for (key, value) in input {
            if self.contains(key) {
                fields.insert(key.clone(), value.clone());
                copied += 1;
            }
        }
        copied
    }

    /// Keys of `fields` that are not in the allow-list.
    pub fn unknown_keys<'a>(&self, fields: &'a Fields) -> Vec<&'a str> {
        fields
            .keys()
            .map(String::as_str)
            .filter(|k| !self.contains(k))
            .collect()
    }
}

impl Default for AllowList {
    fn default() -> Self {
        VACCINATION_FIELDS
    }
}

fn default_dataset_id() -> String {
    DATASET_ID.to_string()
}

/// One vaccination data point for a municipality / age bracket / week.
///
/// Top-level keys other than the four known ones (for instance `geometry` on
/// entries fetched from the open-data API) are kept in `extra` so they survive
/// a load/persist cycle untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "datasetid", default = "default_dataset_id")]
    pub dataset_id: String,
    #[serde(rename = "recordid")]
    pub record_id: String,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default)]
    pub record_timestamp: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    /// An empty record for `record_id`, stamped at `at`.
    pub fn new(record_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            dataset_id: default_dataset_id(),
            record_id: record_id.to_string(),
            fields: Fields::new(),
            record_timestamp: format_timestamp(at),
            extra: Map::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Whether the field `name` is present and renders as `expected`.
    pub fn field_matches(&self, name: &str, expected: &str) -> bool {
        self.field(name)
            .is_some_and(|value| value_matches(value, expected))
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.record_timestamp = format_timestamp(at);
    }
}

/// Compare a field value against a path segment. Strings compare as-is,
/// numbers by their JSON rendering, anything else never matches.
pub fn value_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        _ => false,
    }
}

/// The `recordid` carried by a request body, if it is a string.
pub fn record_id_of(input: &Input) -> Option<&str> {
    input.get(RECORD_ID_KEY).and_then(Value::as_str)
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> Input {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_copies_only_allow_listed_keys() {
        let mut fields = Fields::new();
        let body = input(json!({
            "recordid": "r1",
            "classe_age": "65-74",
            "commune_residence": "75056",
            "favourite_colour": "blue",
        }));
        let copied = VACCINATION_FIELDS.merge_into(&mut fields, &body);
        assert_eq!(copied, 2);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["classe_age"], json!("65-74"));
        assert!(!fields.contains_key("recordid"));
        assert!(!fields.contains_key("favourite_colour"));
    }

    #[test]
    fn test_merge_overwrites_present_keys_only() {
        let mut fields = Fields::from([
            ("classe_age".to_string(), json!("65-74")),
            ("commune_residence".to_string(), json!("X")),
        ]);
        VACCINATION_FIELDS.merge_into(&mut fields, &input(json!({"classe_age": "75+"})));
        assert_eq!(fields["classe_age"], json!("75+"));
        assert_eq!(fields["commune_residence"], json!("X"));
    }

    #[test]
    fn test_custom_allow_list() {
        const ONLY_DATE: AllowList = AllowList::new(&["date"]);
        let mut fields = Fields::new();
        ONLY_DATE.merge_into(
            &mut fields,
            &input(json!({"date": "2022-03-07", "classe_age": "20-39"})),
        );
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["date"]);
    }

    #[test]
    fn test_unknown_keys() {
        let fields = Fields::from([
            ("date".to_string(), json!("2022-03-07")),
            ("geo_point_2d".to_string(), json!([48.8, 2.3])),
        ]);
        assert_eq!(VACCINATION_FIELDS.unknown_keys(&fields), vec!["geo_point_2d"]);
    }

    #[test]
    fn test_value_matches_strings_and_numbers() {
        assert!(value_matches(&json!("75056"), "75056"));
        assert!(value_matches(&json!(75056), "75056"));
        assert!(!value_matches(&json!("75056"), "75057"));
        assert!(!value_matches(&json!(null), "null"));
        assert!(!value_matches(&json!(["75056"]), "75056"));
    }

    #[test]
    fn test_record_keeps_unknown_top_level_keys() {
        let raw = json!({
            "datasetid": "donnees-de-vaccination-par-commune",
            "recordid": "8d40bdd24b81cc060ba7ee0388db711d4fa7eac5",
            "fields": {"classe_age": "TOUT_AGE", "commune_residence": "01001"},
            "record_timestamp": "2022-03-09T10:02:00.000Z",
            "geometry": {"type": "Point", "coordinates": [5.0, 46.1]}
        });
        let record: Record = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(record.record_id, "8d40bdd24b81cc060ba7ee0388db711d4fa7eac5");
        assert!(record.extra.contains_key("geometry"));
        assert_eq!(serde_json::to_value(&record).unwrap(), raw);
    }

    #[test]
    fn test_record_id_of_requires_string() {
        assert_eq!(record_id_of(&input(json!({"recordid": "a"}))), Some("a"));
        assert_eq!(record_id_of(&input(json!({"recordid": 12}))), None);
        assert_eq!(record_id_of(&input(json!({}))), None);
    }
}
