use crate::record::{Record, AGE_BRACKET, INJECTION_WEEK, MUNICIPALITY};

/// Predicates taken from a `/records/filter/...` path. Each level narrows the
/// previous one: municipality, then injection week, then age bracket.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordFilter {
    pub municipality: String,
    pub week: Option<String>,
    pub age: Option<String>,
}

impl RecordFilter {
    pub fn municipality(code: &str) -> Self {
        Self {
            municipality: code.to_string(),
            ..Self::default()
        }
    }

    pub fn week(mut self, week: &str) -> Self {
        self.week = Some(week.to_string());
        self
    }

    pub fn age(mut self, age: &str) -> Self {
        self.age = Some(age.to_string());
        self
    }

    /// `(field, value)` pairs this filter pins, in path order.
    pub fn predicates(&self) -> Vec<(&'static str, &str)> {
        let mut out = vec![(MUNICIPALITY, self.municipality.as_str())];
        if let Some(week) = &self.week {
            out.push((INJECTION_WEEK, week.as_str()));
        }
        if let Some(age) = &self.age {
            out.push((AGE_BRACKET, age.as_str()));
        }
        out
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.predicates()
            .into_iter()
            .all(|(field, expected)| record.field_matches(field, expected))
    }
}
