use std::collections::HashMap;
use std::process;

use datavaccin_lib::{Record, VACCINATION_FIELDS};

use crate::server::config::DvConfig;

/// What `validate` found in a records file.
#[derive(Debug, Default, PartialEq)]
pub struct Report {
    pub records: usize,
    /// Ids that appear more than once, with their occurrence count.
    pub duplicate_ids: Vec<(String, usize)>,
    /// Records carrying field keys outside the allow-list.
    pub unknown_fields: Vec<(String, Vec<String>)>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.duplicate_ids.is_empty() && self.unknown_fields.is_empty()
    }
}

pub fn inspect(records: &[Record]) -> Report {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order = Vec::new();
    for r in records {
        let count = counts.entry(r.record_id.as_str()).or_insert(0);
        if *count == 1 {
            order.push(r.record_id.as_str());
        }
        *count += 1;
    }

    let duplicate_ids = order
        .into_iter()
        .map(|id| (id.to_string(), counts[id]))
        .collect();

    let unknown_fields = records
        .iter()
        .filter_map(|r| {
            let unknown = VACCINATION_FIELDS.unknown_keys(&r.fields);
            (!unknown.is_empty()).then(|| {
                (
                    r.record_id.clone(),
                    unknown.into_iter().map(String::from).collect(),
                )
            })
        })
        .collect();

    Report {
        records: records.len(),
        duplicate_ids,
        unknown_fields,
    }
}

fn run_validate_inner(data_file: &str) -> Result<Report, ()> {
    let content = match std::fs::read(data_file) {
        Ok(content) => content,
        Err(_) => {
            eprintln!("{} does not exist", data_file);
            return Err(());
        }
    };

    let records: Vec<Record> = match serde_json::from_slice(&content) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Parsing failed: {}", e);
            return Err(());
        }
    };

    let report = inspect(&records);
    println!("{}: {} records", data_file, report.records);
    for (id, count) in &report.duplicate_ids {
        println!("  duplicate recordid {} ({} occurrences)", id, count);
    }
    for (id, keys) in &report.unknown_fields {
        println!("  record {} has unknown fields: {}", id, keys.join(", "));
    }
    Ok(report)
}

/// The file to check: the command-line value, else the configured one.
fn data_file_for(config: &DvConfig, data_file_arg: Option<String>) -> String {
    data_file_arg.unwrap_or_else(|| config.server.data_file.clone())
}

pub fn run_validate(config_path: &str, data_file_arg: Option<String>) {
    let mut config = DvConfig::load(config_path);
    config.apply_env_overrides();
    let data_file = data_file_for(&config, data_file_arg);

    match run_validate_inner(&data_file) {
        Ok(report) if report.is_clean() => println!("OK"),
        _ => process::exit(1),
    }
}
