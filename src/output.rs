//! Result serialization (ambient "result formatting" concern; spec.md
//! treats the choice of format as external, but still wants one, per
//! §1's carried-regardless-of-non-goals rule). `serde` + `serde_yaml`
//! mirror the teacher's own `serde`/`serde_json` dependency pair.

use std::collections::HashMap;

use serde::Serialize;

use crate::burndown::BurndownReport;
use crate::identity::IdentityResolver;

#[derive(Debug, Serialize)]
pub struct Report {
    pub global_history: Vec<Vec<i64>>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub file_histories: HashMap<String, Vec<Vec<i64>>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub people: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub people_histories: HashMap<String, Vec<Vec<i64>>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub people_matrix: Vec<Vec<i64>>,
}

impl Report {
    pub fn from_burndown(report: BurndownReport, identities: &IdentityResolver) -> Self {
        let people = (0..identities.len())
            .map(|i| identities.name_of(i as u32).unwrap_or("<unknown>").to_string())
            .collect();
        let people_histories = report
            .people_histories
            .into_iter()
            .map(|(author, rows)| {
                let name = identities.name_of(author).unwrap_or("<unknown>").to_string();
                (name, rows)
            })
            .collect();

        Self {
            global_history: report.global_history,
            file_histories: report.file_histories,
            people,
            people_histories,
            people_matrix: report.people_matrix,
        }
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_round_trips_global_history_shape() {
        let report = Report {
            global_history: vec![vec![1, 2], vec![3, 4]],
            file_histories: HashMap::new(),
            people: Vec::new(),
            people_histories: HashMap::new(),
            people_matrix: Vec::new(),
        };
        let yaml = report.to_yaml().unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert!(parsed.get("global_history").is_some());
        assert!(parsed.get("file_histories").is_none());
    }
}
