use std::collections::HashMap;

use crate::oracle::{Oracle, OracleError, Verdict};
use crate::relations::Relation;
use crate::rules::Rule;

/// Oracle that records everything it is given and answers queries from a table.
#[derive(Debug, Default)]
pub(crate) struct RecordingOracle {
    pub relations: Vec<Relation>,
    pub rules: Vec<(Rule, Option<String>)>,
    pub queries: Vec<String>,
    /// Verdicts by block label; unlisted queries are unreachable
    pub verdicts: HashMap<String, Verdict>,
    pub refuse_relations: bool,
    /// Rules with this label are rejected
    pub reject_rule: Option<String>,
}

impl RecordingOracle {
    pub fn labels(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter_map(|(_, label)| label.as_deref())
            .collect()
    }

    pub fn rule(&self, label: &str) -> Option<&Rule> {
        self.rules
            .iter()
            .find(|(_, l)| l.as_deref() == Some(label))
            .map(|(rule, _)| rule)
    }

    pub fn relation(&self, label: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.label() == label)
    }
}

impl Oracle for RecordingOracle {
    fn register_relation(&mut self, relation: &Relation) -> Result<(), OracleError> {
        if self.refuse_relations {
            return Err(OracleError::Failed {
                message: "registration refused".to_string(),
            });
        }
        self.relations.push(relation.clone());
        Ok(())
    }

    fn add_rule(&mut self, rule: &Rule, label: Option<&str>) -> Result<(), OracleError> {
        if label.is_some() && label == self.reject_rule.as_deref() {
            return Err(OracleError::Failed {
                message: "rule refused".to_string(),
            });
        }
        self.rules.push((rule.clone(), label.map(str::to_string)));
        Ok(())
    }

    fn add_query(&mut self, relation: &Relation) -> Verdict {
        self.queries.push(relation.label().to_string());
        self.verdicts
            .get(relation.label())
            .cloned()
            .unwrap_or(Verdict::Unreachable)
    }
}
