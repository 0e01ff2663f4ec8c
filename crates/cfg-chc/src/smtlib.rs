use std::collections::HashSet;

use crate::oracle::OracleError;
use crate::relations::Relation;
use crate::rules::Rule;
use crate::term::relation_symbol;

/// Accumulates relation declarations and rules in the z3 fixedpoint dialect.
#[derive(Debug, Clone, Default)]
pub struct ChcScript {
    declarations: Vec<String>,
    declared: HashSet<String>,
    rules: Vec<String>,
}

impl ChcScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, relation: &Relation) -> Result<(), OracleError> {
        if !self.declared.insert(relation.label().to_string()) {
            return Err(OracleError::DuplicateRelation {
                label: relation.label().to_string(),
            });
        }
        self.declarations.push(relation.declaration());
        Ok(())
    }

    pub fn add_rule(&mut self, rule: &Rule, label: Option<&str>) -> Result<(), OracleError> {
        if let Some(missing) = rule
            .relations()
            .into_iter()
            .find(|label| !self.declared.contains(*label))
        {
            return Err(OracleError::UnknownRelation {
                label: missing.to_string(),
            });
        }

        self.rules.push(match label {
            Some(label) => format!("(rule {rule} {})", rule_name(label)),
            None => format!("(rule {rule})"),
        });
        Ok(())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Renders the whole script followed by one `(query ...)` per relation.
    pub fn render(&self, queries: &[&Relation]) -> String {
        let mut smt = String::new();
        smt.push_str("(set-logic HORN)\n");
        smt.push_str("(set-option :fp.engine spacer)\n");
        smt.push_str("(set-info :source |cfg-chc block reachability model|)\n\n");

        for declaration in &self.declarations {
            smt.push_str(declaration);
            smt.push('\n');
        }
        smt.push('\n');

        for rule in &self.rules {
            smt.push_str(rule);
            smt.push('\n');
        }

        if !queries.is_empty() {
            smt.push('\n');
        }
        for relation in queries {
            smt.push_str(&format!("(query {})\n", relation_symbol(relation.label())));
        }
        smt
    }
}

fn rule_name(label: &str) -> String {
    let cleaned = label
        .chars()
        .map(|ch| if ch == '|' || ch == '\\' { '_' } else { ch })
        .collect::<String>();
    format!("|{cleaned}|")
}
