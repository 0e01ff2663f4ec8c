use std::collections::HashMap;

use tracing::trace;

use crate::oracle::Oracle;
use crate::term::{relation_symbol, Sort, Term, Variable};
use crate::{RuleError, TranslateError};

/// The uninterpreted predicate attached to one block.
///
/// `params` is the block's free-variable vector; `slots` maps each
/// parameter's name to its position so arguments can be placed by key.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Relation {
    label: String,
    params: Vec<Variable>,
    slots: HashMap<String, usize>,
}

impl Relation {
    pub fn new(label: impl Into<String>, params: Vec<Variable>) -> Self {
        let slots = params
            .iter()
            .enumerate()
            .map(|(i, variable)| (variable.name().to_string(), i))
            .collect();
        Self {
            label: label.into(),
            params,
            slots,
        }
    }

    /// Label of the block this relation belongs to
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn params(&self) -> &[Variable] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn sorts(&self) -> Vec<Sort> {
        self.params.iter().map(Variable::sort).collect()
    }

    /// Position of the parameter standing for `name`
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    /// Applies the relation, checking arity and argument sorts.
    pub fn apply(&self, args: Vec<Term>) -> Result<Term, RuleError> {
        if args.len() != self.arity() {
            return Err(RuleError::ArityMismatch {
                relation: self.label.clone(),
                expected: self.arity(),
                found: args.len(),
            });
        }
        for (index, (param, arg)) in self.params.iter().zip(&args).enumerate() {
            if param.sort() != arg.sort() {
                return Err(RuleError::SortMismatch {
                    relation: self.label.clone(),
                    index,
                    expected: param.sort(),
                    found: arg.sort(),
                });
            }
        }
        Ok(Term::App(self.label.clone(), args))
    }

    /// Applies the relation to its own parameters.
    pub fn apply_params(&self) -> Term {
        Term::App(self.label.clone(), self.params.iter().map(Term::var).collect())
    }

    /// `(declare-rel |@label| (sorts...))`
    pub fn declaration(&self) -> String {
        format!(
            "(declare-rel {} ({}))",
            relation_symbol(&self.label),
            self.params
                .iter()
                .map(|param| param.sort().to_string())
                .collect::<Vec<_>>()
                .join(" ")
        )
    }
}

/// One relation per block, registered with the oracle as it is allocated.
#[derive(Debug, Default)]
pub struct RelationRegistry {
    relations: Vec<Relation>,
    index: HashMap<String, usize>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        label: &str,
        params: Vec<Variable>,
        oracle: &mut dyn Oracle,
    ) -> Result<&Relation, TranslateError> {
        if self.index.contains_key(label) {
            return Err(TranslateError::DuplicateRelation {
                label: label.to_string(),
            });
        }

        let relation = Relation::new(label, params);
        oracle
            .register_relation(&relation)
            .map_err(|source| TranslateError::Oracle {
                label: label.to_string(),
                source,
            })?;
        trace!(relation = %label, arity = relation.arity(), "registered relation");

        self.index.insert(label.to_string(), self.relations.len());
        self.relations.push(relation);
        Ok(&self.relations[self.relations.len() - 1])
    }

    pub fn get(&self, label: &str) -> Result<&Relation, RuleError> {
        self.index
            .get(label)
            .map(|&i| &self.relations[i])
            .ok_or_else(|| RuleError::MissingRelation {
                label: label.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn into_relations(self) -> Vec<Relation> {
        self.relations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingOracle;
    use crate::term::Sort;

    fn params() -> Vec<Variable> {
        vec![
            Variable::new("x", Sort::BoundedInt32),
            Variable::new("c", Sort::Bool),
        ]
    }

    #[test]
    fn slots_follow_parameter_order() {
        let relation = Relation::new("loop", params());

        assert_eq!(relation.arity(), 2);
        assert_eq!(relation.slot("x"), Some(0));
        assert_eq!(relation.slot("c"), Some(1));
        assert_eq!(relation.slot("y"), None);
        assert_eq!(relation.sorts(), vec![Sort::BoundedInt32, Sort::Bool]);
        assert_eq!(
            relation.declaration(),
            "(declare-rel |@loop| ((_ BitVec 32) Bool))"
        );
    }

    #[test]
    fn apply_checks_arity_and_sorts() {
        let relation = Relation::new("loop", params());

        let app = relation
            .apply(vec![Term::Int(3), Term::Bool(true)])
            .expect("well-sorted");
        assert_eq!(app.to_string(), "(|@loop| (_ bv3 32) true)");

        let err = relation.apply(vec![Term::Int(3)]).expect_err("short");
        assert_eq!(
            err,
            RuleError::ArityMismatch {
                relation: "loop".into(),
                expected: 2,
                found: 1,
            }
        );

        let err = relation
            .apply(vec![Term::Bool(false), Term::Bool(true)])
            .expect_err("ill-sorted");
        assert!(err.to_string().contains("argument 0 of relation @loop"));
    }

    #[test]
    fn registers_once_per_label() {
        let mut oracle = RecordingOracle::default();
        let mut registry = RelationRegistry::new();

        registry
            .register("entry", params(), &mut oracle)
            .expect("first registration");
        let err = registry
            .register("entry", params(), &mut oracle)
            .expect_err("second registration");

        assert!(matches!(err, TranslateError::DuplicateRelation { .. }));
        assert_eq!(oracle.relations.len(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("entry").is_ok());
        assert_eq!(
            registry.get("exit"),
            Err(RuleError::MissingRelation {
                label: "exit".into()
            })
        );
    }

    #[test]
    fn oracle_refusal_is_fatal() {
        let mut oracle = RecordingOracle {
            refuse_relations: true,
            ..RecordingOracle::default()
        };
        let mut registry = RelationRegistry::new();

        let err = registry
            .register("entry", params(), &mut oracle)
            .expect_err("refused");
        assert!(err.to_string().starts_with("oracle rejected relation @entry"));
        assert!(registry.is_empty());
    }
}
