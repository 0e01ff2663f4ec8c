use std::collections::HashSet;
use std::fmt;

use cfg_ir::{Block, Function, Terminator, Value};
use tracing::debug;

use crate::encode::{eval, lookup_sort, EvalError, UnsupportedConstruct, UnsupportedReason};
use crate::relations::{Relation, RelationRegistry};
use crate::term::{and_terms, CmpOp, Sort, Term, Variable};
use crate::universe::VariableUniverse;
use crate::RuleError;

/// `forall binders. body => head`, with an empty body meaning a fact.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Rule {
    binders: Vec<Variable>,
    body: Vec<Term>,
    head: Term,
}

impl Rule {
    /// Builds a rule, rejecting an empty or repeated binder list.
    pub fn forall(binders: &[Variable], body: Vec<Term>, head: Term) -> Result<Rule, RuleError> {
        if binders.is_empty() {
            return Err(RuleError::EmptyQuantifier);
        }
        let mut seen = HashSet::new();
        for binder in binders {
            if !seen.insert(binder.name()) {
                return Err(RuleError::DuplicateBinder {
                    name: binder.name().to_string(),
                });
            }
        }
        Ok(Rule {
            binders: binders.to_vec(),
            body,
            head,
        })
    }

    pub fn binders(&self) -> &[Variable] {
        &self.binders
    }

    pub fn body(&self) -> &[Term] {
        &self.body
    }

    pub fn head(&self) -> &Term {
        &self.head
    }

    pub fn is_fact(&self) -> bool {
        self.body.is_empty()
    }

    /// Labels of every relation the rule applies, head first
    pub fn relations(&self) -> Vec<&str> {
        std::iter::once(&self.head)
            .chain(&self.body)
            .filter_map(|term| match term {
                Term::App(label, _) => Some(label.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binders = self
            .binders
            .iter()
            .map(|v| format!("({v} {})", v.sort()))
            .collect::<Vec<_>>()
            .join(" ");
        if self.is_fact() {
            write!(f, "(forall ({binders}) {})", self.head)
        } else {
            write!(
                f,
                "(forall ({binders}) (=> {} {}))",
                and_terms(&self.body),
                self.head
            )
        }
    }
}

/// Arguments for `to`'s relation when control arrives from block `from`.
///
/// Phis of `to` take the value they select for `from`; every other free
/// variable of `to` passes through unchanged. A phi whose incoming value is
/// missing or not modeled is bound to a fresh variable instead, returned
/// alongside the arguments, and recorded in `unsupported`.
pub(crate) fn transition(
    universe: &VariableUniverse,
    from: &str,
    to: &Block,
    relation: &Relation,
    unsupported: &mut Vec<UnsupportedConstruct>,
) -> Result<(Vec<Term>, Vec<Variable>), RuleError> {
    let mut args = relation.params().iter().map(Term::var).collect::<Vec<_>>();
    let mut fresh = Vec::new();

    for phi in to.phis() {
        let Some(name) = phi.defined_value() else {
            continue;
        };
        let Some(slot) = relation.slot(name) else {
            continue;
        };
        let sort = relation.params()[slot].sort();
        let reason = match phi.instr.phi_incoming(from) {
            Some(incoming) => match eval(incoming, sort, universe) {
                Ok(term) => {
                    args[slot] = term;
                    continue;
                }
                Err(EvalError::Unknown(name)) => {
                    return Err(RuleError::UnknownValue { name });
                }
                Err(EvalError::Unsupported(reason)) => reason,
            },
            None => UnsupportedReason::MissingIncoming {
                from: from.to_string(),
            },
        };

        debug!(
            phi = %name,
            from = %from,
            reason = %reason,
            "phi operand not modeled; value is unconstrained"
        );
        let variable = Variable::new(fresh_name(universe, &fresh, name, from), sort);
        args[slot] = Term::var(&variable);
        fresh.push(variable);
        unsupported.push(UnsupportedConstruct {
            block: to.label.clone(),
            statement: phi.to_string(),
            reason,
        });
    }

    Ok((args, fresh))
}

/// `phi.from`, primed until it clashes with no other binder of the rule.
fn fresh_name(
    universe: &VariableUniverse,
    fresh: &[Variable],
    phi: &str,
    from: &str,
) -> String {
    let mut name = format!("{phi}.{from}");
    while universe.lookup(&name).is_some() || fresh.iter().any(|v| v.name() == name) {
        name.push('\'');
    }
    name
}

/// Guard of a conditional edge.
fn branch_condition(cond: &Value, universe: &VariableUniverse) -> Result<Term, EvalError> {
    let sort = match cond {
        Value::Const(_) => Sort::BoundedInt32,
        Value::Bool(_) => Sort::Bool,
        Value::Temporary(name) => lookup_sort(name, universe)?,
    };
    let term = eval(cond, sort, universe)?;
    Ok(match sort {
        Sort::Bool => term,
        Sort::BoundedInt32 => Term::cmp(CmpOp::Ne, term, Term::Int(0)),
    })
}

/// Builds the entry fact and per-block edge rules of one function.
pub(crate) struct RuleEmitter<'a> {
    pub function: &'a Function,
    pub universe: &'a VariableUniverse,
    pub registry: &'a RelationRegistry,
}

/// A rule (or the reason it could not be built) with its label.
pub(crate) type LabelledRule = (String, Result<Rule, RuleError>);

impl<'a> RuleEmitter<'a> {
    /// `forall FV(entry). entry(FV(entry))`
    pub fn entry_rule(&self, entry: &Block) -> LabelledRule {
        let rule = self
            .registry
            .get(&entry.label)
            .and_then(|relation| Rule::forall(relation.params(), vec![], relation.apply_params()));
        ("entry".to_string(), rule)
    }

    /// One rule per outgoing edge of `block`, in successor order.
    pub fn edge_rules(
        &self,
        block: &Block,
        assertions: &[Term],
        unsupported: &mut Vec<UnsupportedConstruct>,
    ) -> Vec<LabelledRule> {
        let edges: Vec<(Option<Term>, &str, String)> = match &block.terminator {
            Terminator::Jmp { target } => {
                vec![(None, target.as_str(), format!("{}->{target}", block.label))]
            }
            Terminator::Br {
                cond,
                if_true,
                if_false,
            } => {
                let guard = match branch_condition(cond, self.universe) {
                    Ok(guard) => Some(guard),
                    Err(EvalError::Unknown(name)) => {
                        let err = RuleError::UnknownValue { name };
                        return [("true", if_true), ("false", if_false)]
                            .into_iter()
                            .map(|(arm, target)| {
                                (format!("{}->{target}:{arm}", block.label), Err(err.clone()))
                            })
                            .collect();
                    }
                    Err(EvalError::Unsupported(reason)) => {
                        debug!(
                            block = %block.label,
                            cond = %cond,
                            reason = %reason,
                            "branch condition not modeled; edges are unguarded"
                        );
                        unsupported.push(UnsupportedConstruct {
                            block: block.label.clone(),
                            statement: block.terminator.to_string(),
                            reason,
                        });
                        None
                    }
                };
                vec![
                    (
                        guard.clone(),
                        if_true.as_str(),
                        format!("{}->{if_true}:true", block.label),
                    ),
                    (
                        guard.map(Term::not),
                        if_false.as_str(),
                        format!("{}->{if_false}:false", block.label),
                    ),
                ]
            }
            Terminator::Ret { .. } | Terminator::Unreachable => vec![],
        };

        edges
            .into_iter()
            .map(|(guard, target, label)| {
                let rule = self.edge_rule(block, guard, target, assertions, unsupported);
                (label, rule)
            })
            .collect()
    }

    fn edge_rule(
        &self,
        block: &Block,
        guard: Option<Term>,
        target: &str,
        assertions: &[Term],
        unsupported: &mut Vec<UnsupportedConstruct>,
    ) -> Result<Rule, RuleError> {
        let source = self.registry.get(&block.label)?;
        let relation = self.registry.get(target)?;
        let to = self
            .function
            .block(target)
            .ok_or_else(|| RuleError::MissingRelation {
                label: target.to_string(),
            })?;

        let (args, fresh) = transition(self.universe, &block.label, to, relation, unsupported)?;
        let head = relation.apply(args)?;

        let mut body = Vec::with_capacity(assertions.len() + 2);
        body.extend(guard);
        body.push(source.apply_params());
        body.extend_from_slice(assertions);

        let mut binders = self.universe.variables().to_vec();
        binders.extend(fresh);
        Rule::forall(&binders, body, head)
    }
}
