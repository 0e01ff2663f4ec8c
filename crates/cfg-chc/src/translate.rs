use cfg_ir::Function;
use tracing::{info, warn};

use crate::encode::{encode_block, UnsupportedConstruct};
use crate::oracle::{Oracle, Verdict};
use crate::relations::{Relation, RelationRegistry};
use crate::rules::{LabelledRule, Rule, RuleEmitter};
use crate::term::Variable;
use crate::universe::VariableUniverse;
use crate::{EncodeOptions, RuleError, TranslateError};

/// A rule that was dropped, and why.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SkippedRule {
    pub label: String,
    pub error: RuleError,
}

/// Result of translating one function.
#[derive(Debug, Clone)]
pub struct Translation {
    pub function: String,
    pub variables: Vec<Variable>,
    pub relations: Vec<Relation>,
    /// Rules the oracle accepted, in submission order
    pub rules: Vec<Rule>,
    /// Labels of blocks that call an assertion-failure intrinsic, in block order
    pub queries: Vec<String>,
    pub skipped: Vec<SkippedRule>,
    pub unsupported: Vec<UnsupportedConstruct>,
}

impl Translation {
    /// True when no rule was dropped.
    ///
    /// Unsupported constructs leave values unconstrained and only make the
    /// model coarser, so they do not count.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn relation(&self, label: &str) -> Option<&Relation> {
        self.relations.iter().find(|relation| relation.label() == label)
    }

    pub fn query_relations(&self) -> Vec<&Relation> {
        self.queries
            .iter()
            .filter_map(|label| self.relation(label))
            .collect()
    }
}

/// Verdict for one assertion-failure block.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct QueryOutcome {
    pub block: String,
    pub verdict: Verdict,
}

/// Drives the translation of functions into an [`Oracle`].
///
/// The oracle is borrowed for the translator's lifetime. Use a fresh oracle
/// per function: relations are named after block labels.
pub struct Translator<'o> {
    oracle: &'o mut dyn Oracle,
    options: EncodeOptions,
}

impl<'o> Translator<'o> {
    pub fn new(oracle: &'o mut dyn Oracle, options: EncodeOptions) -> Self {
        Self { oracle, options }
    }

    /// Registers one relation per block and submits every rule of `function`.
    #[tracing::instrument(level = "trace", skip_all, fields(function = %function.name))]
    pub fn translate(&mut self, function: &Function) -> Result<Translation, TranslateError> {
        let universe = VariableUniverse::build(function)?;

        let mut registry = RelationRegistry::new();
        for block in &function.blocks {
            registry.register(&block.label, universe.free_variables(block), self.oracle)?;
        }

        let mut translation = Translation {
            function: function.name.clone(),
            variables: universe.variables().to_vec(),
            relations: Vec::new(),
            rules: Vec::new(),
            queries: Vec::new(),
            skipped: Vec::new(),
            unsupported: Vec::new(),
        };

        let emitter = RuleEmitter {
            function,
            universe: &universe,
            registry: &registry,
        };

        if let Some(entry) = function.entry() {
            let rule = emitter.entry_rule(entry);
            self.submit(rule, &mut translation);
        }

        for block in &function.blocks {
            let encoded = encode_block(block, &universe);
            translation.unsupported.extend(encoded.unsupported);

            if encoded.fails && !translation.queries.contains(&block.label) {
                translation.queries.push(block.label.clone());
            }

            let rules: Vec<LabelledRule> = match encoded.lookup_error {
                Some(err) => block
                    .terminator
                    .successors()
                    .into_iter()
                    .map(|target| (format!("{}->{target}", block.label), Err(err.clone())))
                    .collect(),
                None => {
                    emitter.edge_rules(block, &encoded.assertions, &mut translation.unsupported)
                }
            };
            for rule in rules {
                self.submit(rule, &mut translation);
            }
        }

        translation.relations = registry.into_relations();

        info!(
            relations = translation.relations.len(),
            rules = translation.rules.len(),
            queries = translation.queries.len(),
            skipped = translation.skipped.len(),
            unsupported = translation.unsupported.len(),
            "translated function"
        );
        Ok(translation)
    }

    fn submit(&mut self, (label, rule): LabelledRule, translation: &mut Translation) {
        let rule = rule.and_then(|rule| {
            let name = self.options.label_rules.then_some(label.as_str());
            self.oracle
                .add_rule(&rule, name)
                .map(|()| rule)
                .map_err(RuleError::Rejected)
        });
        match rule {
            Ok(rule) => translation.rules.push(rule),
            Err(error) => {
                warn!(rule = %label, error = %error, "skipping rule");
                translation.skipped.push(SkippedRule { label, error });
            }
        }
    }

    /// Asks the oracle about every query block of `translation`.
    ///
    /// Call only after `translate` so that every rule is in place.
    pub fn solve(&mut self, translation: &Translation) -> Vec<QueryOutcome> {
        translation
            .query_relations()
            .into_iter()
            .map(|relation| {
                let verdict = self.oracle.add_query(relation);
                info!(
                    function = %translation.function,
                    block = %relation.label(),
                    verdict = %verdict,
                    "query answered"
                );
                QueryOutcome {
                    block: relation.label().to_string(),
                    verdict,
                }
            })
            .collect()
    }

    pub fn check(
        &mut self,
        function: &Function,
    ) -> Result<(Translation, Vec<QueryOutcome>), TranslateError> {
        let translation = self.translate(function)?;
        let outcomes = self.solve(&translation);
        Ok((translation, outcomes))
    }
}

#[cfg(test)]
mod tests {
    use cfg_ir::{BinOp, Instr, IntPredicate, Param, PhiIncoming, Terminator, Type, Value};

    use super::*;
    use crate::mock::RecordingOracle;
    use crate::oracle::OracleError;
    use crate::term::Sort;
    use crate::{FailureKind, UnsupportedReason};

    fn binary(kind: BinOp, lhs: Value, rhs: Value) -> Instr {
        Instr::Binary { kind, lhs, rhs }
    }

    fn icmp(pred: IntPredicate, lhs: Value, rhs: Value) -> Instr {
        Instr::Icmp { pred, lhs, rhs }
    }

    fn assert_fail() -> Instr {
        Instr::Call {
            callee: "__assert_fail".into(),
            args: vec![],
        }
    }

    fn translate(function: &Function) -> (Translation, RecordingOracle) {
        let mut oracle = RecordingOracle::default();
        let translation = Translator::new(&mut oracle, EncodeOptions::default())
            .translate(function)
            .expect("translates");
        (translation, oracle)
    }

    fn rendered(oracle: &RecordingOracle, label: &str) -> String {
        oracle
            .rule(label)
            .unwrap_or_else(|| panic!("no rule labelled {label}"))
            .to_string()
    }

    /// entry: r = a + b; r2 = r * 2; check: c = r2 < 0; fail: __assert_fail
    fn straight_line() -> Function {
        let mut func = Function::new(
            "straight",
            vec![Param::new("a", Type::I32), Param::new("b", Type::I32)],
        );

        let entry = func.add_block("entry");
        entry.assign_instr("r", Type::I32, binary(BinOp::Add, Value::temp("a"), Value::temp("b")));
        entry.assign_instr("r2", Type::I32, binary(BinOp::Mul, Value::temp("r"), Value::Const(2)));
        entry.terminate(Terminator::Jmp {
            target: "check".into(),
        });

        let check = func.add_block("check");
        check.assign_instr(
            "c",
            Type::I1,
            icmp(IntPredicate::Slt, Value::temp("r2"), Value::Const(0)),
        );
        check.terminate(Terminator::Br {
            cond: Value::temp("c"),
            if_true: "fail".into(),
            if_false: "done".into(),
        });

        let fail = func.add_block("fail");
        fail.add_instr(assert_fail());
        fail.terminate(Terminator::Unreachable);

        func.add_block("done")
            .terminate(Terminator::Ret { value: None });
        func
    }

    #[test]
    fn straight_line_with_assertion() {
        let func = straight_line();
        let (translation, oracle) = translate(&func);

        assert!(translation.is_complete());
        assert_eq!(translation.queries, vec!["fail"]);
        assert_eq!(
            oracle.labels(),
            vec!["entry", "entry->check", "check->fail:true", "check->done:false"]
        );

        let entry = oracle.relation("entry").unwrap();
        let names = entry.params().iter().map(Variable::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b", "c"]);

        assert_eq!(
            rendered(&oracle, "entry->check"),
            "(forall ((|%a| (_ BitVec 32)) (|%b| (_ BitVec 32)) (|%r| (_ BitVec 32)) (|%r2| (_ BitVec 32)) (|%c| Bool)) \
             (=> (and (|@entry| |%a| |%b| |%c|) (= |%r| (bvadd |%a| |%b|)) (= |%r2| (bvmul |%r| (_ bv2 32)))) \
             (|@check| |%a| |%b| |%r| |%r2|)))"
        );
        assert_eq!(
            rendered(&oracle, "check->fail:true"),
            "(forall ((|%a| (_ BitVec 32)) (|%b| (_ BitVec 32)) (|%r| (_ BitVec 32)) (|%r2| (_ BitVec 32)) (|%c| Bool)) \
             (=> (and |%c| (|@check| |%a| |%b| |%r| |%r2|) (= |%c| (bvslt |%r2| (_ bv0 32)))) \
             (|@fail| |%a| |%b| |%r| |%r2| |%c|)))"
        );
        assert!(rendered(&oracle, "check->done:false").contains("(and (not |%c|) (|@check|"));
    }

    #[test]
    fn entry_rule_is_a_single_fact() {
        let (translation, oracle) = translate(&straight_line());

        let facts = translation.rules.iter().filter(|r| r.is_fact()).count();
        assert_eq!(facts, 1);
        assert_eq!(
            rendered(&oracle, "entry"),
            "(forall ((|%a| (_ BitVec 32)) (|%b| (_ BitVec 32)) (|%c| Bool)) (|@entry| |%a| |%b| |%c|))"
        );
        assert_eq!(oracle.labels().iter().filter(|l| **l == "entry").count(), 1);
    }

    #[test]
    fn reachable_assertion_is_reported() {
        let mut oracle = RecordingOracle::default();
        oracle.verdicts.insert(
            "fail".into(),
            Verdict::Reachable {
                witness: Some("a = 2147483647".into()),
            },
        );
        let (translation, outcomes) = Translator::new(&mut oracle, EncodeOptions::default())
            .check(&straight_line())
            .expect("checks");

        assert!(translation.is_complete());
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].block, "fail");
        assert!(outcomes[0].verdict.is_reachable());
        assert_eq!(oracle.queries, vec!["fail"]);
    }

    /// entry: c = x > 0; then: t = x + 1; else: e = x - 1; merge: m = phi [t, then], [e, else]
    fn diamond() -> Function {
        let mut func = Function::new("diamond", vec![Param::new("x", Type::I32)]);

        let entry = func.add_block("entry");
        entry.assign_instr(
            "c",
            Type::I1,
            icmp(IntPredicate::Sgt, Value::temp("x"), Value::Const(0)),
        );
        entry.terminate(Terminator::Br {
            cond: Value::temp("c"),
            if_true: "then".into(),
            if_false: "else".into(),
        });

        let then = func.add_block("then");
        then.assign_instr("t", Type::I32, binary(BinOp::Add, Value::temp("x"), Value::Const(1)));
        then.terminate(Terminator::Jmp {
            target: "merge".into(),
        });

        let otherwise = func.add_block("else");
        otherwise.assign_instr(
            "e",
            Type::I32,
            binary(BinOp::Sub, Value::temp("x"), Value::Const(1)),
        );
        otherwise.terminate(Terminator::Jmp {
            target: "merge".into(),
        });

        let merge = func.add_block("merge");
        merge.assign_instr(
            "m",
            Type::I32,
            Instr::Phi {
                incoming: vec![
                    PhiIncoming {
                        block: "then".into(),
                        value: Value::temp("t"),
                    },
                    PhiIncoming {
                        block: "else".into(),
                        value: Value::temp("e"),
                    },
                ],
            },
        );
        merge.terminate(Terminator::Ret {
            value: Some(Value::temp("m")),
        });
        func
    }

    #[test]
    fn diamond_substitutes_merge_per_edge() {
        let (translation, oracle) = translate(&diamond());
        assert!(translation.is_complete());

        let merge = oracle.relation("merge").unwrap();
        let names = merge.params().iter().map(Variable::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["x", "c", "t", "e", "m"]);

        let head = |label: &str| oracle.rule(label).unwrap().head().to_string();
        assert_eq!(head("then->merge"), "(|@merge| |%x| |%c| |%t| |%e| |%t|)");
        assert_eq!(head("else->merge"), "(|@merge| |%x| |%c| |%t| |%e| |%e|)");
    }

    #[test]
    fn free_variables_exclude_local_definitions() {
        let func = diamond();
        let (translation, _) = translate(&func);

        for block in &func.blocks {
            let relation = translation.relation(&block.label).unwrap();
            for stmt in &block.statements {
                let Some(name) = stmt.defined_value() else {
                    continue;
                };
                assert_eq!(
                    relation.slot(name).is_some(),
                    stmt.instr.is_phi(),
                    "%{name} in @{}",
                    block.label
                );
            }
        }
    }

    #[test]
    fn signed_division_has_no_divisor_guard() {
        let mut func = Function::new(
            "divide",
            vec![Param::new("a", Type::I32), Param::new("b", Type::I32)],
        );
        let entry = func.add_block("entry");
        entry.assign_instr("q", Type::I32, binary(BinOp::Sdiv, Value::temp("a"), Value::temp("b")));
        entry.terminate(Terminator::Jmp {
            target: "exit".into(),
        });
        func.add_block("exit")
            .terminate(Terminator::Ret { value: None });

        let (translation, oracle) = translate(&func);
        assert!(translation.is_complete());
        let rule = rendered(&oracle, "entry->exit");
        assert!(rule.contains("(= |%q| (bvsdiv |%a| |%b|))"));
        assert!(!rule.contains("distinct"));
    }

    #[test]
    fn unsigned_comparison_leaves_siblings_encoded() {
        let mut func = Function::new(
            "unsigned",
            vec![Param::new("a", Type::I32), Param::new("b", Type::I32)],
        );
        let entry = func.add_block("entry");
        entry.assign_instr("s", Type::I32, binary(BinOp::Add, Value::temp("a"), Value::temp("b")));
        entry.assign_instr(
            "u",
            Type::I1,
            icmp(IntPredicate::Ult, Value::temp("a"), Value::temp("b")),
        );
        entry.assign_instr("d", Type::I32, binary(BinOp::Sub, Value::temp("a"), Value::temp("b")));
        entry.terminate(Terminator::Jmp {
            target: "exit".into(),
        });
        func.add_block("exit")
            .terminate(Terminator::Ret { value: None });

        let (translation, oracle) = translate(&func);

        assert!(translation.is_complete());
        assert_eq!(translation.unsupported.len(), 1);
        assert_eq!(translation.unsupported[0].block, "entry");
        assert_eq!(
            translation.unsupported[0].reason,
            UnsupportedReason::Predicate(IntPredicate::Ult)
        );

        let rule = oracle.rule("entry->exit").unwrap();
        // source relation, then the add and the sub
        assert_eq!(rule.body().len(), 3);
        let rule = rule.to_string();
        assert!(rule.contains("(= |%s| (bvadd |%a| |%b|))"));
        assert!(rule.contains("(= |%d| (bvsub |%a| |%b|))"));
        assert!(!rule.contains("(= |%u|"));
    }

    #[test]
    fn translation_is_deterministic() {
        let func = diamond();
        let (first, first_oracle) = translate(&func);
        let (second, second_oracle) = translate(&func);

        assert_eq!(first.variables, second.variables);
        assert_eq!(first.relations, second.relations);
        assert_eq!(first.rules, second.rules);
        assert_eq!(first_oracle.rules, second_oracle.rules);
    }

    #[test]
    fn queries_are_registered_once_per_block() {
        let mut func = Function::new("twice", vec![Param::new("x", Type::I32)]);
        let entry = func.add_block("entry");
        entry.add_instr(assert_fail());
        entry.add_instr(Instr::Call {
            callee: "reach_error".into(),
            args: vec![],
        });

        let (translation, _) = translate(&func);
        assert_eq!(translation.queries, vec!["entry"]);
    }

    #[test]
    fn empty_universe_skips_rules() {
        let mut func = Function::new("bare", vec![]);
        func.add_block("entry").terminate(Terminator::Jmp {
            target: "fail".into(),
        });
        func.add_block("fail").add_instr(assert_fail());

        let (translation, oracle) = translate(&func);

        assert!(!translation.is_complete());
        assert!(oracle.rules.is_empty());
        assert_eq!(translation.queries, vec!["fail"]);
        let labels = translation
            .skipped
            .iter()
            .map(|s| s.label.as_str())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["entry", "entry->fail"]);
        assert!(translation
            .skipped
            .iter()
            .all(|s| s.error.kind() == FailureKind::QuantifierConstruction));
    }

    #[test]
    fn undefined_operand_skips_block_rules() {
        let mut func = straight_line();
        func.blocks[1].statements[0].instr =
            icmp(IntPredicate::Slt, Value::temp("ghost"), Value::Const(0));

        let (translation, oracle) = translate(&func);

        assert!(!translation.is_complete());
        let skipped = translation
            .skipped
            .iter()
            .map(|s| s.label.as_str())
            .collect::<Vec<_>>();
        assert_eq!(skipped, vec!["check->fail", "check->done"]);
        assert!(translation
            .skipped
            .iter()
            .all(|s| s.error.kind() == FailureKind::LookupFailure));
        assert_eq!(oracle.labels(), vec!["entry", "entry->check"]);
        // the failing block is still queried
        assert_eq!(translation.queries, vec!["fail"]);
    }

    #[test]
    fn rejected_rules_are_reported() {
        let mut oracle = RecordingOracle {
            reject_rule: Some("entry->check".into()),
            ..RecordingOracle::default()
        };
        let translation = Translator::new(&mut oracle, EncodeOptions::default())
            .translate(&straight_line())
            .expect("translates");

        assert_eq!(translation.skipped.len(), 1);
        assert_eq!(translation.skipped[0].label, "entry->check");
        assert_eq!(translation.skipped[0].error.kind(), FailureKind::Oracle);
        assert_eq!(translation.rules.len(), 3);
    }

    #[test]
    fn oracle_errors_are_distinct_verdicts() {
        let mut oracle = RecordingOracle::default();
        let unknown = Verdict::Error(OracleError::Unknown {
            reason: "timeout".into(),
        });
        oracle.verdicts.insert("fail".into(), unknown.clone());

        let (_, outcomes) = Translator::new(&mut oracle, EncodeOptions::default())
            .check(&straight_line())
            .expect("checks");

        assert_eq!(outcomes[0].verdict, unknown);
        assert!(!outcomes[0].verdict.is_reachable());
    }

    #[test]
    fn fatal_errors_stop_translation() {
        let mut func = straight_line();
        func.blocks[3].label = "check".into();

        let mut oracle = RecordingOracle::default();
        let err = Translator::new(&mut oracle, EncodeOptions::default())
            .translate(&func)
            .expect_err("duplicate label");
        assert!(matches!(err, TranslateError::DuplicateLabel { .. }));
        assert!(oracle.relations.is_empty());
        assert!(oracle.rules.is_empty());
    }

    #[test]
    fn unmodeled_branch_condition_is_counted() {
        let mut func = Function::new(
            "narrow",
            vec![Param::new("b", Type::Int(8)), Param::new("x", Type::I32)],
        );
        func.add_block("entry").terminate(Terminator::Br {
            cond: Value::temp("b"),
            if_true: "fail".into(),
            if_false: "done".into(),
        });
        func.add_block("fail").add_instr(assert_fail());
        func.add_block("done")
            .terminate(Terminator::Ret { value: None });

        let (translation, oracle) = translate(&func);

        assert_eq!(
            oracle.labels(),
            vec!["entry", "entry->fail:true", "entry->done:false"]
        );
        assert_eq!(translation.unsupported.len(), 1);
        assert_eq!(translation.unsupported[0].block, "entry");
        assert_eq!(
            translation.unsupported[0].reason,
            UnsupportedReason::ValueType {
                name: "b".into(),
                ty: Type::Int(8),
            }
        );
        // no guard, only the source relation
        assert_eq!(oracle.rule("entry->fail:true").unwrap().body().len(), 1);
        assert_eq!(oracle.rule("entry->done:false").unwrap().body().len(), 1);
    }

    #[test]
    fn unmodeled_phi_operand_is_unconstrained() {
        let mut func = Function::new("widen", vec![Param::new("x", Type::I32)]);

        let entry = func.add_block("entry");
        entry.assign_instr(
            "c",
            Type::I1,
            icmp(IntPredicate::Sgt, Value::temp("x"), Value::Const(0)),
        );
        entry.terminate(Terminator::Br {
            cond: Value::temp("c"),
            if_true: "then".into(),
            if_false: "else".into(),
        });

        let then = func.add_block("then");
        then.assign_instr(
            "w",
            Type::Int(64),
            binary(BinOp::Add, Value::temp("x"), Value::Const(1)),
        );
        then.terminate(Terminator::Jmp {
            target: "merge".into(),
        });
        func.add_block("else").terminate(Terminator::Jmp {
            target: "merge".into(),
        });

        let merge = func.add_block("merge");
        merge.assign_instr(
            "m",
            Type::I32,
            Instr::Phi {
                incoming: vec![
                    PhiIncoming {
                        block: "then".into(),
                        value: Value::temp("w"),
                    },
                    PhiIncoming {
                        block: "else".into(),
                        value: Value::Const(5),
                    },
                ],
            },
        );
        merge.terminate(Terminator::Ret {
            value: Some(Value::temp("m")),
        });

        let (translation, oracle) = translate(&func);

        let head = |label: &str| oracle.rule(label).unwrap().head().to_string();
        assert_eq!(head("then->merge"), "(|@merge| |%x| |%c| |%m.then|)");
        assert_eq!(head("else->merge"), "(|@merge| |%x| |%c| (_ bv5 32))");

        let binders = oracle.rule("then->merge").unwrap().binders().to_vec();
        assert_eq!(binders.last(), Some(&Variable::new("m.then", Sort::BoundedInt32)));
        assert_eq!(
            oracle.rule("else->merge").unwrap().binders(),
            translation.variables.as_slice()
        );

        let phi_gaps = translation
            .unsupported
            .iter()
            .filter(|construct| construct.block == "merge")
            .collect::<Vec<_>>();
        assert_eq!(phi_gaps.len(), 1);
        assert_eq!(
            phi_gaps[0].reason,
            UnsupportedReason::ValueType {
                name: "w".into(),
                ty: Type::Int(64),
            }
        );
        assert!(phi_gaps[0].statement.starts_with("%m = "));
    }
}
