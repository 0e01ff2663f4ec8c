use std::collections::{BTreeMap, HashMap, HashSet};

use cfg_ir::{Block, Function, Type};
use tracing::debug;

use crate::term::{Sort, Variable};
use crate::TranslateError;

/// Every modeled value of one function, in a fixed order.
///
/// Parameters come first in declaration order, followed by instruction
/// results in block and statement order. The order is the positional
/// contract of every block relation, so the universe is built once and only
/// read afterwards.
#[derive(Debug, Clone)]
pub struct VariableUniverse {
    variables: Vec<Variable>,
    index: HashMap<String, usize>,
    merges: HashSet<String>,
    skipped: BTreeMap<String, Type>,
}

impl VariableUniverse {
    pub fn build(function: &Function) -> Result<Self, TranslateError> {
        if function.blocks.is_empty() {
            return Err(TranslateError::EmptyFunction {
                function: function.name.clone(),
            });
        }

        let mut labels = HashSet::new();
        for block in &function.blocks {
            if !labels.insert(block.label.as_str()) {
                return Err(TranslateError::DuplicateLabel {
                    label: block.label.clone(),
                });
            }
        }

        let mut universe = Self {
            variables: Vec::new(),
            index: HashMap::new(),
            merges: HashSet::new(),
            skipped: BTreeMap::new(),
        };

        for param in &function.params {
            universe.define(&param.name, &param.ty)?;
        }
        for block in &function.blocks {
            for stmt in &block.statements {
                let Some(name) = stmt.defined_value() else {
                    continue;
                };
                universe.define(name, &stmt.ty)?;
                if stmt.instr.is_phi() {
                    universe.merges.insert(name.to_string());
                }
            }
        }

        Ok(universe)
    }

    fn define(&mut self, name: &str, ty: &Type) -> Result<(), TranslateError> {
        if self.index.contains_key(name) || self.skipped.contains_key(name) {
            return Err(TranslateError::DuplicateDefinition {
                name: name.to_string(),
            });
        }

        match Sort::from_type(ty) {
            Some(sort) => {
                self.index.insert(name.to_string(), self.variables.len());
                self.variables.push(Variable::new(name, sort));
            }
            None => {
                debug!(value = %name, ty = %ty, "value type is not modeled; skipping");
                self.skipped.insert(name.to_string(), *ty);
            }
        }
        Ok(())
    }

    /// All modeled variables, the binder list of every edge rule
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn lookup(&self, name: &str) -> Option<&Variable> {
        self.index.get(name).map(|&i| &self.variables[i])
    }

    /// Returns the type of a value that exists but is not modeled
    pub fn skipped_type(&self, name: &str) -> Option<&Type> {
        self.skipped.get(name)
    }

    /// Values whose type is not modeled, sorted by name
    pub fn skipped(&self) -> impl Iterator<Item = (&str, &Type)> {
        self.skipped.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    /// Returns true if `name` is defined by a phi
    pub fn is_merge(&self, name: &str) -> bool {
        self.merges.contains(name)
    }

    /// Variables defined by the non-phi statements of `block`.
    pub fn local_defs(&self, block: &Block) -> Vec<&Variable> {
        block
            .statements
            .iter()
            .filter_map(|stmt| stmt.defined_value())
            .filter(|name| !self.is_merge(name))
            .filter_map(|name| self.lookup(name))
            .collect()
    }

    /// Variables live at the entry of `block`: everything except the block's
    /// own non-phi definitions, in universe order.
    pub fn free_variables(&self, block: &Block) -> Vec<Variable> {
        let local = self
            .local_defs(block)
            .into_iter()
            .map(Variable::name)
            .collect::<HashSet<_>>();

        self.variables
            .iter()
            .filter(|variable| !local.contains(variable.name()))
            .cloned()
            .collect()
    }
}
