//! A safety property over a transition system.

use z3::ast::{Bool, Dynamic};

use crate::term;
use crate::{TransitionSystem, TsError, TsResult};

/// A transition system paired with a boolean safety predicate over its
/// state variables. The negation of the property is the "bad" predicate
/// the engines search for.
#[derive(Debug, Clone)]
pub struct Property {
    ts: TransitionSystem,
    prop: Bool,
}

impl Property {
    pub fn new(ts: TransitionSystem, prop: Bool) -> TsResult<Self> {
        let d = Dynamic::from_ast(&prop);
        if !ts.only_curr(&d) {
            let foreign = term::free_symbol_names(&d)
                .into_iter()
                .find(|n| {
                    !ts.state_vars()
                        .iter()
                        .filter_map(term::symbol_name)
                        .any(|s| s == *n)
                })
                .unwrap_or_default();
            return Err(TsError::UnknownSymbol {
                symbol: foreign,
                context: "property".to_string(),
            });
        }
        Ok(Property { ts, prop })
    }

    pub fn ts(&self) -> &TransitionSystem {
        &self.ts
    }

    pub fn prop(&self) -> &Bool {
        &self.prop
    }

    /// The negated property.
    pub fn bad(&self) -> Bool {
        term::smart_not(&self.prop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::Sort;

    #[test]
    fn property_must_be_over_state_vars() {
        let mut ts = TransitionSystem::new_relational();
        let x = ts.make_state_var("x", &Sort::bool()).unwrap();
        let i = ts.make_input_var("i", &Sort::bool()).unwrap();

        assert!(Property::new(ts.clone(), x.as_bool().unwrap()).is_ok());
        assert!(Property::new(ts, i.as_bool().unwrap()).is_err());
    }

    #[test]
    fn bad_is_the_negation() {
        let mut ts = TransitionSystem::new_relational();
        let x = ts.make_state_var("x", &Sort::bool()).unwrap();
        let p = Property::new(ts, x.as_bool().unwrap()).unwrap();
        assert_eq!(p.bad().to_string(), x.as_bool().unwrap().not().to_string());
    }
}
