//! SSA indexing of program variables in formulas.
//!
//! A variable `x` at SSA index `i` is the bitvector constant `x#i`.
//! Predicates stored in a precision are always unindexed (`x`); they are
//! instantiated against an [SsaMap] immediately before use, and results
//! flowing back into a precision are stripped again.

use crate::smt::WORD_BITS;
use magpie_cfa::VarName;
use std::collections::{BTreeMap, BTreeSet};
use z3::ast::{Ast, BV, Bool, Dynamic};
use z3::{AstKind, DeclKind};

pub const SSA_SEPARATOR: char = '#';

/// Current SSA index per variable. Missing variables are at index 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsaMap(BTreeMap<VarName, u32>);

impl SsaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_of(&self, var: VarName) -> u32 {
        self.0.get(&var).copied().unwrap_or(0)
    }

    /// Bump `var` to its next index and return it.
    pub fn advance(&mut self, var: VarName) -> u32 {
        let next = self.index_of(var) + 1;
        self.0.insert(var, next);
        next
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarName, u32)> + '_ {
        self.0.iter().map(|(v, i)| (*v, *i))
    }

    /// Pointwise maximum of two maps, the index state after a join.
    pub fn join_max(&self, other: &SsaMap) -> SsaMap {
        let mut joined = self.0.clone();
        for (var, idx) in other.iter() {
            let entry = joined.entry(var).or_insert(0);
            *entry = (*entry).max(idx);
        }
        SsaMap(joined)
    }
}

/// The constant for `var` at an explicit index.
pub fn indexed(var: VarName, index: u32) -> BV {
    BV::new_const(format!("{var}{SSA_SEPARATOR}{index}"), WORD_BITS)
}

/// The unindexed constant for `var`, as stored in precisions.
pub fn unindexed(var: VarName) -> BV {
    BV::new_const(var.as_str(), WORD_BITS)
}

/// The constant for `var` at its current index in `map`.
pub fn current(var: VarName, map: &SsaMap) -> BV {
    indexed(var, map.index_of(var))
}

fn split_symbol(name: &str) -> (VarName, Option<u32>) {
    match name.rsplit_once(SSA_SEPARATOR) {
        Some((base, idx)) => match idx.parse::<u32>() {
            Ok(i) => (VarName::new(base), Some(i)),
            Err(_) => (VarName::new(name), None),
        },
        None => (VarName::new(name), None),
    }
}

/// Names of all uninterpreted constants occurring in `formula`.
pub fn collect_symbols(formula: &Bool) -> BTreeSet<String> {
    let mut symbols = BTreeSet::new();
    let mut worklist: Vec<Dynamic> = vec![Dynamic::from_ast(formula)];
    while let Some(term) = worklist.pop() {
        if term.kind() == AstKind::App {
            let children = term.children();
            if children.is_empty() {
                let decl = term.decl();
                if decl.kind() == DeclKind::UNINTERPRETED {
                    symbols.insert(decl.name());
                }
            }
            worklist.extend(children);
        }
    }
    symbols
}

/// Instantiate an unindexed predicate against `map`: every unindexed
/// variable is replaced by its current indexed form.
pub fn instantiate(predicate: &Bool, map: &SsaMap) -> Bool {
    let substitutions: Vec<(BV, BV)> = collect_symbols(predicate)
        .into_iter()
        .filter_map(|name| {
            let (var, index) = split_symbol(&name);
            match index {
                // already indexed, leave alone
                Some(_) => None,
                None => Some((unindexed(var), current(var, map))),
            }
        })
        .collect();
    let pairs: Vec<(&BV, &BV)> = substitutions.iter().map(|(a, b)| (a, b)).collect();
    predicate.substitute(&pairs)
}

/// Drop all SSA indices from a formula, producing the storable form.
pub fn strip_indices(formula: &Bool) -> Bool {
    let substitutions: Vec<(BV, BV)> = collect_symbols(formula)
        .into_iter()
        .filter_map(|name| {
            let (var, index) = split_symbol(&name);
            index.map(|i| (indexed(var, i), unindexed(var)))
        })
        .collect();
    let pairs: Vec<(&BV, &BV)> = substitutions.iter().map(|(a, b)| (a, b)).collect();
    formula.substitute(&pairs)
}

/// Pad `formula` (whose variables are indexed per `from`) up to the
/// indices of `to`: for every variable lagging behind, conjoin the
/// equality `x#to = x#from`. Used to compare path formulas with
/// different index histories.
pub fn pad(formula: &Bool, from: &SsaMap, to: &SsaMap) -> Bool {
    let mut terms = vec![formula.clone()];
    for (var, target) in to.iter() {
        let start = from.index_of(var);
        if start < target {
            terms.push(indexed(var, target)._eq(&indexed(var, start)));
        }
    }
    if terms.len() == 1 {
        formula.clone()
    } else {
        Bool::and(&terms)
    }
}

/// The boolean atoms of a formula: maximal subformulas containing no
/// boolean connective at their root.
pub fn atoms(formula: &Bool) -> Vec<Bool> {
    let mut found = Vec::new();
    let mut worklist: Vec<Bool> = vec![formula.clone()];
    while let Some(term) = worklist.pop() {
        if term.kind() != AstKind::App {
            continue;
        }
        let decl_kind = term.decl().kind();
        match decl_kind {
            DeclKind::AND
            | DeclKind::OR
            | DeclKind::NOT
            | DeclKind::IMPLIES
            | DeclKind::IFF
            | DeclKind::XOR
            | DeclKind::ITE => {
                worklist.extend(term.children().into_iter().filter_map(|c| c.as_bool()));
            }
            DeclKind::TRUE | DeclKind::FALSE => {}
            _ => {
                if !found.contains(&term) {
                    found.push(term);
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::SmtEnv;

    fn x() -> VarName {
        VarName::new("x")
    }

    #[test]
    fn advance_counts_up_from_zero() {
        let mut map = SsaMap::new();
        assert_eq!(map.index_of(x()), 0);
        assert_eq!(map.advance(x()), 1);
        assert_eq!(map.advance(x()), 2);
        assert_eq!(map.index_of(x()), 2);
    }

    #[test]
    fn instantiate_then_strip_is_identity() {
        let mut map = SsaMap::new();
        map.advance(x());
        let pred = unindexed(x())._eq(&BV::from_i64(3, WORD_BITS));
        let instantiated = instantiate(&pred, &map);
        let symbols = collect_symbols(&instantiated);
        assert!(symbols.contains("x#1"));
        assert_eq!(strip_indices(&instantiated), pred);
    }

    #[test]
    fn padding_links_lagging_indices() {
        let env = SmtEnv::new();
        let low = SsaMap::new();
        let mut high = SsaMap::new();
        high.advance(x());
        high.advance(x());

        // x#0 = 7, padded to x#2, must entail x#2 = 7.
        let formula = indexed(x(), 0)._eq(&BV::from_i64(7, WORD_BITS));
        let padded = pad(&formula, &low, &high);
        let claim = indexed(x(), 2)._eq(&BV::from_i64(7, WORD_BITS));
        assert!(env.implies(&padded, &claim).unwrap());
    }

    #[test]
    fn atoms_see_through_connectives() {
        let a = unindexed(x()).bvsgt(&BV::from_i64(0, WORD_BITS));
        let b = unindexed(x())._eq(&BV::from_i64(20, WORD_BITS));
        let formula = Bool::and(&[a.clone(), b.clone().not()]);
        let found = atoms(&formula);
        assert_eq!(found.len(), 2);
        assert!(found.contains(&a));
        assert!(found.contains(&b));
    }

    #[test]
    fn join_max_is_pointwise() {
        let mut a = SsaMap::new();
        let mut b = SsaMap::new();
        a.advance(x());
        a.advance(x());
        b.advance(x());
        b.advance(VarName::new("y"));
        let joined = a.join_max(&b);
        assert_eq!(joined.index_of(x()), 2);
        assert_eq!(joined.index_of(VarName::new("y")), 1);
    }
}
