use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::state::AbstractState;
use crate::error::AnalysisError;
use magpie_cfa::{BinOp, Cfa, EdgeId, Expr, Instruction, UnaryOp, VarName};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Flat lattice over machine integers: a known constant or Top.
/// Unbound variables are Top; states only store concrete bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Concrete(i64),
    Top,
}

use Value::{Concrete, Top};

impl Value {
    pub fn is_top(&self) -> bool {
        matches!(self, Top)
    }

    pub fn value(&self) -> Option<i64> {
        match self {
            Concrete(v) => Some(*v),
            Top => None,
        }
    }

    fn truthy(&self) -> Option<bool> {
        self.value().map(|v| v != 0)
    }

    fn from_bool(b: bool) -> Value {
        Concrete(b as i64)
    }

    fn lift(v: Option<i64>) -> Value {
        v.map(Concrete).unwrap_or(Top)
    }
}

// Python floor division: quotient rounded toward negative infinity.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let q = a.checked_div(b)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

// Python modulo: the result carries the sign of the divisor.
fn py_mod(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let r = a.checked_rem(b)?;
    if r != 0 && (r < 0) != (b < 0) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn pow_value(base: Value, exp: Value) -> Value {
    // Absorbing cases apply even against Top.
    match exp {
        Concrete(0) => return Concrete(1),
        Concrete(e) if e < 0 => return Top,
        _ => {}
    }
    match base {
        Concrete(0) if !matches!(exp, Top) => return Concrete(0),
        Concrete(1) => return Concrete(1),
        _ => {}
    }
    match (base, exp) {
        (Concrete(b), Concrete(e)) => {
            let exp32 = u32::try_from(e).ok();
            Value::lift(exp32.and_then(|e| b.checked_pow(e)))
        }
        _ => Top,
    }
}

fn shl_value(a: Value, amount: Value) -> Value {
    match (a, amount) {
        (_, Concrete(n)) if n < 0 => Top,
        (Concrete(0), _) => Concrete(0),
        (Concrete(v), Concrete(n)) => {
            let factor = u32::try_from(n)
                .ok()
                .and_then(|n| 2i64.checked_pow(n));
            Value::lift(factor.and_then(|f| v.checked_mul(f)))
        }
        _ => Top,
    }
}

fn shr_value(a: Value, amount: Value) -> Value {
    match (a, amount) {
        (_, Concrete(n)) if n < 0 => Top,
        (Concrete(v), Concrete(n)) => Concrete(v >> n.min(63)),
        _ => Top,
    }
}

fn binary_value(op: BinOp, left: Value, right: Value) -> Value {
    match op {
        BinOp::Mul => match (left, right) {
            // multiplication by zero absorbs Top
            (Concrete(0), _) | (_, Concrete(0)) => Concrete(0),
            (Concrete(a), Concrete(b)) => Value::lift(a.checked_mul(b)),
            _ => Top,
        },
        BinOp::BitAnd => match (left, right) {
            (Concrete(0), _) | (_, Concrete(0)) => Concrete(0),
            (Concrete(a), Concrete(b)) => Concrete(a & b),
            _ => Top,
        },
        BinOp::BitOr => match (left, right) {
            (Concrete(-1), _) | (_, Concrete(-1)) => Concrete(-1),
            (Concrete(a), Concrete(b)) => Concrete(a | b),
            _ => Top,
        },
        BinOp::Pow => pow_value(left, right),
        BinOp::Shl => shl_value(left, right),
        BinOp::Shr => shr_value(left, right),
        BinOp::And => match (left.truthy(), right.truthy()) {
            (Some(false), _) => Value::from_bool(false),
            (Some(true), Some(b)) => Value::from_bool(b),
            _ => Top,
        },
        BinOp::Or => match (left.truthy(), right.truthy()) {
            (Some(true), _) => Value::from_bool(true),
            (Some(false), Some(b)) => Value::from_bool(b),
            _ => Top,
        },
        _ => match (left, right) {
            (Concrete(a), Concrete(b)) => match op {
                BinOp::Add => Value::lift(a.checked_add(b)),
                BinOp::Sub => Value::lift(a.checked_sub(b)),
                BinOp::Div | BinOp::FloorDiv => Value::lift(floor_div(a, b)),
                BinOp::Mod => Value::lift(py_mod(a, b)),
                BinOp::BitXor => Concrete(a ^ b),
                BinOp::Eq => Value::from_bool(a == b),
                BinOp::Ne => Value::from_bool(a != b),
                BinOp::Lt => Value::from_bool(a < b),
                BinOp::Le => Value::from_bool(a <= b),
                BinOp::Gt => Value::from_bool(a > b),
                BinOp::Ge => Value::from_bool(a >= b),
                _ => unreachable!("operator {op:?} handled above"),
            },
            _ => Top,
        },
    }
}

fn unary_value(op: UnaryOp, operand: Value) -> Value {
    match (op, operand) {
        (UnaryOp::Not, Concrete(v)) => Value::from_bool(v == 0),
        (UnaryOp::Neg, Concrete(v)) => Value::lift(v.checked_neg()),
        (UnaryOp::Pos, v) => v,
        (UnaryOp::Invert, Concrete(v)) => Concrete(!v),
        (_, Top) => Top,
    }
}

/// Constant-propagation valuation. Absent variables are Top.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueState {
    pub valuation: BTreeMap<VarName, i64>,
}

impl ValueState {
    pub fn eval(&self, expr: &Expr) -> Value {
        match expr {
            Expr::Const(c) => Concrete(*c),
            Expr::Var(v) => Value::lift(self.valuation.get(v).copied()),
            Expr::Unary { op, operand } => unary_value(*op, self.eval(operand)),
            Expr::Binary { op, left, right } => {
                binary_value(*op, self.eval(left), self.eval(right))
            }
        }
    }

    fn bind(&self, var: VarName, value: Value) -> ValueState {
        let mut next = self.clone();
        match value {
            Concrete(v) => {
                next.valuation.insert(var, v);
            }
            Top => {
                next.valuation.remove(&var);
            }
        }
        next
    }

    /// Is this state covered by `other`? Everything `other` claims must
    /// hold here too; `other` may know strictly less.
    pub fn subsumed_by(&self, other: &ValueState) -> bool {
        other
            .valuation
            .iter()
            .all(|(var, value)| self.valuation.get(var) == Some(value))
    }

    /// Pointwise join: keep only the bindings both sides agree on.
    pub fn join(&self, other: &ValueState) -> ValueState {
        let valuation = self
            .valuation
            .iter()
            .filter(|(var, value)| other.valuation.get(*var) == Some(*value))
            .map(|(var, value)| (*var, *value))
            .collect();
        ValueState { valuation }
    }
}

impl Display for ValueState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (var, value)) in self.valuation.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{var}->{value}")?;
        }
        write!(f, "}}")
    }
}

pub struct ValueCpa {
    cfa: Arc<Cfa>,
    merge_join: bool,
}

impl ValueCpa {
    pub fn new(cfa: Arc<Cfa>) -> Self {
        Self {
            cfa,
            merge_join: false,
        }
    }

    pub fn with_merge_join(cfa: Arc<Cfa>) -> Self {
        Self {
            cfa,
            merge_join: true,
        }
    }

    fn unwrap_state(state: &AbstractState) -> &ValueState {
        match state {
            AbstractState::Value(s) => s,
            other => unreachable!("value analysis given {other:?}"),
        }
    }
}

impl ConfigurableProgramAnalysis for ValueCpa {
    fn initial_state(&self) -> AbstractState {
        AbstractState::Value(ValueState::default())
    }

    fn successors_for_edge(
        &self,
        state: &AbstractState,
        edge: EdgeId,
    ) -> Result<Vec<AbstractState>, AnalysisError> {
        let s = Self::unwrap_state(state);
        let successor = match self.cfa.edge(edge).instruction {
            Instruction::Statement { target, value } => s.bind(*target, s.eval(value)),
            Instruction::Assumption { condition, negated } => {
                let holds = match (s.eval(condition).truthy(), negated) {
                    (Some(b), false) => Some(b),
                    (Some(b), true) => Some(!b),
                    (None, _) => None,
                };
                if holds == Some(false) {
                    return Ok(vec![]);
                }
                s.clone()
            }
            Instruction::Call { params, args, .. } => {
                let valuation = params
                    .iter()
                    .zip(args.iter())
                    .filter_map(|(param, arg)| {
                        s.valuation.get(arg).map(|value| (*param, *value))
                    })
                    .collect();
                ValueState { valuation }
            }
            Instruction::Nondet { target } => s.bind(*target, Top),
            Instruction::Return { .. } | Instruction::ReachError | Instruction::Nop => s.clone(),
        };
        Ok(vec![AbstractState::Value(successor)])
    }

    fn merge(
        &self,
        state: &AbstractState,
        reached: &AbstractState,
    ) -> Result<AbstractState, AnalysisError> {
        if !self.merge_join {
            return Ok(reached.clone());
        }
        let s = Self::unwrap_state(state);
        let r = Self::unwrap_state(reached);
        let joined = s.join(r);
        if &joined == r {
            Ok(reached.clone())
        } else {
            Ok(AbstractState::Value(joined))
        }
    }

    fn stop(
        &self,
        state: &AbstractState,
        reached: &[AbstractState],
    ) -> Result<bool, AnalysisError> {
        let s = Self::unwrap_state(state);
        Ok(reached.iter().any(|r| s.subsumed_by(Self::unwrap_state(r))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state(bindings: &[(&str, i64)]) -> ValueState {
        ValueState {
            valuation: bindings
                .iter()
                .map(|(n, v)| (VarName::new(*n), *v))
                .collect(),
        }
    }

    #[test]
    fn arithmetic_follows_python_semantics() {
        let s = state(&[("a", -7), ("b", 2)]);
        let div = Expr::binary(BinOp::FloorDiv, Expr::var("a"), Expr::var("b"));
        assert_eq!(s.eval(&div), Concrete(-4));
        let rem = Expr::binary(BinOp::Mod, Expr::var("a"), Expr::var("b"));
        assert_eq!(s.eval(&rem), Concrete(1));
    }

    #[test]
    fn division_by_zero_is_top_not_a_crash() {
        let s = state(&[("a", 10), ("z", 0)]);
        let div = Expr::binary(BinOp::Div, Expr::var("a"), Expr::var("z"));
        assert_eq!(s.eval(&div), Top);
        let rem = Expr::binary(BinOp::Mod, Expr::var("a"), Expr::var("z"));
        assert_eq!(s.eval(&rem), Top);
    }

    #[test]
    fn absorbing_cases_beat_top() {
        let s = state(&[("zero", 0), ("one", 1), ("ones", -1)]);
        let unknown = Expr::var("u");
        let mul = Expr::binary(BinOp::Mul, Expr::var("zero"), unknown.clone());
        assert_eq!(s.eval(&mul), Concrete(0));
        let and = Expr::binary(BinOp::BitAnd, unknown.clone(), Expr::var("zero"));
        assert_eq!(s.eval(&and), Concrete(0));
        let or = Expr::binary(BinOp::BitOr, unknown.clone(), Expr::var("ones"));
        assert_eq!(s.eval(&or), Concrete(-1));
        let pow = Expr::binary(BinOp::Pow, unknown, Expr::Const(0));
        assert_eq!(s.eval(&pow), Concrete(1));
    }

    #[test]
    fn negative_shifts_are_top() {
        let s = state(&[("a", 8)]);
        let shl = Expr::binary(BinOp::Shl, Expr::var("a"), Expr::Const(-1));
        assert_eq!(s.eval(&shl), Top);
        let shr = Expr::binary(BinOp::Shr, Expr::var("a"), Expr::Const(2));
        assert_eq!(s.eval(&shr), Concrete(2));
    }

    #[test]
    fn overflow_goes_to_top() {
        let s = state(&[("big", i64::MAX)]);
        let add = Expr::binary(BinOp::Add, Expr::var("big"), Expr::Const(1));
        assert_eq!(s.eval(&add), Top);
    }

    #[test]
    fn subsumption_allows_forgetting_but_not_disagreement() {
        let precise = state(&[("x", 1), ("y", 2)]);
        let forgetful = state(&[("x", 1)]);
        let wrong = state(&[("x", 3)]);
        assert!(precise.subsumed_by(&forgetful));
        assert!(!precise.subsumed_by(&wrong));
        // reflexive
        assert!(precise.subsumed_by(&precise));
        // the unconstrained state covers everything and is covered by
        // nothing smaller
        let top = state(&[]);
        assert!(precise.subsumed_by(&top));
        assert!(!top.subsumed_by(&precise));
    }

    #[test]
    fn join_keeps_only_agreement() {
        let a = state(&[("x", 1), ("y", 2)]);
        let b = state(&[("x", 1), ("y", 3)]);
        assert_eq!(a.join(&b), state(&[("x", 1)]));
    }
}
