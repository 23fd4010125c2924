//! Translation of normalized instructions and expressions into
//! SSA-indexed bitvector formulas.

use crate::smt::ssa::{self, SsaMap};
use crate::smt::{WORD_BITS, conjoin};
use magpie_cfa::{BinOp, Expr, Instruction, UnaryOp};
use z3::ast::{Ast, BV, Bool};

fn constant(value: i64) -> BV {
    BV::from_i64(value, WORD_BITS)
}

fn bool_to_bv(value: &Bool) -> BV {
    value.ite(&constant(1), &constant(0))
}

fn bv_to_bool(value: &BV) -> Bool {
    value._eq(&constant(0)).not()
}

/// Evaluate an expression to a bitvector term, reading variables at
/// their current SSA index.
pub fn bv_expr(expr: &Expr, ssa: &SsaMap) -> BV {
    match expr {
        Expr::Const(c) => constant(*c),
        Expr::Var(v) => ssa::current(*v, ssa),
        Expr::Unary { op, operand } => match op {
            UnaryOp::Neg => bv_expr(operand, ssa).bvneg(),
            UnaryOp::Pos => bv_expr(operand, ssa),
            UnaryOp::Invert => bv_expr(operand, ssa).bvnot(),
            UnaryOp::Not => bool_to_bv(&bool_expr(expr, ssa)),
        },
        Expr::Binary { op, left, right } => {
            if op.is_boolean() {
                return bool_to_bv(&bool_expr(expr, ssa));
            }
            let l = bv_expr(left, ssa);
            let r = bv_expr(right, ssa);
            match op {
                BinOp::Add => l.bvadd(&r),
                BinOp::Sub => l.bvsub(&r),
                BinOp::Mul => l.bvmul(&r),
                BinOp::Div | BinOp::FloorDiv => l.bvsdiv(&r),
                BinOp::Mod => l.bvurem(&r),
                BinOp::Pow => pow_expr(&l, right),
                BinOp::Shl => l.bvshl(&r),
                BinOp::Shr => l.bvashr(&r),
                BinOp::BitAnd => l.bvand(&r),
                BinOp::BitOr => l.bvor(&r),
                BinOp::BitXor => l.bvxor(&r),
                _ => unreachable!("boolean operator in numeric position"),
            }
        }
    }
}

// Bitvectors have no power operator; constant exponents unroll to
// multiplication, anything else becomes an unconstrained value.
fn pow_expr(base: &BV, exponent: &Expr) -> BV {
    match exponent {
        Expr::Const(n) if (0..=WORD_BITS as i64).contains(n) => {
            let mut result = constant(1);
            for _ in 0..*n {
                result = result.bvmul(base);
            }
            result
        }
        _ => BV::fresh_const("pow", WORD_BITS),
    }
}

/// Evaluate an expression to a truth value.
pub fn bool_expr(expr: &Expr, ssa: &SsaMap) -> Bool {
    match expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
        } => bool_expr(operand, ssa).not(),
        Expr::Binary { op, left, right } => match op {
            BinOp::And => Bool::and(&[bool_expr(left, ssa), bool_expr(right, ssa)]),
            BinOp::Or => Bool::or(&[bool_expr(left, ssa), bool_expr(right, ssa)]),
            BinOp::Eq => bv_expr(left, ssa)._eq(&bv_expr(right, ssa)),
            BinOp::Ne => bv_expr(left, ssa)._eq(&bv_expr(right, ssa)).not(),
            BinOp::Lt => bv_expr(left, ssa).bvslt(&bv_expr(right, ssa)),
            BinOp::Le => bv_expr(left, ssa).bvsle(&bv_expr(right, ssa)),
            BinOp::Gt => bv_expr(left, ssa).bvsgt(&bv_expr(right, ssa)),
            BinOp::Ge => bv_expr(left, ssa).bvsge(&bv_expr(right, ssa)),
            _ => bv_to_bool(&bv_expr(expr, ssa)),
        },
        _ => bv_to_bool(&bv_expr(expr, ssa)),
    }
}

/// The SSA transition formula of one instruction, advancing `ssa` for
/// every assigned variable.
///
/// Assignments constrain the target's next index; assumptions constrain
/// current values; calls bind formal parameters to their arguments;
/// nondet advances its target without constraining it (havoc). Returns
/// and no-ops contribute nothing.
pub fn instruction_formula(instruction: &Instruction, ssa: &mut SsaMap) -> Bool {
    match instruction {
        Instruction::Statement { target, value } => {
            let rhs = bv_expr(value, ssa);
            let index = ssa.advance(*target);
            ssa::indexed(*target, index)._eq(&rhs)
        }
        Instruction::Assumption { condition, negated } => {
            let cond = bool_expr(condition, ssa);
            if *negated { cond.not() } else { cond }
        }
        Instruction::Call { params, args, .. } => {
            let bindings: Vec<Bool> = params
                .iter()
                .zip(args.iter())
                .map(|(param, arg)| {
                    let actual = ssa::current(*arg, ssa);
                    let index = ssa.advance(*param);
                    ssa::indexed(*param, index)._eq(&actual)
                })
                .collect();
            conjoin(&bindings)
        }
        Instruction::Nondet { target } => {
            ssa.advance(*target);
            Bool::from_bool(true)
        }
        Instruction::Return { .. } | Instruction::ReachError | Instruction::Nop => {
            Bool::from_bool(true)
        }
    }
}

/// The unindexed boolean rendering of an instruction, used to seed the
/// initial precision. Only statements and assumptions contribute.
pub fn seed_predicate(instruction: &Instruction) -> Option<Bool> {
    match instruction {
        Instruction::Statement { .. } | Instruction::Assumption { .. } => {
            let mut scratch = SsaMap::new();
            let formula = instruction_formula(instruction, &mut scratch);
            Some(ssa::strip_indices(&formula))
        }
        _ => None,
    }
}
