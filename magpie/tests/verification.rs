//! End-to-end verification scenarios: programs built through the CFA
//! builder, run through the analysis configurations, checked against
//! their known verdicts.

use magpie::cegar::CegarDriver;
use magpie::cfa::{BinOp, Cfa, CfaBuilder, Expr, VarName};
use magpie::{AnalysisConfig, Task, Verdict};
use std::sync::Arc;

fn task(name: &str) -> Task {
    Task::new(name).with_max_iterations(50_000)
}

fn var(name: &str) -> VarName {
    VarName::new(name)
}

/// x = nondet(); if x < 10 { x = x + 1; assert x != 20 }
fn branch_increment() -> Arc<Cfa> {
    let mut b = CfaBuilder::new();
    let n0 = b.node();
    let n1 = b.node();
    let n2 = b.node();
    let n3 = b.node();
    let n4 = b.node();
    let end = b.node();
    let err = b.error_node();
    b.set_entry(n0);
    b.nondet(n0, n1, "x");
    let lt = Expr::binary(BinOp::Lt, Expr::var("x"), Expr::Const(10));
    b.assume(n1, n2, lt.clone());
    b.assume_not(n1, end, lt);
    b.statement(
        n2,
        n3,
        "x",
        Expr::binary(BinOp::Add, Expr::var("x"), Expr::Const(1)),
    );
    let ne = Expr::binary(BinOp::Ne, Expr::var("x"), Expr::Const(20));
    b.assume_not(n3, n4, ne.clone());
    b.assume(n3, end, ne);
    b.reach_error(n4, err);
    Arc::new(b.build().unwrap())
}

/// y = nondet() in [-1, 1]; if y == 0 { reach_error() }
/// x = 10 // y; assert x == 10 or x == -10
fn divide_path_unsafe() -> Arc<Cfa> {
    let mut b = CfaBuilder::new();
    let n0 = b.node();
    let n1 = b.node();
    let n2 = b.node();
    let n3 = b.node();
    let n4 = b.node();
    let n5 = b.node();
    let n6 = b.node();
    let n7 = b.node();
    let end = b.node();
    let err = b.error_node();
    b.set_entry(n0);
    b.nondet(n0, n1, "y");
    b.assume(
        n1,
        n2,
        Expr::binary(BinOp::Ge, Expr::var("y"), Expr::Const(-1)),
    );
    b.assume(
        n2,
        n3,
        Expr::binary(BinOp::Le, Expr::var("y"), Expr::Const(1)),
    );
    let zero = Expr::binary(BinOp::Eq, Expr::var("y"), Expr::Const(0));
    b.assume(n3, n4, zero.clone());
    b.reach_error(n4, err);
    b.assume_not(n3, n5, zero);
    b.statement(
        n5,
        n6,
        "x",
        Expr::binary(BinOp::FloorDiv, Expr::Const(10), Expr::var("y")),
    );
    let ok = Expr::binary(
        BinOp::Or,
        Expr::binary(BinOp::Eq, Expr::var("x"), Expr::Const(10)),
        Expr::binary(BinOp::Eq, Expr::var("x"), Expr::Const(-10)),
    );
    b.assume_not(n6, n7, ok.clone());
    b.assume(n6, end, ok);
    b.reach_error(n7, err);
    Arc::new(b.build().unwrap())
}

/// n = 17; step = 0;
/// while n != 1 and step < 200 { if n % 2 == 0 { n = n // 2 } else { n = 3n + 1 }; step += 1 }
/// assert n == 1
fn bounded_collatz() -> Arc<Cfa> {
    let mut b = CfaBuilder::new();
    let n0 = b.node();
    let n1 = b.node();
    let head = b.node();
    let body = b.node();
    let even = b.node();
    let odd = b.node();
    let inc = b.node();
    let exit = b.node();
    let bad = b.node();
    let end = b.node();
    let err = b.error_node();
    b.set_entry(n0);
    b.statement(n0, n1, "n", Expr::Const(17));
    b.statement(n1, head, "step", Expr::Const(0));
    let guard = Expr::binary(
        BinOp::And,
        Expr::binary(BinOp::Ne, Expr::var("n"), Expr::Const(1)),
        Expr::binary(BinOp::Lt, Expr::var("step"), Expr::Const(200)),
    );
    b.assume(head, body, guard.clone());
    b.assume_not(head, exit, guard);
    let is_even = Expr::binary(
        BinOp::Eq,
        Expr::binary(BinOp::Mod, Expr::var("n"), Expr::Const(2)),
        Expr::Const(0),
    );
    b.assume(body, even, is_even.clone());
    b.assume_not(body, odd, is_even);
    b.statement(
        even,
        inc,
        "n",
        Expr::binary(BinOp::FloorDiv, Expr::var("n"), Expr::Const(2)),
    );
    b.statement(
        odd,
        inc,
        "n",
        Expr::binary(
            BinOp::Add,
            Expr::binary(BinOp::Mul, Expr::Const(3), Expr::var("n")),
            Expr::Const(1),
        ),
    );
    b.statement(
        inc,
        head,
        "step",
        Expr::binary(BinOp::Add, Expr::var("step"), Expr::Const(1)),
    );
    let done = Expr::binary(BinOp::Eq, Expr::var("n"), Expr::Const(1));
    b.assume_not(exit, bad, done.clone());
    b.assume(exit, end, done);
    b.reach_error(bad, err);
    Arc::new(b.build().unwrap())
}

/// x = 1; if x > 0 { y = 5 } else { y = 10 }
/// for i in 0..1 {}  -- a trivial loop between the branch and the check
/// if y == 10 { reach_error() }
fn branch_merge_loop() -> Arc<Cfa> {
    let mut b = CfaBuilder::new();
    let n0 = b.node();
    let n1 = b.node();
    let then_n = b.node();
    let else_n = b.node();
    let join = b.node();
    let head = b.node();
    let body = b.node();
    let after = b.node();
    let bad = b.node();
    let end = b.node();
    let err = b.error_node();
    b.set_entry(n0);
    b.statement(n0, n1, "x", Expr::Const(1));
    let pos = Expr::binary(BinOp::Gt, Expr::var("x"), Expr::Const(0));
    b.assume(n1, then_n, pos.clone());
    b.assume_not(n1, else_n, pos);
    b.statement(then_n, join, "y", Expr::Const(5));
    b.statement(else_n, join, "y", Expr::Const(10));
    b.statement(join, head, "i", Expr::Const(0));
    let more = Expr::binary(BinOp::Lt, Expr::var("i"), Expr::Const(1));
    b.assume(head, body, more.clone());
    b.assume_not(head, after, more);
    b.statement(
        body,
        head,
        "i",
        Expr::binary(BinOp::Add, Expr::var("i"), Expr::Const(1)),
    );
    let is_ten = Expr::binary(BinOp::Eq, Expr::var("y"), Expr::Const(10));
    b.assume(after, bad, is_ten.clone());
    b.assume_not(after, end, is_ten);
    b.reach_error(bad, err);
    Arc::new(b.build().unwrap())
}

/// tmp = 41; r = inc(tmp); assert r == 42   with inc(x) { __ret = x + 1 }
fn single_call() -> Arc<Cfa> {
    let mut b = CfaBuilder::new();
    let m0 = b.node();
    let m1 = b.node();
    let m2 = b.node();
    let m3 = b.node();
    let m4 = b.node();
    let end = b.node();
    let err = b.error_node();
    let f0 = b.function_node("inc");
    let f1 = b.function_node("inc");
    let f2 = b.function_node("inc");
    b.set_entry(m0);
    b.statement(m0, m1, "tmp", Expr::Const(41));
    b.call(m1, m2, f0, "inc", vec![var("x")], vec![var("tmp")], "r");
    b.statement(
        f0,
        f1,
        "__ret",
        Expr::binary(BinOp::Add, Expr::var("x"), Expr::Const(1)),
    );
    b.ret(f1, f2, "__ret");
    b.statement(m2, m3, "r", Expr::var("__ret"));
    let ok = Expr::binary(BinOp::Eq, Expr::var("r"), Expr::Const(42));
    b.assume_not(m3, m4, ok.clone());
    b.assume(m3, end, ok);
    b.reach_error(m4, err);
    Arc::new(b.build().unwrap())
}

/// The nested accumulator programs: two loops, calls to inc and
/// double_inc, and an assertion on the final sum. `bug` turns
/// double_inc(x) = x + 2 into x + 3 and the expected 36 into 48.
fn nested_accumulate(bug: bool) -> Arc<Cfa> {
    let mut b = CfaBuilder::new();
    // inc(x) { __ret = x + 1 }
    let inc0 = b.function_node("inc");
    let inc1 = b.function_node("inc");
    let inc2 = b.function_node("inc");
    b.statement(
        inc0,
        inc1,
        "__ret",
        Expr::binary(BinOp::Add, Expr::var("x"), Expr::Const(1)),
    );
    b.ret(inc1, inc2, "__ret");
    // double_inc(x) { __ret = x + 2 }   (buggy: + 3)
    let d0 = b.function_node("double_inc");
    let d1 = b.function_node("double_inc");
    let d2 = b.function_node("double_inc");
    b.statement(
        d0,
        d1,
        "__ret",
        Expr::binary(
            BinOp::Add,
            Expr::var("x"),
            Expr::Const(if bug { 3 } else { 2 }),
        ),
    );
    b.ret(d1, d2, "__ret");

    // main
    let m0 = b.node();
    let m1 = b.node();
    let m2 = b.node();
    let outer = b.node();
    let o1 = b.node();
    let o2 = b.node();
    let inner = b.node();
    let i1 = b.node();
    let i2 = b.node();
    let i3 = b.node();
    let i4 = b.node();
    let i5 = b.node();
    let o3 = b.node();
    let o4 = b.node();
    let o5 = b.node();
    let done = b.node();
    let check = b.node();
    let bad = b.node();
    let end = b.node();
    let err = b.error_node();
    b.set_entry(m0);
    b.statement(m0, m1, "n", Expr::Const(4));
    b.statement(m1, m2, "i", Expr::Const(0));
    b.statement(m2, outer, "total", Expr::Const(0));
    let outer_guard = Expr::binary(BinOp::Lt, Expr::var("i"), Expr::var("n"));
    b.assume(outer, o1, outer_guard.clone());
    b.assume_not(outer, done, outer_guard);
    b.statement(o1, o2, "j", Expr::Const(0));
    b.statement(o2, inner, "inner", Expr::Const(0));
    let inner_guard = Expr::binary(BinOp::Lt, Expr::var("j"), Expr::Const(3));
    b.assume(inner, i1, inner_guard.clone());
    b.assume_not(inner, o3, inner_guard);
    b.call(i1, i2, d0, "double_inc", vec![var("x")], vec![var("j")], "__ret");
    b.statement(
        i2,
        i3,
        "inner",
        Expr::binary(BinOp::Add, Expr::var("inner"), Expr::var("__ret")),
    );
    b.call(i3, i4, inc0, "inc", vec![var("x")], vec![var("j")], "__ret");
    b.statement(i4, i5, "j", Expr::var("__ret"));
    b.nop(i5, inner);
    b.statement(
        o3,
        o4,
        "total",
        Expr::binary(BinOp::Add, Expr::var("total"), Expr::var("inner")),
    );
    b.call(o4, o5, inc0, "inc", vec![var("x")], vec![var("i")], "__ret");
    b.statement(o5, outer, "i", Expr::var("__ret"));
    b.statement(done, check, "result", Expr::var("total"));
    let expected = if bug { 48 } else { 36 };
    let ok = Expr::binary(BinOp::Eq, Expr::var("result"), Expr::Const(expected));
    b.assume_not(check, bad, ok.clone());
    b.assume(check, end, ok);
    b.reach_error(bad, err);
    Arc::new(b.build().unwrap())
}

#[test]
fn cegar_proves_branch_increment_safe() {
    let cfa = branch_increment();
    let mut driver = CegarDriver::new(cfa, task("cegar_example").with_max_refinements(4), None);
    let result = driver.run().unwrap();
    assert_eq!(result.verdict, Verdict::True, "{result:?}");
    // refinement had to learn something about the incremented value
    assert!(driver.precision().local_count() > 0);
}

#[test]
fn cegar_finds_the_division_guard_bug() {
    let cfa = divide_path_unsafe();
    let result = AnalysisConfig::PredicateCegar
        .run(cfa, &task("divide_path_unsafe"))
        .unwrap();
    assert_eq!(result.verdict, Verdict::False, "{result:?}");
    let witness = result.witness.expect("FALSE carries a witness");
    assert_eq!(witness.path.last().map(String::as_str), Some("reach_error()"));
    // the concrete model picks the zero branch
    assert_eq!(witness.assignments.get("y#1"), Some(&0));
}

#[test]
fn value_analysis_proves_bounded_collatz() {
    let cfa = bounded_collatz();
    let result = AnalysisConfig::Value
        .run(cfa, &task("collatz_safe"))
        .unwrap();
    assert_eq!(result.verdict, Verdict::True, "{result:?}");
}

#[test]
fn cegar_keeps_branch_facts_across_a_trivial_loop() {
    let cfa = branch_merge_loop();
    let result = AnalysisConfig::PredicateCegar
        .run(cfa, &task("branch_merge"))
        .unwrap();
    assert_eq!(result.verdict, Verdict::True, "{result:?}");
}

#[test]
fn cegar_learns_a_call_summary() {
    let cfa = single_call();
    let mut driver = CegarDriver::new(cfa, task("single_call").with_max_refinements(6), None);
    let result = driver.run().unwrap();
    assert_eq!(result.verdict, Verdict::True, "{result:?}");
    assert!(driver.precision().local_count() > 0);
}

#[test]
fn value_analysis_flags_the_nested_off_by_one() {
    let cfa = nested_accumulate(true);
    let result = AnalysisConfig::Value
        .run(cfa, &task("nested_cegar_unsafe"))
        .unwrap();
    assert_eq!(result.verdict, Verdict::False, "{result:?}");
}

#[test]
#[ignore = "drives the refinement loop through both nested loops; takes minutes"]
fn cegar_settles_the_nested_accumulators() {
    let safe = AnalysisConfig::PredicateCegar
        .run(
            nested_accumulate(false),
            &task("nested_cegar_safe").with_max_refinements(64),
        )
        .unwrap();
    assert_eq!(safe.verdict, Verdict::True, "{safe:?}");

    let unsafe_ = AnalysisConfig::PredicateCegar
        .run(
            nested_accumulate(true),
            &task("nested_cegar_unsafe").with_max_refinements(64),
        )
        .unwrap();
    assert_eq!(unsafe_.verdict, Verdict::False, "{unsafe_:?}");
}

#[test]
fn abe_with_loop_head_blocks_proves_the_branch_program() {
    let cfa = branch_merge_loop();
    let result = AnalysisConfig::PredicateAbeLf
        .run(cfa, &task("branch_merge_abe"))
        .unwrap();
    assert_eq!(result.verdict, Verdict::True, "{result:?}");
}

#[test]
fn abe_with_branch_blocks_reaches_the_division_bug() {
    let cfa = divide_path_unsafe();
    let result = AnalysisConfig::PredicateAbeBf
        .run(cfa, &task("divide_path_abe"))
        .unwrap();
    assert_eq!(result.verdict, Verdict::False, "{result:?}");
}

#[test]
fn formula_analysis_proves_straight_line_code() {
    // x = 1; assert x == 1
    let mut b = CfaBuilder::new();
    let n0 = b.node();
    let n1 = b.node();
    let n2 = b.node();
    let end = b.node();
    let err = b.error_node();
    b.set_entry(n0);
    b.statement(n0, n1, "x", Expr::Const(1));
    let ok = Expr::binary(BinOp::Eq, Expr::var("x"), Expr::Const(1));
    b.assume_not(n1, n2, ok.clone());
    b.assume(n1, end, ok);
    b.reach_error(n2, err);
    let cfa = Arc::new(b.build().unwrap());

    let result = AnalysisConfig::Formula
        .run(cfa, &task("straight_line"))
        .unwrap();
    assert_eq!(result.verdict, Verdict::True, "{result:?}");
}

#[test]
fn an_error_entry_is_a_trivially_feasible_counterexample() {
    let mut b = CfaBuilder::new();
    let entry = b.error_node();
    b.set_entry(entry);
    let cfa = Arc::new(b.build().unwrap());
    let result = AnalysisConfig::PredicateCegar
        .run(cfa, &task("error_entry"))
        .unwrap();
    assert_eq!(result.verdict, Verdict::False, "{result:?}");
    assert!(result.witness.expect("witness").path.is_empty());
}

#[test]
fn nop_edges_are_idempotent() {
    use magpie::analysis::{
        AbePredicateCpa, BlockStrategy, ConfigurableProgramAnalysis, PredicateCpa,
        PredicatePrecision, ValueCpa,
    };
    use magpie::smt::SmtEnv;
    use std::rc::Rc;

    let mut b = CfaBuilder::new();
    let n0 = b.node();
    let n1 = b.node();
    let n2 = b.node();
    b.set_entry(n0);
    let e0 = b.nop(n0, n1);
    let e1 = b.nop(n1, n2);
    let cfa = Arc::new(b.build().unwrap());

    let analyses: Vec<Box<dyn ConfigurableProgramAnalysis>> = vec![
        Box::new(ValueCpa::new(cfa.clone())),
        Box::new(PredicateCpa::new(
            cfa.clone(),
            Rc::new(SmtEnv::new()),
            PredicatePrecision::from_cfa(&cfa),
        )),
        Box::new(AbePredicateCpa::new(
            cfa.clone(),
            Rc::new(SmtEnv::new()),
            PredicatePrecision::from_cfa(&cfa),
            BlockStrategy::Never,
        )),
    ];
    for cpa in analyses {
        let init = cpa.initial_state();
        let once = cpa.successors_for_edge(&init, e0).unwrap().remove(0);
        let twice = cpa.successors_for_edge(&once, e1).unwrap().remove(0);
        assert_eq!(once, twice);
    }
}

#[test]
fn rebuilding_the_stack_is_deterministic() {
    let cfa = branch_increment();
    let first = AnalysisConfig::Predicate
        .run(cfa.clone(), &task("determinism"))
        .unwrap();
    let second = AnalysisConfig::Predicate
        .run(cfa, &task("determinism"))
        .unwrap();
    assert_eq!(first.verdict, second.verdict);
    assert_eq!(first.status, second.status);
}

#[test]
fn reachability_analysis_ignores_data() {
    // reach_error guarded by an unsatisfiable branch: pure reachability
    // cannot see the contradiction and reports FALSE
    let mut b = CfaBuilder::new();
    let n0 = b.node();
    let n1 = b.node();
    let n2 = b.node();
    let end = b.node();
    let err = b.error_node();
    b.set_entry(n0);
    b.statement(n0, n1, "x", Expr::Const(1));
    let never = Expr::binary(BinOp::Eq, Expr::var("x"), Expr::Const(2));
    b.assume(n1, n2, never.clone());
    b.assume_not(n1, end, never);
    b.reach_error(n2, err);
    let cfa = Arc::new(b.build().unwrap());

    let reach = AnalysisConfig::Reachability
        .run(cfa.clone(), &task("reach"))
        .unwrap();
    assert_eq!(reach.verdict, Verdict::False);

    // the value analysis evaluates the guard and proves safety
    let value = AnalysisConfig::Value.run(cfa, &task("reach_value")).unwrap();
    assert_eq!(value.verdict, Verdict::True);
}
