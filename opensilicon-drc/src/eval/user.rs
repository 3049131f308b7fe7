use opensilicon_core::{Coord, ShapeSet};

use super::edge::test_region;
use super::{walk_edges, EdgeCase, EdgeScope, EdgeTest, EvalContext};
use crate::error::{EvalError, SetupError};
use crate::layout::FlatObject;
use crate::rule::{Rule, RuleId};
use crate::user_rule::{
    Binding, EdgeConjunct, FailEnv, FailExpr, Side, TestAction, UserRule, UserTest,
};
use crate::violation::{EdgeRef, ErrorCode, Violation};
use crate::walker::OrientMask;

struct BoundTest<'a> {
    test: &'a UserTest,
    depth: Coord,
    material: ShapeSet,
}

struct UserEdgeTest<'a> {
    ctx: &'a EvalContext<'a>,
    obj: &'a FlatObject,
    id: RuleId,
    rule: &'a Rule,
    user: &'a UserRule,
    fail: &'a FailExpr,
    binding: &'a Binding,
    tests: Vec<BoundTest<'a>>,
    orient: Option<OrientMask>,
    min_length: Coord,
}

impl UserEdgeTest<'_> {
    fn outcome(&self, case: &EdgeCase<'_>, span: (f64, f64), t: &BoundTest<'_>) -> Result<bool, EvalError> {
        let kernel = self.ctx.kernel();
        let Some(region) = test_region(case.edge, &case.frame, span, t.depth as f64, t.test.side) else {
            return Ok(t.test.action == TestAction::Clear);
        };
        let shape = ShapeSet::from_pieces(vec![region]);
        Ok(match t.test.action {
            TestAction::Covered => kernel.covers(&t.material, &shape)?,
            TestAction::Clear => !kernel.overlaps(&shape, &t.material),
            TestAction::Touches => kernel.overlaps(&shape, &t.material),
        })
    }
}

impl EdgeTest for UserEdgeTest<'_> {
    fn edge(&mut self, case: &EdgeCase<'_>) -> Result<Vec<Violation>, EvalError> {
        if self.orient.is_some_and(|m| !m.contains(case.edge.orientation)) {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for &span in &case.spans {
            let length = span.1 - span.0;
            if length < self.min_length as f64 - 1e-6 {
                continue;
            }
            let mut env = FailEnv::default();
            for t in &self.tests {
                env.tests.insert(t.test.name.as_str(), self.outcome(case, span, t)?);
            }
            for (name, value) in &self.binding.numbers {
                env.vars.insert(name.as_str(), *value);
            }
            env.vars.insert("length", length.round() as i64);
            env.vars.insert("index", case.edge.index as i64);
            if self.fail.eval(&env) {
                out.push(
                    Violation::new(
                        self.id,
                        self.rule.rule_type(),
                        self.obj.index,
                        case.frame.endpoints(span),
                        EdgeRef::Edge(case.edge.index),
                        ErrorCode::User,
                    )
                    .with_note(self.user.name.clone()),
                );
            }
        }
        Ok(out)
    }
}

/// Bind the rule's arguments, resolve every sub-test and run the fail
/// predicate on each selected edge span.
pub(super) fn user_defined(
    ctx: &EvalContext<'_>,
    obj: &FlatObject,
    id: RuleId,
    rule: &Rule,
    out: &mut Vec<Violation>,
) -> Result<(), EvalError> {
    let call = rule
        .user
        .as_ref()
        .ok_or_else(|| SetupError::UnknownUserRule(String::new()))?;
    let user = ctx
        .rules
        .user_rule(&call.name)
        .ok_or_else(|| SetupError::UnknownUserRule(call.name.clone()))?;
    let fail = user.fail().ok_or_else(|| SetupError::UserRule {
        name: user.name.clone(),
        message: "fail predicate is not compiled".to_string(),
    })?;
    let binding = user.bind(&call.args)?;

    let mut depths = Vec::with_capacity(user.tests.len());
    for t in &user.tests {
        depths.push(binding.dimension(&user.name, &t.dimension)?);
    }
    let reach = depths.iter().copied().max().unwrap_or(0).max(rule.reach());
    let window = obj.bbox.expand(reach + 1);

    let mut scope = EdgeScope::new(ctx, obj, rule, &window)?;
    let mut orient = None;
    let mut min_length = 0;
    for conjunct in &user.edges {
        match conjunct {
            EdgeConjunct::Orient(mask) => orient = Some(*mask),
            EdgeConjunct::Inside(e) => scope.require(
                Side::Inside,
                e.substitute(&binding.layers).resolve(ctx.layout, &window)?,
            ),
            EdgeConjunct::Outside(e) => scope.require(
                Side::Outside,
                e.substitute(&binding.layers).resolve(ctx.layout, &window)?,
            ),
            EdgeConjunct::MinLength(d) => {
                min_length = min_length.max(binding.dimension(&user.name, d)?)
            }
        }
    }

    let mut tests = Vec::with_capacity(user.tests.len());
    for (t, depth) in user.tests.iter().zip(depths) {
        let material = t.expr.substitute(&binding.layers).resolve(ctx.layout, &window)?;
        tests.push(BoundTest {
            test: t,
            depth,
            material,
        });
    }

    let mut test = UserEdgeTest {
        ctx,
        obj,
        id,
        rule,
        user,
        fail,
        binding: &binding,
        tests,
        orient,
        min_length,
    };
    walk_edges(ctx, obj, id, rule, &scope, &mut test, out)
}
