//! User-defined rules: edge selection, named sub-tests and a fail predicate.

use std::collections::HashMap;
use std::fmt;

use opensilicon_core::Coord;
use winnow::ascii::dec_int;
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, repeat, terminated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::stream::Stream;
use winnow::token::take_while;

use crate::error::{ParseError, SetupError};
use crate::layer_expr::{ident, LayerExpr};
use crate::walker::OrientMask;

/// Builtin numeric variables available to fail predicates.
pub const BUILTINS: [&str; 2] = ["length", "index"];

/// A dimension given literally or by argument name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimRef {
    Value(Coord),
    Arg(String),
}

impl DimRef {
    pub fn parse(text: &str) -> DimRef {
        match text.parse::<Coord>() {
            Ok(v) => DimRef::Value(v),
            Err(_) => DimRef::Arg(text.to_string()),
        }
    }
}

impl fmt::Display for DimRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimRef::Value(v) => write!(f, "{v}"),
            DimRef::Arg(a) => f.write_str(a),
        }
    }
}

/// Conditions an edge must meet to be evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeConjunct {
    Orient(OrientMask),
    Inside(LayerExpr),
    Outside(LayerExpr),
    MinLength(DimRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Inside,
    Outside,
}

impl Side {
    pub fn name(self) -> &'static str {
        match self {
            Side::Inside => "Inside",
            Side::Outside => "Outside",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestAction {
    /// The test strip is entirely covered by the expression.
    Covered,
    /// The test strip has no expression material.
    Clear,
    /// The test strip has some expression material.
    Touches,
}

impl TestAction {
    pub fn name(self) -> &'static str {
        match self {
            TestAction::Covered => "Covered",
            TestAction::Clear => "Clear",
            TestAction::Touches => "Touches",
        }
    }

    pub fn from_name(s: &str) -> Option<TestAction> {
        [TestAction::Covered, TestAction::Clear, TestAction::Touches]
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserTest {
    pub name: String,
    pub side: Side,
    pub expr: LayerExpr,
    pub dimension: DimRef,
    pub action: TestAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }

    fn apply(self, a: i64, b: i64) -> bool {
        match self {
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
        }
    }
}

/// Compiled fail predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum FailExpr {
    Const(bool),
    Test(String),
    Compare { var: String, op: CompareOp, value: i64 },
    Not(Box<FailExpr>),
    And(Box<FailExpr>, Box<FailExpr>),
    Or(Box<FailExpr>, Box<FailExpr>),
}

/// Values visible to a fail predicate for one edge.
#[derive(Debug, Default)]
pub struct FailEnv<'a> {
    pub tests: HashMap<&'a str, bool>,
    pub vars: HashMap<&'a str, i64>,
}

impl FailExpr {
    pub fn parse(text: &str) -> Result<FailExpr, ParseError> {
        terminated(or_expr, ws)
            .parse(text)
            .map_err(|e| ParseError::Expression {
                text: text.to_string(),
                message: e.to_string(),
            })
    }

    pub fn eval(&self, env: &FailEnv<'_>) -> bool {
        match self {
            FailExpr::Const(b) => *b,
            FailExpr::Test(name) => env.tests.get(name.as_str()).copied().unwrap_or(false),
            FailExpr::Compare { var, op, value } => {
                let lhs = env.vars.get(var.as_str()).copied().unwrap_or(0);
                op.apply(lhs, *value)
            }
            FailExpr::Not(a) => !a.eval(env),
            FailExpr::And(a, b) => a.eval(env) && b.eval(env),
            FailExpr::Or(a, b) => a.eval(env) || b.eval(env),
        }
    }

    fn visit_names<'a>(&'a self, tests: &mut Vec<&'a str>, vars: &mut Vec<&'a str>) {
        match self {
            FailExpr::Const(_) => {}
            FailExpr::Test(name) => tests.push(name),
            FailExpr::Compare { var, .. } => vars.push(var),
            FailExpr::Not(a) => a.visit_names(tests, vars),
            FailExpr::And(a, b) | FailExpr::Or(a, b) => {
                a.visit_names(tests, vars);
                b.visit_names(tests, vars);
            }
        }
    }
}

/// Argument values bound for one use of a user rule.
#[derive(Debug, Clone, Default)]
pub struct Binding {
    pub layers: HashMap<String, String>,
    pub numbers: HashMap<String, i64>,
}

impl Binding {
    pub fn dimension(&self, rule: &str, dim: &DimRef) -> Result<Coord, SetupError> {
        match dim {
            DimRef::Value(v) => Ok(*v),
            DimRef::Arg(name) => self.numbers.get(name).copied().ok_or_else(|| {
                SetupError::UserRule {
                    name: rule.to_string(),
                    message: format!("argument '{name}' is not a number"),
                }
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRule {
    pub name: String,
    pub args: Vec<String>,
    pub edges: Vec<EdgeConjunct>,
    pub tests: Vec<UserTest>,
    pub fail_text: String,
    fail: Option<FailExpr>,
}

impl UserRule {
    pub fn new(name: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            edges: Vec::new(),
            tests: Vec::new(),
            fail_text: String::new(),
            fail: None,
        }
    }

    pub fn with_edge(mut self, edge: EdgeConjunct) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_test(
        mut self,
        name: &str,
        side: Side,
        expr: LayerExpr,
        dimension: DimRef,
        action: TestAction,
    ) -> Self {
        self.tests.push(UserTest {
            name: name.to_string(),
            side,
            expr,
            dimension,
            action,
        });
        self
    }

    pub fn with_fail(mut self, text: &str) -> Self {
        self.fail_text = text.trim().to_string();
        self.fail = None;
        self
    }

    /// The compiled predicate; `None` until [`UserRule::compile`] succeeds.
    pub fn fail(&self) -> Option<&FailExpr> {
        self.fail.as_ref()
    }

    /// Parse the fail predicate and check every name it uses.
    pub fn compile(&mut self) -> Result<(), SetupError> {
        let err = |message: String| SetupError::UserRule {
            name: self.name.clone(),
            message,
        };
        let expr = FailExpr::parse(&self.fail_text).map_err(|e| err(e.to_string()))?;
        let (mut tests, mut vars) = (Vec::new(), Vec::new());
        expr.visit_names(&mut tests, &mut vars);
        if let Some(t) = tests.iter().find(|t| !self.tests.iter().any(|u| u.name == **t)) {
            return Err(err(format!("unknown test '{t}'")));
        }
        if let Some(v) = vars
            .iter()
            .find(|v| !BUILTINS.contains(*v) && !self.args.iter().any(|a| a.as_str() == **v))
        {
            return Err(err(format!("unknown variable '{v}'")));
        }
        let mut seen: Vec<&str> = Vec::new();
        for t in &self.tests {
            if seen.contains(&t.name.as_str()) {
                return Err(err(format!("duplicate test '{}'", t.name)));
            }
            seen.push(&t.name);
        }
        self.fail = Some(expr);
        Ok(())
    }

    pub fn bind(&self, values: &[String]) -> Result<Binding, SetupError> {
        if values.len() != self.args.len() {
            return Err(SetupError::UserRuleArity {
                name: self.name.clone(),
                expected: self.args.len(),
                got: values.len(),
            });
        }
        let mut binding = Binding::default();
        for (arg, value) in self.args.iter().zip(values) {
            binding.layers.insert(arg.clone(), value.clone());
            if let Ok(n) = value.parse::<i64>() {
                binding.numbers.insert(arg.clone(), n);
            }
        }
        Ok(binding)
    }
}

/// Process-wide table of user rules, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct UserRuleTable {
    rules: Vec<UserRule>,
}

impl UserRuleTable {
    /// Compile and add a rule, replacing one of the same name.
    pub fn define(&mut self, mut rule: UserRule) -> Result<(), SetupError> {
        rule.compile()?;
        match self.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&UserRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn remove(&mut self, name: &str) -> Option<UserRule> {
        let pos = self.rules.iter().position(|r| r.name == name)?;
        Some(self.rules.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// -- Fail predicate grammar (loosest first: or, and, not, primary) -----------

fn ws(input: &mut &str) -> ModalResult<()> {
    take_while(0.., |c: char| c.is_ascii_whitespace())
        .void()
        .parse_next(input)
}

/// A whole word matching `word`, case-insensitively.
fn keyword<'i>(word: &'static str) -> impl Parser<&'i str, (), ErrMode<ContextError>> {
    move |input: &mut &'i str| {
        let checkpoint = input.checkpoint();
        let w = ident.parse_next(input)?;
        if w.eq_ignore_ascii_case(word) {
            Ok(())
        } else {
            input.reset(&checkpoint);
            Err(ErrMode::Backtrack(ContextError::new()))
        }
    }
}

fn compare_op(input: &mut &str) -> ModalResult<CompareOp> {
    ws.parse_next(input)?;
    alt((
        "<=".value(CompareOp::Le),
        ">=".value(CompareOp::Ge),
        "==".value(CompareOp::Eq),
        "!=".value(CompareOp::Ne),
        "<".value(CompareOp::Lt),
        ">".value(CompareOp::Gt),
    ))
    .parse_next(input)
}

fn name_or_compare(input: &mut &str) -> ModalResult<FailExpr> {
    let name = ident.parse_next(input)?;
    if let Some(op) = opt(compare_op).parse_next(input)? {
        let value = preceded(ws, cut_err(dec_int::<_, i64, _>))
            .context(StrContext::Expected(StrContextValue::Description("integer")))
            .parse_next(input)?;
        Ok(FailExpr::Compare {
            var: name.to_string(),
            op,
            value,
        })
    } else {
        Ok(FailExpr::Test(name.to_string()))
    }
}

fn primary(input: &mut &str) -> ModalResult<FailExpr> {
    ws.parse_next(input)?;
    alt((
        delimited('(', or_expr, (ws, cut_err(')'))),
        keyword("true").value(FailExpr::Const(true)),
        keyword("false").value(FailExpr::Const(false)),
        name_or_compare,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "predicate",
    )))
    .parse_next(input)
}

fn not_expr(input: &mut &str) -> ModalResult<FailExpr> {
    ws.parse_next(input)?;
    let negated = opt(alt((keyword("not"), "!".void()))).parse_next(input)?;
    if negated.is_some() {
        let inner = cut_err(not_expr).parse_next(input)?;
        Ok(FailExpr::Not(Box::new(inner)))
    } else {
        primary(input)
    }
}

fn and_expr(input: &mut &str) -> ModalResult<FailExpr> {
    let first = not_expr(input)?;
    let rest: Vec<FailExpr> = repeat(
        0..,
        preceded((ws, alt((keyword("and"), "&&".void()))), cut_err(not_expr)),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| FailExpr::And(Box::new(acc), Box::new(r))))
}

fn or_expr(input: &mut &str) -> ModalResult<FailExpr> {
    let first = and_expr(input)?;
    let rest: Vec<FailExpr> = repeat(
        0..,
        preceded((ws, alt((keyword("or"), "||".void()))), cut_err(and_expr)),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| FailExpr::Or(Box::new(acc), Box::new(r))))
}

impl fmt::Display for FailExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailExpr::Const(b) => write!(f, "{b}"),
            FailExpr::Test(name) => f.write_str(name),
            FailExpr::Compare { var, op, value } => write!(f, "{var} {} {value}", op.symbol()),
            FailExpr::Not(a) => write!(f, "not ({a})"),
            FailExpr::And(a, b) => write!(f, "({a}) and ({b})"),
            FailExpr::Or(a, b) => write!(f, "({a}) or ({b})"),
        }
    }
}
