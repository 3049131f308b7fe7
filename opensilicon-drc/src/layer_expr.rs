//! Layer expressions: boolean combinations of layers resolved to shape sets.
//!
//! Grammar, from loosest to tightest binding:
//!
//! ```text
//! expr  := xor ('|' xor)*
//! xor   := and ('^' and)*
//! and   := unary (('&' | '-') unary)*
//! unary := '!' unary | '(' expr ')' | layer
//! ```

use std::collections::HashMap;
use std::fmt;

use opensilicon_core::{BBox, Kernel, KernelError, ShapeSet};
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, repeat, terminated};
use winnow::error::{StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

use crate::error::{EvalError, ParseError, SetupError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerExpr {
    Layer(String),
    Not(Box<LayerExpr>),
    And(Box<LayerExpr>, Box<LayerExpr>),
    AndNot(Box<LayerExpr>, Box<LayerExpr>),
    Xor(Box<LayerExpr>, Box<LayerExpr>),
    Or(Box<LayerExpr>, Box<LayerExpr>),
}

/// Supplier of per-layer material for expression resolution.
pub trait MaterialSource {
    /// Material of `layer` touching `window`; `None` when the layer is unknown.
    fn material(&self, layer: &str, window: &BBox) -> Result<Option<ShapeSet>, KernelError>;

    fn kernel(&self) -> &Kernel;
}

impl LayerExpr {
    pub fn parse(text: &str) -> Result<LayerExpr, ParseError> {
        terminated(expr, ws)
            .parse(text)
            .map_err(|e| ParseError::Expression {
                text: text.to_string(),
                message: e.to_string(),
            })
    }

    pub fn layer(name: &str) -> LayerExpr {
        LayerExpr::Layer(name.to_string())
    }

    /// Layer names referenced, in first-use order.
    pub fn layers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_layers(&mut out);
        out
    }

    fn collect_layers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            LayerExpr::Layer(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            LayerExpr::Not(a) => a.collect_layers(out),
            LayerExpr::And(a, b)
            | LayerExpr::AndNot(a, b)
            | LayerExpr::Xor(a, b)
            | LayerExpr::Or(a, b) => {
                a.collect_layers(out);
                b.collect_layers(out);
            }
        }
    }

    /// Replace layer names found in `bindings`.
    pub fn substitute(&self, bindings: &HashMap<String, String>) -> LayerExpr {
        let sub = |e: &LayerExpr| Box::new(e.substitute(bindings));
        match self {
            LayerExpr::Layer(name) => {
                LayerExpr::Layer(bindings.get(name).cloned().unwrap_or_else(|| name.clone()))
            }
            LayerExpr::Not(a) => LayerExpr::Not(sub(a)),
            LayerExpr::And(a, b) => LayerExpr::And(sub(a), sub(b)),
            LayerExpr::AndNot(a, b) => LayerExpr::AndNot(sub(a), sub(b)),
            LayerExpr::Xor(a, b) => LayerExpr::Xor(sub(a), sub(b)),
            LayerExpr::Or(a, b) => LayerExpr::Or(sub(a), sub(b)),
        }
    }

    /// Resolve to the material within reach of `window`. Negation is taken
    /// relative to `window`.
    pub fn resolve(&self, src: &dyn MaterialSource, window: &BBox) -> Result<ShapeSet, EvalError> {
        let kernel = src.kernel();
        let set = match self {
            LayerExpr::Layer(name) => src
                .material(name, window)?
                .ok_or_else(|| SetupError::UnresolvedLayer(name.clone()))?,
            LayerExpr::Not(a) => {
                let inner = a.resolve(src, window)?;
                kernel.subtract(&ShapeSet::from_bbox(window), &inner)?
            }
            LayerExpr::And(a, b) => {
                kernel.intersect(&a.resolve(src, window)?, &b.resolve(src, window)?)?
            }
            LayerExpr::AndNot(a, b) => {
                kernel.subtract(&a.resolve(src, window)?, &b.resolve(src, window)?)?
            }
            LayerExpr::Xor(a, b) => {
                let (a, b) = (a.resolve(src, window)?, b.resolve(src, window)?);
                let left = kernel.subtract(&a, &b)?;
                let right = kernel.subtract(&b, &a)?;
                kernel.union(&left, &right)?
            }
            LayerExpr::Or(a, b) => {
                kernel.union(&a.resolve(src, window)?, &b.resolve(src, window)?)?
            }
        };
        Ok(set)
    }

    fn precedence(&self) -> u8 {
        match self {
            LayerExpr::Or(..) => 1,
            LayerExpr::Xor(..) => 2,
            LayerExpr::And(..) | LayerExpr::AndNot(..) => 3,
            LayerExpr::Not(_) => 4,
            LayerExpr::Layer(_) => 5,
        }
    }
}

impl fmt::Display for LayerExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wrap = |f: &mut fmt::Formatter<'_>, e: &LayerExpr, paren: bool| {
            if paren {
                write!(f, "({e})")
            } else {
                write!(f, "{e}")
            }
        };
        let level = self.precedence();
        let (op, a, b) = match self {
            LayerExpr::Layer(name) => return f.write_str(name),
            LayerExpr::Not(a) => {
                f.write_str("!")?;
                return wrap(f, a, a.precedence() < level);
            }
            LayerExpr::And(a, b) => ('&', a, b),
            LayerExpr::AndNot(a, b) => ('-', a, b),
            LayerExpr::Xor(a, b) => ('^', a, b),
            LayerExpr::Or(a, b) => ('|', a, b),
        };
        wrap(f, a, a.precedence() < level)?;
        write!(f, "{op}")?;
        wrap(f, b, b.precedence() <= level)
    }
}

// -- Grammar ------------------------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    take_while(0.., |c: char| c == ' ' || c == '\t')
        .void()
        .parse_next(input)
}

pub(crate) fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1.., |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| {
            c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$'
        }),
    )
        .take()
        .parse_next(input)
}

fn atom(input: &mut &str) -> ModalResult<LayerExpr> {
    ws.parse_next(input)?;
    alt((
        delimited('(', expr, (ws, cut_err(')'))),
        ident.map(LayerExpr::layer),
    ))
    .context(StrContext::Expected(StrContextValue::Description("layer")))
    .parse_next(input)
}

fn unary(input: &mut &str) -> ModalResult<LayerExpr> {
    ws.parse_next(input)?;
    if opt('!').parse_next(input)?.is_some() {
        let inner = cut_err(unary).parse_next(input)?;
        Ok(LayerExpr::Not(Box::new(inner)))
    } else {
        atom(input)
    }
}

fn and_level(input: &mut &str) -> ModalResult<LayerExpr> {
    let first = unary(input)?;
    let rest: Vec<(char, LayerExpr)> =
        repeat(0.., (preceded(ws, one_of(['&', '-'])), cut_err(unary))).parse_next(input)?;
    Ok(rest.into_iter().fold(first, |acc, (op, r)| match op {
        '&' => LayerExpr::And(Box::new(acc), Box::new(r)),
        _ => LayerExpr::AndNot(Box::new(acc), Box::new(r)),
    }))
}

fn xor_level(input: &mut &str) -> ModalResult<LayerExpr> {
    let first = and_level(input)?;
    let rest: Vec<LayerExpr> =
        repeat(0.., preceded((ws, '^'), cut_err(and_level))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| LayerExpr::Xor(Box::new(acc), Box::new(r))))
}

fn expr(input: &mut &str) -> ModalResult<LayerExpr> {
    let first = xor_level(input)?;
    let rest: Vec<LayerExpr> =
        repeat(0.., preceded((ws, '|'), cut_err(xor_level))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| LayerExpr::Or(Box::new(acc), Box::new(r))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opensilicon_core::kernel::Piece;

    struct Fixed {
        kernel: Kernel,
        layers: HashMap<&'static str, BBox>,
    }

    impl MaterialSource for Fixed {
        fn material(&self, layer: &str, _: &BBox) -> Result<Option<ShapeSet>, KernelError> {
            Ok(self.layers.get(layer).map(ShapeSet::from_bbox))
        }

        fn kernel(&self) -> &Kernel {
            &self.kernel
        }
    }

    fn area(s: &ShapeSet) -> f64 {
        s.pieces().iter().map(Piece::area).sum()
    }

    #[test]
    fn parse_precedence() {
        let e = LayerExpr::parse("A|B&C").unwrap();
        assert!(matches!(e, LayerExpr::Or(_, _)));
        let e = LayerExpr::parse("A-B-C").unwrap();
        match e {
            LayerExpr::AndNot(left, right) => {
                assert!(matches!(*left, LayerExpr::AndNot(_, _)));
                assert_eq!(*right, LayerExpr::layer("C"));
            }
            other => panic!("expected AndNot, got {other:?}"),
        }
        let e = LayerExpr::parse("!A&B").unwrap();
        assert!(matches!(e, LayerExpr::And(_, _)));
    }

    #[test]
    fn print_uses_minimal_parentheses() {
        for text in ["A|B&C", "(A|B)&C", "A-(B-C)", "!(A|B)", "A^B^C", "M1.drawn&!NWELL$"] {
            assert_eq!(LayerExpr::parse(text).unwrap().to_string(), text);
        }
        assert_eq!(LayerExpr::parse(" ( A ) & B ").unwrap().to_string(), "A&B");
    }

    #[test]
    fn parse_errors() {
        assert!(LayerExpr::parse("").is_err());
        assert!(LayerExpr::parse("A&").is_err());
        assert!(LayerExpr::parse("(A|B").is_err());
        assert!(LayerExpr::parse("1M").is_err());
    }

    #[test]
    fn substitute_and_layers() {
        let e = LayerExpr::parse("X&!Y|X").unwrap();
        assert_eq!(e.layers(), vec!["X", "Y"]);
        let bindings = HashMap::from([("X".to_string(), "M1".to_string())]);
        assert_eq!(e.substitute(&bindings).to_string(), "M1&!Y|M1");
    }

    #[test]
    fn resolve_booleans() {
        let src = Fixed {
            kernel: Kernel::default(),
            layers: HashMap::from([
                ("A", BBox::from_coords(0, 0, 10, 10)),
                ("B", BBox::from_coords(5, 0, 15, 10)),
            ]),
        };
        let window = BBox::from_coords(-5, -5, 20, 15);
        let and = LayerExpr::parse("A&B").unwrap().resolve(&src, &window).unwrap();
        assert!((area(&and) - 50.0).abs() < 1e-6);
        let xor = LayerExpr::parse("A^B").unwrap().resolve(&src, &window).unwrap();
        assert!((area(&xor) - 100.0).abs() < 1e-6);
        let not = LayerExpr::parse("!A").unwrap().resolve(&src, &window).unwrap();
        assert!((area(&not) - (25.0 * 20.0 - 100.0)).abs() < 1e-6);
    }

    #[test]
    fn resolve_unknown_layer_is_setup_error() {
        let src = Fixed {
            kernel: Kernel::default(),
            layers: HashMap::new(),
        };
        let err = LayerExpr::layer("POLY")
            .resolve(&src, &BBox::from_coords(0, 0, 1, 1))
            .unwrap_err();
        assert_eq!(err, EvalError::Setup(SetupError::UnresolvedLayer("POLY".into())));
    }
}
