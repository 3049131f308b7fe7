//! Rule text: one-line rule specifications and rule decks.
//!
//! ```text
//! <Name> [Region e] [Inside e] [Outside e] <body> [Table [ l s ... ]]
//!        [Diagonal n] [SameNet n] [Enclosed n] [Opposite a b] [HoleWidth n]
//!        [Inhibit] ["description"]
//! ```
//!
//! A deck groups rule lines under `Layer <name>` headers and may define user
//! rules in `Define ... End` blocks. `#` starts a comment.

use std::fmt;

use opensilicon_core::Coord;
use winnow::combinator::{alt, preceded, repeat, terminated};
use winnow::prelude::*;
use winnow::token::{any, take_while};

use crate::error::ParseError;
use crate::layer_expr::LayerExpr;
use crate::registry::RuleSet;
use crate::rule::{Rule, RuleBody, RuleType, SpacingTable, UserCall};
use crate::user_rule::{DimRef, EdgeConjunct, Side, TestAction, UserRule, UserTest};
use crate::walker::OrientMask;

const MODIFIERS: [&str; 7] = [
    "Table",
    "Diagonal",
    "SameNet",
    "Enclosed",
    "Opposite",
    "HoleWidth",
    "Inhibit",
];

// -- Lexer --------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(String),
    Open,
    Close,
}

fn ws(input: &mut &str) -> ModalResult<()> {
    take_while(0.., |c: char| c.is_whitespace())
        .void()
        .parse_next(input)
}

fn quoted(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        match any.parse_next(input)? {
            '"' => return Ok(s),
            '\\' => s.push(match any.parse_next(input)? {
                'n' => '\n',
                'r' => '\r',
                c => c,
            }),
            c => s.push(c),
        }
    }
}

fn word<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| {
        !c.is_whitespace() && c != '"' && c != '[' && c != ']'
    })
    .parse_next(input)
}

fn token<'i>(input: &mut &'i str) -> ModalResult<Token<'i>> {
    alt((
        quoted.map(Token::Quoted),
        '['.value(Token::Open),
        ']'.value(Token::Close),
        word.map(Token::Word),
    ))
    .parse_next(input)
}

fn tokenize(line: &str) -> Result<Vec<Token<'_>>, ParseError> {
    let toks: Vec<Token<'_>> = terminated(repeat(0.., preceded(ws, token)), ws)
        .parse(line)
        .map_err(|e| ParseError::Syntax {
            line: 0,
            message: e.to_string(),
        })?;
    Ok(toks)
}

/// `line` with any `#` comment outside quotes removed.
fn strip_comment(line: &str) -> &str {
    let mut in_quote = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            '#' if !in_quote => return &line[..i],
            _ => {}
        }
    }
    line
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// -- Token cursor ---------------------------------------------------------------

struct Cursor<'t, 'a> {
    toks: &'t [Token<'a>],
    pos: usize,
    rule: String,
}

impl<'t, 'a> Cursor<'t, 'a> {
    fn peek(&self) -> Option<&'t Token<'a>> {
        self.toks.get(self.pos)
    }

    fn peek_word(&self) -> Option<&'a str> {
        match self.peek() {
            Some(Token::Word(w)) => Some(*w),
            _ => None,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn keyword(&mut self, kw: &str) -> bool {
        if self.peek_word().is_some_and(|w| w.eq_ignore_ascii_case(kw)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn missing(&self, expected: &'static str) -> ParseError {
        ParseError::Missing {
            rule: self.rule.clone(),
            expected,
        }
    }

    fn word(&mut self, expected: &'static str) -> Result<&'a str, ParseError> {
        let w = self.peek_word().ok_or_else(|| self.missing(expected))?;
        self.pos += 1;
        Ok(w)
    }

    fn number(&mut self, expected: &'static str) -> Result<Coord, ParseError> {
        let w = self.word(expected)?;
        w.parse::<Coord>()
            .map_err(|_| ParseError::BadNumber(w.to_string()))
    }

    fn peek_number(&self) -> bool {
        self.peek_word().is_some_and(|w| w.parse::<Coord>().is_ok())
    }

    fn expr(&mut self, expected: &'static str) -> Result<LayerExpr, ParseError> {
        LayerExpr::parse(self.word(expected)?)
    }

    fn expect(&mut self, tok: Token<'static>, expected: &'static str) -> Result<(), ParseError> {
        if self.peek() == Some(&tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.missing(expected))
        }
    }
}

// -- Rules ----------------------------------------------------------------------

/// Parse one rule line for `layer`.
pub fn parse_rule(layer: &str, line: &str) -> Result<Rule, ParseError> {
    let toks = tokenize(line)?;
    let mut cur = Cursor {
        toks: &toks,
        pos: 0,
        rule: String::new(),
    };
    let name = cur.word("rule name")?;
    let rule_type =
        RuleType::from_name(name).ok_or_else(|| ParseError::UnknownRuleType(name.to_string()))?;
    cur.rule = rule_type.name().to_string();
    let mut rule = Rule::new(rule_type, layer);

    loop {
        if cur.keyword("Region") {
            rule.region = Some(cur.expr("region expression")?);
        } else if cur.keyword("Inside") {
            rule.inside = Some(cur.expr("inside-edge expression")?);
        } else if cur.keyword("Outside") {
            rule.outside = Some(cur.expr("outside-edge expression")?);
        } else {
            break;
        }
    }

    match rule_type.body() {
        RuleBody::Empty => {}
        RuleBody::OptionalArea => {
            if cur.peek_number() {
                rule.dimension = cur.number("area")?;
            }
        }
        RuleBody::Target => rule.target = Some(cur.expr("target layer")?),
        RuleBody::Dimension => rule.dimension = cur.number("dimension")?,
        RuleBody::TargetDimension => {
            rule.target = Some(cur.expr("target layer")?);
            rule.dimension = cur.number("dimension")?;
        }
        RuleBody::UserCall => {
            let name = cur.word("user rule name")?.to_string();
            let mut args = Vec::new();
            while let Some(w) = cur.peek_word() {
                if MODIFIERS.iter().any(|m| m.eq_ignore_ascii_case(w)) {
                    break;
                }
                args.push(w.to_string());
                cur.pos += 1;
            }
            rule.user = Some(UserCall { name, args });
        }
    }

    while !cur.at_end() {
        if cur.keyword("Table") {
            cur.expect(Token::Open, "'[' after Table")?;
            let mut values = Vec::new();
            while cur.peek() != Some(&Token::Close) {
                values.push(cur.number("table value or ']'")?);
            }
            cur.pos += 1;
            rule.table = Some(SpacingTable::new(values));
        } else if cur.keyword("Diagonal") {
            rule.diagonal = cur.number("diagonal dimension")?;
        } else if cur.keyword("SameNet") {
            rule.same_net = cur.number("same-net dimension")?;
        } else if cur.keyword("Enclosed") {
            rule.enclosed = cur.number("enclosure dimension")?;
        } else if cur.keyword("Opposite") {
            let a = cur.number("opposite-side dimension")?;
            let b = cur.number("second opposite-side dimension")?;
            rule.opposite = Some((a, b));
        } else if cur.keyword("HoleWidth") {
            rule.hole_width = cur.number("hole width")?;
        } else if cur.keyword("Inhibit") {
            rule.inhibited = true;
        } else if let Some(Token::Quoted(desc)) = cur.peek() {
            rule.description = Some(desc.clone());
            cur.pos += 1;
            if !cur.at_end() {
                return Err(ParseError::Syntax {
                    line: 0,
                    message: format!("{}: description must come last", cur.rule),
                });
            }
        } else {
            let found = match cur.peek() {
                Some(Token::Word(w)) => w.to_string(),
                Some(Token::Open) => "[".to_string(),
                Some(Token::Close) => "]".to_string(),
                Some(Token::Quoted(q)) => q.clone(),
                None => String::new(),
            };
            return Err(ParseError::Syntax {
                line: 0,
                message: format!("{}: unexpected '{found}'", cur.rule),
            });
        }
    }
    Ok(rule)
}

/// Canonical single-line form of a rule (without its layer).
impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rule_type().name())?;
        if let Some(e) = &self.region {
            write!(f, " Region {e}")?;
        }
        if let Some(e) = &self.inside {
            write!(f, " Inside {e}")?;
        }
        if let Some(e) = &self.outside {
            write!(f, " Outside {e}")?;
        }
        match self.rule_type().body() {
            RuleBody::Empty => {}
            RuleBody::OptionalArea => {
                if self.dimension != 0 {
                    write!(f, " {}", self.dimension)?;
                }
            }
            RuleBody::Target => {
                if let Some(t) = &self.target {
                    write!(f, " {t}")?;
                }
            }
            RuleBody::Dimension => write!(f, " {}", self.dimension)?,
            RuleBody::TargetDimension => {
                if let Some(t) = &self.target {
                    write!(f, " {t}")?;
                }
                write!(f, " {}", self.dimension)?;
            }
            RuleBody::UserCall => {
                if let Some(call) = &self.user {
                    write!(f, " {}", call.name)?;
                    for a in &call.args {
                        write!(f, " {a}")?;
                    }
                }
            }
        }
        if let Some(table) = &self.table {
            f.write_str(" Table [")?;
            for v in table.values() {
                write!(f, " {v}")?;
            }
            f.write_str(" ]")?;
        }
        for (kw, v) in [
            ("Diagonal", self.diagonal),
            ("SameNet", self.same_net),
            ("Enclosed", self.enclosed),
        ] {
            if v != 0 {
                write!(f, " {kw} {v}")?;
            }
        }
        if let Some((a, b)) = self.opposite {
            write!(f, " Opposite {a} {b}")?;
        }
        if self.hole_width != 0 {
            write!(f, " HoleWidth {}", self.hole_width)?;
        }
        if self.inhibited {
            f.write_str(" Inhibit")?;
        }
        if let Some(desc) = &self.description {
            write!(f, " {}", quote(desc))?;
        }
        Ok(())
    }
}

// -- User rules -----------------------------------------------------------------

fn parse_define_header(line: &str) -> Result<UserRule, ParseError> {
    let toks = tokenize(line)?;
    let mut cur = Cursor {
        toks: &toks,
        pos: 0,
        rule: "Define".to_string(),
    };
    cur.word("Define")?;
    let name = cur.word("user rule name")?;
    let mut args = Vec::new();
    while !cur.at_end() {
        args.push(cur.word("argument name")?);
    }
    Ok(UserRule::new(name, &args))
}

fn parse_define_line(rule: &mut UserRule, line: &str) -> Result<(), ParseError> {
    let trimmed = line.trim();
    if let Some(rest) = strip_keyword(trimmed, "Fail") {
        rule.fail_text = rest.to_string();
        return Ok(());
    }
    let toks = tokenize(trimmed)?;
    let mut cur = Cursor {
        toks: &toks,
        pos: 0,
        rule: rule.name.clone(),
    };
    if cur.keyword("Edge") {
        let conjunct = if cur.keyword("Orient") {
            EdgeConjunct::Orient(OrientMask::parse(cur.word("orientation letters")?)?)
        } else if cur.keyword("Inside") {
            EdgeConjunct::Inside(cur.expr("inside expression")?)
        } else if cur.keyword("Outside") {
            EdgeConjunct::Outside(cur.expr("outside expression")?)
        } else if cur.keyword("MinLength") {
            EdgeConjunct::MinLength(DimRef::parse(cur.word("length")?))
        } else {
            return Err(cur.missing("Orient, Inside, Outside or MinLength"));
        };
        rule.edges.push(conjunct);
    } else if cur.keyword("Test") {
        let name = cur.word("test name")?;
        let side = if cur.keyword("Inside") {
            Side::Inside
        } else if cur.keyword("Outside") {
            Side::Outside
        } else {
            return Err(cur.missing("Inside or Outside"));
        };
        let expr = cur.expr("test expression")?;
        let dim = DimRef::parse(cur.word("test dimension")?);
        let action = cur.word("test action")?;
        let action = TestAction::from_name(action).ok_or_else(|| ParseError::Syntax {
            line: 0,
            message: format!("unknown test action '{action}'"),
        })?;
        rule.tests.push(UserTest {
            name: name.to_string(),
            side,
            expr,
            dimension: dim,
            action,
        });
    } else {
        return Err(cur.missing("Edge, Test, Fail or End"));
    }
    if !cur.at_end() {
        return Err(ParseError::Syntax {
            line: 0,
            message: format!("{}: trailing text", rule.name),
        });
    }
    Ok(())
}

fn strip_keyword<'a>(line: &'a str, kw: &str) -> Option<&'a str> {
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    head.eq_ignore_ascii_case(kw).then(|| rest.trim())
}

/// Print a user rule as a `Define ... End` block.
pub fn format_user_rule(rule: &UserRule) -> String {
    let mut out = format!("Define {}", rule.name);
    for a in &rule.args {
        out.push(' ');
        out.push_str(a);
    }
    out.push('\n');
    for e in &rule.edges {
        let line = match e {
            EdgeConjunct::Orient(mask) => format!("Orient {mask}"),
            EdgeConjunct::Inside(x) => format!("Inside {x}"),
            EdgeConjunct::Outside(x) => format!("Outside {x}"),
            EdgeConjunct::MinLength(d) => format!("MinLength {d}"),
        };
        out.push_str(&format!("  Edge {line}\n"));
    }
    for t in &rule.tests {
        out.push_str(&format!(
            "  Test {} {} {} {} {}\n",
            t.name,
            t.side.name(),
            t.expr,
            t.dimension,
            t.action.name()
        ));
    }
    out.push_str(&format!("  Fail {}\nEnd\n", rule.fail_text));
    out
}

// -- Decks ----------------------------------------------------------------------

/// Parse a rule deck. Re-specified rules replace earlier ones.
pub fn parse_deck(src: &str) -> Result<RuleSet, ParseError> {
    let mut set = RuleSet::new();
    let mut layer: Option<String> = None;
    let mut define: Option<(usize, UserRule)> = None;

    for (idx, raw) in src.lines().enumerate() {
        let lineno = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        if let Some((start, mut rule)) = define.take() {
            if line.eq_ignore_ascii_case("End") {
                set.define_user_rule(rule).map_err(|e| ParseError::Syntax {
                    line: start,
                    message: e.to_string(),
                })?;
            } else {
                parse_define_line(&mut rule, line).map_err(|e| e.at_line(lineno))?;
                define = Some((start, rule));
            }
            continue;
        }
        if strip_keyword(line, "Define").is_some() {
            define = Some((lineno, parse_define_header(line).map_err(|e| e.at_line(lineno))?));
        } else if let Some(name) = strip_keyword(line, "Layer") {
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(ParseError::Syntax {
                    line: lineno,
                    message: "expected a single layer name".to_string(),
                });
            }
            layer = Some(name.to_string());
        } else {
            let Some(layer) = layer.as_deref() else {
                return Err(ParseError::Syntax {
                    line: lineno,
                    message: "rule before any Layer header".to_string(),
                });
            };
            let rule = parse_rule(layer, line).map_err(|e| e.at_line(lineno))?;
            set.link_or_replace(rule);
        }
    }
    if let Some((start, _)) = define {
        return Err(ParseError::Syntax {
            line: start,
            message: "Define block without End".to_string(),
        });
    }
    log::info!(
        "parsed rule deck: {} rules on {} layers, {} user rules",
        set.len(),
        set.layers().count(),
        set.user_rules().len()
    );
    Ok(set)
}

/// Canonical deck text: user rule definitions, then rules grouped by layer.
pub fn format_deck(set: &RuleSet) -> String {
    let mut out = String::new();
    for user in set.user_rules().iter() {
        out.push_str(&format_user_rule(user));
    }
    for layer in set.layers() {
        out.push_str(&format!("Layer {layer}\n"));
        for (_, rule) in set.rules_for_layer(layer) {
            out.push_str(&format!("  {rule}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(line: &str) {
        let rule = parse_rule("M1", line).unwrap();
        assert_eq!(rule.to_string(), line, "round trip of '{line}'");
    }

    #[test]
    fn every_rule_type_round_trips() {
        for line in [
            "NoRule",
            "Connected",
            "Exist",
            "NoHoles",
            "NoHoles 400 HoleWidth 6",
            "Overlap M2",
            "IfOverlap M2&!M3",
            "NoOverlap POLY",
            "AnyOverlap VIA1|VIA2",
            "PartOverlap (A|B)&C",
            "AnyNoOverlap M2",
            "MinArea 400",
            "MaxArea 100000",
            "MinEdgeLength 5",
            "MinWidth 12 Diagonal 14",
            "MaxWidth 300",
            "MinSpace 12 Table [ 0 12 100 16 ] SameNet 10",
            "MinSpaceTo POLY 4",
            "MinSpaceFrom M2 3 Enclosed 5 Opposite 10 4",
            "MinOverlap M2 6",
            "MinNoOverlap M2 6",
            "UserDefined ext M2 15",
            "MinWidth Region CORE Inside M2 Outside !NWELL 10 Inhibit \"core width\"",
        ] {
            round_trip(line);
        }
    }

    #[test]
    fn parse_normalizes_whitespace_and_case() {
        let rule = parse_rule("M1", "  minspace   12   table [0 12 100 16]  ").unwrap();
        assert_eq!(rule.to_string(), "MinSpace 12 Table [ 0 12 100 16 ]");
    }

    #[test]
    fn description_escapes() {
        let rule = parse_rule("M1", r#"MinWidth 3 "say \"hi\" \\ now""#).unwrap();
        assert_eq!(rule.description.as_deref(), Some(r#"say "hi" \ now"#));
        round_trip(&rule.to_string());
    }

    #[test]
    fn description_newlines_stay_on_one_line() {
        let mut rule = parse_rule("M1", "MinWidth 3").unwrap();
        rule.description = Some("first\nsecond\r".to_string());
        let line = rule.to_string();
        assert!(!line.contains('\n'));
        assert_eq!(parse_rule("M1", &line).unwrap().description, rule.description);

        let mut set = crate::registry::RuleSet::new();
        set.link(rule);
        let deck = parse_deck(&format_deck(&set)).unwrap();
        let (_, back) = deck.rules_for_layer("M1").next().unwrap();
        assert_eq!(back.description.as_deref(), Some("first\nsecond\r"));
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            parse_rule("M1", "MinFoo 3"),
            Err(ParseError::UnknownRuleType(_))
        ));
        assert!(matches!(
            parse_rule("M1", "MinWidth"),
            Err(ParseError::Missing { .. })
        ));
        assert!(matches!(
            parse_rule("M1", "MinWidth abc"),
            Err(ParseError::BadNumber(_))
        ));
        assert!(parse_rule("M1", "MinWidth 3 Bogus 4").is_err());
        assert!(parse_rule("M1", "MinWidth 3 \"d\" Inhibit").is_err());
        assert!(parse_rule("M1", "MinSpace 3 Table [ 1 2").is_err());
        assert!(parse_rule("M1", "MinWidth 3 \"open").is_err());
    }

    #[test]
    fn odd_table_parses_but_fails_validation() {
        let rule = parse_rule("M1", "MinSpace 3 Table [ 0 3 100 ]").unwrap();
        assert!(rule.validate().is_err());
    }

    const DECK: &str = "\
# sample deck
Define ext L d
  Edge Orient LR
  Edge MinLength 4
  Test cov Outside L d Covered
  Fail not cov and length > 10
End
Layer M1
  MinWidth 10 \"m1 width\"  # trailing comment
  MinSpace 12
  UserDefined ext M2 15
Layer VIA1
  Overlap M1
";

    #[test]
    fn deck_round_trip() {
        let set = parse_deck(DECK).unwrap();
        assert_eq!(set.len(), 4);
        assert!(set.user_rule("ext").unwrap().fail().is_some());
        let printed = format_deck(&set);
        let again = parse_deck(&printed).unwrap();
        assert_eq!(format_deck(&again), printed);
        assert!(printed.contains("  MinWidth 10 \"m1 width\"\n"));
        assert!(printed.contains("  Edge Orient LR\n"));
    }

    #[test]
    fn deck_respecified_rule_replaces() {
        let set = parse_deck("Layer M1\nMinWidth 10\nMinWidth 11\n").unwrap();
        assert_eq!(set.len(), 1);
        let (_, rule) = set.rules_for_layer("M1").next().unwrap();
        assert_eq!(rule.dimension, 11);
    }

    #[test]
    fn deck_errors_carry_line_numbers() {
        assert_eq!(
            parse_deck("MinWidth 3\n").unwrap_err(),
            ParseError::Syntax {
                line: 1,
                message: "rule before any Layer header".into()
            }
        );
        match parse_deck("Layer M1\n\nMinWidth x\n").unwrap_err() {
            ParseError::Syntax { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_deck("Define r\n Fail true\n").is_err());
        assert!(parse_deck("Define r\n Fail nope\nEnd\n").is_err());
    }
}
