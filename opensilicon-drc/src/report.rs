//! Line-oriented violation log.
//!
//! ```text
//! # OpenSilicon DRC cell=top area=0,0,100,100 source="rules.deck"
//! V MinWidth M1 width edge:1 0,0;11,0;11,12;0,12 "MinWidth 12 on edge 1 (width)"
//! # end violations=1 objects=4 status=completed elapsed_ms=3
//! ```
//!
//! Every `V` line stands on its own and is read back by
//! [`parse_violation_line`].

use std::io::{self, Write};

use opensilicon_core::{BBox, Point};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::rule::RuleType;
use crate::violation::{EdgeRef, ErrorCode, ViolationReport};

pub const LOG_HEADER_PREFIX: &str = "# OpenSilicon DRC";
pub const LOG_FOOTER_PREFIX: &str = "# end";

/// What was checked, written at the top of a log.
#[derive(Debug, Clone, Default)]
pub struct LogHeader {
    pub cell: String,
    pub area: Option<BBox>,
    pub source: Option<String>,
}

impl LogHeader {
    pub fn new(cell: &str) -> Self {
        Self {
            cell: cell.to_string(),
            ..Self::default()
        }
    }

    pub fn line(&self) -> String {
        let mut s = format!("{LOG_HEADER_PREFIX} cell={}", self.cell);
        if let Some(a) = &self.area {
            s.push_str(&format!(" area={},{},{},{}", a.min.x, a.min.y, a.max.x, a.max.y));
        }
        if let Some(src) = &self.source {
            s.push_str(&format!(" source={}", quote(src)));
        }
        s
    }
}

/// Run summary written at the end of a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFooter {
    pub violations: usize,
    pub objects: usize,
    pub status: String,
    pub elapsed_ms: u128,
}

impl LogFooter {
    pub fn line(&self) -> String {
        format!(
            "{LOG_FOOTER_PREFIX} violations={} objects={} status={} elapsed_ms={}",
            self.violations, self.objects, self.status, self.elapsed_ms
        )
    }
}

/// Writes a header, one line per violation, then a footer.
pub struct ReportWriter<W: Write> {
    out: W,
    written: usize,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(mut out: W, header: &LogHeader) -> io::Result<Self> {
        writeln!(out, "{}", header.line())?;
        Ok(Self { out, written: 0 })
    }

    pub fn violation(&mut self, report: &ViolationReport) -> io::Result<()> {
        writeln!(self.out, "{}", format_violation_line(report))?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn finish(mut self, footer: &LogFooter) -> io::Result<W> {
        writeln!(self.out, "{}", footer.line())?;
        self.out.flush()?;
        Ok(self.out)
    }
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
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn format_edge(edge: EdgeRef) -> String {
    match edge {
        EdgeRef::Edge(i) => format!("edge:{i}"),
        EdgeRef::Vertex(i) => format!("corner:{i}"),
        EdgeRef::AllEdges => "all".to_string(),
        EdgeRef::Object => "object".to_string(),
    }
}

fn parse_edge(s: &str) -> Option<EdgeRef> {
    match s {
        "all" => Some(EdgeRef::AllEdges),
        "object" => Some(EdgeRef::Object),
        _ => {
            let (kind, n) = s.split_once(':')?;
            let n = n.parse().ok()?;
            match kind {
                "edge" => Some(EdgeRef::Edge(n)),
                "corner" => Some(EdgeRef::Vertex(n)),
                _ => None,
            }
        }
    }
}

/// Layer names that would split the line are written quoted.
fn format_layer(layer: &str) -> String {
    if layer.is_empty() || layer.contains(|c: char| c.is_whitespace() || c == '"') {
        quote(layer)
    } else {
        layer.to_string()
    }
}

pub fn format_violation_line(r: &ViolationReport) -> String {
    let region: Vec<String> = r.region.iter().map(|p| format!("{},{}", p.x, p.y)).collect();
    format!(
        "V {} {} {} {} {} {}",
        r.rule_type,
        format_layer(&r.layer),
        r.code.name(),
        format_edge(r.edge),
        region.join(";"),
        quote(&r.message)
    )
}

/// A violation as read back from a log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedViolation {
    pub rule_type: RuleType,
    pub layer: String,
    pub code: ErrorCode,
    pub edge: EdgeRef,
    pub region: Vec<Point>,
    pub message: String,
}

fn bad(message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        line: 0,
        message: message.into(),
    }
}

fn parse_point(s: &str) -> Option<Point> {
    let (x, y) = s.split_once(',')?;
    Some(Point::new(x.parse().ok()?, y.parse().ok()?))
}

fn unquote(s: &str) -> Result<String, ParseError> {
    let inner = s
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| bad("message must be quoted"))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next().map(|c| if c == 'n' { '\n' } else { c })),
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Split the leading field off `s`: a quoted string or a run of non-spaces.
fn split_field(s: &str) -> Result<(String, &str), ParseError> {
    if !s.starts_with('"') {
        let (field, rest) = s.split_once(' ').unwrap_or((s, ""));
        return Ok((field.to_string(), rest));
    }
    let mut escaped = false;
    for (i, c) in s.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => {
                let rest = &s[i + 1..];
                return Ok((unquote(&s[..=i])?, rest.strip_prefix(' ').unwrap_or(rest)));
            }
            _ => {}
        }
    }
    Err(bad("unterminated quote"))
}

pub fn parse_violation_line(line: &str) -> Result<LoggedViolation, ParseError> {
    let rest = line
        .trim()
        .strip_prefix("V ")
        .ok_or_else(|| bad("not a violation line"))?;
    let (rule_type, rest) = rest.split_once(' ').ok_or_else(|| bad("missing layer"))?;
    let rule_type =
        RuleType::from_name(rule_type).ok_or_else(|| ParseError::UnknownRuleType(rule_type.to_string()))?;
    let (layer, rest) = split_field(rest)?;
    let mut parts = rest.splitn(4, ' ');
    let mut field = |what: &str| parts.next().ok_or_else(|| bad(format!("missing {what}")));
    let code = field("error code")?;
    let code = ErrorCode::from_name(code).ok_or_else(|| bad(format!("unknown error code '{code}'")))?;
    let edge = field("edge")?;
    let edge = parse_edge(edge).ok_or_else(|| bad(format!("bad edge reference '{edge}'")))?;
    let region = field("region")?
        .split(';')
        .filter(|s| !s.is_empty())
        .map(|p| parse_point(p).ok_or_else(|| bad(format!("bad point '{p}'"))))
        .collect::<Result<Vec<_>, _>>()?;
    let message = unquote(field("message")?)?;
    Ok(LoggedViolation {
        rule_type,
        layer,
        code,
        edge,
        region,
        message,
    })
}

/// All violation lines of a log; header, footer and blank lines are skipped.
pub fn read_log(text: &str) -> Result<Vec<LoggedViolation>, ParseError> {
    text.lines()
        .enumerate()
        .filter(|(_, l)| l.starts_with("V "))
        .map(|(i, l)| parse_violation_line(l).map_err(|e| e.at_line(i + 1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleId;
    use opensilicon_core::{GeomPrimitive, Rect};

    fn report() -> ViolationReport {
        ViolationReport {
            rule: RuleId(0),
            rule_type: RuleType::MinWidth,
            layer: "M1".to_string(),
            message: "MinWidth 12 on edge 1 (width): \"narrow\"".to_string(),
            region: vec![Point::new(0, 0), Point::new(11, 0), Point::new(11, -12)],
            bbox: BBox::from_coords(0, -12, 11, 0),
            edge: EdgeRef::Edge(1),
            code: ErrorCode::Width,
            object: GeomPrimitive::Rect(Rect::new(1, 0, 0, 11, 100)),
            object_index: 0,
            instance_path: Vec::new(),
            description: None,
        }
    }

    #[test]
    fn test_violation_line_reads_back() {
        let r = report();
        let line = format_violation_line(&r);
        let back = parse_violation_line(&line).unwrap();
        assert_eq!(back.rule_type, RuleType::MinWidth);
        assert_eq!(back.layer, "M1");
        assert_eq!(back.edge, EdgeRef::Edge(1));
        assert_eq!(back.region, r.region);
        assert_eq!(back.message, r.message);
    }

    #[test]
    fn test_layer_with_spaces_reads_back() {
        let mut r = report();
        r.layer = "metal 1".to_string();
        r.message = "two\nlines".to_string();
        let line = format_violation_line(&r);
        assert!(line.starts_with("V MinWidth \"metal 1\" width edge:1 "));
        assert!(!line.contains('\n'));
        let back = parse_violation_line(&line).unwrap();
        assert_eq!(back.layer, "metal 1");
        assert_eq!(back.code, ErrorCode::Width);
        assert_eq!(back.region, r.region);
        assert_eq!(back.message, "two\nlines");
        assert!(parse_violation_line("V MinWidth \"metal 1 width edge:1 0,0 \"x\"").is_err());
    }

    #[test]
    fn test_log_layout() {
        let header = LogHeader {
            cell: "top".to_string(),
            area: Some(BBox::from_coords(0, 0, 100, 50)),
            source: Some("deck".to_string()),
        };
        let mut w = ReportWriter::new(Vec::new(), &header).unwrap();
        w.violation(&report()).unwrap();
        let footer = LogFooter {
            violations: 1,
            objects: 3,
            status: "completed".to_string(),
            elapsed_ms: 2,
        };
        let bytes = w.finish(&footer).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "# OpenSilicon DRC cell=top area=0,0,100,50 source=\"deck\"");
        assert!(lines[2].starts_with(LOG_FOOTER_PREFIX));
        assert_eq!(read_log(&text).unwrap().len(), 1);
    }

    #[test]
    fn test_bad_lines() {
        assert!(parse_violation_line("# comment").is_err());
        assert!(parse_violation_line("V Bogus M1 width edge:1 0,0 \"x\"").is_err());
        assert!(parse_violation_line("V MinWidth M1 width side:1 0,0 \"x\"").is_err());
        assert!(parse_violation_line("V MinWidth M1 width edge:1 0,0 unquoted").is_err());
    }
}
