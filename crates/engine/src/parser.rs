//! Trigger expression parser and evaluator.
//!
//! Rule triggers are written in a small predicate language over snapshot
//! signals:
//!
//! ```text
//! learner_profile.contains('autistic_profile') || sensory_overload_detected == true
//! idle_ratio > 0.5 && completion_rate < 30
//! (reading_load_high == true || mood_score <= -0.5) && learning_style == 'visual'
//! ```
//!
//! Grammar (informal):
//! ```text
//! expr     = conj (("||" | "OR") conj)*
//! conj     = primary (("&&" | "AND") primary)*
//! primary  = "(" expr ")" | atom
//! atom     = PROFILE ".contains" "(" STRING ")"
//!          | SIGNAL OP literal
//! PROFILE  = "learner_profile" | "profile"
//! OP       = "==" | "!=" | ">" | "<" | ">=" | "<="
//! literal  = "true" | "false" | NUMBER | QUOTED_STRING
//! ```
//!
//! Expressions are parsed once, when a rule is loaded, into a
//! [`TriggerExpr`] tree. Evaluation never touches the source text.

use std::collections::BTreeSet;
use std::fmt;

use crate::snapshot::{PROFILE_SIGNAL, SignalKind, SignalSchema, SignalValue, Snapshot};

/// Receivers accepted in front of `.contains(...)`.
const PROFILE_RECEIVERS: [&str; 2] = [PROFILE_SIGNAL, "profile"];

/// Maximum parenthesis nesting in one trigger.
pub const MAX_NESTING: usize = 64;

/// Maximum number of tokens in one trigger. Bounds the depth of the
/// left-leaning `||`/`&&` chains the parser builds.
pub const MAX_TOKENS: usize = 1024;

/// A parsed trigger tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerExpr {
    /// Both sides must hold.
    And(Box<TriggerExpr>, Box<TriggerExpr>),
    /// At least one side must hold.
    Or(Box<TriggerExpr>, Box<TriggerExpr>),
    /// `signal OP literal`.
    Compare(Comparison),
    /// `learner_profile.contains('tag')`.
    ProfileContains(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub signal: String,
    pub op: CompareOp,
    pub literal: Literal,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
}

/// A literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Num(f64),
    Str(String),
}

impl TriggerExpr {
    /// Evaluate against a snapshot.
    ///
    /// Total: a predicate over a signal the snapshot lacks, or over a value
    /// of the wrong type, is `false`.
    pub fn evaluate(&self, snapshot: &Snapshot) -> bool {
        match self {
            TriggerExpr::And(a, b) => a.evaluate(snapshot) && b.evaluate(snapshot),
            TriggerExpr::Or(a, b) => a.evaluate(snapshot) || b.evaluate(snapshot),
            TriggerExpr::Compare(cmp) => cmp.evaluate(snapshot),
            TriggerExpr::ProfileContains(tag) => matches!(
                snapshot.get(PROFILE_SIGNAL),
                Some(SignalValue::Tags(tags)) if tags.contains(tag)
            ),
        }
    }

    /// Every signal name this expression reads.
    pub fn signals(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_signals(&mut out);
        out
    }

    fn collect_signals<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            TriggerExpr::And(a, b) | TriggerExpr::Or(a, b) => {
                a.collect_signals(out);
                b.collect_signals(out);
            }
            TriggerExpr::Compare(cmp) => {
                out.insert(cmp.signal.as_str());
            }
            TriggerExpr::ProfileContains(_) => {
                out.insert(PROFILE_SIGNAL);
            }
        }
    }

    /// Check every predicate against the signal schema: the signal must be
    /// known and the operator and literal must fit its kind.
    pub fn validate(&self, schema: &SignalSchema) -> Result<(), String> {
        match self {
            TriggerExpr::And(a, b) | TriggerExpr::Or(a, b) => {
                a.validate(schema)?;
                b.validate(schema)
            }
            TriggerExpr::ProfileContains(_) => Ok(()),
            TriggerExpr::Compare(cmp) => cmp.validate(schema),
        }
    }
}

impl Comparison {
    fn evaluate(&self, snapshot: &Snapshot) -> bool {
        let Some(value) = snapshot.get(&self.signal) else {
            return false;
        };
        match (value, &self.literal) {
            (SignalValue::Num(x), Literal::Num(n)) => self.op.compare(*x, *n),
            (SignalValue::Bool(b), Literal::Bool(l)) => match self.op {
                CompareOp::Eq => b == l,
                CompareOp::NotEq => b != l,
                _ => false,
            },
            (SignalValue::Text(t), Literal::Str(s)) => match self.op {
                CompareOp::Eq => t == s,
                CompareOp::NotEq => t != s,
                _ => false,
            },
            _ => false,
        }
    }

    fn validate(&self, schema: &SignalSchema) -> Result<(), String> {
        let kind = schema
            .kind(&self.signal)
            .ok_or_else(|| format!("unknown signal '{}'", self.signal))?;
        let equality_only = matches!(self.op, CompareOp::Eq | CompareOp::NotEq);
        match (kind, &self.literal) {
            (SignalKind::Tags, _) => Err(format!(
                "'{}' is a tag set; use {}.contains('<tag>')",
                self.signal, PROFILE_SIGNAL
            )),
            (SignalKind::Number, Literal::Num(_)) => Ok(()),
            (SignalKind::Bool, Literal::Bool(_)) | (SignalKind::Text, Literal::Str(_)) => {
                if equality_only {
                    Ok(())
                } else {
                    Err(format!(
                        "operator '{}' is not defined for {kind} signal '{}'",
                        self.op, self.signal
                    ))
                }
            }
            (_, literal) => Err(format!(
                "{kind} signal '{}' cannot be compared with {literal}",
                self.signal
            )),
        }
    }
}

impl CompareOp {
    /// IEEE-754 comparison: any comparison involving NaN is false, except `!=`.
    fn compare(self, a: f64, b: f64) -> bool {
        match self {
            CompareOp::Eq => a == b,
            CompareOp::NotEq => a != b,
            CompareOp::Gt => a > b,
            CompareOp::Lt => a < b,
            CompareOp::Gte => a >= b,
            CompareOp::Lte => a <= b,
        }
    }
}

// ─── Display ─────────────────────────────────────────────────────────

impl fmt::Display for TriggerExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerExpr::Or(a, b) => write!(f, "{a} || {b}"),
            TriggerExpr::And(a, b) => {
                write_conjunct(f, a)?;
                f.write_str(" && ")?;
                write_conjunct(f, b)
            }
            TriggerExpr::Compare(cmp) => write!(f, "{} {} {}", cmp.signal, cmp.op, cmp.literal),
            TriggerExpr::ProfileContains(tag) => {
                write!(f, "{PROFILE_SIGNAL}.contains(")?;
                write_quoted(f, tag)?;
                f.write_str(")")
            }
        }
    }
}

fn write_conjunct(f: &mut fmt::Formatter<'_>, expr: &TriggerExpr) -> fmt::Result {
    if matches!(expr, TriggerExpr::Or(..)) {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("'")?;
    for c in s.chars() {
        if c == '\'' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("'")
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Gte => ">=",
            CompareOp::Lte => "<=",
        })
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Num(n) => write!(f, "{n}"),
            Literal::Str(s) => write_quoted(f, s),
        }
    }
}

// ─── Parser ──────────────────────────────────────────────────────────

/// Parse a trigger expression string into a [`TriggerExpr`] tree.
///
/// Only syntax is checked here; see [`TriggerExpr::validate`] for the
/// schema check.
pub fn parse_trigger(input: &str) -> Result<TriggerExpr, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty trigger expression".into());
    }
    let tokens = tokenize(input)?;
    if tokens.len() > MAX_TOKENS {
        return Err(format!(
            "trigger expression too long ({} tokens, max {MAX_TOKENS})",
            tokens.len()
        ));
    }
    let (expr, rest) = parse_or(&tokens, 0)?;
    if !rest.is_empty() {
        return Err(format!("unexpected tokens after expression: {rest:?}"));
    }
    Ok(expr)
}

/// Token types for the trigger language.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    True,
    False,
    And,
    Or,
    Eq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                s.push(escaped);
                            }
                        }
                        Some(ch) if ch == quote => break,
                        Some(ch) => s.push(ch),
                        None => return Err("unterminated string literal".into()),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '&' | '|' => {
                chars.next();
                if chars.peek() != Some(&c) {
                    return Err(format!("expected '{c}{c}'"));
                }
                chars.next();
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Gte);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Lte);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                }
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.peek() != Some(&'=') {
                    return Err(
                        "negation ('!') is not supported; use '!=' or rewrite the condition"
                            .into(),
                    );
                }
                chars.next();
                tokens.push(Token::NotEq);
            }
            _ if c.is_ascii_digit() || c == '-' => {
                let mut num_str = String::new();
                num_str.push(c);
                chars.next();
                while let Some(&nc) = chars.peek() {
                    if nc.is_ascii_digit() || nc == '.' {
                        num_str.push(nc);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match num_str.parse::<f64>() {
                    Ok(n) => tokens.push(Token::Num(n)),
                    Err(_) => return Err(format!("invalid number: {num_str}")),
                }
            }
            _ if c.is_alphanumeric() || c == '_' => {
                let mut word = String::new();
                while let Some(&wc) = chars.peek() {
                    if wc.is_alphanumeric() || wc == '_' || wc == '.' {
                        word.push(wc);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match word.as_str() {
                    "AND" | "and" => Token::And,
                    "OR" | "or" => Token::Or,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(word),
                };
                tokens.push(token);
            }
            _ => return Err(format!("unexpected character: {c}")),
        }
    }

    Ok(tokens)
}

fn parse_or(tokens: &[Token], depth: usize) -> Result<(TriggerExpr, &[Token]), String> {
    let (mut left, mut rest) = parse_and(tokens, depth)?;
    while rest.first() == Some(&Token::Or) {
        let (right, remaining) = parse_and(&rest[1..], depth)?;
        left = TriggerExpr::Or(Box::new(left), Box::new(right));
        rest = remaining;
    }
    Ok((left, rest))
}

fn parse_and(tokens: &[Token], depth: usize) -> Result<(TriggerExpr, &[Token]), String> {
    let (mut left, mut rest) = parse_primary(tokens, depth)?;
    while rest.first() == Some(&Token::And) {
        let (right, remaining) = parse_primary(&rest[1..], depth)?;
        left = TriggerExpr::And(Box::new(left), Box::new(right));
        rest = remaining;
    }
    Ok((left, rest))
}

fn parse_primary(tokens: &[Token], depth: usize) -> Result<(TriggerExpr, &[Token]), String> {
    if tokens.first() == Some(&Token::LParen) {
        if depth >= MAX_NESTING {
            return Err(format!("expression nested too deeply (max {MAX_NESTING})"));
        }
        let (inner, rest) = parse_or(&tokens[1..], depth + 1)?;
        if rest.first() != Some(&Token::RParen) {
            return Err("expected closing parenthesis".into());
        }
        return Ok((inner, &rest[1..]));
    }
    parse_atom(tokens)
}

fn parse_atom(tokens: &[Token]) -> Result<(TriggerExpr, &[Token]), String> {
    let Some(Token::Ident(name)) = tokens.first() else {
        return Err(format!("expected signal name, got {:?}", tokens.first()));
    };

    if let Some(receiver) = name.strip_suffix(".contains") {
        if !PROFILE_RECEIVERS.contains(&receiver) {
            return Err(format!(
                "contains() is only defined on {PROFILE_SIGNAL}, got '{receiver}'"
            ));
        }
        return match &tokens[1..] {
            [Token::LParen, Token::Str(tag), Token::RParen, rest @ ..] => {
                Ok((TriggerExpr::ProfileContains(tag.clone()), rest))
            }
            _ => Err(format!("expected {name}('<tag>')")),
        };
    }

    if name.contains('.') {
        return Err(format!("unknown method or field access: {name}"));
    }

    let (op, rest) = parse_op(&tokens[1..])?;
    let (literal, rest) = parse_literal(rest)?;
    Ok((
        TriggerExpr::Compare(Comparison {
            signal: name.clone(),
            op,
            literal,
        }),
        rest,
    ))
}

fn parse_op(tokens: &[Token]) -> Result<(CompareOp, &[Token]), String> {
    let op = match tokens.first() {
        Some(Token::Eq) => CompareOp::Eq,
        Some(Token::NotEq) => CompareOp::NotEq,
        Some(Token::Gt) => CompareOp::Gt,
        Some(Token::Lt) => CompareOp::Lt,
        Some(Token::Gte) => CompareOp::Gte,
        Some(Token::Lte) => CompareOp::Lte,
        other => return Err(format!("expected comparison operator, got {other:?}")),
    };
    Ok((op, &tokens[1..]))
}

fn parse_literal(tokens: &[Token]) -> Result<(Literal, &[Token]), String> {
    let literal = match tokens.first() {
        Some(Token::True) => Literal::Bool(true),
        Some(Token::False) => Literal::Bool(false),
        Some(Token::Num(n)) => Literal::Num(*n),
        Some(Token::Str(s)) => Literal::Str(s.clone()),
        // Bare word as a string value.
        Some(Token::Ident(s)) => Literal::Str(s.clone()),
        other => {
            return Err(format!(
                "expected literal (true, false, number or string), got {other:?}"
            ));
        }
    };
    Ok((literal, &tokens[1..]))
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn snapshot(pairs: Vec<(&str, SignalValue)>) -> Snapshot {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    fn tags(list: &[&str]) -> SignalValue {
        SignalValue::Tags(list.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>())
    }

    #[test]
    fn parse_profile_contains_or_flag() {
        let expr = parse_trigger(
            "learner_profile.contains('autistic_profile') || sensory_overload_detected == true",
        )
        .unwrap();

        let by_profile = snapshot(vec![("learner_profile", tags(&["autistic_profile"]))]);
        assert!(expr.evaluate(&by_profile));

        let by_flag = snapshot(vec![
            ("learner_profile", tags(&[])),
            ("sensory_overload_detected", SignalValue::Bool(true)),
        ]);
        assert!(expr.evaluate(&by_flag));

        let neither = snapshot(vec![
            ("learner_profile", tags(&["adhd_profile"])),
            ("sensory_overload_detected", SignalValue::Bool(false)),
        ]);
        assert!(!expr.evaluate(&neither));
    }

    #[test]
    fn parse_numeric_thresholds() {
        let expr = parse_trigger("idle_ratio > 0.5 || completion_rate < 30.0").unwrap();
        assert!(expr.evaluate(&snapshot(vec![("idle_ratio", SignalValue::Num(0.6))])));
        assert!(expr.evaluate(&snapshot(vec![("completion_rate", SignalValue::Num(20.0))])));
        assert!(!expr.evaluate(&snapshot(vec![
            ("idle_ratio", SignalValue::Num(0.5)),
            ("completion_rate", SignalValue::Num(30.0)),
        ])));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse_trigger("a == true || b == true && c == true").unwrap();
        assert!(matches!(&expr, TriggerExpr::Or(_, rhs) if matches!(**rhs, TriggerExpr::And(..))));
    }

    #[test]
    fn parentheses_group() {
        let expr = parse_trigger("(a == true || b == true) && c == true").unwrap();
        assert!(matches!(expr, TriggerExpr::And(..)));
        let s = snapshot(vec![
            ("a", SignalValue::Bool(true)),
            ("c", SignalValue::Bool(false)),
        ]);
        assert!(!expr.evaluate(&s));
    }

    #[test]
    fn keyword_combinators() {
        let expr = parse_trigger("idle_ratio > 0.5 AND mood_score < 0 or ambiguity_flag == true")
            .unwrap();
        assert!(matches!(expr, TriggerExpr::Or(..)));
    }

    #[test]
    fn profile_alias_and_double_quotes() {
        let expr = parse_trigger(r#"profile.contains("dyslexic_profile")"#).unwrap();
        assert_eq!(expr, TriggerExpr::ProfileContains("dyslexic_profile".into()));
    }

    #[test]
    fn missing_signal_is_false_for_every_operator() {
        let empty = Snapshot::default();
        for src in [
            "x == true",
            "x != true",
            "idle_ratio > 0",
            "idle_ratio != 1",
            "learner_profile.contains('adhd_profile')",
        ] {
            assert!(!parse_trigger(src).unwrap().evaluate(&empty), "{src}");
        }
    }

    #[test]
    fn type_mismatch_is_false() {
        let expr = parse_trigger("idle_ratio == true").unwrap();
        assert!(!expr.evaluate(&snapshot(vec![("idle_ratio", SignalValue::Num(1.0))])));

        let expr = parse_trigger("flag > 1").unwrap();
        assert!(!expr.evaluate(&snapshot(vec![("flag", SignalValue::Bool(true))])));
    }

    #[test]
    fn nan_follows_ieee() {
        let s = snapshot(vec![("mood_score", SignalValue::Num(f64::NAN))]);
        assert!(!parse_trigger("mood_score == 0").unwrap().evaluate(&s));
        assert!(!parse_trigger("mood_score < 0").unwrap().evaluate(&s));
        assert!(!parse_trigger("mood_score >= 0").unwrap().evaluate(&s));
        assert!(parse_trigger("mood_score != 0").unwrap().evaluate(&s));
    }

    #[test]
    fn contains_is_case_sensitive() {
        let expr = parse_trigger("learner_profile.contains('ADHD_profile')").unwrap();
        assert!(!expr.evaluate(&snapshot(vec![("learner_profile", tags(&["adhd_profile"]))])));
    }

    #[test]
    fn text_equality() {
        let expr = parse_trigger("learning_style == 'visual'").unwrap();
        let s = snapshot(vec![("learning_style", SignalValue::Text("visual".into()))]);
        assert!(expr.evaluate(&s));
        assert!(!parse_trigger("learning_style != visual").unwrap().evaluate(&s));
    }

    #[test]
    fn signals_lists_references() {
        let expr = parse_trigger(
            "attention_drop_detected == true || learner_profile.contains('adhd_profile')",
        )
        .unwrap();
        let names: Vec<&str> = expr.signals().into_iter().collect();
        assert_eq!(names, vec!["attention_drop_detected", "learner_profile"]);
    }

    #[test]
    fn display_reparses_to_same_tree() {
        for src in [
            "learner_profile.contains('autistic_profile') || sensory_overload_detected == true",
            "(idle_ratio > 0.5 || completion_rate < 30) && mood_score <= -0.25",
            "learning_style == 'it\\'s visual'",
        ] {
            let expr = parse_trigger(src).unwrap();
            let reparsed = parse_trigger(&expr.to_string()).unwrap();
            assert_eq!(expr, reparsed, "{src}");
        }
    }

    #[test]
    fn validate_against_schema() {
        let schema = SignalSchema::standard();
        let check = |src: &str| parse_trigger(src).unwrap().validate(schema);

        assert!(check("sensory_overload_detected == true").is_ok());
        assert!(check("idle_ratio >= 0.25").is_ok());

        let err = check("made_up_signal == true").unwrap_err();
        assert!(err.contains("unknown signal"));

        let err = check("long_content_detected > 1").unwrap_err();
        assert!(err.contains("long_content_detected"));

        let err = check("ambiguity_flag > true").unwrap_err();
        assert!(err.contains("not defined"));

        let err = check("learner_profile == 'adhd_profile'").unwrap_err();
        assert!(err.contains("contains"));
    }

    #[test]
    fn deep_nesting_rejected() {
        let nested = |depth: usize| {
            format!("{}ambiguity_flag == true{}", "(".repeat(depth), ")".repeat(depth))
        };

        assert!(parse_trigger(&nested(MAX_NESTING)).is_ok());

        let err = parse_trigger(&nested(MAX_NESTING + 1)).unwrap_err();
        assert!(err.contains("nested too deeply"), "{err}");

        let err = parse_trigger(&nested(1000)).unwrap_err();
        assert!(err.contains("too long"), "{err}");
    }

    #[test]
    fn long_disjunction_rejected() {
        let chain = |terms: usize| vec!["ambiguity_flag == true"; terms].join(" || ");

        // 3 tokens per comparison, 1 per `||`.
        assert!(parse_trigger(&chain(200)).is_ok());

        let err = parse_trigger(&chain(100_000)).unwrap_err();
        assert!(err.contains("too long"), "{err}");
    }

    #[test]
    fn malformed_expressions_rejected() {
        for src in [
            "",
            "   ",
            "== true",
            "a ==",
            "a == true ||",
            "a == true | b == true",
            "a & b",
            "!a",
            "(a == true",
            "a == true)",
            "learner_profile.contains(adhd_profile)",
            "course.contains('x')",
            "learner_profile.size > 1",
            "a == 'unterminated",
            "a == true b == false",
        ] {
            assert!(parse_trigger(src).is_err(), "should reject: {src:?}");
        }
    }
}
