//! Template parsing and evaluation
//!
//! A subset of Go's text/template: `{{ }}` actions holding pipelines of
//! function calls, string, raw string, number and boolean literals,
//! parenthesised sub-pipelines and `.Field` access on maps. `{{-` and `-}}`
//! trim surrounding whitespace and `{{/* */}}` is a comment. The value of
//! each pipeline stage is passed as the last argument of the next one.

use super::RenderError;
use serde_json::Value;
use std::fmt;

/// Functions callable from a template
pub trait Functions {
    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, RenderError>;
}

/// A malformed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError(String);

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SyntaxError {}

fn syntax(message: impl Into<String>) -> SyntaxError {
    SyntaxError(message.into())
}

/// A parsed template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pieces: Vec<Piece>,
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Text(String),
    Action(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
struct Pipeline {
    commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
struct Command {
    args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Ident(String),
    Literal(Value),
    Dot,
    Nested(Pipeline),
    Field(Box<Operand>, Vec<String>),
}

/// A template call to a referencing function with a literal argument
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reference {
    /// `param`, `paramList` or `paramMap`
    Param(String),
    /// `lookup`
    Lookup(String),
}

/// Parse template text
pub fn parse(text: &str) -> Result<Template, SyntaxError> {
    let mut pieces = Vec::new();
    let mut rest = text;
    let mut trim_next = false;

    while let Some(start) = rest.find("{{") {
        let mut before = &rest[..start];
        if trim_next {
            before = before.trim_start();
        }
        let mut body = &rest[start + 2..];
        if body.starts_with('-') && body[1..].starts_with(char::is_whitespace) {
            before = before.trim_end();
            body = &body[1..];
        }
        if !before.is_empty() {
            pieces.push(Piece::Text(before.to_string()));
        }

        let end = find_close(body)?;
        rest = &body[end + 2..];
        let mut action = &body[..end];
        trim_next = false;
        if let Some(stripped) = action.strip_suffix('-')
            && stripped.ends_with(char::is_whitespace)
        {
            action = stripped;
            trim_next = true;
        }

        let action = action.trim();
        if let Some(comment) = action.strip_prefix("/*") {
            if !comment.ends_with("*/") {
                return Err(syntax("unclosed comment"));
            }
            continue;
        }
        if action.is_empty() {
            return Err(syntax("missing value for command"));
        }

        let mut parser = Parser {
            tokens: lex(action)?,
            pos: 0,
        };
        let pipeline = parser.pipeline()?;
        if let Some(token) = parser.peek() {
            return Err(syntax(format!("unexpected {token} in action")));
        }
        pieces.push(Piece::Action(pipeline));
    }

    let tail = if trim_next { rest.trim_start() } else { rest };
    if !tail.is_empty() {
        pieces.push(Piece::Text(tail.to_string()));
    }
    Ok(Template { pieces })
}

/// Index of the closing `}}`, ignoring braces inside quotes
fn find_close(body: &str) -> Result<usize, SyntaxError> {
    let bytes = body.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Ok(i),
            None => {}
        }
        i += 1;
    }
    Err(syntax("unclosed action"))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    /// `.Name`; `attached` when nothing separates it from the previous token
    Field { name: String, attached: bool },
    Literal(Value),
    Dot,
    Pipe,
    Open,
    Close,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "identifier {name:?}"),
            Self::Field { name, .. } => write!(f, "field .{name}"),
            Self::Literal(value) => write!(f, "literal {value}"),
            Self::Dot => f.write_str("\".\""),
            Self::Pipe => f.write_str("\"|\""),
            Self::Open => f.write_str("\"(\""),
            Self::Close => f.write_str("\")\""),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex(action: &str) -> Result<Vec<Token>, SyntaxError> {
    let chars: Vec<char> = action.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut attached = false;

    let take_while = |start: usize, pred: fn(char) -> bool| {
        let mut end = start;
        while end < chars.len() && pred(chars[end]) {
            end += 1;
        }
        end
    };

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            attached = false;
            i += 1;
            continue;
        }
        match c {
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '"' => {
                let mut out = String::new();
                i += 1;
                loop {
                    let Some(&c) = chars.get(i) else {
                        return Err(syntax("unterminated quoted string"));
                    };
                    i += 1;
                    match c {
                        '"' => break,
                        '\\' => {
                            let escaped = chars
                                .get(i)
                                .ok_or_else(|| syntax("unterminated quoted string"))?;
                            i += 1;
                            out.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '\\' => '\\',
                                '"' => '"',
                                other => return Err(syntax(format!("unknown escape \\{other}"))),
                            });
                        }
                        c => out.push(c),
                    }
                }
                tokens.push(Token::Literal(Value::String(out)));
            }
            '`' => {
                let start = i + 1;
                let end = (start..chars.len())
                    .find(|&j| chars[j] == '`')
                    .ok_or_else(|| syntax("unterminated raw quoted string"))?;
                tokens.push(Token::Literal(Value::String(chars[start..end].iter().collect())));
                i = end + 1;
            }
            '.' => {
                if chars.get(i + 1).copied().is_some_and(is_ident_start) {
                    let end = take_while(i + 1, is_ident_char);
                    tokens.push(Token::Field {
                        name: chars[i + 1..end].iter().collect(),
                        attached,
                    });
                    i = end;
                } else {
                    tokens.push(Token::Dot);
                    i += 1;
                }
            }
            c if c.is_ascii_digit()
                || ((c == '-' || c == '+')
                    && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let end = take_while(i + 1, |c| c.is_ascii_alphanumeric() || c == '.');
                let text: String = chars[i..end].iter().collect();
                tokens.push(Token::Literal(parse_number(&text)?));
                i = end;
            }
            c if is_ident_start(c) => {
                let end = take_while(i, is_ident_char);
                let word: String = chars[i..end].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "nil" => Token::Literal(Value::Null),
                    _ => Token::Ident(word),
                });
                i = end;
            }
            other => return Err(syntax(format!("unexpected {other:?} in action"))),
        }
        attached = true;
    }
    Ok(tokens)
}

fn parse_number(text: &str) -> Result<Value, SyntaxError> {
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::from(n));
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| syntax(format!("bad number syntax: {text:?}")))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn pipeline(&mut self) -> Result<Pipeline, SyntaxError> {
        let mut commands = vec![self.command()?];
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            commands.push(self.command()?);
        }
        Ok(Pipeline { commands })
    }

    fn command(&mut self) -> Result<Command, SyntaxError> {
        let mut args = Vec::new();
        while let Some(token) = self.peek() {
            if matches!(token, Token::Pipe | Token::Close) {
                break;
            }
            args.push(self.operand()?);
        }
        if args.is_empty() {
            return Err(syntax("missing value for command"));
        }
        Ok(Command { args })
    }

    fn operand(&mut self) -> Result<Operand, SyntaxError> {
        let primary = match self.next() {
            Some(Token::Ident(name)) => Operand::Ident(name),
            Some(Token::Literal(value)) => Operand::Literal(value),
            Some(Token::Dot) => Operand::Dot,
            Some(Token::Field { name, .. }) => Operand::Field(Box::new(Operand::Dot), vec![name]),
            Some(Token::Open) => {
                let inner = self.pipeline()?;
                if self.next() != Some(Token::Close) {
                    return Err(syntax("unclosed left paren"));
                }
                Operand::Nested(inner)
            }
            Some(token) => return Err(syntax(format!("unexpected {token} in operand"))),
            None => return Err(syntax("unexpected end of action")),
        };

        let mut fields = Vec::new();
        while let Some(Token::Field {
            name,
            attached: true,
        }) = self.peek()
        {
            fields.push(name.clone());
            self.pos += 1;
        }
        if fields.is_empty() {
            return Ok(primary);
        }
        Ok(match primary {
            Operand::Field(base, mut names) => {
                names.extend(fields);
                Operand::Field(base, names)
            }
            other => Operand::Field(Box::new(other), fields),
        })
    }
}

impl Template {
    /// Evaluate the template; `field` names the attribute in errors
    pub fn execute(&self, field: &str, funcs: &dyn Functions) -> Result<String, RenderError> {
        let eval = Eval { field, funcs };
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Action(pipeline) => out.push_str(&print(&eval.pipeline(pipeline)?)),
            }
        }
        Ok(out)
    }

    /// Every `param*`/`lookup` call whose argument is a literal string
    pub fn references(&self) -> Vec<Reference> {
        let mut found = Vec::new();
        for piece in &self.pieces {
            if let Piece::Action(pipeline) = piece {
                collect_pipeline(pipeline, &mut found);
            }
        }
        found.sort();
        found.dedup();
        found
    }
}

fn collect_pipeline(pipeline: &Pipeline, found: &mut Vec<Reference>) {
    let mut previous: Option<&Command> = None;
    for command in &pipeline.commands {
        if let Some(Operand::Ident(name)) = command.args.first() {
            let literal = match command.args.get(1) {
                Some(Operand::Literal(Value::String(s))) => Some(s.clone()),
                None => previous.and_then(|p| match p.args.as_slice() {
                    [Operand::Literal(Value::String(s))] => Some(s.clone()),
                    _ => None,
                }),
                _ => None,
            };
            if let Some(arg) = literal {
                match name.as_str() {
                    "param" | "paramList" | "paramMap" => found.push(Reference::Param(arg)),
                    "lookup" => found.push(Reference::Lookup(arg)),
                    _ => {}
                }
            }
        }
        for operand in &command.args {
            collect_operand(operand, found);
        }
        previous = Some(command);
    }
}

fn collect_operand(operand: &Operand, found: &mut Vec<Reference>) {
    match operand {
        Operand::Nested(pipeline) => collect_pipeline(pipeline, found),
        Operand::Field(base, _) => collect_operand(base, found),
        _ => {}
    }
}

struct Eval<'a> {
    field: &'a str,
    funcs: &'a dyn Functions,
}

impl Eval<'_> {
    fn bad(&self, message: impl Into<String>) -> RenderError {
        RenderError::BadTemplate {
            field: self.field.to_string(),
            message: message.into(),
        }
    }

    fn pipeline(&self, pipeline: &Pipeline) -> Result<Value, RenderError> {
        let mut piped = None;
        for command in &pipeline.commands {
            piped = Some(self.command(command, piped)?);
        }
        Ok(piped.unwrap_or(Value::Null))
    }

    fn command(&self, command: &Command, piped: Option<Value>) -> Result<Value, RenderError> {
        match command.args.as_slice() {
            [Operand::Ident(name), rest @ ..] => {
                let mut args = rest
                    .iter()
                    .map(|arg| self.operand(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                args.extend(piped);
                self.funcs.call(name, args)
            }
            [single] if piped.is_none() => self.operand(single),
            _ => Err(self.bad("can't give argument to non-function")),
        }
    }

    fn operand(&self, operand: &Operand) -> Result<Value, RenderError> {
        match operand {
            Operand::Ident(name) => self.funcs.call(name, Vec::new()),
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Dot => Ok(Value::Null),
            Operand::Nested(pipeline) => self.pipeline(pipeline),
            Operand::Field(base, names) => {
                let mut value = self.operand(base)?;
                for name in names {
                    value = match value {
                        Value::Object(mut map) => map
                            .remove(name)
                            .ok_or_else(|| self.bad(format!("map has no entry for key {name:?}")))?,
                        other => {
                            return Err(self.bad(format!(
                                "can't evaluate field {name} in {}",
                                type_name(&other)
                            )));
                        }
                    };
                }
                Ok(value)
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Print a value the way templates show it
pub fn print(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(print).collect();
            format!("[{}]", items.join(" "))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{k}:{}", print(v)))
                .collect();
            format!("map[{}]", entries.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Echo functions: `upper` upper-cases, `pair` builds a map, `fail`
    /// is unresolvable
    struct Echo;

    impl Functions for Echo {
        fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, RenderError> {
            match name {
                "upper" => Ok(Value::String(print(&args[0]).to_uppercase())),
                "concat" => Ok(Value::String(args.iter().map(print).collect())),
                "pair" => Ok(json!({"OS": "linux", "Arch": "x86_64"})),
                "fail" => Err(RenderError::Unresolvable {
                    reference: "x".into(),
                }),
                other => Err(RenderError::BadTemplate {
                    field: "test".into(),
                    message: format!("function {other:?} not defined"),
                }),
            }
        }
    }

    fn run(text: &str) -> Result<String, RenderError> {
        parse(text).unwrap().execute("test", &Echo)
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(run("no actions here").unwrap(), "no actions here");
    }

    #[test]
    fn test_call_and_pipe() {
        assert_eq!(run(r#"a {{upper "b"}} c"#).unwrap(), "a B c");
        assert_eq!(run(r#"{{"b" | upper}}"#).unwrap(), "B");
        assert_eq!(run(r#"{{concat "a" "b" | concat "c"}}"#).unwrap(), "cab");
    }

    #[test]
    fn test_literals() {
        assert_eq!(run("{{`raw \\n`}}").unwrap(), "raw \\n");
        assert_eq!(run(r#"{{"esc\n"}}"#).unwrap(), "esc\n");
        assert_eq!(run("{{42}} {{-1}} {{true}}").unwrap(), "42 -1 true");
    }

    #[test]
    fn test_field_access() {
        assert_eq!(run("{{pair.OS}}").unwrap(), "linux");
        assert_eq!(run("{{(pair).Arch}}").unwrap(), "x86_64");
        let err = run("{{pair.Nope}}").unwrap_err();
        assert!(matches!(err, RenderError::BadTemplate { .. }));
    }

    #[test]
    fn test_trim_markers_and_comments() {
        assert_eq!(run("a  {{- upper \"b\" -}}  c").unwrap(), "aBc");
        assert_eq!(run("a{{/* note */}}b").unwrap(), "ab");
    }

    #[test]
    fn test_braces_inside_strings() {
        assert_eq!(run(r#"{{upper "}}"}}"#).unwrap(), "}}");
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("{{upper \"b\"").is_err());
        assert!(parse("{{}}").is_err());
        assert!(parse("{{(upper \"b\"}}").is_err());
        assert!(parse("{{\"unterminated}}").is_err());
    }

    #[test]
    fn test_unresolvable_propagates() {
        let err = run("{{fail}}").unwrap_err();
        assert!(matches!(err, RenderError::Unresolvable { .. }));
    }

    #[test]
    fn test_argument_to_non_function() {
        let err = run(r#"{{"a" "b"}}"#).unwrap_err();
        assert!(matches!(err, RenderError::BadTemplate { .. }));
    }

    #[test]
    fn test_references() {
        let template = parse(
            r#"{{param "a"}} {{"b" | paramList}} {{lookup "task.query.x.stdout"}} {{join "," (paramMap "c")}}"#,
        )
        .unwrap();
        assert_eq!(
            template.references(),
            vec![
                Reference::Param("a".into()),
                Reference::Param("b".into()),
                Reference::Param("c".into()),
                Reference::Lookup("task.query.x.stdout".into()),
            ]
        );
    }

    #[test]
    fn test_print_collections() {
        assert_eq!(print(&json!(["a", "b"])), "[a b]");
        assert_eq!(print(&json!({"k": 1})), "map[k:1]");
        assert_eq!(print(&Value::Null), "");
    }
}
