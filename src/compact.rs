//! RELAX NG compact syntax.
//!
//! Grammars written in the compact syntax are translated to the XML syntax
//! before libxml2 sees them, so one engine compiles both forms. The
//! translation keeps the structure of the grammar: definitions, includes and
//! external references stay separate and are resolved by the engine.
//! Annotations and documentation comments are accepted and dropped.

use std::collections::HashMap;

use crate::error::CompactSyntaxError;
use crate::schema_loader::RELAX_NG_NAMESPACE;

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
const XSD_DATATYPES: &str = "http://www.w3.org/2001/XMLSchema-datatypes";

const KEYWORDS: &[&str] = &[
    "attribute",
    "default",
    "datatypes",
    "div",
    "element",
    "empty",
    "external",
    "grammar",
    "include",
    "inherit",
    "list",
    "mixed",
    "namespace",
    "notAllowed",
    "parent",
    "start",
    "string",
    "text",
    "token",
];

type CompactResult<T> = Result<T, CompactSyntaxError>;

/// Whether a reference names a compact syntax grammar, by extension.
pub fn is_compact_syntax(reference: &str) -> bool {
    let bytes = reference.as_bytes();
    bytes.len() >= 4 && bytes[bytes.len() - 4..].eq_ignore_ascii_case(b".rnc")
}

/// Translate a compact syntax grammar to an equivalent XML syntax grammar.
pub fn translate(source: &str) -> CompactResult<String> {
    let tokens = lex(source)?;
    let mut parser = Parser::new(tokens);
    let schema = parser.schema()?;

    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<grammar xmlns=\"{}\" datatypeLibrary=\"\">",
        RELAX_NG_NAMESPACE
    ));
    match schema {
        TopLevel::Pattern(pattern) => {
            out.push_str("<start>");
            emit_pattern(&mut out, &pattern);
            out.push_str("</start>");
        }
        TopLevel::Grammar(components) => emit_components(&mut out, &components),
    }
    out.push_str("</grammar>\n");
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    /// `\name`: an identifier that is never a keyword
    Escaped(String),
    CName(String, String),
    NsWildcard(String),
    Literal(String),
    Symbol(&'static str),
    Eof,
}

static EOF: Token = Token::Eof;

#[derive(Debug, Clone)]
struct Lexed {
    token: Token,
    line: u32,
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '\u{B7}')
}

/// Replace `\x{hex}` escapes, which may appear anywhere in a grammar.
fn unescape(source: &str) -> CompactResult<String> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut line = 1;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && chars.get(i + 1) == Some(&'x') {
            let mut j = i + 1;
            while chars.get(j) == Some(&'x') {
                j += 1;
            }
            if chars.get(j) == Some(&'{') {
                let digits_start = j + 1;
                let mut end = digits_start;
                while chars.get(end).is_some_and(|c| c.is_ascii_hexdigit()) {
                    end += 1;
                }
                if chars.get(end) != Some(&'}') || end == digits_start {
                    return Err(CompactSyntaxError {
                        line,
                        message: "malformed \\x{...} escape".to_string(),
                    });
                }
                let digits: String = chars[digits_start..end].iter().collect();
                let decoded = u32::from_str_radix(&digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| CompactSyntaxError {
                        line,
                        message: format!("\\x{{{}}} is not a character", digits),
                    })?;
                out.push(decoded);
                i = end + 1;
                continue;
            }
        }
        if chars[i] == '\n' {
            line += 1;
        }
        out.push(chars[i]);
        i += 1;
    }
    Ok(out)
}

fn scan_name(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() && is_name_char(chars[end]) {
        end += 1;
    }
    end
}

fn lex(source: &str) -> CompactResult<Vec<Lexed>> {
    let chars: Vec<char> = unescape(source)?.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1u32;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let at = line;
        let token = match c {
            '\n' => {
                line += 1;
                i += 1;
                continue;
            }
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '"' | '\'' => {
                let (value, next, newlines) = lex_literal(&chars, i, line)?;
                line += newlines;
                i = next;
                Token::Literal(value)
            }
            '\\' => {
                if !chars.get(i + 1).copied().is_some_and(is_name_start) {
                    return Err(CompactSyntaxError {
                        line,
                        message: "expected an identifier after '\\'".to_string(),
                    });
                }
                let end = scan_name(&chars, i + 1);
                let name = chars[i + 1..end].iter().collect();
                i = end;
                Token::Escaped(name)
            }
            c if is_name_start(c) => {
                let end = scan_name(&chars, i);
                let name: String = chars[i..end].iter().collect();
                i = end;
                if chars.get(i) == Some(&':') && chars.get(i + 1) == Some(&'*') {
                    i += 2;
                    Token::NsWildcard(name)
                } else if chars.get(i) == Some(&':')
                    && chars.get(i + 1).copied().is_some_and(is_name_start)
                {
                    let end = scan_name(&chars, i + 1);
                    let local = chars[i + 1..end].iter().collect();
                    i = end;
                    Token::CName(name, local)
                } else {
                    Token::Ident(name)
                }
            }
            _ => {
                let pair = (c, chars.get(i + 1).copied());
                let symbol = match pair {
                    ('|', Some('=')) => "|=",
                    ('&', Some('=')) => "&=",
                    ('>', Some('>')) => ">>",
                    ('=', _) => "=",
                    ('{', _) => "{",
                    ('}', _) => "}",
                    ('(', _) => "(",
                    (')', _) => ")",
                    ('[', _) => "[",
                    (']', _) => "]",
                    (',', _) => ",",
                    ('|', _) => "|",
                    ('&', _) => "&",
                    ('?', _) => "?",
                    ('*', _) => "*",
                    ('+', _) => "+",
                    ('-', _) => "-",
                    ('~', _) => "~",
                    _ => {
                        return Err(CompactSyntaxError {
                            line,
                            message: format!("unexpected character {:?}", c),
                        });
                    }
                };
                i += symbol.chars().count();
                Token::Symbol(symbol)
            }
        };
        tokens.push(Lexed { token, line: at });
    }

    tokens.push(Lexed {
        token: Token::Eof,
        line,
    });
    Ok(tokens)
}

/// Returns the literal's value, the index after it and the newlines it spans.
fn lex_literal(chars: &[char], start: usize, line: u32) -> CompactResult<(String, usize, u32)> {
    let quote = chars[start];
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let unterminated = || CompactSyntaxError {
        line,
        message: "unterminated string literal".to_string(),
    };

    let mut value = String::new();
    let mut newlines = 0;
    if triple {
        let mut i = start + 3;
        loop {
            if i >= chars.len() {
                return Err(unterminated());
            }
            if chars.get(i) == Some(&quote)
                && chars.get(i + 1) == Some(&quote)
                && chars.get(i + 2) == Some(&quote)
            {
                return Ok((value, i + 3, newlines));
            }
            let c = chars[i];
            if c == '\n' {
                newlines += 1;
            }
            value.push(c);
            i += 1;
        }
    }

    let mut i = start + 1;
    loop {
        match chars.get(i) {
            None | Some('\n') => return Err(unterminated()),
            Some(c) if *c == quote => return Ok((value, i + 1, newlines)),
            Some(c) => value.push(*c),
        }
        i += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combine {
    Choice,
    Interleave,
}

impl Combine {
    fn as_str(&self) -> &'static str {
        match self {
            Combine::Choice => "choice",
            Combine::Interleave => "interleave",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NameClass {
    Name { ns: String, local: String },
    NsName { ns: String, except: Option<Box<NameClass>> },
    AnyName { except: Option<Box<NameClass>> },
    Choice(Vec<NameClass>),
}

#[derive(Debug, Clone, PartialEq)]
enum Pattern {
    Element(NameClass, Box<Pattern>),
    Attribute(NameClass, Box<Pattern>),
    Group(Vec<Pattern>),
    Choice(Vec<Pattern>),
    Interleave(Vec<Pattern>),
    Optional(Box<Pattern>),
    ZeroOrMore(Box<Pattern>),
    OneOrMore(Box<Pattern>),
    List(Box<Pattern>),
    Mixed(Box<Pattern>),
    Empty,
    Text,
    NotAllowed,
    Ref(String),
    ParentRef(String),
    ExternalRef {
        href: String,
        ns: Option<String>,
    },
    Grammar(Vec<Component>),
    Data {
        library: String,
        type_name: String,
        params: Vec<(String, String)>,
        except: Option<Box<Pattern>>,
    },
    Value {
        library: String,
        type_name: String,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Component {
    Start {
        combine: Option<Combine>,
        pattern: Pattern,
    },
    Define {
        name: String,
        combine: Option<Combine>,
        pattern: Pattern,
    },
    Div(Vec<Component>),
    Include {
        href: String,
        ns: Option<String>,
        components: Vec<Component>,
    },
}

enum TopLevel {
    Pattern(Pattern),
    Grammar(Vec<Component>),
}

struct Parser {
    tokens: Vec<Lexed>,
    pos: usize,
    namespaces: HashMap<String, String>,
    default_namespace: Option<String>,
    datatypes: HashMap<String, String>,
}

impl Parser {
    fn new(tokens: Vec<Lexed>) -> Self {
        let namespaces = HashMap::from([("xml".to_string(), XML_NAMESPACE.to_string())]);
        let datatypes = HashMap::from([("xsd".to_string(), XSD_DATATYPES.to_string())]);
        Self {
            tokens,
            pos: 0,
            namespaces,
            default_namespace: None,
            datatypes,
        }
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .map_or(&EOF, |lexed| &lexed.token)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |lexed| lexed.line)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error<T>(&self, message: impl Into<String>) -> CompactResult<T> {
        Err(CompactSyntaxError {
            line: self.line(),
            message: message.into(),
        })
    }

    fn at_symbol(&self, symbol: &str) -> bool {
        matches!(self.peek(), Token::Symbol(s) if *s == symbol)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == keyword)
    }

    fn expect(&mut self, symbol: &'static str) -> CompactResult<()> {
        if self.at_symbol(symbol) {
            self.advance();
            Ok(())
        } else {
            self.error(format!("expected '{}', found {}", symbol, describe(self.peek())))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> CompactResult<()> {
        if self.at_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            self.error(format!("expected '{}', found {}", keyword, describe(self.peek())))
        }
    }

    /// Any identifier, keywords included.
    fn identifier(&mut self) -> CompactResult<String> {
        match self.peek().clone() {
            Token::Ident(name) | Token::Escaped(name) => {
                self.advance();
                Ok(name)
            }
            other => self.error(format!("expected an identifier, found {}", describe(&other))),
        }
    }

    /// A literal, with `~` concatenation.
    fn literal(&mut self) -> CompactResult<String> {
        let Token::Literal(mut value) = self.peek().clone() else {
            return self.error(format!("expected a string literal, found {}", describe(self.peek())));
        };
        self.advance();
        while self.at_symbol("~") {
            self.advance();
            let Token::Literal(next) = self.peek().clone() else {
                return self.error("expected a string literal after '~'");
            };
            self.advance();
            value.push_str(&next);
        }
        Ok(value)
    }

    /// Skip an annotation `[ ... ]`, if one starts here.
    fn skip_annotation(&mut self) -> CompactResult<()> {
        if !self.at_symbol("[") {
            return Ok(());
        }
        let mut depth = 0usize;
        loop {
            match self.advance() {
                Token::Symbol("[") => depth += 1,
                Token::Symbol("]") => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Token::Eof => return self.error("unterminated annotation"),
                _ => {}
            }
        }
    }

    /// Skip `>> name [ ... ]` annotations following a pattern.
    fn skip_follow_annotations(&mut self) -> CompactResult<()> {
        while self.at_symbol(">>") {
            self.advance();
            match self.advance() {
                Token::Ident(_) | Token::Escaped(_) | Token::CName(_, _) => {}
                other => {
                    return self.error(format!(
                        "expected an annotation element, found {}",
                        describe(&other)
                    ));
                }
            }
            if !self.at_symbol("[") {
                return self.error("expected '[' after annotation element name");
            }
            self.skip_annotation()?;
        }
        Ok(())
    }

    fn schema(&mut self) -> CompactResult<TopLevel> {
        self.preamble()?;
        if self.starts_grammar() {
            let components = self.grammar_content(false)?;
            Ok(TopLevel::Grammar(components))
        } else {
            let pattern = self.pattern()?;
            if !matches!(self.peek(), Token::Eof) {
                return self.error(format!("unexpected {}", describe(self.peek())));
            }
            Ok(TopLevel::Pattern(pattern))
        }
    }

    fn preamble(&mut self) -> CompactResult<()> {
        loop {
            self.skip_annotation()?;
            if self.at_keyword("namespace") {
                self.advance();
                let prefix = self.identifier()?;
                self.expect("=")?;
                let uri = self.namespace_uri()?;
                self.namespaces.insert(prefix, uri);
            } else if self.at_keyword("default") {
                self.advance();
                self.expect_keyword("namespace")?;
                let prefix = if self.at_symbol("=") {
                    None
                } else {
                    Some(self.identifier()?)
                };
                self.expect("=")?;
                let uri = self.namespace_uri()?;
                if let Some(prefix) = prefix {
                    self.namespaces.insert(prefix, uri.clone());
                }
                self.default_namespace = Some(uri);
            } else if self.at_keyword("datatypes") {
                self.advance();
                let prefix = self.identifier()?;
                self.expect("=")?;
                let uri = self.literal()?;
                self.datatypes.insert(prefix, uri);
            } else {
                return Ok(());
            }
        }
    }

    fn namespace_uri(&mut self) -> CompactResult<String> {
        if self.at_keyword("inherit") {
            self.advance();
            return Ok(String::new());
        }
        self.literal()
    }

    fn starts_grammar(&self) -> bool {
        let mut offset = 0;
        // A leading annotation does not decide anything.
        if matches!(self.peek(), Token::Symbol("[")) {
            let mut depth = 0usize;
            loop {
                match self.peek_at(offset) {
                    Token::Symbol("[") => depth += 1,
                    Token::Symbol("]") => {
                        depth -= 1;
                        if depth == 0 {
                            offset += 1;
                            break;
                        }
                    }
                    Token::Eof => return false,
                    _ => {}
                }
                offset += 1;
            }
        }
        match self.peek_at(offset) {
            Token::Eof => true,
            Token::Ident(name) if matches!(name.as_str(), "start" | "div" | "include") => true,
            Token::Ident(_) | Token::Escaped(_) => matches!(
                self.peek_at(offset + 1),
                Token::Symbol("=") | Token::Symbol("|=") | Token::Symbol("&=")
            ),
            Token::CName(_, _) => matches!(self.peek_at(offset + 1), Token::Symbol("[")),
            _ => false,
        }
    }

    fn combine(&mut self) -> CompactResult<Option<Combine>> {
        let combine = match self.peek() {
            Token::Symbol("=") => None,
            Token::Symbol("|=") => Some(Combine::Choice),
            Token::Symbol("&=") => Some(Combine::Interleave),
            other => {
                return self.error(format!(
                    "expected '=', '|=' or '&=', found {}",
                    describe(other)
                ));
            }
        };
        self.advance();
        Ok(combine)
    }

    fn grammar_content(&mut self, in_braces: bool) -> CompactResult<Vec<Component>> {
        let mut components = Vec::new();
        loop {
            self.skip_annotation()?;
            match self.peek().clone() {
                Token::Eof if !in_braces => return Ok(components),
                Token::Symbol("}") if in_braces => return Ok(components),
                Token::Ident(keyword) if keyword == "start" => {
                    self.advance();
                    let combine = self.combine()?;
                    let pattern = self.pattern()?;
                    components.push(Component::Start { combine, pattern });
                }
                Token::Ident(keyword) if keyword == "div" => {
                    self.advance();
                    self.expect("{")?;
                    let inner = self.grammar_content(true)?;
                    self.expect("}")?;
                    components.push(Component::Div(inner));
                }
                Token::Ident(keyword) if keyword == "include" => {
                    self.advance();
                    let href = self.literal()?;
                    let ns = self.inherit()?;
                    let mut inner = Vec::new();
                    if self.at_symbol("{") {
                        self.advance();
                        inner = self.grammar_content(true)?;
                        self.expect("}")?;
                    }
                    components.push(Component::Include {
                        href,
                        ns,
                        components: inner,
                    });
                }
                Token::Ident(name) if !KEYWORDS.contains(&name.as_str()) => {
                    self.advance();
                    let combine = self.combine()?;
                    let pattern = self.pattern()?;
                    components.push(Component::Define {
                        name,
                        combine,
                        pattern,
                    });
                }
                Token::Escaped(name) => {
                    self.advance();
                    let combine = self.combine()?;
                    let pattern = self.pattern()?;
                    components.push(Component::Define {
                        name,
                        combine,
                        pattern,
                    });
                }
                Token::CName(_, _) => {
                    // Grammar-level annotation element
                    self.advance();
                    if !self.at_symbol("[") {
                        return self.error("expected '[' after annotation element name");
                    }
                    self.skip_annotation()?;
                }
                other => {
                    return self.error(format!("expected a definition, found {}", describe(&other)));
                }
            }
        }
    }

    /// Namespace given by `inherit = prefix`, or the default namespace.
    fn inherit(&mut self) -> CompactResult<Option<String>> {
        if !self.at_keyword("inherit") {
            return Ok(self.default_namespace.clone());
        }
        self.advance();
        self.expect("=")?;
        let prefix = self.identifier()?;
        self.namespace(&prefix).map(Some)
    }

    fn namespace(&self, prefix: &str) -> CompactResult<String> {
        match self.namespaces.get(prefix) {
            Some(uri) => Ok(uri.clone()),
            None => self.error(format!("undeclared namespace prefix '{}'", prefix)),
        }
    }

    fn datatype_library(&self, prefix: &str) -> CompactResult<String> {
        match self.datatypes.get(prefix) {
            Some(uri) => Ok(uri.clone()),
            None => self.error(format!("undeclared datatypes prefix '{}'", prefix)),
        }
    }

    fn pattern(&mut self) -> CompactResult<Pattern> {
        let first = self.particle()?;
        let operator = match self.peek() {
            Token::Symbol(op @ ("," | "|" | "&")) => *op,
            _ => return Ok(first),
        };

        let mut items = vec![first];
        while self.at_symbol(operator) {
            self.advance();
            items.push(self.particle()?);
        }
        if let Token::Symbol(other @ ("," | "|" | "&")) = self.peek() {
            let other = *other;
            return self.error(format!(
                "'{}' and '{}' cannot be mixed without parentheses",
                operator, other
            ));
        }
        Ok(match operator {
            "," => Pattern::Group(items),
            "|" => Pattern::Choice(items),
            _ => Pattern::Interleave(items),
        })
    }

    fn particle(&mut self) -> CompactResult<Pattern> {
        let primary = self.primary()?;
        let pattern = match self.peek() {
            Token::Symbol("?") => Pattern::Optional(Box::new(primary)),
            Token::Symbol("*") => Pattern::ZeroOrMore(Box::new(primary)),
            Token::Symbol("+") => Pattern::OneOrMore(Box::new(primary)),
            _ => {
                self.skip_follow_annotations()?;
                return Ok(primary);
            }
        };
        self.advance();
        self.skip_follow_annotations()?;
        Ok(pattern)
    }

    fn braced_pattern(&mut self) -> CompactResult<Pattern> {
        self.expect("{")?;
        let pattern = self.pattern()?;
        self.expect("}")?;
        Ok(pattern)
    }

    fn primary(&mut self) -> CompactResult<Pattern> {
        self.skip_annotation()?;
        let token = self.peek().clone();
        match token {
            Token::Ident(keyword) if KEYWORDS.contains(&keyword.as_str()) => {
                self.advance();
                match keyword.as_str() {
                    "element" => {
                        let name = self.name_class(true)?;
                        let content = self.braced_pattern()?;
                        Ok(Pattern::Element(name, Box::new(content)))
                    }
                    "attribute" => {
                        let name = self.name_class(false)?;
                        let content = self.braced_pattern()?;
                        Ok(Pattern::Attribute(name, Box::new(content)))
                    }
                    "list" => Ok(Pattern::List(Box::new(self.braced_pattern()?))),
                    "mixed" => Ok(Pattern::Mixed(Box::new(self.braced_pattern()?))),
                    "empty" => Ok(Pattern::Empty),
                    "text" => Ok(Pattern::Text),
                    "notAllowed" => Ok(Pattern::NotAllowed),
                    "parent" => Ok(Pattern::ParentRef(self.identifier()?)),
                    "external" => {
                        let href = self.literal()?;
                        let ns = self.inherit()?;
                        Ok(Pattern::ExternalRef { href, ns })
                    }
                    "grammar" => {
                        self.expect("{")?;
                        let components = self.grammar_content(true)?;
                        self.expect("}")?;
                        Ok(Pattern::Grammar(components))
                    }
                    "string" | "token" => self.datatype(String::new(), keyword.clone()),
                    other => self.error(format!("keyword '{}' cannot start a pattern", other)),
                }
            }
            Token::Ident(name) | Token::Escaped(name) => {
                self.advance();
                Ok(Pattern::Ref(name))
            }
            Token::CName(prefix, local) => {
                self.advance();
                let library = self.datatype_library(&prefix)?;
                self.datatype(library, local)
            }
            Token::Literal(_) => {
                let value = self.literal()?;
                Ok(Pattern::Value {
                    library: String::new(),
                    type_name: "token".to_string(),
                    value,
                })
            }
            Token::Symbol("(") => {
                self.advance();
                let pattern = self.pattern()?;
                self.expect(")")?;
                Ok(pattern)
            }
            other => self.error(format!("expected a pattern, found {}", describe(&other))),
        }
    }

    fn datatype(&mut self, library: String, type_name: String) -> CompactResult<Pattern> {
        if matches!(self.peek(), Token::Literal(_)) {
            let value = self.literal()?;
            return Ok(Pattern::Value {
                library,
                type_name,
                value,
            });
        }

        let mut params = Vec::new();
        if self.at_symbol("{") {
            self.advance();
            while !self.at_symbol("}") {
                self.skip_annotation()?;
                let name = self.identifier()?;
                self.expect("=")?;
                let value = self.literal()?;
                params.push((name, value));
            }
            self.advance();
        }
        let except = if self.at_symbol("-") {
            self.advance();
            Some(Box::new(self.primary()?))
        } else {
            None
        };
        Ok(Pattern::Data {
            library,
            type_name,
            params,
            except,
        })
    }

    fn name_class(&mut self, element: bool) -> CompactResult<NameClass> {
        let first = self.name_class_primary(element)?;
        if self.at_symbol("-") {
            self.advance();
            let except = Some(Box::new(self.name_class_primary(element)?));
            return match first {
                NameClass::AnyName { .. } => Ok(NameClass::AnyName { except }),
                NameClass::NsName { ns, .. } => Ok(NameClass::NsName { ns, except }),
                _ => self.error("only '*' and 'prefix:*' name classes take exceptions"),
            };
        }
        if !self.at_symbol("|") {
            return Ok(first);
        }
        let mut choices = vec![first];
        while self.at_symbol("|") {
            self.advance();
            choices.push(self.name_class_primary(element)?);
        }
        Ok(NameClass::Choice(choices))
    }

    fn name_class_primary(&mut self, element: bool) -> CompactResult<NameClass> {
        self.skip_annotation()?;
        match self.peek().clone() {
            Token::Ident(local) | Token::Escaped(local) => {
                self.advance();
                let ns = if element {
                    self.default_namespace.clone().unwrap_or_default()
                } else {
                    String::new()
                };
                Ok(NameClass::Name { ns, local })
            }
            Token::CName(prefix, local) => {
                self.advance();
                let ns = self.namespace(&prefix)?;
                Ok(NameClass::Name { ns, local })
            }
            Token::NsWildcard(prefix) => {
                self.advance();
                let ns = self.namespace(&prefix)?;
                Ok(NameClass::NsName { ns, except: None })
            }
            Token::Symbol("*") => {
                self.advance();
                Ok(NameClass::AnyName { except: None })
            }
            Token::Symbol("(") => {
                self.advance();
                let name = self.name_class(element)?;
                self.expect(")")?;
                Ok(name)
            }
            other => self.error(format!("expected a name, found {}", describe(&other))),
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => format!("'{}'", name),
        Token::Escaped(name) => format!("'\\{}'", name),
        Token::CName(prefix, local) => format!("'{}:{}'", prefix, local),
        Token::NsWildcard(prefix) => format!("'{}:*'", prefix),
        Token::Literal(value) => format!("literal {:?}", value),
        Token::Symbol(symbol) => format!("'{}'", symbol),
        Token::Eof => "end of input".to_string(),
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn emit_components(out: &mut String, components: &[Component]) {
    for component in components {
        match component {
            Component::Start { combine, pattern } => {
                out.push_str("<start");
                emit_combine(out, *combine);
                out.push('>');
                emit_pattern(out, pattern);
                out.push_str("</start>");
            }
            Component::Define {
                name,
                combine,
                pattern,
            } => {
                out.push_str(&format!("<define name=\"{}\"", escape(name)));
                emit_combine(out, *combine);
                out.push('>');
                emit_pattern(out, pattern);
                out.push_str("</define>");
            }
            Component::Div(inner) => {
                out.push_str("<div>");
                emit_components(out, inner);
                out.push_str("</div>");
            }
            Component::Include {
                href,
                ns,
                components,
            } => {
                out.push_str(&format!("<include href=\"{}\"", escape(href)));
                if let Some(ns) = ns {
                    out.push_str(&format!(" ns=\"{}\"", escape(ns)));
                }
                out.push('>');
                emit_components(out, components);
                out.push_str("</include>");
            }
        }
    }
}

fn emit_combine(out: &mut String, combine: Option<Combine>) {
    if let Some(combine) = combine {
        out.push_str(&format!(" combine=\"{}\"", combine.as_str()));
    }
}

fn emit_name_class(out: &mut String, name: &NameClass) {
    match name {
        NameClass::Name { ns, local } => {
            out.push_str(&format!("<name ns=\"{}\">{}</name>", escape(ns), escape(local)));
        }
        NameClass::NsName { ns, except } => {
            out.push_str(&format!("<nsName ns=\"{}\">", escape(ns)));
            emit_name_except(out, except.as_deref());
            out.push_str("</nsName>");
        }
        NameClass::AnyName { except } => {
            out.push_str("<anyName>");
            emit_name_except(out, except.as_deref());
            out.push_str("</anyName>");
        }
        NameClass::Choice(choices) => {
            out.push_str("<choice>");
            for choice in choices {
                emit_name_class(out, choice);
            }
            out.push_str("</choice>");
        }
    }
}

fn emit_name_except(out: &mut String, except: Option<&NameClass>) {
    if let Some(except) = except {
        out.push_str("<except>");
        emit_name_class(out, except);
        out.push_str("</except>");
    }
}

fn emit_wrapped(out: &mut String, tag: &str, patterns: &[Pattern]) {
    out.push_str(&format!("<{}>", tag));
    for pattern in patterns {
        emit_pattern(out, pattern);
    }
    out.push_str(&format!("</{}>", tag));
}

fn emit_pattern(out: &mut String, pattern: &Pattern) {
    match pattern {
        Pattern::Element(name, content) => {
            out.push_str("<element>");
            emit_name_class(out, name);
            emit_pattern(out, content);
            out.push_str("</element>");
        }
        Pattern::Attribute(name, content) => {
            out.push_str("<attribute>");
            emit_name_class(out, name);
            emit_pattern(out, content);
            out.push_str("</attribute>");
        }
        Pattern::Group(items) => emit_wrapped(out, "group", items),
        Pattern::Choice(items) => emit_wrapped(out, "choice", items),
        Pattern::Interleave(items) => emit_wrapped(out, "interleave", items),
        Pattern::Optional(inner) => emit_wrapped(out, "optional", std::slice::from_ref(&**inner)),
        Pattern::ZeroOrMore(inner) => emit_wrapped(out, "zeroOrMore", std::slice::from_ref(&**inner)),
        Pattern::OneOrMore(inner) => emit_wrapped(out, "oneOrMore", std::slice::from_ref(&**inner)),
        Pattern::List(inner) => emit_wrapped(out, "list", std::slice::from_ref(&**inner)),
        Pattern::Mixed(inner) => emit_wrapped(out, "mixed", std::slice::from_ref(&**inner)),
        Pattern::Empty => out.push_str("<empty/>"),
        Pattern::Text => out.push_str("<text/>"),
        Pattern::NotAllowed => out.push_str("<notAllowed/>"),
        Pattern::Ref(name) => out.push_str(&format!("<ref name=\"{}\"/>", escape(name))),
        Pattern::ParentRef(name) => {
            out.push_str(&format!("<parentRef name=\"{}\"/>", escape(name)));
        }
        Pattern::ExternalRef { href, ns } => {
            out.push_str(&format!("<externalRef href=\"{}\"", escape(href)));
            if let Some(ns) = ns {
                out.push_str(&format!(" ns=\"{}\"", escape(ns)));
            }
            out.push_str("/>");
        }
        Pattern::Grammar(components) => {
            out.push_str("<grammar>");
            emit_components(out, components);
            out.push_str("</grammar>");
        }
        Pattern::Data {
            library,
            type_name,
            params,
            except,
        } => {
            out.push_str(&format!(
                "<data datatypeLibrary=\"{}\" type=\"{}\">",
                escape(library),
                escape(type_name)
            ));
            for (name, value) in params {
                out.push_str(&format!(
                    "<param name=\"{}\">{}</param>",
                    escape(name),
                    escape(value)
                ));
            }
            if let Some(except) = except {
                emit_wrapped(out, "except", std::slice::from_ref(&**except));
            }
            out.push_str("</data>");
        }
        Pattern::Value {
            library,
            type_name,
            value,
        } => {
            out.push_str(&format!(
                "<value datatypeLibrary=\"{}\" type=\"{}\">{}</value>",
                escape(library),
                escape(type_name),
                escape(value)
            ));
        }
    }
}
