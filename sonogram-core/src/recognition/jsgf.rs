//! Compiler and matcher for the JSGF subset understood by [`TextEngine`].
//!
//! ## Supported syntax
//!
//! ```text
//! #JSGF V1.0;
//! grammar editor;
//! import <other.*>;                       // skipped
//! public <command> = <verb> <noun>;
//! <verb> = open {action} | /2/ close {action};
//! <noun> = (file | "the window") {target} [please];
//! <count> = (one | two)+ {repeat=yes} {options.verbose=true};
//! ```
//!
//! Tags carry the semantics: `{key=value}` assigns a literal, `{key}` assigns
//! the words matched by the preceding item, dotted keys nest. Matching is
//! case-insensitive and must consume the whole utterance.
//!
//! [`TextEngine`]: super::TextEngine

use std::collections::HashMap;

use crate::error::{Result, SonogramError};
use crate::protocol::SemanticValue;

use super::RecognitionResult;

/// Rule nesting limit; also stops left-recursive rules.
const MAX_DEPTH: usize = 64;
/// Cap on partial derivations tracked per expansion.
const MAX_DERIVATIONS: usize = 256;

#[derive(Debug, Clone, PartialEq)]
enum Expansion {
    Word(String),
    Rule(String),
    Seq(Vec<Expansion>),
    Alt(Vec<Expansion>),
    Optional(Box<Expansion>),
    Repeat { inner: Box<Expansion>, min: usize },
    Tag(Tag),
    /// `<VOID>`: never matches.
    Void,
}

#[derive(Debug, Clone, PartialEq)]
struct Tag {
    path: Vec<String>,
    value: TagValue,
}

#[derive(Debug, Clone, PartialEq)]
enum TagValue {
    Literal(String),
    /// Words matched by the item before the tag.
    Preceding,
}

/// A compiled grammar, ready to match utterances.
#[derive(Debug, Clone)]
pub struct CompiledGrammar {
    name: String,
    rules: HashMap<String, Expansion>,
    /// Public rules in declaration order; tried first to last.
    public: Vec<String>,
}

impl CompiledGrammar {
    /// Parse and validate grammar text.
    ///
    /// # Errors
    /// `SonogramError::GrammarLoad` describing the first problem found.
    pub fn compile(source: &str) -> Result<Self> {
        let body = strip_header(source)?;
        let tokens = tokenize(body)?;
        let grammar = Parser { tokens, pos: 0 }.parse_grammar()?;
        grammar.validate()?;
        Ok(grammar)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_rules(&self) -> &[String] {
        &self.public
    }

    /// Match `utterance` against the public rules.
    pub fn recognize(&self, utterance: &str) -> Option<RecognitionResult> {
        let words: Vec<String> = utterance.split_whitespace().map(str::to_lowercase).collect();
        if words.is_empty() {
            return None;
        }

        for name in &self.public {
            let Some(body) = self.rules.get(name) else {
                continue;
            };
            let complete = self
                .expand(body, &words, 0, 0)
                .into_iter()
                .find(|d| d.end == words.len());

            if let Some(derivation) = complete {
                let mut semantics = SemanticValue::default();
                for (path, value) in derivation.tags {
                    let path: Vec<&str> = path.iter().map(String::as_str).collect();
                    semantics.insert_path(&path, SemanticValue::text(value));
                }
                return Some(RecognitionResult {
                    text: utterance.split_whitespace().collect::<Vec<_>>().join(" "),
                    semantics,
                });
            }
        }
        None
    }

    fn validate(&self) -> Result<()> {
        if self.public.is_empty() {
            return Err(load_error("grammar declares no public rule"));
        }
        for body in self.rules.values() {
            let mut missing = None;
            visit_rule_refs(body, &mut |name| {
                if missing.is_none() && !self.rules.contains_key(name) {
                    missing = Some(name.to_string());
                }
            });
            if let Some(name) = missing {
                return Err(load_error(format!("reference to undefined rule <{name}>")));
            }
        }
        Ok(())
    }

    fn expand(
        &self,
        expr: &Expansion,
        words: &[String],
        start: usize,
        depth: usize,
    ) -> Vec<Derivation> {
        if depth > MAX_DEPTH {
            return Vec::new();
        }
        match expr {
            Expansion::Word(w) => {
                if words.get(start) == Some(w) {
                    vec![Derivation::empty(start + 1)]
                } else {
                    Vec::new()
                }
            }
            Expansion::Rule(name) => self
                .rules
                .get(name)
                .map(|body| self.expand(body, words, start, depth + 1))
                .unwrap_or_default(),
            Expansion::Void => Vec::new(),
            Expansion::Tag(_) => self.expand_seq(std::slice::from_ref(expr), words, start, depth),
            Expansion::Seq(items) => self.expand_seq(items, words, start, depth),
            Expansion::Alt(alternatives) => {
                let mut out = Vec::new();
                for alternative in alternatives {
                    out.extend(self.expand(alternative, words, start, depth));
                    if out.len() >= MAX_DERIVATIONS {
                        out.truncate(MAX_DERIVATIONS);
                        break;
                    }
                }
                out
            }
            Expansion::Optional(inner) => {
                let mut out = vec![Derivation::empty(start)];
                out.extend(self.expand(inner, words, start, depth));
                out.truncate(MAX_DERIVATIONS);
                out
            }
            Expansion::Repeat { inner, min } => {
                let mut out = Vec::new();
                if *min == 0 {
                    out.push(Derivation::empty(start));
                }
                let mut frontier = vec![Derivation::empty(start)];
                while !frontier.is_empty() && out.len() < MAX_DERIVATIONS {
                    let mut next = Vec::new();
                    for base in &frontier {
                        for step in self.expand(inner, words, base.end, depth) {
                            // Only progress counts; an empty iteration would loop forever.
                            if step.end > base.end {
                                let mut tags = base.tags.clone();
                                tags.extend(step.tags);
                                next.push(Derivation {
                                    end: step.end,
                                    tags,
                                });
                            }
                        }
                    }
                    next.truncate(MAX_DERIVATIONS);
                    out.extend(next.iter().cloned());
                    frontier = next;
                }
                out.truncate(MAX_DERIVATIONS);
                out
            }
        }
    }

    fn expand_seq(
        &self,
        items: &[Expansion],
        words: &[String],
        start: usize,
        depth: usize,
    ) -> Vec<Derivation> {
        let mut states = vec![SeqState {
            end: start,
            tags: Vec::new(),
            last: (start, start),
        }];

        for item in items {
            let mut next = Vec::new();
            for state in &states {
                match item {
                    Expansion::Tag(tag) => {
                        let value = match &tag.value {
                            TagValue::Literal(v) => v.clone(),
                            TagValue::Preceding => words[state.last.0..state.last.1].join(" "),
                        };
                        let mut tags = state.tags.clone();
                        tags.push((tag.path.clone(), value));
                        next.push(SeqState {
                            end: state.end,
                            tags,
                            last: state.last,
                        });
                    }
                    _ => {
                        for d in self.expand(item, words, state.end, depth) {
                            let mut tags = state.tags.clone();
                            tags.extend(d.tags);
                            next.push(SeqState {
                                end: d.end,
                                tags,
                                last: (state.end, d.end),
                            });
                        }
                    }
                }
                if next.len() >= MAX_DERIVATIONS {
                    break;
                }
            }
            next.truncate(MAX_DERIVATIONS);
            states = next;
            if states.is_empty() {
                break;
            }
        }

        states
            .into_iter()
            .map(|s| Derivation {
                end: s.end,
                tags: s.tags,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Derivation {
    end: usize,
    tags: Vec<(Vec<String>, String)>,
}

impl Derivation {
    fn empty(end: usize) -> Self {
        Self {
            end,
            tags: Vec::new(),
        }
    }
}

struct SeqState {
    end: usize,
    tags: Vec<(Vec<String>, String)>,
    /// Word span of the most recent non-tag item.
    last: (usize, usize),
}

fn visit_rule_refs(expr: &Expansion, f: &mut impl FnMut(&str)) {
    match expr {
        Expansion::Rule(name) => f(name),
        Expansion::Seq(items) | Expansion::Alt(items) => {
            for item in items {
                visit_rule_refs(item, f);
            }
        }
        Expansion::Optional(inner) | Expansion::Repeat { inner, .. } => visit_rule_refs(inner, f),
        Expansion::Word(_) | Expansion::Tag(_) | Expansion::Void => {}
    }
}

fn load_error(msg: impl Into<String>) -> SonogramError {
    SonogramError::GrammarLoad(msg.into())
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

fn strip_header(source: &str) -> Result<&str> {
    let trimmed = source.trim_start_matches('\u{feff}').trim_start();
    let rest = trimmed
        .strip_prefix("#JSGF")
        .ok_or_else(|| load_error("missing `#JSGF` header"))?;
    let end = rest
        .find(';')
        .ok_or_else(|| load_error("unterminated `#JSGF` header"))?;
    let version = rest[..end]
        .split_whitespace()
        .next()
        .ok_or_else(|| load_error("`#JSGF` header has no version"))?;
    if !version.starts_with("V1.") {
        return Err(load_error(format!("unsupported JSGF version {version}")));
    }
    Ok(&rest[end + 1..])
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    RuleRef(String),
    Tag(String),
    Equals,
    Semi,
    Pipe,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Star,
    Plus,
}

fn is_special(c: char) -> bool {
    matches!(
        c,
        ';' | '=' | '|' | '(' | ')' | '[' | ']' | '*' | '+' | '{' | '}' | '<' | '>' | '/' | '"'
    )
}

fn tokenize(body: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    // Index of the first `close` at or after `from`.
    let find = |from: usize, close: char| {
        chars[from..]
            .iter()
            .position(|c| *c == close)
            .map(|p| from + p)
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                i = find(i, '\n').map_or(chars.len(), |p| p + 1);
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let close = (i + 2..chars.len().saturating_sub(1))
                    .find(|&j| chars[j] == '*' && chars[j + 1] == '/')
                    .ok_or_else(|| load_error("unterminated comment"))?;
                i = close + 2;
            }
            '/' => {
                // `/weight/` prefix: accepted and ignored.
                let close = find(i + 1, '/').ok_or_else(|| load_error("unterminated weight"))?;
                i = close + 1;
            }
            '<' => {
                let close = find(i + 1, '>').ok_or_else(|| load_error("unterminated rule name"))?;
                let name: String = chars[i + 1..close].iter().collect::<String>().trim().to_string();
                if name.is_empty() {
                    return Err(load_error("empty rule name"));
                }
                tokens.push(Token::RuleRef(name));
                i = close + 1;
            }
            '{' => {
                let close = find(i + 1, '}').ok_or_else(|| load_error("unterminated tag"))?;
                tokens.push(Token::Tag(chars[i + 1..close].iter().collect()));
                i = close + 1;
            }
            '"' => {
                let close = find(i + 1, '"').ok_or_else(|| load_error("unterminated quoted token"))?;
                tokens.push(Token::Quoted(chars[i + 1..close].iter().collect()));
                i = close + 1;
            }
            '=' | ';' | '|' | '(' | ')' | '[' | ']' | '*' | '+' => {
                tokens.push(match c {
                    '=' => Token::Equals,
                    ';' => Token::Semi,
                    '|' => Token::Pipe,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '*' => Token::Star,
                    _ => Token::Plus,
                });
                i += 1;
            }
            '}' | '>' => return Err(load_error(format!("unexpected `{c}`"))),
            _ => {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() && !is_special(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

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

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, context: &str) -> Result<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            Some(t) => Err(load_error(format!("expected {token:?} {context}, found {t:?}"))),
            None => Err(load_error(format!("expected {token:?} {context}, found end of grammar"))),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == keyword)
    }

    fn parse_grammar(mut self) -> Result<CompiledGrammar> {
        if !self.is_keyword("grammar") {
            return Err(load_error("missing `grammar <name>;` declaration"));
        }
        self.pos += 1;
        let name = match self.next() {
            Some(Token::Word(name)) => name,
            other => return Err(load_error(format!("invalid grammar name {other:?}"))),
        };
        self.expect(Token::Semi, "after grammar name")?;

        let mut rules = HashMap::new();
        let mut public = Vec::new();

        while self.peek().is_some() {
            if self.is_keyword("import") {
                while !matches!(self.next(), Some(Token::Semi) | None) {}
                continue;
            }

            let is_public = self.is_keyword("public");
            if is_public {
                self.pos += 1;
            }

            let rule = match self.next() {
                Some(Token::RuleRef(name)) => name,
                other => return Err(load_error(format!("expected rule name, found {other:?}"))),
            };
            self.expect(Token::Equals, &format!("after <{rule}>"))?;
            let body = self.parse_alternatives()?;
            self.expect(Token::Semi, &format!("at end of <{rule}>"))?;

            if rules.insert(rule.clone(), body).is_some() {
                return Err(load_error(format!("rule <{rule}> defined twice")));
            }
            if is_public {
                public.push(rule);
            }
        }

        Ok(CompiledGrammar {
            name,
            rules,
            public,
        })
    }

    fn parse_alternatives(&mut self) -> Result<Expansion> {
        let mut alternatives = vec![self.parse_sequence()?];
        while self.eat(&Token::Pipe) {
            alternatives.push(self.parse_sequence()?);
        }
        Ok(if alternatives.len() == 1 {
            alternatives.remove(0)
        } else {
            Expansion::Alt(alternatives)
        })
    }

    fn parse_sequence(&mut self) -> Result<Expansion> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None
                | Some(Token::Pipe)
                | Some(Token::RParen)
                | Some(Token::RBracket)
                | Some(Token::Semi) => break,
                Some(Token::Tag(content)) => {
                    let tag = parse_tag(content)?;
                    self.pos += 1;
                    items.push(Expansion::Tag(tag));
                    continue;
                }
                _ => {}
            }

            let mut unit = self.parse_unit()?;
            loop {
                if self.eat(&Token::Star) {
                    unit = Expansion::Repeat {
                        inner: Box::new(unit),
                        min: 0,
                    };
                } else if self.eat(&Token::Plus) {
                    unit = Expansion::Repeat {
                        inner: Box::new(unit),
                        min: 1,
                    };
                } else {
                    break;
                }
            }
            items.push(unit);
        }

        match items.len() {
            0 => Err(load_error("empty expansion")),
            1 if !matches!(items[0], Expansion::Tag(_)) => Ok(items.remove(0)),
            _ => Ok(Expansion::Seq(items)),
        }
    }

    fn parse_unit(&mut self) -> Result<Expansion> {
        match self.next() {
            Some(Token::Word(w)) => Ok(Expansion::Word(w.to_lowercase())),
            Some(Token::Quoted(q)) => {
                let mut words: Vec<Expansion> = q
                    .split_whitespace()
                    .map(|w| Expansion::Word(w.to_lowercase()))
                    .collect();
                match words.len() {
                    0 => Err(load_error("empty quoted token")),
                    1 => Ok(words.remove(0)),
                    _ => Ok(Expansion::Seq(words)),
                }
            }
            Some(Token::RuleRef(name)) => Ok(match name.as_str() {
                "NULL" => Expansion::Seq(Vec::new()),
                "VOID" => Expansion::Void,
                _ => Expansion::Rule(name),
            }),
            Some(Token::LParen) => {
                let inner = self.parse_alternatives()?;
                self.expect(Token::RParen, "to close group")?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let inner = self.parse_alternatives()?;
                self.expect(Token::RBracket, "to close optional group")?;
                Ok(Expansion::Optional(Box::new(inner)))
            }
            Some(other) => Err(load_error(format!("unexpected {other:?} in rule body"))),
            None => Err(load_error("unexpected end of grammar in rule body")),
        }
    }
}

fn parse_tag(content: &str) -> Result<Tag> {
    let content = content.trim();
    let (key, value) = match content.split_once('=') {
        Some((key, value)) => (key.trim(), Some(unquote(value.trim()).to_string())),
        None => (content, None),
    };

    let path: Vec<String> = key.split('.').map(|s| s.trim().to_string()).collect();
    let valid = path.iter().all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    });
    if !valid {
        return Err(load_error(format!("invalid tag {{{content}}}")));
    }

    Ok(Tag {
        path,
        value: value.map_or(TagValue::Preceding, TagValue::Literal),
    })
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDITOR: &str = r#"#JSGF V1.0;
        grammar editor;
        // commands understood by the editor
        public <command> = <verb> <noun>;
        <verb> = open {action} | close {action} | insert {action};
        <noun> = file {target} | window {target};
    "#;

    fn semantics_json(grammar: &CompiledGrammar, utterance: &str) -> Option<String> {
        grammar
            .recognize(utterance)
            .map(|r| serde_json::to_string(&r.semantics).unwrap())
    }

    #[test]
    fn compiles_minimal_grammar() {
        let grammar =
            CompiledGrammar::compile("#JSGF V1.0; grammar test; public <t> = hello;").unwrap();
        assert_eq!(grammar.name(), "test");
        assert_eq!(grammar.public_rules(), ["t".to_string()]);

        let result = grammar.recognize("Hello").unwrap();
        assert_eq!(result.text, "Hello");
        assert_eq!(serde_json::to_string(&result.semantics).unwrap(), "null");
        assert!(grammar.recognize("goodbye").is_none());
    }

    #[test]
    fn tags_capture_preceding_words() {
        let grammar = CompiledGrammar::compile(EDITOR).unwrap();
        assert_eq!(
            semantics_json(&grammar, "open file").as_deref(),
            Some(r#"{"action":"open","target":"file"}"#)
        );
        assert_eq!(
            semantics_json(&grammar, "Close   WINDOW").as_deref(),
            Some(r#"{"action":"close","target":"window"}"#)
        );
        assert!(grammar.recognize("open").is_none(), "must consume all words");
        assert!(grammar.recognize("open file now").is_none());
    }

    #[test]
    fn literal_and_nested_tags() {
        let grammar = CompiledGrammar::compile(
            r#"#JSGF V1.0 UTF-8 en;
            grammar nav;
            public <go> = go {action=move} (up | down) {direction.name} [by (one | two) {direction.count}];
            "#,
        )
        .unwrap();
        assert_eq!(
            semantics_json(&grammar, "go up").as_deref(),
            Some(r#"{"action":"move","direction":{"name":"up"}}"#)
        );
        assert_eq!(
            semantics_json(&grammar, "go down by two").as_deref(),
            Some(r#"{"action":"move","direction":{"name":"down","count":"two"}}"#)
        );
    }

    #[test]
    fn repetition_weights_quotes_and_comments() {
        let grammar = CompiledGrammar::compile(
            r#"#JSGF V1.0;
            grammar misc;
            /* block
               comment */
            public <digits> = (one | two | three)+ {value};
            public <say> = say /10/ "hello world" {phrase='greeting'} | say nothing*;
            "#,
        )
        .unwrap();
        assert_eq!(
            semantics_json(&grammar, "one two three one").as_deref(),
            Some(r#"{"value":"one two three one"}"#)
        );
        assert_eq!(
            semantics_json(&grammar, "say hello world").as_deref(),
            Some(r#"{"phrase":"greeting"}"#)
        );
        assert!(grammar.recognize("say").is_some());
        assert!(grammar.recognize("say nothing nothing").is_some());
    }

    #[test]
    fn imports_are_skipped() {
        let grammar = CompiledGrammar::compile(
            "#JSGF V1.0; grammar g; import <com.example.*>; public <a> = yes;",
        )
        .unwrap();
        assert!(grammar.recognize("yes").is_some());
    }

    #[test]
    fn left_recursion_terminates() {
        let grammar =
            CompiledGrammar::compile("#JSGF V1.0; grammar g; public <a> = <a> x | y;").unwrap();
        assert!(grammar.recognize("y").is_some());
    }

    #[test]
    fn rejects_malformed_grammars() {
        let cases = [
            ("grammar g; public <a> = x;", "missing `#JSGF`"),
            ("#JSGF V2.0; grammar g; public <a> = x;", "unsupported JSGF version"),
            ("#JSGF V1.0; public <a> = x;", "missing `grammar"),
            ("#JSGF V1.0; grammar g; <a> = x;", "no public rule"),
            ("#JSGF V1.0; grammar g; public <a> = <b>;", "undefined rule <b>"),
            ("#JSGF V1.0; grammar g; public <a> = x; <a> = y;", "defined twice"),
            ("#JSGF V1.0; grammar g; public <a> = x {tag;", "unterminated tag"),
            ("#JSGF V1.0; grammar g; public <a> = ;", "empty expansion"),
            ("#JSGF V1.0; grammar g; public <a> = (x | y;", "to close group"),
            ("#JSGF V1.0; grammar g; public <a> = x {=v};", "invalid tag"),
            ("#JSGF V1.0; grammar g; public <a> = x", "end of <a>"),
        ];
        for (source, expected) in cases {
            let err = CompiledGrammar::compile(source).unwrap_err();
            assert!(
                matches!(err, SonogramError::GrammarLoad(_)),
                "{source}: {err}"
            );
            assert!(
                err.to_string().contains(expected),
                "{source}: expected `{expected}` in `{err}`"
            );
        }
    }
}
