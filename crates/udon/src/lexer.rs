//! Tokenizer for udon source text.
//!
//! Produces an ordered token stream with 1-based line/column positions plus
//! a bag of collected comment bodies. Keywords are matched
//! case-insensitively; identifiers stay case-sensitive. A `$name<body>`
//! template lexeme captures its delimited body verbatim (strings inside the
//! body do not affect bracket depth).

use crate::error::{ErrorKind, UdonError, UdonResult};

/// Keywords of the language, always stored lowercased in `Token::text`.
pub const KEYWORDS: &[&str] = &[
    "function", "return", "var", "true", "false", "none", "if", "else", "while", "for", "foreach", "in", "break",
    "continue", "switch", "case", "default",
];

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    Keyword,
    Symbol,
    Template,
    EndOfFile,
    Unknown,
}

/// A single token with its source position.
///
/// For `Template` tokens, `text` holds `$name` and `template_body` the raw
/// delimited body. For `String` tokens, `text` holds the unescaped content.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub column: u32,
    pub template_body: String,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            column,
            template_body: String::new(),
        }
    }

    /// True for a symbol token with exactly this text.
    #[must_use]
    pub fn is_symbol(&self, text: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == text
    }

    /// True for a keyword token with exactly this (lowercase) text.
    #[must_use]
    pub fn is_keyword(&self, text: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text == text
    }
}

/// Tokenizer output: the token stream plus collected comment bodies.
#[derive(Debug)]
pub struct LexOutput {
    pub tokens: Vec<Token>,
    pub comments: Vec<String>,
}

struct Lexer<'s> {
    src: &'s [u8],
    pos: usize,
    line: u32,
    column: u32,
    tokens: Vec<Token>,
    comments: Vec<String>,
}

/// Tokenizes source text.
///
/// Fails only on lexical errors that cannot be represented as tokens:
/// an unterminated string or block comment. Malformed templates degrade to
/// an `Unknown` token so the parser can report the error at the call site.
pub fn tokenize(source: &str) -> UdonResult<LexOutput> {
    let mut lexer = Lexer {
        src: source.as_bytes(),
        pos: 0,
        line: 1,
        column: 1,
        tokens: Vec::new(),
        comments: Vec::new(),
    };
    lexer.run()?;
    Ok(LexOutput {
        tokens: lexer.tokens,
        comments: lexer.comments,
    })
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn matching_bracket(open: u8) -> Option<u8> {
    match open {
        b'(' => Some(b')'),
        b'[' => Some(b']'),
        b'{' => Some(b'}'),
        b'<' => Some(b'>'),
        _ => None,
    }
}

impl Lexer<'_> {
    fn run(&mut self) -> UdonResult<()> {
        while let Some(c) = self.peek() {
            match c {
                b' ' | b'\t' | b'\r' => self.bump(),
                b'\n' => self.bump(),
                b'$' if self.peek_at(1).is_some_and(is_ident_start) => self.template(),
                b'#' if self.column == 1 => self.line_comment(1),
                b'/' if self.peek_at(1) == Some(b'/') => self.line_comment(2),
                b'/' if self.peek_at(1) == Some(b'*') => self.block_comment()?,
                b'0'..=b'9' => self.number(),
                b'"' | b'\'' => self.string(c)?,
                c if is_ident_start(c) => self.identifier(),
                _ => self.symbol(),
            }
        }
        self.tokens
            .push(Token::new(TokenKind::EndOfFile, "", self.line, self.column));
        Ok(())
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    /// Advances one byte, tracking line/column.
    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += 1;
            if c == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn push(&mut self, kind: TokenKind, text: impl Into<String>, line: u32, column: u32) {
        self.tokens.push(Token::new(kind, text, line, column));
    }

    fn slice(&self, start: usize, end: usize) -> &str {
        // The lexer only splits at ASCII boundaries it has inspected.
        std::str::from_utf8(&self.src[start..end]).unwrap_or("")
    }

    fn line_comment(&mut self, marker_len: usize) {
        for _ in 0..marker_len {
            self.bump();
        }
        let start = self.pos;
        while self.peek().is_some_and(|c| c != b'\n') {
            self.bump();
        }
        let body = self.slice(start, self.pos).to_owned();
        self.comments.push(body);
    }

    fn block_comment(&mut self) -> UdonResult<()> {
        let (line, column) = (self.line, self.column);
        self.bump();
        self.bump();
        let start = self.pos;
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(b'*'), Some(b'/')) => break,
                (Some(_), _) => self.bump(),
                (None, _) => {
                    return Err(UdonError::new(ErrorKind::Lex, line, column, "Unterminated block comment"));
                }
            }
        }
        let body = self.slice(start, self.pos).to_owned();
        self.comments.push(body);
        self.bump();
        self.bump();
        Ok(())
    }

    fn number(&mut self) {
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
                continue;
            }
            // A '.' belongs to the number unless it starts a ".." operator.
            if c == b'.' && self.peek_at(1) != Some(b'.') {
                self.bump();
                continue;
            }
            break;
        }
        let text = self.slice(start, self.pos).to_owned();
        self.push(TokenKind::Number, text, line, column);
    }

    fn identifier(&mut self) {
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.bump();
        }
        let text = self.slice(start, self.pos);
        let lower = text.to_ascii_lowercase();
        if KEYWORDS.contains(&lower.as_str()) {
            self.push(TokenKind::Keyword, lower, line, column);
        } else {
            let text = text.to_owned();
            self.push(TokenKind::Identifier, text, line, column);
        }
    }

    fn string(&mut self, quote: u8) -> UdonResult<()> {
        let (line, column) = (self.line, self.column);
        self.bump();
        let mut literal = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(UdonError::new(ErrorKind::Lex, line, column, "Unterminated string literal"));
                }
                Some(c) if c == quote => {
                    self.bump();
                    break;
                }
                Some(b'\\') if self.peek_at(1).is_some_and(|c| c.is_ascii()) => {
                    let esc = self.peek_at(1).unwrap_or(0);
                    literal.push(match esc {
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        b'0' => '\0',
                        b'b' => '\u{8}',
                        b'f' => '\u{c}',
                        // Unknown escape preserves the following character.
                        other => char::from(other),
                    });
                    self.bump();
                    self.bump();
                }
                Some(b'\\') if self.peek_at(1).is_some() => {
                    // Unknown escape of a non-ASCII character: drop the
                    // backslash; the next iteration copies the character.
                    self.bump();
                }
                Some(c) if c.is_ascii() => {
                    literal.push(char::from(c));
                    self.bump();
                }
                Some(_) => {
                    // Copy the full UTF-8 sequence; the source is valid
                    // UTF-8, so promoting single bytes would corrupt it.
                    let start = self.pos;
                    self.bump();
                    while self.peek().is_some_and(|c| c & 0xC0 == 0x80) {
                        self.bump();
                    }
                    let seq = self.slice(start, self.pos).to_owned();
                    literal.push_str(&seq);
                }
            }
        }
        self.push(TokenKind::String, literal, line, column);
        Ok(())
    }

    /// Lexes `$name<delimited-body>`. Any of `() [] {} <>` delimit the body;
    /// strings inside the body are skipped while tracking bracket depth. A
    /// missing opening bracket or an unterminated body degrades to an
    /// `Unknown` token carrying the `$name` text.
    fn template(&mut self) {
        let (line, column) = (self.line, self.column);
        self.bump(); // '$'
        let name_start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.bump();
        }
        let name = format!("${}", self.slice(name_start, self.pos));
        while self.peek() == Some(b' ') || self.peek() == Some(b'\t') {
            self.bump();
        }

        let Some(close) = self.peek().and_then(matching_bracket) else {
            self.push(TokenKind::Unknown, name, line, column);
            return;
        };
        let open = self.peek().unwrap_or(0);
        self.bump();

        let body_start = self.pos;
        let mut depth: u32 = 1;
        let mut in_quote: Option<u8> = None;
        loop {
            let Some(c) = self.peek() else {
                // Unterminated body: surface as Unknown, parse reports it.
                self.push(TokenKind::Unknown, name, line, column);
                return;
            };
            if let Some(q) = in_quote {
                if c == b'\\' && self.peek_at(1).is_some() {
                    self.bump();
                } else if c == q {
                    in_quote = None;
                }
                self.bump();
                continue;
            }
            match c {
                b'"' | b'\'' => in_quote = Some(c),
                _ if c == open => depth += 1,
                _ if c == close => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            self.bump();
        }
        let body = self.slice(body_start, self.pos).to_owned();
        self.bump(); // closing delimiter

        let mut token = Token::new(TokenKind::Template, name, line, column);
        token.template_body = body;
        self.tokens.push(token);
    }

    /// Greedy multi-character symbol recognition, longest first.
    fn symbol(&mut self) {
        let (line, column) = (self.line, self.column);
        let c = self.peek().unwrap_or(0);
        let n = self.peek_at(1).unwrap_or(0);

        if c == b'.' && n == b'.' && self.peek_at(2) == Some(b'.') {
            self.bump();
            self.bump();
            self.bump();
            self.push(TokenKind::Symbol, "...", line, column);
            return;
        }
        let two = [c, n];
        let multi = matches!(
            &two,
            b".." | b"==" | b"!=" | b"<=" | b">=" | b"->" | b"&&" | b"||" | b"++" | b"--" | b"+=" | b"-=" | b"*="
                | b"/="
        );
        if multi {
            self.bump();
            self.bump();
            let text = String::from_utf8_lossy(&two).into_owned();
            self.push(TokenKind::Symbol, text, line, column);
            return;
        }

        if !c.is_ascii() {
            // A non-ASCII character outside any string: take the whole
            // UTF-8 sequence so the parse error shows the character.
            let start = self.pos;
            self.bump();
            while self.peek().is_some_and(|b| b & 0xC0 == 0x80) {
                self.bump();
            }
            let text = self.slice(start, self.pos).to_owned();
            self.push(TokenKind::Unknown, text, line, column);
            return;
        }

        const SINGLE: &[u8] = b"()[]{};,:?.+-*/%=!<>&|";
        self.bump();
        if SINGLE.contains(&c) {
            self.push(TokenKind::Symbol, char::from(c).to_string(), line, column);
        } else {
            self.push(TokenKind::Unknown, char::from(c).to_string(), line, column);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().tokens.iter().map(|t| t.kind).collect()
    }

    fn texts(source: &str) -> Vec<String> {
        tokenize(source).unwrap().tokens.iter().map(|t| t.text.clone()).collect()
    }

    #[test]
    fn test_keywords_case_insensitive() {
        let toks = tokenize("Function WHILE foreach").unwrap().tokens;
        assert_eq!(toks[0].kind, TokenKind::Keyword);
        assert_eq!(toks[0].text, "function");
        assert_eq!(toks[1].text, "while");
        assert_eq!(toks[2].text, "foreach");
    }

    #[test]
    fn test_identifiers_case_sensitive() {
        let toks = tokenize("Foo foo").unwrap().tokens;
        assert_eq!(toks[0].text, "Foo");
        assert_eq!(toks[1].text, "foo");
        assert!(toks.iter().take(2).all(|t| t.kind == TokenKind::Identifier));
    }

    #[test]
    fn test_positions_are_one_based() {
        let toks = tokenize("a\n  b").unwrap().tokens;
        assert_eq!((toks[0].line, toks[0].column), (1, 1));
        assert_eq!((toks[1].line, toks[1].column), (2, 3));
    }

    #[test]
    fn test_multi_char_symbols() {
        assert_eq!(
            texts("... .. == != <= >= -> && || ++ -- += -= *= /="),
            vec![
                "...", "..", "==", "!=", "<=", ">=", "->", "&&", "||", "++", "--", "+=", "-=", "*=", "/=", ""
            ]
        );
    }

    #[test]
    fn test_dots_greedy() {
        // ".." then "." — not three separate dots
        assert_eq!(texts("..."), vec!["...", ""]);
        assert_eq!(texts(".."), vec!["..", ""]);
    }

    #[test]
    fn test_string_escapes() {
        let toks = tokenize(r#""a\n\t\\\"b" '\q'"#).unwrap().tokens;
        assert_eq!(toks[0].text, "a\n\t\\\"b");
        // unknown escape preserves the following character
        assert_eq!(toks[1].text, "q");
    }

    #[test]
    fn test_unterminated_string_errors() {
        let err = tokenize("\"abc").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lex);
        assert!(err.message.contains("Unterminated string"));
    }

    #[test]
    fn test_non_ascii_string_content_preserved() {
        // multi-byte characters must survive tokenization verbatim
        let toks = tokenize("\"café\" \"日本\"").unwrap().tokens;
        assert_eq!(toks[0].text, "café");
        assert_eq!(toks[1].text, "日本");
    }

    #[test]
    fn test_unknown_escape_of_non_ascii_char() {
        let toks = tokenize("\"\\é\"").unwrap().tokens;
        assert_eq!(toks[0].text, "é");
    }

    #[test]
    fn test_non_ascii_outside_string_is_whole_char_unknown() {
        let toks = tokenize("é").unwrap().tokens;
        assert_eq!(toks[0].kind, TokenKind::Unknown);
        assert_eq!(toks[0].text, "é");
    }

    #[test]
    fn test_numbers() {
        let toks = tokenize("12 3.5 0.25").unwrap().tokens;
        assert_eq!(toks[0].text, "12");
        assert_eq!(toks[1].text, "3.5");
        assert_eq!(toks[2].text, "0.25");
        assert!(toks.iter().take(3).all(|t| t.kind == TokenKind::Number));
    }

    #[test]
    fn test_number_does_not_swallow_concat() {
        assert_eq!(texts("1..2"), vec!["1", "..", "2", ""]);
    }

    #[test]
    fn test_comments_collected() {
        let out = tokenize("# top\nvar x = 1 // end\n/* block\nbody */ var y = 2").unwrap();
        assert_eq!(out.comments.len(), 3);
        assert_eq!(out.comments[0], " top");
        assert_eq!(out.comments[1], " end");
        assert_eq!(out.comments[2], " block\nbody ");
    }

    #[test]
    fn test_hash_comment_only_at_column_one() {
        // '#' past column 1 is not a comment marker
        let toks = tokenize("a #b").unwrap().tokens;
        assert_eq!(toks[1].kind, TokenKind::Unknown);
        assert_eq!(toks[1].text, "#");
    }

    #[test]
    fn test_template_token() {
        let toks = tokenize("$html(<p>{x}</p>)").unwrap().tokens;
        assert_eq!(toks[0].kind, TokenKind::Template);
        assert_eq!(toks[0].text, "$html");
        assert_eq!(toks[0].template_body, "<p>{x}</p>");
    }

    #[test]
    fn test_template_all_bracket_pairs() {
        for (src, body) in [
            ("$t(a b)", "a b"),
            ("$t[a b]", "a b"),
            ("$t{a b}", "a b"),
            ("$t<a b>", "a b"),
        ] {
            let toks = tokenize(src).unwrap().tokens;
            assert_eq!(toks[0].kind, TokenKind::Template, "{src}");
            assert_eq!(toks[0].template_body, body, "{src}");
        }
    }

    #[test]
    fn test_template_nested_and_quoted_delimiters() {
        let toks = tokenize("$t{ {\"}\"} }").unwrap().tokens;
        assert_eq!(toks[0].kind, TokenKind::Template);
        assert_eq!(toks[0].template_body, " {\"}\"} ");
    }

    #[test]
    fn test_malformed_template_is_unknown() {
        let toks = tokenize("$t + 1").unwrap().tokens;
        assert_eq!(toks[0].kind, TokenKind::Unknown);
        assert_eq!(toks[0].text, "$t");

        let toks = tokenize("$t(never closed").unwrap().tokens;
        assert_eq!(toks[0].kind, TokenKind::Unknown);
    }

    #[test]
    fn test_eof_token_terminates_stream() {
        let toks = tokenize("").unwrap().tokens;
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].kind, TokenKind::EndOfFile);
    }

    #[test]
    fn test_unknown_character() {
        assert_eq!(kinds("@"), vec![TokenKind::Unknown, TokenKind::EndOfFile]);
    }
}
