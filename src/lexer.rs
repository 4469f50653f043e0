use crate::symbol::Syntax;
use crate::token::{Span, Token, TokenKind};

/// A lexical error: unclosed tag, unterminated string, bad number or an
/// unrecognized character.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{template}:{line}: {message}")]
pub struct LexError {
    pub template: String,
    pub line: usize,
    pub pos: usize,
    pub message: String,
}

impl LexError {
    pub fn from_token(template: &str, token: &Token) -> Self {
        LexError {
            template: template.to_string(),
            line: token.span.line,
            pos: token.span.pos,
            message: token.value.clone(),
        }
    }
}

/// Lazy template scanner.
///
/// Outside tags everything up to the next tag start becomes one `RawText`
/// token. Inside tags the scanner tries the tag end, then the symbol table,
/// then the generic number/string/identifier rules. The first error is
/// emitted as a `TokenKind::Error` token and ends the stream.
pub struct Lexer<'a> {
    name: String,
    source: &'a str,
    syntax: &'a Syntax,
    pos: usize,
    line: usize,
    in_tag: bool,
    /// Set by `-%]`: trim the leading whitespace of the next text run.
    chomp_next: bool,
    last_kind: Option<TokenKind>,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(name: &str, source: &'a str, syntax: &'a Syntax) -> Self {
        Lexer {
            name: name.to_string(),
            source,
            syntax,
            pos: 0,
            line: 1,
            in_tag: false,
            chomp_next: false,
            last_kind: None,
            done: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collects the whole stream, stopping at the first error.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next() {
            if token.kind == TokenKind::Error {
                return Err(LexError::from_token(&self.name, &token));
            }
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn span(&self) -> Span {
        Span::new(self.pos, self.line)
    }

    /// Moves forward `n` bytes, keeping the line counter in sync.
    fn bump(&mut self, n: usize) {
        let end = (self.pos + n).min(self.source.len());
        self.line += self.source[self.pos..end].matches('\n').count();
        self.pos = end;
    }

    fn error(&self, span: Span, message: String) -> Token {
        Token::new(TokenKind::Error, span, message)
    }

    fn lex_text(&mut self) -> Token {
        loop {
            if self.chomp_next {
                self.chomp_next = false;
                let mut n = 0;
                for ch in self.rest().chars() {
                    if ch == '\n' {
                        n += 1;
                        break;
                    }
                    if !ch.is_whitespace() {
                        break;
                    }
                    n += ch.len_utf8();
                }
                self.bump(n);
            }

            let syntax = self.syntax;
            let rest = self.rest();
            let span = self.span();
            if rest.is_empty() {
                return Token::new(TokenKind::Eof, span, "");
            }

            let tag_start = syntax.tag_start.as_str();
            match rest.find(tag_start) {
                None => {
                    self.bump(rest.len());
                    return Token::new(TokenKind::RawText, span, rest);
                }
                Some(0) => {
                    let after = &rest[tag_start.len()..];
                    if after.starts_with('#') {
                        // comment tag, dropped entirely
                        match after.find(syntax.tag_end.as_str()) {
                            Some(end) => {
                                self.bump(tag_start.len() + end + syntax.tag_end.len());
                                continue;
                            }
                            None => {
                                self.bump(rest.len());
                                return self.error(
                                    self.span(),
                                    format!(
                                        "unclosed comment tag: expected '{}' before end of input",
                                        syntax.tag_end
                                    ),
                                );
                            }
                        }
                    }
                    self.bump(tag_start.len());
                    if self.rest().starts_with('-') {
                        self.bump(1);
                    }
                    self.in_tag = true;
                    return Token::new(TokenKind::TagStart, span, tag_start);
                }
                Some(idx) => {
                    let mut text = &rest[..idx];
                    if rest[idx + tag_start.len()..].starts_with('-') {
                        text = text.trim_end();
                    }
                    self.bump(idx);
                    if text.is_empty() {
                        continue;
                    }
                    return Token::new(TokenKind::RawText, span, text);
                }
            }
        }
    }

    fn skip_blank(&mut self) {
        let syntax = self.syntax;
        loop {
            let rest = self.rest();
            let ws: usize = rest
                .chars()
                .take_while(|c| c.is_whitespace())
                .map(char::len_utf8)
                .sum();
            if ws > 0 {
                self.bump(ws);
                continue;
            }
            if rest.starts_with('#') {
                // `# comment` runs to the end of the line or the tag end
                let tag_end = syntax.tag_end.as_str();
                let mut n = 0;
                for (i, ch) in rest.char_indices() {
                    if ch == '\n' || rest[i..].starts_with(tag_end) {
                        break;
                    }
                    if ch == '-' && rest[i + 1..].starts_with(tag_end) {
                        break;
                    }
                    n = i + ch.len_utf8();
                }
                self.bump(n);
                continue;
            }
            break;
        }
    }

    fn lex_tag(&mut self) -> Token {
        self.skip_blank();

        let syntax = self.syntax;
        let rest = self.rest();
        let span = self.span();
        let tag_end = syntax.tag_end.as_str();

        if rest.is_empty() {
            return self.error(
                span,
                format!("unclosed tag: expected '{}' before end of input", tag_end),
            );
        }

        if rest.starts_with('-') && rest[1..].starts_with(tag_end) {
            self.bump(1 + tag_end.len());
            self.in_tag = false;
            self.chomp_next = true;
            return Token::new(TokenKind::TagEnd, span, tag_end);
        }
        if rest.starts_with(tag_end) {
            self.bump(tag_end.len());
            self.in_tag = false;
            return Token::new(TokenKind::TagEnd, span, tag_end);
        }

        let mut chars = rest.chars();
        let ch = chars.next().unwrap_or('\0');
        let next = chars.next();

        let signed_number = (ch == '-' || ch == '+')
            && next.map(|c| c.is_ascii_digit()).unwrap_or(false)
            && !self.last_kind.map(TokenKind::ends_operand).unwrap_or(false);
        if ch.is_ascii_digit() && self.last_kind == Some(TokenKind::Dot) {
            return self.lex_element_index();
        }
        if ch.is_ascii_digit() || signed_number {
            return self.lex_number();
        }

        if ch == '"' || ch == '\'' {
            return self.lex_string(ch);
        }

        if let Some(sym) = syntax.symbols.match_at(rest) {
            let (kind, name) = (sym.kind, sym.name);
            self.bump(name.len());
            return Token::new(kind, span, name);
        }

        if ch.is_alphabetic() || ch == '_' {
            return self.lex_ident();
        }

        self.error(span, format!("unexpected character '{}'", ch))
    }

    fn lex_number(&mut self) -> Token {
        let span = self.span();
        let rest = self.rest();
        let b = rest.as_bytes();
        let mut i = 0;

        if b[i] == b'-' || b[i] == b'+' {
            i += 1;
        }

        if b.get(i) == Some(&b'0') && matches!(b.get(i + 1), Some(b'x') | Some(b'X')) {
            i += 2;
            let digits_start = i;
            while i < b.len() && b[i].is_ascii_hexdigit() {
                i += 1;
            }
            if i == digits_start {
                return self.error(span, "bad number: expected hex digits after 0x".to_string());
            }
        } else {
            while i < b.len() && b[i].is_ascii_digit() {
                i += 1;
            }
            // `1..4` is a range, not a float
            if b.get(i) == Some(&b'.') && b.get(i + 1).map(u8::is_ascii_digit).unwrap_or(false) {
                i += 1;
                while i < b.len() && b[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if matches!(b.get(i), Some(b'e') | Some(b'E')) {
                let mut j = i + 1;
                if matches!(b.get(j), Some(b'+') | Some(b'-')) {
                    j += 1;
                }
                if !b.get(j).map(u8::is_ascii_digit).unwrap_or(false) {
                    return self.error(span, "bad number: missing exponent digits".to_string());
                }
                while j < b.len() && b[j].is_ascii_digit() {
                    j += 1;
                }
                i = j;
            }
        }

        if let Some(c) = rest[i..].chars().next() {
            if c.is_alphanumeric() || c == '_' {
                return self.error(
                    span,
                    format!("bad number syntax: '{}{}'", &rest[..i], c),
                );
            }
        }

        self.bump(i);
        Token::new(TokenKind::Number, span, &rest[..i])
    }

    /// Digits after a `.`, as in `list.0.1`. Never a float.
    fn lex_element_index(&mut self) -> Token {
        let span = self.span();
        let rest = self.rest();
        let len = rest.bytes().take_while(u8::is_ascii_digit).count();
        self.bump(len);
        Token::new(TokenKind::Number, span, &rest[..len])
    }

    fn lex_string(&mut self, quote: char) -> Token {
        let span = self.span();
        let rest = self.rest();
        let mut value = String::new();
        let mut chars = rest.char_indices().skip(1);

        while let Some((i, ch)) = chars.next() {
            if ch == quote {
                self.bump(i + 1);
                return Token::new(TokenKind::String, span, value);
            }
            if ch == '\\' {
                match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, c)) => value.push(c),
                    None => break,
                }
                continue;
            }
            value.push(ch);
        }

        self.bump(rest.len());
        self.error(span, "unterminated string literal".to_string())
    }

    fn lex_ident(&mut self) -> Token {
        let span = self.span();
        let rest = self.rest();
        let len: usize = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .map(char::len_utf8)
            .sum();
        let ident = &rest[..len];
        let after = &rest[len..];

        if !self.is_terminator(after) {
            let c = after.chars().next().unwrap_or('\0');
            return self.error(
                span,
                format!("unexpected character '{}' after identifier '{}'", c, ident),
            );
        }

        self.bump(len);
        Token::new(TokenKind::Ident, span, ident)
    }

    fn is_terminator(&self, after: &str) -> bool {
        match after.chars().next() {
            None => true,
            Some(c) if c.is_whitespace() => true,
            Some(c) if ".,()[]|=+-*/%<>!&~#'\"".contains(c) => true,
            Some(_) => after.starts_with(self.syntax.tag_end.as_str()),
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.done {
            return None;
        }
        let token = if self.in_tag {
            self.lex_tag()
        } else {
            self.lex_text()
        };
        if matches!(token.kind, TokenKind::Eof | TokenKind::Error) {
            self.done = true;
        }
        self.last_kind = Some(token.kind);
        Some(token)
    }
}

/// Pull side of the lexer: strict FIFO with one token of pushback.
pub struct TokenStream<'a> {
    lexer: Lexer<'a>,
    pushed: Option<Token>,
    last_span: Span,
}

impl<'a> TokenStream<'a> {
    pub fn new(lexer: Lexer<'a>) -> Self {
        TokenStream {
            lexer,
            pushed: None,
            last_span: Span::new(0, 1),
        }
    }

    fn produce(&mut self) -> Token {
        match self.lexer.next() {
            Some(token) => token,
            // past the end: keep answering EOF at the last known spot
            None => Token::new(TokenKind::Eof, self.last_span, ""),
        }
    }

    pub fn next(&mut self) -> Token {
        let token = match self.pushed.take() {
            Some(token) => token,
            None => self.produce(),
        };
        self.last_span = token.span;
        token
    }

    pub fn peek(&mut self) -> &Token {
        let token = match self.pushed.take() {
            Some(token) => token,
            None => self.produce(),
        };
        self.pushed.insert(token)
    }

    /// Returns a token to the stream. Only one token of pushback exists.
    pub fn backup(&mut self, token: Token) {
        debug_assert!(self.pushed.is_none(), "only one token of pushback");
        self.pushed = Some(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let syntax = Syntax::tterse();
        Lexer::new("test", source, &syntax)
            .map(|t| t.kind)
            .collect()
    }

    fn tokens(source: &str) -> Vec<(TokenKind, String)> {
        let syntax = Syntax::tterse();
        Lexer::new("test", source, &syntax)
            .map(|t| (t.kind, t.value))
            .collect()
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(
            tokens("Hello, World!"),
            vec![
                (TokenKind::RawText, "Hello, World!".to_string()),
                (TokenKind::Eof, String::new())
            ]
        );
    }

    #[test]
    fn test_interpolation() {
        assert_eq!(
            kinds("Hello [% name %]!"),
            vec![
                TokenKind::RawText,
                TokenKind::TagStart,
                TokenKind::Ident,
                TokenKind::TagEnd,
                TokenKind::RawText,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_keywords_and_range() {
        assert_eq!(
            kinds("[% FOREACH i IN [0..4] %]"),
            vec![
                TokenKind::TagStart,
                TokenKind::Foreach,
                TokenKind::Ident,
                TokenKind::In,
                TokenKind::LBracket,
                TokenKind::Number,
                TokenKind::Range,
                TokenKind::Number,
                TokenKind::RBracket,
                TokenKind::TagEnd,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_include_is_not_in() {
        let t = tokens("[% INCLUDE 'x.tt' %]");
        assert_eq!(t[1].0, TokenKind::Include);
        assert_eq!(t[2], (TokenKind::String, "x.tt".to_string()));
    }

    #[test]
    fn test_numbers() {
        let t = tokens("[% 42 3.5 0x1F 1e3 2.5E-2 %]");
        let numbers: Vec<&str> = t
            .iter()
            .filter(|(k, _)| *k == TokenKind::Number)
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(numbers, vec!["42", "3.5", "0x1F", "1e3", "2.5E-2"]);

        let t = tokens("[% x = -7 %]");
        assert_eq!(t[3], (TokenKind::Number, "-7".to_string()));
    }

    #[test]
    fn test_dotted_element_index() {
        let t = tokens("[% list.0.1 %]");
        assert_eq!(
            t[1..6],
            [
                (TokenKind::Ident, "list".to_string()),
                (TokenKind::Dot, ".".to_string()),
                (TokenKind::Number, "0".to_string()),
                (TokenKind::Dot, ".".to_string()),
                (TokenKind::Number, "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_minus_after_operand_is_operator() {
        assert_eq!(
            kinds("[% x -1 %]"),
            vec![
                TokenKind::TagStart,
                TokenKind::Ident,
                TokenKind::Minus,
                TokenKind::Number,
                TokenKind::TagEnd,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_strings_with_escapes() {
        let t = tokens(r#"[% "a\"b" 'c\nd' %]"#);
        assert_eq!(t[1], (TokenKind::String, "a\"b".to_string()));
        assert_eq!(t[2], (TokenKind::String, "c\nd".to_string()));
    }

    #[test]
    fn test_unclosed_tag() {
        let syntax = Syntax::tterse();
        let err = Lexer::new("hello.tt", "Hello World,\n[% name ", &syntax)
            .tokenize()
            .unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.template, "hello.tt");
        assert!(err.message.contains("'%]'"), "{}", err.message);
    }

    #[test]
    fn test_unterminated_string() {
        let syntax = Syntax::tterse();
        let err = Lexer::new("t", "[% \"abc %]", &syntax).tokenize().unwrap_err();
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn test_unexpected_character() {
        let syntax = Syntax::tterse();
        let err = Lexer::new("t", "[% a ? b %]", &syntax).tokenize().unwrap_err();
        assert_eq!(err.message, "unexpected character '?'");
    }

    #[test]
    fn test_bad_number() {
        let syntax = Syntax::tterse();
        let err = Lexer::new("t", "[% 12abc %]", &syntax).tokenize().unwrap_err();
        assert!(err.message.starts_with("bad number syntax"));
        let err = Lexer::new("t", "[% 1e %]", &syntax).tokenize().unwrap_err();
        assert!(err.message.contains("exponent"));
    }

    #[test]
    fn test_identifier_terminator() {
        let syntax = Syntax::tterse();
        let err = Lexer::new("t", "[% foo$ %]", &syntax).tokenize().unwrap_err();
        assert!(err.message.contains("after identifier 'foo'"));
    }

    #[test]
    fn test_error_halts_stream() {
        let t = kinds("[% ? %] more text");
        assert_eq!(t, vec![TokenKind::TagStart, TokenKind::Error]);
    }

    #[test]
    fn test_trailing_comment_is_whitespace() {
        assert_eq!(
            kinds("[% END # closes the loop %]"),
            vec![
                TokenKind::TagStart,
                TokenKind::End,
                TokenKind::TagEnd,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_comment_tag_dropped() {
        assert_eq!(
            tokens("a[%# nothing here %]b"),
            vec![
                (TokenKind::RawText, "a".to_string()),
                (TokenKind::RawText, "b".to_string()),
                (TokenKind::Eof, String::new())
            ]
        );
    }

    #[test]
    fn test_chomp_markers() {
        let t = tokens("a  \n[%- x -%]  \nb");
        assert_eq!(t[0], (TokenKind::RawText, "a".to_string()));
        assert_eq!(t[4], (TokenKind::RawText, "b".to_string()));
    }

    #[test]
    fn test_custom_delimiters() {
        let syntax = Syntax::tterse().with_delimiters("<:", ":>");
        let kinds: Vec<TokenKind> = Lexer::new("t", "x<: a :>y", &syntax).map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::RawText,
                TokenKind::TagStart,
                TokenKind::Ident,
                TokenKind::TagEnd,
                TokenKind::RawText,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_line_numbers() {
        let syntax = Syntax::tterse();
        let t: Vec<Token> = Lexer::new("t", "a\nb\n[% x\n y %]", &syntax).collect();
        let x = t.iter().find(|t| t.value == "x").unwrap();
        let y = t.iter().find(|t| t.value == "y").unwrap();
        assert_eq!(x.span.line, 3);
        assert_eq!(y.span.line, 4);
    }

    #[test]
    fn test_stream_pushback() {
        let syntax = Syntax::tterse();
        let mut stream = TokenStream::new(Lexer::new("t", "[% a b %]", &syntax));
        assert_eq!(stream.next().kind, TokenKind::TagStart);
        assert_eq!(stream.peek().value, "a");
        let a = stream.next();
        assert_eq!(a.value, "a");
        stream.backup(a);
        assert_eq!(stream.next().value, "a");
        assert_eq!(stream.next().value, "b");
        assert_eq!(stream.next().kind, TokenKind::TagEnd);
        assert_eq!(stream.next().kind, TokenKind::Eof);
        assert_eq!(stream.next().kind, TokenKind::Eof);
    }
}
