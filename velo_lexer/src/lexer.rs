//! Dual-mode lexer implementation for the Velo language
//!
//! The lexer consumes a UTF-8 byte buffer and hands out one token per
//! `next()` call. It never fails: unrecognized bytes become
//! [`TokenKind::Invalid`] and problems are reported through the diagnostics
//! sink so the parser can keep going.

use crate::{Token, TokenKind};
use memchr::memchr;
use smallvec::SmallVec;
use velo_common::{intern, Diagnostics, Span, Spanned, StringId, SyntaxMode};

/// The lexical mode the scanner is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexerMode {
    /// Outside the script tags; bytes stream out as inline HTML.
    Initial,
    /// Inside `<?php ... ?>`.
    Script,
    /// Inside a double-quoted string; alternates chunks and escapes.
    DoubleQuote,
    /// Inside a heredoc body; like `DoubleQuote` with a label terminator.
    Heredoc,
    /// Inside a nowdoc body; raw text until the label line.
    Nowdoc,
}

/// Lexer for both Velo surface syntaxes.
pub struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    position: usize,
    file_id: u32,
    syntax: SyntaxMode,
    mode: LexerMode,
    /// Return modes for `{$expr}` / `${expr}` escapes inside strings.
    interp_return: SmallVec<[LexerMode; 4]>,
    /// Brace nesting per active escape; the matching `}` pops the mode.
    interp_braces: SmallVec<[u32; 4]>,
    heredoc_label: Option<String>,
    /// Kind of the last non-trivia token, for go-mode variable synthesis.
    prev: Option<TokenKind>,
    diagnostics: Diagnostics,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over `input`. The buffer end acts as the sentinel; the
    /// `// @syntax:` directive on the leading line, when present, overrides
    /// the requested syntax mode.
    pub fn new(input: &'a str, file_id: u32, syntax: SyntaxMode) -> Self {
        let syntax = SyntaxMode::from_directive(input).unwrap_or(syntax);
        Self {
            input,
            bytes: input.as_bytes(),
            position: 0,
            file_id,
            syntax,
            mode: LexerMode::Initial,
            interp_return: SmallVec::new(),
            interp_braces: SmallVec::new(),
            heredoc_label: None,
            prev: None,
            diagnostics: Diagnostics::new(),
        }
    }

    /// The syntax mode in effect (after directive detection).
    pub fn syntax_mode(&self) -> SyntaxMode {
        self.syntax
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    /// Tokenize the whole input, including the trailing `Eof` token.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next();
            let is_eof = token.value == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        tokens
    }

    /// Produce the next token. Returns `Eof` forever once exhausted.
    pub fn next(&mut self) -> Token {
        let token = match self.mode {
            LexerMode::Initial => self.next_initial(),
            LexerMode::Script => self.next_script(),
            LexerMode::DoubleQuote => self.next_encapsed(false),
            LexerMode::Heredoc => self.next_encapsed(true),
            LexerMode::Nowdoc => self.next_nowdoc(),
        };
        self.prev = Some(token.value);
        token
    }

    // ---- Initial mode -------------------------------------------------

    fn next_initial(&mut self) -> Token {
        let start = self.position;
        // Scan for a candidate open tag; everything before it is inline HTML.
        let mut scan = self.position;
        loop {
            match memchr(b'<', &self.bytes[scan..]) {
                Some(rel) => {
                    let at = scan + rel;
                    if self.bytes[at..].starts_with(b"<?php") {
                        if at > start {
                            self.position = at;
                            return self.make(TokenKind::InlineHtml(self.intern_range(start, at)), start);
                        }
                        self.position = at + 5;
                        self.mode = LexerMode::Script;
                        return self.make(TokenKind::OpenTag, at);
                    }
                    scan = at + 1;
                }
                None => {
                    self.position = self.bytes.len();
                    if self.position > start {
                        return self.make(TokenKind::InlineHtml(self.intern_range(start, self.position)), start);
                    }
                    return self.emit_eof();
                }
            }
        }
    }

    // ---- Script mode --------------------------------------------------

    fn next_script(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        if self.is_at_end() {
            return self.emit_eof();
        }

        let start = self.position;
        let byte = self.bytes[self.position];

        // Close tag returns to inline HTML.
        if byte == b'?' && self.peek_byte(1) == Some(b'>') {
            self.position += 2;
            self.mode = LexerMode::Initial;
            return self.make(TokenKind::CloseTag, start);
        }

        let kind = match byte {
            b'(' => self.single(TokenKind::LeftParen),
            b')' => self.single(TokenKind::RightParen),
            b'[' => self.single(TokenKind::LeftBracket),
            b']' => self.single(TokenKind::RightBracket),
            b'{' => {
                self.position += 1;
                if let Some(depth) = self.interp_braces.last_mut() {
                    *depth += 1;
                }
                TokenKind::LeftBrace
            }
            b'}' => {
                self.position += 1;
                if self.interp_braces.last() == Some(&0) {
                    // Closes a `{$expr}` / `${expr}` escape.
                    self.interp_braces.pop();
                    self.mode = self.interp_return.pop().unwrap_or(LexerMode::Script);
                } else if let Some(depth) = self.interp_braces.last_mut() {
                    *depth -= 1;
                }
                TokenKind::RightBrace
            }
            b';' => self.single(TokenKind::Semicolon),
            b',' => self.single(TokenKind::Comma),
            b':' => self.pair(b':', TokenKind::DoubleColon, TokenKind::Colon),
            b'+' => self.pair(b'=', TokenKind::PlusAssign, TokenKind::Plus),
            b'-' => self.scan_minus(),
            b'*' => self.pair(b'=', TokenKind::StarAssign, TokenKind::Star),
            b'/' => self.pair(b'=', TokenKind::SlashAssign, TokenKind::Slash),
            b'%' => self.pair(b'=', TokenKind::PercentAssign, TokenKind::Percent),
            b'=' => self.scan_equal(),
            b'!' => self.scan_not(),
            b'<' => self.scan_less(),
            b'>' => self.pair(b'=', TokenKind::GreaterEqual, TokenKind::Greater),
            b'&' => self.pair(b'&', TokenKind::AndAnd, TokenKind::Ampersand),
            b'|' => self.scan_pipe(),
            b'.' => self.scan_dot(),
            b'?' => self.single(TokenKind::Question),
            b'#' => {
                if self.peek_byte(1) == Some(b'[') {
                    self.position += 2;
                    TokenKind::AttributeStart
                } else {
                    // `#` line comment.
                    self.skip_to_line_end();
                    return self.next_script();
                }
            }
            b'$' => self.scan_variable(),
            b'\'' => self.scan_single_quoted(),
            b'"' => {
                self.position += 1;
                self.mode = LexerMode::DoubleQuote;
                TokenKind::DoubleQuote
            }
            b'0'..=b'9' => self.scan_number(),
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => self.scan_identifier(),
            b if b >= 0x80 => self.scan_identifier(),
            _ => {
                self.position += 1;
                self.diagnostics.error(
                    format!("unexpected character '{}'", byte as char),
                    Span::new(self.file_id, start as u32, self.position as u32),
                );
                TokenKind::Invalid
            }
        };

        self.make(kind, start)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.position += 1;
        kind
    }

    fn pair(&mut self, second: u8, long: TokenKind, short: TokenKind) -> TokenKind {
        self.position += 1;
        if self.peek_byte(0) == Some(second) {
            self.position += 1;
            long
        } else {
            short
        }
    }

    fn scan_minus(&mut self) -> TokenKind {
        self.position += 1;
        match self.peek_byte(0) {
            Some(b'>') => {
                self.position += 1;
                TokenKind::Arrow
            }
            Some(b'=') => {
                self.position += 1;
                TokenKind::MinusAssign
            }
            _ => TokenKind::Minus,
        }
    }

    fn scan_equal(&mut self) -> TokenKind {
        self.position += 1;
        match self.peek_byte(0) {
            Some(b'=') => {
                self.position += 1;
                if self.peek_byte(0) == Some(b'=') {
                    self.position += 1;
                    TokenKind::Identical
                } else {
                    TokenKind::Equal
                }
            }
            Some(b'>') => {
                self.position += 1;
                TokenKind::FatArrow
            }
            _ => TokenKind::Assign,
        }
    }

    fn scan_not(&mut self) -> TokenKind {
        self.position += 1;
        if self.peek_byte(0) == Some(b'=') {
            self.position += 1;
            if self.peek_byte(0) == Some(b'=') {
                self.position += 1;
                TokenKind::NotIdentical
            } else {
                TokenKind::NotEqual
            }
        } else {
            TokenKind::Not
        }
    }

    fn scan_less(&mut self) -> TokenKind {
        // `<=>`, `<=`, `<<<LABEL`, `<`
        if self.bytes[self.position..].starts_with(b"<=>") {
            self.position += 3;
            return TokenKind::Spaceship;
        }
        if self.bytes[self.position..].starts_with(b"<<<") {
            return self.scan_heredoc_start();
        }
        self.position += 1;
        if self.peek_byte(0) == Some(b'=') {
            self.position += 1;
            TokenKind::LessEqual
        } else {
            TokenKind::Less
        }
    }

    fn scan_pipe(&mut self) -> TokenKind {
        self.position += 1;
        match self.peek_byte(0) {
            Some(b'|') => {
                self.position += 1;
                TokenKind::OrOr
            }
            Some(b'>') => {
                self.position += 1;
                TokenKind::PipeGreater
            }
            _ => TokenKind::Pipe,
        }
    }

    fn scan_dot(&mut self) -> TokenKind {
        if self.bytes[self.position..].starts_with(b"...") {
            self.position += 3;
            return TokenKind::Ellipsis;
        }
        self.position += 1;
        if self.peek_byte(0) == Some(b'=') {
            self.position += 1;
            TokenKind::ConcatAssign
        } else {
            TokenKind::Dot
        }
    }

    fn scan_variable(&mut self) -> TokenKind {
        let start = self.position;
        self.position += 1; // `$`
        if self.peek_byte(0) == Some(b'{') {
            self.position += 1;
            self.interp_braces.push(0);
            self.interp_return.push(LexerMode::Script);
            return TokenKind::DollarOpenCurly;
        }
        if !self.at_ident_start() {
            self.diagnostics.error(
                "expected variable name after '$'",
                Span::new(self.file_id, start as u32, self.position as u32),
            );
            return TokenKind::Invalid;
        }
        self.eat_identifier();
        TokenKind::Variable(self.intern_range(start, self.position))
    }

    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.position;
        self.eat_identifier();
        let text = &self.input[start..self.position];

        if let Some(keyword) = TokenKind::keyword(text) {
            return keyword;
        }

        // In go syntax a bare lowercase identifier reads as a variable so
        // the parser sees a single variable form in both modes. Member
        // names, declaration names, and callee names keep their identifier
        // form.
        if self.syntax == SyntaxMode::Go
            && text.as_bytes()[0].is_ascii_lowercase()
            && !self.synthesis_suppressed()
            && self.peek_byte(0) != Some(b'(')
        {
            return TokenKind::Variable(intern(&format!("${}", text)));
        }

        TokenKind::Identifier(intern(text))
    }

    fn synthesis_suppressed(&self) -> bool {
        matches!(
            self.prev,
            Some(
                TokenKind::Dot
                    | TokenKind::Arrow
                    | TokenKind::DoubleColon
                    | TokenKind::KwClass
                    | TokenKind::KwInterface
                    | TokenKind::KwTrait
                    | TokenKind::KwEnum
                    | TokenKind::KwStruct
                    | TokenKind::KwNew
                    | TokenKind::KwConst
                    | TokenKind::KwUse
                    | TokenKind::KwNamespace
                    | TokenKind::KwFunction
                    | TokenKind::KwFn
                    | TokenKind::KwExtends
                    | TokenKind::KwImplements
            )
        )
    }

    fn scan_number(&mut self) -> TokenKind {
        let start = self.position;

        if self.bytes[self.position..].starts_with(b"0x")
            || self.bytes[self.position..].starts_with(b"0X")
        {
            self.position += 2;
            while self.peek_byte(0).map_or(false, |b| b.is_ascii_hexdigit()) {
                self.position += 1;
            }
            let text = &self.input[start + 2..self.position];
            return match i64::from_str_radix(text, 16) {
                Ok(value) => TokenKind::IntLiteral(value),
                Err(_) => {
                    self.diagnostics.error(
                        format!("invalid hexadecimal literal '{}'", &self.input[start..self.position]),
                        Span::new(self.file_id, start as u32, self.position as u32),
                    );
                    TokenKind::Invalid
                }
            };
        }

        while self.peek_byte(0).map_or(false, |b| b.is_ascii_digit()) {
            self.position += 1;
        }

        let mut is_float = false;
        if self.peek_byte(0) == Some(b'.')
            && self.peek_byte(1).map_or(false, |b| b.is_ascii_digit())
        {
            is_float = true;
            self.position += 1;
            while self.peek_byte(0).map_or(false, |b| b.is_ascii_digit()) {
                self.position += 1;
            }
        }
        if matches!(self.peek_byte(0), Some(b'e') | Some(b'E')) {
            let mut lookahead = self.position + 1;
            if matches!(self.bytes.get(lookahead), Some(b'+') | Some(b'-')) {
                lookahead += 1;
            }
            if self.bytes.get(lookahead).map_or(false, |b| b.is_ascii_digit()) {
                is_float = true;
                self.position = lookahead;
                while self.peek_byte(0).map_or(false, |b| b.is_ascii_digit()) {
                    self.position += 1;
                }
            }
        }

        let text = &self.input[start..self.position];
        if is_float {
            match text.parse::<f64>() {
                Ok(value) => TokenKind::FloatLiteral(value),
                Err(_) => {
                    self.diagnostics.error(
                        format!("invalid float literal '{}'", text),
                        Span::new(self.file_id, start as u32, self.position as u32),
                    );
                    TokenKind::Invalid
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(value) => TokenKind::IntLiteral(value),
                // Overflowing integer literals degrade to floats, matching
                // the language's numeric tower.
                Err(_) => match text.parse::<f64>() {
                    Ok(value) => TokenKind::FloatLiteral(value),
                    Err(_) => TokenKind::Invalid,
                },
            }
        }
    }

    fn scan_single_quoted(&mut self) -> TokenKind {
        let start = self.position;
        self.position += 1;
        let mut value = String::new();
        loop {
            match self.peek_byte(0) {
                Some(b'\'') => {
                    self.position += 1;
                    break;
                }
                Some(b'\\') => {
                    // Only `\\` and `\'` escape inside single quotes.
                    match self.peek_byte(1) {
                        Some(b'\'') => {
                            value.push('\'');
                            self.position += 2;
                        }
                        Some(b'\\') => {
                            value.push('\\');
                            self.position += 2;
                        }
                        _ => {
                            value.push('\\');
                            self.position += 1;
                        }
                    }
                }
                Some(_) => {
                    let ch = self.current_char();
                    value.push(ch);
                    self.position += ch.len_utf8();
                }
                None => {
                    self.diagnostics.error(
                        "unterminated string literal",
                        Span::new(self.file_id, start as u32, self.position as u32),
                    );
                    break;
                }
            }
        }
        TokenKind::StringLiteral(intern(&value))
    }

    fn scan_heredoc_start(&mut self) -> TokenKind {
        let start = self.position;
        self.position += 3; // `<<<`
        while matches!(self.peek_byte(0), Some(b' ') | Some(b'\t')) {
            self.position += 1;
        }

        let nowdoc = self.peek_byte(0) == Some(b'\'');
        if nowdoc {
            self.position += 1;
        }
        if !self.at_ident_start() {
            self.diagnostics.error(
                "expected heredoc label after '<<<'",
                Span::new(self.file_id, start as u32, self.position as u32),
            );
            return TokenKind::Invalid;
        }
        let label_start = self.position;
        self.eat_identifier();
        let label = self.input[label_start..self.position].to_string();
        if nowdoc && self.peek_byte(0) == Some(b'\'') {
            self.position += 1;
        }
        // Consume to end of the opener line.
        while let Some(b) = self.peek_byte(0) {
            self.position += 1;
            if b == b'\n' {
                break;
            }
        }

        let id = intern(&label);
        self.heredoc_label = Some(label);
        self.mode = if nowdoc { LexerMode::Nowdoc } else { LexerMode::Heredoc };
        if nowdoc {
            TokenKind::NowdocStart(id)
        } else {
            TokenKind::HeredocStart(id)
        }
    }

    // ---- Double-quote / heredoc interpolation -------------------------

    fn next_encapsed(&mut self, heredoc: bool) -> Token {
        let start = self.position;

        if self.is_at_end() {
            self.diagnostics.error(
                if heredoc { "unterminated heredoc" } else { "unterminated string literal" },
                Span::new(self.file_id, start as u32, start as u32),
            );
            self.mode = LexerMode::Script;
            return self.emit_eof();
        }

        if heredoc {
            if let Some(end) = self.at_heredoc_terminator() {
                self.position = end;
                self.heredoc_label = None;
                self.mode = LexerMode::Script;
                return self.make(TokenKind::HeredocEnd, start);
            }
        } else if self.peek_byte(0) == Some(b'"') {
            self.position += 1;
            self.mode = LexerMode::Script;
            return self.make(TokenKind::DoubleQuote, start);
        }

        // `{$expr}` escape: hand the braces to script mode.
        if self.peek_byte(0) == Some(b'{') && self.peek_byte(1) == Some(b'$') {
            self.position += 1;
            self.interp_braces.push(0);
            self.interp_return.push(self.mode);
            self.mode = LexerMode::Script;
            return self.make(TokenKind::CurlyOpen, start);
        }

        // `${name}` escape.
        if self.peek_byte(0) == Some(b'$') && self.peek_byte(1) == Some(b'{') {
            self.position += 2;
            self.interp_braces.push(0);
            self.interp_return.push(self.mode);
            self.mode = LexerMode::Script;
            return self.make(TokenKind::DollarOpenCurly, start);
        }

        // Simple `$name` interpolation.
        if self.peek_byte(0) == Some(b'$')
            && self.peek_byte(1).map_or(false, |b| b.is_ascii_alphabetic() || b == b'_')
        {
            self.position += 1;
            let var_start = self.position - 1;
            self.eat_identifier_from(self.position);
            return self.make(
                TokenKind::Variable(self.intern_range(var_start, self.position)),
                start,
            );
        }

        // Raw chunk until the next interesting byte.
        let mut value = String::new();
        loop {
            match self.peek_byte(0) {
                None => break,
                Some(b'"') if !heredoc => break,
                Some(b'$')
                    if self
                        .peek_byte(1)
                        .map_or(false, |b| b.is_ascii_alphabetic() || b == b'_' || b == b'{') =>
                {
                    break
                }
                Some(b'{') if self.peek_byte(1) == Some(b'$') => break,
                Some(b'\n') if heredoc => {
                    value.push('\n');
                    self.position += 1;
                    if self.at_heredoc_terminator().is_some() {
                        break;
                    }
                }
                Some(b'\\') if !heredoc || self.peek_byte(1) == Some(b'$') => {
                    self.position += 1;
                    match self.peek_byte(0) {
                        Some(b'n') => {
                            value.push('\n');
                            self.position += 1;
                        }
                        Some(b't') => {
                            value.push('\t');
                            self.position += 1;
                        }
                        Some(b'r') => {
                            value.push('\r');
                            self.position += 1;
                        }
                        Some(b'0') => {
                            value.push('\0');
                            self.position += 1;
                        }
                        Some(b'\\') => {
                            value.push('\\');
                            self.position += 1;
                        }
                        Some(b'"') => {
                            value.push('"');
                            self.position += 1;
                        }
                        Some(b'$') => {
                            value.push('$');
                            self.position += 1;
                        }
                        _ => value.push('\\'),
                    }
                }
                Some(_) => {
                    let ch = self.current_char();
                    value.push(ch);
                    self.position += ch.len_utf8();
                }
            }
        }

        self.make(TokenKind::EncapsedText(intern(&value)), start)
    }

    fn next_nowdoc(&mut self) -> Token {
        let start = self.position;
        if let Some(end) = self.at_heredoc_terminator() {
            self.position = end;
            self.heredoc_label = None;
            self.mode = LexerMode::Script;
            return self.make(TokenKind::HeredocEnd, start);
        }

        let mut value = String::new();
        while !self.is_at_end() {
            let ch = self.current_char();
            value.push(ch);
            self.position += ch.len_utf8();
            if ch == '\n' && self.at_heredoc_terminator().is_some() {
                break;
            }
        }
        if self.is_at_end() && self.at_heredoc_terminator().is_none() {
            self.diagnostics.error(
                "unterminated heredoc",
                Span::new(self.file_id, start as u32, self.position as u32),
            );
            self.mode = LexerMode::Script;
        }
        self.make(TokenKind::EncapsedText(intern(&value)), start)
    }

    /// When positioned at a line that closes the current heredoc, return the
    /// offset just past the label.
    fn at_heredoc_terminator(&self) -> Option<usize> {
        let label = self.heredoc_label.as_deref()?;
        let at_line_start = self.position == 0 || self.bytes[self.position - 1] == b'\n';
        if !at_line_start {
            return None;
        }
        let rest = &self.bytes[self.position..];
        if !rest.starts_with(label.as_bytes()) {
            return None;
        }
        let after = self.position + label.len();
        match self.bytes.get(after) {
            None | Some(b';') | Some(b'\n') | Some(b'\r') | Some(b',') | Some(b')') => Some(after),
            _ => None,
        }
    }

    // ---- Shared helpers -----------------------------------------------

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek_byte(0) {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => self.position += 1,
                Some(b'/') if self.peek_byte(1) == Some(b'/') => self.skip_to_line_end(),
                Some(b'/') if self.peek_byte(1) == Some(b'*') => {
                    self.position += 2;
                    loop {
                        match memchr(b'*', &self.bytes[self.position..]) {
                            Some(rel) => {
                                self.position += rel + 1;
                                if self.peek_byte(0) == Some(b'/') {
                                    self.position += 1;
                                    break;
                                }
                            }
                            None => {
                                self.position = self.bytes.len();
                                break;
                            }
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn skip_to_line_end(&mut self) {
        match memchr(b'\n', &self.bytes[self.position..]) {
            Some(rel) => self.position += rel,
            None => self.position = self.bytes.len(),
        }
    }

    fn at_ident_start(&self) -> bool {
        match self.peek_byte(0) {
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => true,
            Some(b) if b >= 0x80 => unicode_xid::UnicodeXID::is_xid_start(self.current_char()),
            _ => false,
        }
    }

    fn eat_identifier(&mut self) {
        self.eat_identifier_from(self.position);
    }

    fn eat_identifier_from(&mut self, from: usize) {
        self.position = from;
        while !self.is_at_end() {
            let b = self.bytes[self.position];
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.position += 1;
            } else if b >= 0x80 {
                let ch = self.current_char();
                if unicode_xid::UnicodeXID::is_xid_continue(ch) {
                    self.position += ch.len_utf8();
                } else {
                    break;
                }
            } else {
                break;
            }
        }
    }

    fn current_char(&self) -> char {
        self.input[self.position..].chars().next().unwrap_or('\0')
    }

    fn peek_byte(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.position + ahead).copied()
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.bytes.len()
    }

    fn intern_range(&self, start: usize, end: usize) -> StringId {
        intern(&self.input[start..end])
    }

    fn make(&self, kind: TokenKind, start: usize) -> Token {
        Spanned::new(kind, Span::new(self.file_id, start as u32, self.position as u32))
    }

    fn emit_eof(&mut self) -> Token {
        Spanned::new(TokenKind::Eof, Span::at(self.file_id, self.position as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use velo_common::resolve;

    fn kinds(source: &str, syntax: SyntaxMode) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source, 0, syntax);
        lexer.tokenize().into_iter().map(|t| t.value).collect()
    }

    #[test]
    fn test_open_tag_and_arithmetic() {
        let tokens = kinds("<?php 1 + 2;", SyntaxMode::Php);
        assert_eq!(
            tokens,
            vec![
                TokenKind::OpenTag,
                TokenKind::IntLiteral(1),
                TokenKind::Plus,
                TokenKind::IntLiteral(2),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_inline_html_around_script() {
        let tokens = kinds("hi <?php 1; ?> bye", SyntaxMode::Php);
        assert!(matches!(tokens[0], TokenKind::InlineHtml(_)));
        assert_eq!(tokens[1], TokenKind::OpenTag);
        assert_eq!(tokens[4], TokenKind::CloseTag);
        assert!(matches!(tokens[5], TokenKind::InlineHtml(_)));
        assert_eq!(tokens[6], TokenKind::Eof);
    }

    #[test]
    fn test_variables_and_operators() {
        let tokens = kinds("<?php $a <=> $b |> $c->d;", SyntaxMode::Php);
        assert!(matches!(tokens[1], TokenKind::Variable(_)));
        assert_eq!(tokens[2], TokenKind::Spaceship);
        assert_eq!(tokens[4], TokenKind::PipeGreater);
        assert_eq!(tokens[6], TokenKind::Arrow);
        assert!(matches!(tokens[7], TokenKind::Identifier(_)));
    }

    #[test]
    fn test_go_mode_variable_synthesis() {
        let php = kinds("<?php $x = 5;", SyntaxMode::Php);
        let go = kinds("<?php x = 5;", SyntaxMode::Go);
        assert_eq!(php, go);
        match go[1] {
            TokenKind::Variable(id) => assert_eq!(resolve(id), "$x"),
            other => panic!("expected variable, got {:?}", other),
        }
    }

    #[test]
    fn test_go_mode_call_names_stay_identifiers() {
        let tokens = kinds("<?php strlen(s);", SyntaxMode::Go);
        assert!(matches!(tokens[1], TokenKind::Identifier(_)));
        assert!(matches!(tokens[3], TokenKind::Variable(_)));
    }

    #[test]
    fn test_go_mode_member_names_stay_identifiers() {
        let tokens = kinds("<?php obj.total;", SyntaxMode::Go);
        assert!(matches!(tokens[1], TokenKind::Variable(_)));
        assert_eq!(tokens[2], TokenKind::Dot);
        assert!(matches!(tokens[3], TokenKind::Identifier(_)));
    }

    #[test]
    fn test_syntax_directive_switches_mode() {
        let tokens = kinds("// @syntax: go\n<?php x = 1;", SyntaxMode::Php);
        // The directive line itself streams out as inline HTML.
        assert!(matches!(tokens[0], TokenKind::InlineHtml(_)));
        assert!(matches!(tokens[2], TokenKind::Variable(_)));
    }

    #[test]
    fn test_double_quote_interpolation() {
        let tokens = kinds(r#"<?php "a $name b";"#, SyntaxMode::Php);
        assert_eq!(tokens[1], TokenKind::DoubleQuote);
        assert!(matches!(tokens[2], TokenKind::EncapsedText(_)));
        assert!(matches!(tokens[3], TokenKind::Variable(_)));
        assert!(matches!(tokens[4], TokenKind::EncapsedText(_)));
        assert_eq!(tokens[5], TokenKind::DoubleQuote);
    }

    #[test]
    fn test_curly_expression_escape() {
        let tokens = kinds(r#"<?php "x{$a + 1}y";"#, SyntaxMode::Php);
        let curly = tokens.iter().position(|t| *t == TokenKind::CurlyOpen).unwrap();
        assert!(matches!(tokens[curly + 1], TokenKind::Variable(_)));
        assert_eq!(tokens[curly + 2], TokenKind::Plus);
        assert_eq!(tokens[curly + 4], TokenKind::RightBrace);
        assert!(matches!(tokens[curly + 5], TokenKind::EncapsedText(_)));
    }

    #[test]
    fn test_heredoc_streams_chunks() {
        let source = "<?php $x = <<<EOT\nhello $name\nEOT;\n";
        let tokens = kinds(source, SyntaxMode::Php);
        assert!(matches!(tokens[3], TokenKind::HeredocStart(_)));
        assert!(matches!(tokens[4], TokenKind::EncapsedText(_)));
        assert!(matches!(tokens[5], TokenKind::Variable(_)));
        assert!(tokens.contains(&TokenKind::HeredocEnd));
    }

    #[test]
    fn test_nowdoc_is_raw() {
        let source = "<?php $x = <<<'EOT'\nno $interp here\nEOT;\n";
        let tokens = kinds(source, SyntaxMode::Php);
        assert!(matches!(tokens[3], TokenKind::NowdocStart(_)));
        match tokens[4] {
            TokenKind::EncapsedText(id) => assert_eq!(resolve(id), "no $interp here\n"),
            ref other => panic!("expected raw chunk, got {:?}", other),
        }
        assert_eq!(tokens[5], TokenKind::HeredocEnd);
    }

    #[test]
    fn test_single_quoted_no_interpolation() {
        let tokens = kinds("<?php 'a $b';", SyntaxMode::Php);
        match tokens[1] {
            TokenKind::StringLiteral(id) => assert_eq!(resolve(id), "a $b"),
            ref other => panic!("expected string literal, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_byte_recovers() {
        let mut lexer = Lexer::new("<?php 1 ` 2;", 0, SyntaxMode::Php);
        let tokens = lexer.tokenize();
        assert!(tokens.iter().any(|t| t.value == TokenKind::Invalid));
        assert!(lexer.diagnostics().has_errors());
        assert!(tokens.iter().any(|t| t.value == TokenKind::IntLiteral(2)));
    }

    #[test]
    fn test_attribute_start_vs_hash_comment() {
        let tokens = kinds("<?php #[Route] # comment\n$x;", SyntaxMode::Php);
        assert_eq!(tokens[1], TokenKind::AttributeStart);
        assert!(matches!(tokens[2], TokenKind::Identifier(_)));
        assert_eq!(tokens[3], TokenKind::RightBracket);
        assert!(matches!(tokens[4], TokenKind::Variable(_)));
    }

    #[test]
    fn test_numbers() {
        let tokens = kinds("<?php 42 3.5 0x10 1e3;", SyntaxMode::Php);
        assert_eq!(tokens[1], TokenKind::IntLiteral(42));
        assert_eq!(tokens[2], TokenKind::FloatLiteral(3.5));
        assert_eq!(tokens[3], TokenKind::IntLiteral(16));
        assert_eq!(tokens[4], TokenKind::FloatLiteral(1000.0));
    }
}
