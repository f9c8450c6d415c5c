//! Token definitions for the Velo language

use serde::{Deserialize, Serialize};
use std::fmt;
use velo_common::{Span, Spanned, StringId};

/// Token types produced by the lexer.
///
/// The set is closed: unrecognized input becomes [`TokenKind::Invalid`]
/// rather than an error, so the lexer itself never fails.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    // Structural
    OpenTag,
    CloseTag,
    InlineHtml(StringId),
    Eof,
    Invalid,

    // Literals
    Variable(StringId),
    Identifier(StringId),
    IntLiteral(i64),
    FloatLiteral(f64),
    /// Single-quoted string, no interpolation.
    StringLiteral(StringId),
    /// Raw chunk inside a double-quoted string or heredoc.
    EncapsedText(StringId),
    DoubleQuote,
    HeredocStart(StringId),
    HeredocEnd,
    NowdocStart(StringId),
    DollarOpenCurly,
    CurlyOpen,

    // Punctuation
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Semicolon,
    Comma,
    Colon,
    DoubleColon,
    Arrow,
    Dot,
    Ellipsis,
    Pipe,
    Ampersand,
    FatArrow,
    PipeGreater,
    Spaceship,
    AttributeStart,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    Equal,
    Identical,
    NotEqual,
    NotIdentical,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    AndAnd,
    OrOr,
    Not,
    Question,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    ConcatAssign,

    // Keywords
    KwNamespace,
    KwUse,
    KwClass,
    KwInterface,
    KwTrait,
    KwEnum,
    KwExtends,
    KwImplements,
    KwPublic,
    KwProtected,
    KwPrivate,
    KwStatic,
    KwReadonly,
    KwFinal,
    KwAbstract,
    KwFunction,
    KwFn,
    KwNew,
    KwIf,
    KwElse,
    KwElseif,
    KwWhile,
    KwFor,
    KwForeach,
    KwAs,
    KwMatch,
    KwDefault,
    KwGlobal,
    KwConst,
    KwGo,
    KwReturn,
    KwEcho,
    KwBreak,
    KwContinue,
    KwGet,
    KwSet,
    KwTrue,
    KwFalse,
    KwNull,
    KwClone,
    KwWith,
    KwTry,
    KwCatch,
    KwFinally,
    KwThrow,
    KwStruct,
}

impl TokenKind {
    /// Keyword lookup for an identifier already known to be ASCII.
    pub fn keyword(text: &str) -> Option<TokenKind> {
        let kind = match text {
            "namespace" => TokenKind::KwNamespace,
            "use" => TokenKind::KwUse,
            "class" => TokenKind::KwClass,
            "interface" => TokenKind::KwInterface,
            "trait" => TokenKind::KwTrait,
            "enum" => TokenKind::KwEnum,
            "extends" => TokenKind::KwExtends,
            "implements" => TokenKind::KwImplements,
            "public" => TokenKind::KwPublic,
            "protected" => TokenKind::KwProtected,
            "private" => TokenKind::KwPrivate,
            "static" => TokenKind::KwStatic,
            "readonly" => TokenKind::KwReadonly,
            "final" => TokenKind::KwFinal,
            "abstract" => TokenKind::KwAbstract,
            "function" => TokenKind::KwFunction,
            "fn" => TokenKind::KwFn,
            "new" => TokenKind::KwNew,
            "if" => TokenKind::KwIf,
            "else" => TokenKind::KwElse,
            "elseif" => TokenKind::KwElseif,
            "while" => TokenKind::KwWhile,
            "for" => TokenKind::KwFor,
            "foreach" => TokenKind::KwForeach,
            "as" => TokenKind::KwAs,
            "match" => TokenKind::KwMatch,
            "default" => TokenKind::KwDefault,
            "global" => TokenKind::KwGlobal,
            "const" => TokenKind::KwConst,
            "go" => TokenKind::KwGo,
            "return" => TokenKind::KwReturn,
            "echo" => TokenKind::KwEcho,
            "break" => TokenKind::KwBreak,
            "continue" => TokenKind::KwContinue,
            "get" => TokenKind::KwGet,
            "set" => TokenKind::KwSet,
            "true" => TokenKind::KwTrue,
            "false" => TokenKind::KwFalse,
            "null" => TokenKind::KwNull,
            "clone" => TokenKind::KwClone,
            "with" => TokenKind::KwWith,
            "try" => TokenKind::KwTry,
            "catch" => TokenKind::KwCatch,
            "finally" => TokenKind::KwFinally,
            "throw" => TokenKind::KwThrow,
            "struct" => TokenKind::KwStruct,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::KwNamespace
                | TokenKind::KwUse
                | TokenKind::KwClass
                | TokenKind::KwInterface
                | TokenKind::KwTrait
                | TokenKind::KwEnum
                | TokenKind::KwExtends
                | TokenKind::KwImplements
                | TokenKind::KwPublic
                | TokenKind::KwProtected
                | TokenKind::KwPrivate
                | TokenKind::KwStatic
                | TokenKind::KwReadonly
                | TokenKind::KwFinal
                | TokenKind::KwAbstract
                | TokenKind::KwFunction
                | TokenKind::KwFn
                | TokenKind::KwNew
                | TokenKind::KwIf
                | TokenKind::KwElse
                | TokenKind::KwElseif
                | TokenKind::KwWhile
                | TokenKind::KwFor
                | TokenKind::KwForeach
                | TokenKind::KwAs
                | TokenKind::KwMatch
                | TokenKind::KwDefault
                | TokenKind::KwGlobal
                | TokenKind::KwConst
                | TokenKind::KwGo
                | TokenKind::KwReturn
                | TokenKind::KwEcho
                | TokenKind::KwBreak
                | TokenKind::KwContinue
                | TokenKind::KwGet
                | TokenKind::KwSet
                | TokenKind::KwTrue
                | TokenKind::KwFalse
                | TokenKind::KwNull
                | TokenKind::KwClone
                | TokenKind::KwWith
                | TokenKind::KwTry
                | TokenKind::KwCatch
                | TokenKind::KwFinally
                | TokenKind::KwThrow
                | TokenKind::KwStruct
        )
    }

    /// Keywords that open a statement; used by parser error recovery.
    pub fn starts_statement(&self) -> bool {
        matches!(
            self,
            TokenKind::KwClass
                | TokenKind::KwInterface
                | TokenKind::KwTrait
                | TokenKind::KwEnum
                | TokenKind::KwFunction
                | TokenKind::KwFn
                | TokenKind::KwIf
                | TokenKind::KwFor
                | TokenKind::KwForeach
                | TokenKind::KwWhile
                | TokenKind::KwReturn
                | TokenKind::KwNamespace
                | TokenKind::KwUse
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::OpenTag => write!(f, "<?php"),
            TokenKind::CloseTag => write!(f, "?>"),
            TokenKind::InlineHtml(_) => write!(f, "inline html"),
            TokenKind::Eof => write!(f, "end of file"),
            TokenKind::Invalid => write!(f, "invalid token"),
            TokenKind::Variable(id) => write!(f, "${}", id),
            TokenKind::Identifier(id) => write!(f, "{}", id),
            TokenKind::IntLiteral(n) => write!(f, "{}", n),
            TokenKind::FloatLiteral(n) => write!(f, "{}", n),
            TokenKind::StringLiteral(_) => write!(f, "string literal"),
            TokenKind::EncapsedText(_) => write!(f, "string text"),
            TokenKind::DoubleQuote => write!(f, "\""),
            TokenKind::HeredocStart(_) => write!(f, "<<<"),
            TokenKind::HeredocEnd => write!(f, "heredoc end"),
            TokenKind::NowdocStart(_) => write!(f, "<<<'"),
            TokenKind::DollarOpenCurly => write!(f, "${{"),
            TokenKind::CurlyOpen => write!(f, "{{$"),
            TokenKind::LeftParen => write!(f, "("),
            TokenKind::RightParen => write!(f, ")"),
            TokenKind::LeftBracket => write!(f, "["),
            TokenKind::RightBracket => write!(f, "]"),
            TokenKind::LeftBrace => write!(f, "{{"),
            TokenKind::RightBrace => write!(f, "}}"),
            TokenKind::Semicolon => write!(f, ";"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::DoubleColon => write!(f, "::"),
            TokenKind::Arrow => write!(f, "->"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Ellipsis => write!(f, "..."),
            TokenKind::Pipe => write!(f, "|"),
            TokenKind::Ampersand => write!(f, "&"),
            TokenKind::FatArrow => write!(f, "=>"),
            TokenKind::PipeGreater => write!(f, "|>"),
            TokenKind::Spaceship => write!(f, "<=>"),
            TokenKind::AttributeStart => write!(f, "#["),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::Assign => write!(f, "="),
            TokenKind::Equal => write!(f, "=="),
            TokenKind::Identical => write!(f, "==="),
            TokenKind::NotEqual => write!(f, "!="),
            TokenKind::NotIdentical => write!(f, "!=="),
            TokenKind::Less => write!(f, "<"),
            TokenKind::Greater => write!(f, ">"),
            TokenKind::LessEqual => write!(f, "<="),
            TokenKind::GreaterEqual => write!(f, ">="),
            TokenKind::AndAnd => write!(f, "&&"),
            TokenKind::OrOr => write!(f, "||"),
            TokenKind::Not => write!(f, "!"),
            TokenKind::Question => write!(f, "?"),
            TokenKind::PlusAssign => write!(f, "+="),
            TokenKind::MinusAssign => write!(f, "-="),
            TokenKind::StarAssign => write!(f, "*="),
            TokenKind::SlashAssign => write!(f, "/="),
            TokenKind::PercentAssign => write!(f, "%="),
            TokenKind::ConcatAssign => write!(f, ".="),
            TokenKind::KwNamespace => write!(f, "namespace"),
            TokenKind::KwUse => write!(f, "use"),
            TokenKind::KwClass => write!(f, "class"),
            TokenKind::KwInterface => write!(f, "interface"),
            TokenKind::KwTrait => write!(f, "trait"),
            TokenKind::KwEnum => write!(f, "enum"),
            TokenKind::KwExtends => write!(f, "extends"),
            TokenKind::KwImplements => write!(f, "implements"),
            TokenKind::KwPublic => write!(f, "public"),
            TokenKind::KwProtected => write!(f, "protected"),
            TokenKind::KwPrivate => write!(f, "private"),
            TokenKind::KwStatic => write!(f, "static"),
            TokenKind::KwReadonly => write!(f, "readonly"),
            TokenKind::KwFinal => write!(f, "final"),
            TokenKind::KwAbstract => write!(f, "abstract"),
            TokenKind::KwFunction => write!(f, "function"),
            TokenKind::KwFn => write!(f, "fn"),
            TokenKind::KwNew => write!(f, "new"),
            TokenKind::KwIf => write!(f, "if"),
            TokenKind::KwElse => write!(f, "else"),
            TokenKind::KwElseif => write!(f, "elseif"),
            TokenKind::KwWhile => write!(f, "while"),
            TokenKind::KwFor => write!(f, "for"),
            TokenKind::KwForeach => write!(f, "foreach"),
            TokenKind::KwAs => write!(f, "as"),
            TokenKind::KwMatch => write!(f, "match"),
            TokenKind::KwDefault => write!(f, "default"),
            TokenKind::KwGlobal => write!(f, "global"),
            TokenKind::KwConst => write!(f, "const"),
            TokenKind::KwGo => write!(f, "go"),
            TokenKind::KwReturn => write!(f, "return"),
            TokenKind::KwEcho => write!(f, "echo"),
            TokenKind::KwBreak => write!(f, "break"),
            TokenKind::KwContinue => write!(f, "continue"),
            TokenKind::KwGet => write!(f, "get"),
            TokenKind::KwSet => write!(f, "set"),
            TokenKind::KwTrue => write!(f, "true"),
            TokenKind::KwFalse => write!(f, "false"),
            TokenKind::KwNull => write!(f, "null"),
            TokenKind::KwClone => write!(f, "clone"),
            TokenKind::KwWith => write!(f, "with"),
            TokenKind::KwTry => write!(f, "try"),
            TokenKind::KwCatch => write!(f, "catch"),
            TokenKind::KwFinally => write!(f, "finally"),
            TokenKind::KwThrow => write!(f, "throw"),
            TokenKind::KwStruct => write!(f, "struct"),
        }
    }
}

/// A token with source location information.
pub type Token = Spanned<TokenKind>;

/// Build a token from kind and span.
pub fn token(kind: TokenKind, span: Span) -> Token {
    Spanned::new(kind, span)
}
