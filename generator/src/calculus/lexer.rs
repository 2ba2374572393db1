// Lexer for process-calculus expressions.
//
// Tokenizes a behavior expression such as "(!register).{main}" or
// "[probe].(<ok>.[@release] | <fail>)" into signal punctuation, names and
// repetition counts. Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in the expression text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal at this stage).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Process-calculus token types.
///
/// Names carry no value — use the span to retrieve the text from the
/// expression string.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n]+")]
pub enum Token {
    // ── Punctuation ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("!")]
    Bang,
    #[token("@")]
    At,
    #[token(".")]
    Dot,
    #[token("|")]
    Pipe,
    #[token("%")]
    Percent,

    // ── Literals ──
    /// Repetition count.
    #[regex(r"[0-9]+", parse_count)]
    Number(u64),

    /// Action or label name: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Name,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Bang => write!(f, "!"),
            Token::At => write!(f, "@"),
            Token::Dot => write!(f, "."),
            Token::Pipe => write!(f, "|"),
            Token::Percent => write!(f, "%"),
            Token::Number(n) => write!(f, "{n}"),
            Token::Name => write!(f, "<name>"),
        }
    }
}

fn parse_count(lex: &mut logos::Lexer<'_, Token>) -> Option<u64> {
    lex.slice().parse().ok()
}

// ── Public API ──

/// Lex a process expression into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters. The caller treats a nonempty error list as fatal.
pub fn lex(expression: &str) -> LexResult {
    let lexer = Token::lexer(expression);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!(
                    "unexpected character: {:?}",
                    &expression[span.start..span.end]
                ),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
