// Parser for process-calculus expressions.
//
// Parses a token stream (from the lexer) into a `ProcessExpr` tree. Uses
// chumsky combinators. Grammar, fixed for the whole system:
//
//   FinalProcess = Operators
//   Operators    = Switch | Sequence
//   Process      = Null | Receive | Send | Subprocess | Condition | Bracket
//   Receive      = "(" ["!"] name ["[" repetition "]"] ")"
//   Send         = "[" ["@"] name ["[" repetition "]"] "]"
//   Condition    = "<" name ["[" repetition "]"] ">"
//   Subprocess   = "{" name "}"
//   Sequence     = Process ("." Process)*
//   Switch       = Sequence ("|" Sequence)+
//   Bracket      = "(" Operators ")"
//   repetition   = integer | "%label%"
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns a ProcessExpr plus any parse errors.
// Failure modes: syntax errors produce `Rich` diagnostics; the caller
//                treats any error as fatal for the owning process.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::calculus::lexer::{self, Token};
use crate::calculus::{ProcessExpr, Repetition};

/// Result of parsing: expression tree plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub expr: Option<ProcessExpr>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a process expression string. Lexes then parses.
pub fn parse(expression: &str) -> ParseResult {
    let lex_result = lexer::lex(expression);
    let len = expression.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = expression_parser(expression);
    let (expr, parse_errors) = parser.parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        expr,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `expression_parser` so that the
// `source` reference is captured once and shared by all combinators.

fn expression_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, ProcessExpr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let name = just(Token::Name).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        source[span.start()..span.end()].to_string()
    });

    // ── Repetition suffix: "[" integer | %label% "]" ──

    let repetition = {
        let literal = select! { Token::Number(n) => Repetition::Literal(n) };
        let label = name
            .clone()
            .delimited_by(just(Token::Percent), just(Token::Percent))
            .map(Repetition::Label);
        literal
            .or(label)
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .or_not()
    };

    recursive(|operators| {
        let receive = just(Token::Bang)
            .or_not()
            .then(name.clone())
            .then(repetition.clone())
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(|((bang, name), repetition)| ProcessExpr::Receive {
                name,
                replicative: bang.is_some(),
                repetition,
            });

        let dispatch = just(Token::At)
            .or_not()
            .then(name.clone())
            .then(repetition.clone())
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(|((at, name), repetition)| ProcessExpr::Dispatch {
                name,
                broadcast: at.is_some(),
                repetition,
            });

        let condition = name
            .clone()
            .then(repetition.clone())
            .delimited_by(just(Token::Lt), just(Token::Gt))
            .map(|(name, repetition)| ProcessExpr::Condition { name, repetition });

        let subprocess = name
            .clone()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(|name| ProcessExpr::Subprocess { name });

        let null = select! { Token::Number(0) => ProcessExpr::Null };

        // Receive before bracket: both open with "(", chumsky backtracks.
        let bracket = operators.delimited_by(just(Token::LParen), just(Token::RParen));
        let process = null
            .or(receive)
            .or(dispatch)
            .or(condition)
            .or(subprocess)
            .or(bracket);

        let sequence = process
            .separated_by(just(Token::Dot))
            .at_least(1)
            .collect::<Vec<_>>()
            .map(|mut steps| {
                if steps.len() == 1 {
                    steps.remove(0)
                } else {
                    ProcessExpr::Sequence(steps)
                }
            });

        sequence
            .separated_by(just(Token::Pipe))
            .at_least(1)
            .collect::<Vec<_>>()
            .map(|mut branches| {
                if branches.len() == 1 {
                    branches.remove(0)
                } else {
                    ProcessExpr::Choice(branches)
                }
            })
    })
    .then_ignore(end())
}

// ── Tests ──
