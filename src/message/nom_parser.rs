//! Nom-based IRC line parser.
//!
//! Splits a decoded line into its tag, source, command and parameter
//! slices without allocating for the slices themselves.

use nom::{
    bytes::complete::{take_until, take_while1},
    character::complete::{char, space0},
    combinator::opt,
    error::{context, VerboseError, VerboseErrorKind},
    sequence::preceded,
    IResult,
};

use crate::error::MessageParseError;

type ParseResult<I, O> = IResult<I, O, VerboseError<I>>;

/// A parsed IRC line with borrowed string slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine<'a> {
    /// Raw tags string (without the leading `@`), if present.
    pub tags: Option<&'a str>,
    /// Raw source string (without the leading `:`), if present.
    pub source: Option<&'a str>,
    /// The command name or numeric.
    pub command: &'a str,
    /// Command parameters, including trailing.
    pub params: Vec<&'a str>,
}

fn parse_tags(input: &str) -> ParseResult<&str, &str> {
    context("parsing message tags", preceded(char('@'), take_until(" ")))(input)
}

fn parse_source(input: &str) -> ParseResult<&str, &str> {
    context(
        "parsing message source",
        preceded(char(':'), take_while1(|c| c != ' ')),
    )(input)
}

fn parse_command(input: &str) -> ParseResult<&str, &str> {
    context(
        "parsing command",
        take_while1(|c: char| c.is_ascii_alphanumeric()),
    )(input)
}

/// Split everything after the command into parameters.
///
/// A parameter starting with `:` swallows the rest of the line.
fn split_params(mut rest: &str) -> Vec<&str> {
    let mut params = Vec::new();

    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing);
            break;
        }
        let end = rest.find(' ').unwrap_or(rest.len());
        params.push(&rest[..end]);
        rest = &rest[end..];
    }

    params
}

fn parse_line(input: &str) -> ParseResult<&str, ParsedLine<'_>> {
    let (input, tags) = opt(parse_tags)(input)?;
    let (input, _) = space0(input)?;
    let (input, source) = opt(parse_source)(input)?;
    let (input, _) = space0(input)?;
    let (input, command) = parse_command(input)?;

    Ok((
        "",
        ParsedLine {
            tags,
            source,
            command,
            params: split_params(input),
        },
    ))
}

impl<'a> ParsedLine<'a> {
    /// Parse one line (without its terminator).
    pub fn parse(input: &'a str) -> Result<Self, MessageParseError> {
        let trimmed = input.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Err(MessageParseError::EmptyMessage);
        }

        match parse_line(trimmed) {
            Ok((_, line)) => Ok(line),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                let mut position = trimmed.len();
                let mut what = "parsing line";
                for (rest, kind) in &e.errors {
                    position = trimmed.len() - rest.len();
                    if let VerboseErrorKind::Context(ctx) = kind {
                        what = *ctx;
                    }
                }
                Err(MessageParseError::ParseContext {
                    position,
                    context: what,
                })
            }
            Err(nom::Err::Incomplete(_)) => Err(MessageParseError::ParseContext {
                position: trimmed.len(),
                context: "incomplete input",
            }),
        }
    }
}
