use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, space0, space1},
    combinator::{all_consuming, opt, recognize, rest},
    error::{Error, ErrorKind},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser as _,
};

/// A single sample line, before it is attached to a family.
#[derive(Debug, PartialEq)]
pub struct RawSample<'a> {
    pub name: &'a str,
    pub labels: Vec<(String, String)>,
    pub value: &'a str,
    pub timestamp: Option<&'a str>,
}

/// A metadata comment line.
#[derive(Debug, PartialEq)]
pub enum Metadata<'a> {
    Help { name: &'a str, text: &'a str },
    Type { name: &'a str, kind: &'a str },
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_name_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

#[inline]
pub fn metric_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_name_start), take_while(is_name_continue))).parse(input)
}

#[inline]
fn label_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

/// Parses a double-quoted label value, resolving `\\`, `\"`, and `\n` escapes.
fn label_value(input: &str) -> IResult<&str, String> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut value = String::new();

    loop {
        let mut chars = remaining.char_indices();
        match chars.next() {
            None => return Err(nom::Err::Error(Error::new(remaining, ErrorKind::Char))),
            Some((_, '"')) => return Ok((&remaining[1..], value)),
            Some((_, '\\')) => match chars.next() {
                Some((idx, escaped)) => {
                    value.push(if escaped == 'n' { '\n' } else { escaped });
                    remaining = &remaining[idx + escaped.len_utf8()..];
                }
                None => return Err(nom::Err::Error(Error::new(remaining, ErrorKind::Escaped))),
            },
            Some((_, c)) => {
                value.push(c);
                remaining = &remaining[c.len_utf8()..];
            }
        }
    }
}

fn label_pair(input: &str) -> IResult<&str, (String, String)> {
    let (remaining, (name, _, value)) = (label_name, delimited(space0, char('='), space0), label_value).parse(input)?;
    Ok((remaining, (name.to_string(), value)))
}

fn labels(input: &str) -> IResult<&str, Vec<(String, String)>> {
    delimited(
        pair(char('{'), space0),
        terminated(
            separated_list0(delimited(space0, char(','), space0), label_pair),
            opt(pair(space0, char(','))),
        ),
        pair(space0, char('}')),
    )
    .parse(input)
}

fn timestamp(input: &str) -> IResult<&str, &str> {
    recognize(pair(opt(char('-')), digit1)).parse(input)
}

/// Parses a sample line: `name[{labels}] value [timestamp]`.
pub fn sample_line(input: &str) -> IResult<&str, RawSample<'_>> {
    let (remaining, name) = metric_name(input)?;
    let (remaining, labels) = opt(preceded(space0, labels)).parse(remaining)?;
    let (remaining, _) = if labels.is_some() {
        space0(remaining)?
    } else {
        space1(remaining)?
    };

    let (remaining, (value, timestamp)) = all_consuming(terminated(
        pair(
            take_while1(|c: char| !c.is_whitespace()),
            opt(preceded(space1, timestamp)),
        ),
        space0,
    ))
    .parse(remaining)?;

    Ok((
        remaining,
        RawSample {
            name,
            labels: labels.unwrap_or_default(),
            value,
            timestamp,
        },
    ))
}

/// Parses a `# HELP` or `# TYPE` line.
///
/// Other comments fail to parse, and should be skipped by the caller.
pub fn metadata_line(input: &str) -> IResult<&str, Metadata<'_>> {
    let help = preceded(
        (tag("HELP"), space1),
        (metric_name, opt(preceded(space1, rest))),
    );
    let help = help.map(|(name, text): (&str, Option<&str>)| Metadata::Help {
        name,
        text: text.unwrap_or_default(),
    });

    let type_ = preceded((tag("TYPE"), space1), (metric_name, space1, take_while1(|c: char| !c.is_whitespace())));
    let type_ = type_.map(|(name, _, kind)| Metadata::Type { name, kind });

    all_consuming(terminated(
        preceded((char('#'), space0), alt((help, type_))),
        space0,
    ))
    .parse(input)
}

/// Parses a sample value.
///
/// Accepts the special values `NaN`, `+Inf`, `-Inf`, and `Inf`, and otherwise any floating-point literal.
pub fn sample_value(raw: &str) -> Option<f64> {
    match raw {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        other => other.parse().ok(),
    }
}

/// Resolves `\\` and `\n` escapes in help text.
pub fn unescape_help(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => text.push('\n'),
            Some('\\') => text.push('\\'),
            Some(other) => {
                text.push('\\');
                text.push(other);
            }
            None => text.push('\\'),
        }
    }
    text
}
