use winnow::ascii::till_line_ending;
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, repeat};
use winnow::error::{ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, take_until, take_while};

use crate::{Rule, RuleComponent, RuleReference, Scope};

use super::is_reserved_char;
use super::parser::ParsedGrammar;

// -- Whitespace & comments --------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    let _: () = repeat(
        0..,
        alt((
            take_while(1.., |c: char| c.is_whitespace()).void(),
            ("//", till_line_ending).void(),
            ("/*", take_until(0.., "*/"), "*/").void(),
        )),
    )
    .parse_next(input)?;
    Ok(())
}

fn spaces(input: &mut &str) -> ModalResult<()> {
    take_while(0.., |c: char| c == ' ' || c == '\t')
        .void()
        .parse_next(input)
}

fn expected(what: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(what))
}

// -- Names ------------------------------------------------------------------

fn grammar_name<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| {
        c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '$')
    })
    .parse_next(input)
}

fn rule_name<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| {
        !c.is_whitespace() && !is_reserved_char(c) && c != '.'
    })
    .parse_next(input)
}

// -- Header, grammar name, imports ------------------------------------------

fn header_word<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| !c.is_whitespace() && c != ';').parse_next(input)
}

/// `#JSGF version [encoding [locale]];`, returning the locale.
fn header(input: &mut &str) -> ModalResult<Option<String>> {
    ws.parse_next(input)?;
    cut_err("#JSGF")
        .context(StrContext::Expected(StrContextValue::StringLiteral("#JSGF")))
        .parse_next(input)?;
    preceded(spaces, cut_err(header_word))
        .context(expected("version"))
        .parse_next(input)?;
    let rest: Vec<&str> = repeat(0..=2, preceded(spaces, header_word)).parse_next(input)?;
    (spaces, cut_err(';')).parse_next(input)?;
    Ok(rest.get(1).map(|locale| (*locale).to_owned()))
}

fn grammar_decl(input: &mut &str) -> ModalResult<String> {
    ws.parse_next(input)?;
    cut_err("grammar")
        .context(expected("grammar declaration"))
        .parse_next(input)?;
    ws.parse_next(input)?;
    let name = cut_err(grammar_name)
        .context(expected("grammar name"))
        .parse_next(input)?;
    (ws, cut_err(';')).parse_next(input)?;
    Ok(name.to_owned())
}

fn import(input: &mut &str) -> ModalResult<String> {
    (ws, "import", ws).parse_next(input)?;
    let name = cut_err(delimited(
        '<',
        take_while(1.., |c: char| c != '>' && !c.is_whitespace()),
        '>',
    ))
    .context(expected("imported name"))
    .parse_next(input)?;
    (ws, cut_err(';')).parse_next(input)?;
    Ok(name.to_owned())
}

// -- Expansions (precedence: alternatives < sequence < postfix < unit) -------

fn quoted(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = cut_err(any).parse_next(input)?;
        match ch {
            '"' => return Ok(s),
            '\\' => {
                let esc = cut_err(any).parse_next(input)?;
                match esc {
                    '"' | '\\' => s.push(esc),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            c => s.push(c),
        }
    }
}

fn tag(input: &mut &str) -> ModalResult<String> {
    '{'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = cut_err(any)
            .context(expected("closing '}'"))
            .parse_next(input)?;
        match ch {
            '}' => return Ok(s.trim().to_owned()),
            '\\' => {
                let esc = cut_err(any).parse_next(input)?;
                match esc {
                    '}' | '\\' => s.push(esc),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            c => s.push(c),
        }
    }
}

fn bare_token<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| !c.is_whitespace() && !is_reserved_char(c)).parse_next(input)
}

fn reference(input: &mut &str) -> ModalResult<RuleComponent> {
    let name = delimited(
        '<',
        cut_err(take_while(1.., |c: char| {
            !c.is_whitespace() && c != '<' && c != '>'
        })),
        cut_err('>'),
    )
    .context(expected("rule reference"))
    .parse_next(input)?;
    Ok(match name {
        "NULL" => RuleComponent::Sequence(Vec::new()),
        "VOID" => RuleComponent::Alternatives {
            components: Vec::new(),
            weights: None,
        },
        _ => match name.rsplit_once('.') {
            Some((grammar, rule)) => {
                RuleComponent::Reference(RuleReference::qualified(grammar, rule))
            }
            None => RuleComponent::Reference(RuleReference::local(name)),
        },
    })
}

fn unit(input: &mut &str) -> ModalResult<RuleComponent> {
    alt((
        delimited('(', cut_err(expansion), (ws, cut_err(')'))),
        delimited('[', cut_err(expansion), (ws, cut_err(']'))).map(RuleComponent::optional),
        reference,
        tag.map(RuleComponent::Tag),
        quoted.map(RuleComponent::Token),
        bare_token.map(|t: &str| RuleComponent::Token(t.to_owned())),
    ))
    .parse_next(input)
}

fn repeated(input: &mut &str) -> ModalResult<RuleComponent> {
    let unit = unit(input)?;
    let ops: Vec<char> = repeat(0.., alt(('*', '+'))).parse_next(input)?;
    Ok(ops.into_iter().fold(unit, |acc, op| {
        if op == '*' {
            acc.zero_or_more()
        } else {
            acc.one_or_more()
        }
    }))
}

fn sequence(input: &mut &str) -> ModalResult<RuleComponent> {
    let mut items: Vec<RuleComponent> = repeat(1.., preceded(ws, repeated))
        .context(expected("token, reference or group"))
        .parse_next(input)?;
    if items.len() == 1 {
        Ok(items.remove(0))
    } else {
        Ok(RuleComponent::Sequence(items))
    }
}

fn weight(input: &mut &str) -> ModalResult<f32> {
    delimited(
        '/',
        take_while(1.., |c: char| c.is_ascii_digit() || c == '.')
            .try_map(|s: &str| s.parse::<f32>()),
        cut_err('/'),
    )
    .parse_next(input)
}

fn weighted(input: &mut &str) -> ModalResult<(Option<f32>, RuleComponent)> {
    ws.parse_next(input)?;
    let weight = opt(weight).parse_next(input)?;
    let component = sequence(input)?;
    Ok((weight, component))
}

fn expansion(input: &mut &str) -> ModalResult<RuleComponent> {
    let first = weighted(input)?;
    let rest: Vec<(Option<f32>, RuleComponent)> =
        repeat(0.., preceded((ws, '|'), cut_err(weighted))).parse_next(input)?;

    if rest.is_empty() && first.0.is_none() {
        return Ok(first.1);
    }
    let (weights, components): (Vec<Option<f32>>, Vec<RuleComponent>) =
        std::iter::once(first).chain(rest).unzip();
    let weights = if weights.iter().all(Option::is_none) {
        None
    } else if weights.iter().all(Option::is_some) {
        Some(weights.into_iter().flatten().collect())
    } else {
        // Either every alternative is weighted or none is.
        return Err(ErrMode::from_input(input).cut());
    };
    Ok(RuleComponent::Alternatives {
        components,
        weights,
    })
}

// -- Rule definitions -------------------------------------------------------

fn rule_def(input: &mut &str) -> ModalResult<Rule> {
    ws.parse_next(input)?;
    let scope = opt(alt((
        "public".value(Scope::Public),
        "private".value(Scope::Private),
    )))
    .parse_next(input)?;
    ws.parse_next(input)?;
    if scope.is_some() {
        cut_err('<').parse_next(input)?;
    } else {
        '<'.parse_next(input)?;
    }

    let name = cut_err(rule_name)
        .context(expected("rule name"))
        .parse_next(input)?;
    cut_err('>').parse_next(input)?;
    ws.parse_next(input)?;
    cut_err('=').parse_next(input)?;

    let component = cut_err(expansion)
        .context(expected("rule expansion"))
        .parse_next(input)?;
    (ws, cut_err(';'))
        .context(StrContext::Expected(StrContextValue::CharLiteral(';')))
        .parse_next(input)?;

    Ok(Rule::new(name, scope.unwrap_or(Scope::Private), component))
}

// -- Top-level parser -------------------------------------------------------

pub fn parse_grammar(input: &mut &str) -> ModalResult<ParsedGrammar> {
    let locale = header(input)?;
    let name = grammar_decl(input)?;
    let imports: Vec<String> = repeat(0.., import).parse_next(input)?;
    let rules: Vec<Rule> = repeat(0.., rule_def).parse_next(input)?;
    ws.parse_next(input)?;

    Ok(ParsedGrammar {
        name,
        locale,
        imports,
        rules,
    })
}
