mod error;
mod grammar;
mod parser;

pub use error::ParseError;
pub use parser::ParsedGrammar;

/// Parse JSGF grammar text into a [`ParsedGrammar`].
///
/// Accepts the `#JSGF` header, the `grammar` declaration, `import`
/// statements and `public`/`private` rule definitions. Expansions support
/// alternatives with optional `/weight/` prefixes, grouping, `[optional]`
/// items, `*` and `+` repeats, `{tags}`, quoted tokens, qualified references
/// and the special rules `<NULL>` and `<VOID>`.
///
/// ```
/// let parsed = rulegram::parse::parse(
///     "#JSGF V1.0;\ngrammar lights;\npublic <cmd> = turn (on | off) {SWITCH};",
/// )
/// .unwrap();
/// assert_eq!(parsed.name, "lights");
/// assert_eq!(parsed.rules[0].name, "cmd");
/// ```
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not valid grammar text.
pub fn parse(input: &str) -> Result<ParsedGrammar, ParseError> {
    use winnow::Parser;
    grammar::parse_grammar
        .parse(input)
        .map_err(|e| ParseError::new(e.to_string()))
}

/// Characters with syntactic meaning in grammar text. Tokens containing any
/// of them must be quoted.
pub(crate) fn is_reserved_char(c: char) -> bool {
    RESERVED.contains(c)
}

const RESERVED: &str = ";=|*+<>()[]{}/\"\\";
