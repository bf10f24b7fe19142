use crate::Rule;

/// The result of parsing grammar text.
#[derive(Debug)]
pub struct ParsedGrammar {
    pub name: String,
    /// Locale from the `#JSGF` header, if declared.
    pub locale: Option<String>,
    /// Imported names as written, e.g. `colors.*` or `colors.red`.
    pub imports: Vec<String>,
    /// Rules in declaration order.
    pub rules: Vec<Rule>,
}
