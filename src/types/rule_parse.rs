use std::fmt;

/// One node of a parse tree reconstructed from a successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseNode {
    /// A grammar token that consumed input, carrying the grammar's text.
    Token(String),
    Tag(String),
    /// A matched sequence, or the repeats a counted component actually matched.
    Sequence(Vec<ParseNode>),
    /// The branch of an alternatives component that matched, with its
    /// declaration index.
    Alternative { index: usize, node: Box<ParseNode> },
    /// A referenced rule that was entered.
    Rule(RuleParse),
}

impl ParseNode {
    fn collect_tags<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ParseNode::Tag(value) => out.push(value),
            ParseNode::Token(_) => {}
            ParseNode::Sequence(items) => items.iter().for_each(|n| n.collect_tags(out)),
            ParseNode::Alternative { node, .. } => node.collect_tags(out),
            ParseNode::Rule(parse) => parse.component.collect_tags(out),
        }
    }

    fn collect_tokens<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ParseNode::Token(text) => out.extend(text.split_whitespace()),
            ParseNode::Tag(_) => {}
            ParseNode::Sequence(items) => items.iter().for_each(|n| n.collect_tokens(out)),
            ParseNode::Alternative { node, .. } => node.collect_tokens(out),
            ParseNode::Rule(parse) => parse.component.collect_tokens(out),
        }
    }
}

impl fmt::Display for ParseNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseNode::Token(text) => write!(f, "{text}"),
            ParseNode::Tag(value) => write!(f, "{{{value}}}"),
            ParseNode::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            ParseNode::Alternative { node, .. } => write!(f, "{node}"),
            ParseNode::Rule(parse) => write!(f, "{parse}"),
        }
    }
}

/// The result of a successful match: the rule that matched and the parse tree
/// of its body.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct RuleParse {
    rule_name: String,
    component: Box<ParseNode>,
}

impl RuleParse {
    pub fn new(rule_name: impl Into<String>, component: ParseNode) -> Self {
        Self {
            rule_name: rule_name.into(),
            component: Box::new(component),
        }
    }

    #[must_use]
    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    #[must_use]
    pub fn component(&self) -> &ParseNode {
        &self.component
    }

    /// Tag values in the order the matched path passed them, including tags of
    /// referenced rules.
    #[must_use]
    pub fn tags(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.component.collect_tags(&mut out);
        out
    }

    /// The grammar words that consumed input, in order.
    #[must_use]
    pub fn tokens(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.component.collect_tokens(&mut out);
        out
    }
}

impl fmt::Display for RuleParse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(<{}> = {})", self.rule_name, self.component)
    }
}
