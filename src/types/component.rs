use std::fmt;

/// Largest repeat bound a [`RuleComponent::Count`] may use. Counts are
/// unrolled into one graph copy per repeat up to this bound.
pub const MAX_REPEAT_BOUND: u32 = 1_000;

/// Upper bound of a [`RuleComponent::Count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxRepeat {
    Finite(u32),
    Indefinite,
}

/// A reference to a named rule, optionally qualified with the grammar that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleReference {
    pub rule_name: String,
    pub grammar: Option<String>,
}

impl RuleReference {
    /// A reference resolved against the grammar that contains it.
    #[must_use]
    pub fn local(rule_name: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            grammar: None,
        }
    }

    /// A reference to a public rule of another grammar.
    #[must_use]
    pub fn qualified(grammar: impl Into<String>, rule_name: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            grammar: Some(grammar.into()),
        }
    }

    #[must_use]
    pub fn is_qualified(&self) -> bool {
        self.grammar.is_some()
    }
}

impl fmt::Display for RuleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.grammar {
            Some(grammar) => write!(f, "<{grammar}.{}>", self.rule_name),
            None => write!(f, "<{}>", self.rule_name),
        }
    }
}

/// One node of a rule's structural tree.
///
/// Built programmatically with the free functions in this module ([`token()`],
/// [`seq()`], [`alt()`], ...) or produced by the text loader in [`crate::parse`].
#[derive(Debug, Clone, PartialEq)]
pub enum RuleComponent {
    /// A literal word, or a space-separated phrase matched word by word.
    Token(String),
    Reference(RuleReference),
    /// Exactly one child must match. Weights are advisory and never consulted
    /// by the matcher; the first declared branch that matches wins.
    Alternatives {
        components: Vec<RuleComponent>,
        weights: Option<Vec<f32>>,
    },
    Sequence(Vec<RuleComponent>),
    Count {
        component: Box<RuleComponent>,
        min: u32,
        max: MaxRepeat,
        repeat_probability: Option<f32>,
    },
    /// Consumes no input; records a semantic tag at its position.
    Tag(String),
}

impl RuleComponent {
    /// Make this component optional (`[x]`).
    #[must_use]
    pub fn optional(self) -> RuleComponent {
        self.repeat(0, MaxRepeat::Finite(1))
    }

    /// Zero or more repetitions (`x*`).
    #[must_use]
    pub fn zero_or_more(self) -> RuleComponent {
        self.repeat(0, MaxRepeat::Indefinite)
    }

    /// One or more repetitions (`x+`).
    #[must_use]
    pub fn one_or_more(self) -> RuleComponent {
        self.repeat(1, MaxRepeat::Indefinite)
    }

    /// Between `min` and `max` repetitions inclusive.
    #[must_use]
    pub fn repeat(self, min: u32, max: MaxRepeat) -> RuleComponent {
        RuleComponent::Count {
            component: Box::new(self),
            min,
            max,
            repeat_probability: None,
        }
    }

    /// Follow this component with a semantic tag (`x {value}`).
    #[must_use]
    pub fn tagged(self, value: impl Into<String>) -> RuleComponent {
        match self {
            RuleComponent::Sequence(mut items) => {
                items.push(RuleComponent::Tag(value.into()));
                RuleComponent::Sequence(items)
            }
            other => RuleComponent::Sequence(vec![other, RuleComponent::Tag(value.into())]),
        }
    }

    /// Checks the constraints that can be decided without any other rule:
    /// non-empty tokens, repeat bounds and alternative weights. Returns a
    /// reason on failure.
    pub(crate) fn check_shape(&self) -> Result<(), String> {
        match self {
            RuleComponent::Token(text) => {
                if text.trim().is_empty() {
                    Err("empty token".to_owned())
                } else {
                    Ok(())
                }
            }
            RuleComponent::Tag(_) => Ok(()),
            RuleComponent::Reference(reference) => {
                if reference.rule_name.is_empty() {
                    Err("reference with an empty rule name".to_owned())
                } else {
                    Ok(())
                }
            }
            RuleComponent::Alternatives {
                components,
                weights,
            } => {
                if let Some(weights) = weights {
                    if weights.len() != components.len() {
                        return Err(format!(
                            "{} weights given for {} alternatives",
                            weights.len(),
                            components.len()
                        ));
                    }
                    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                        return Err(
                            "alternative weights must be finite and non-negative".to_owned()
                        );
                    }
                }
                components.iter().try_for_each(RuleComponent::check_shape)
            }
            RuleComponent::Sequence(components) => {
                components.iter().try_for_each(RuleComponent::check_shape)
            }
            RuleComponent::Count {
                component,
                min,
                max,
                repeat_probability,
            } => {
                if let MaxRepeat::Finite(max) = max {
                    if min > max {
                        return Err(format!("repeat minimum {min} exceeds maximum {max}"));
                    }
                }
                let bound = match max {
                    MaxRepeat::Finite(max) => *max,
                    MaxRepeat::Indefinite => *min,
                };
                if bound > MAX_REPEAT_BOUND {
                    return Err(format!(
                        "repeat bound {bound} exceeds the limit of {MAX_REPEAT_BOUND}"
                    ));
                }
                if let Some(p) = repeat_probability {
                    if !(0.0..=1.0).contains(p) {
                        return Err(format!("repeat probability {p} outside [0, 1]"));
                    }
                }
                component.check_shape()
            }
        }
    }

    /// Names of every rule this component refers to, in declaration order.
    #[must_use]
    pub fn references(&self) -> Vec<&RuleReference> {
        let mut out = Vec::new();
        collect_references(self, &mut out);
        out
    }
}

fn collect_references<'a>(component: &'a RuleComponent, out: &mut Vec<&'a RuleReference>) {
    match component {
        RuleComponent::Reference(reference) => out.push(reference),
        RuleComponent::Alternatives { components, .. } | RuleComponent::Sequence(components) => {
            for child in components {
                collect_references(child, out);
            }
        }
        RuleComponent::Count { component, .. } => collect_references(component, out),
        RuleComponent::Token(_) | RuleComponent::Tag(_) => {}
    }
}

// Display renders JSGF notation, so `parse` accepts what `Display` writes.
impl fmt::Display for RuleComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleComponent::Token(text) => write_token(f, text),
            RuleComponent::Reference(reference) => write!(f, "{reference}"),
            RuleComponent::Tag(value) => write!(f, "{{{}}}", escape_tag(value)),
            RuleComponent::Sequence(components) => {
                if components.is_empty() {
                    return write!(f, "<NULL>");
                }
                for (i, child) in components.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write_grouped(f, child, matches!(child, RuleComponent::Alternatives { .. }))?;
                }
                Ok(())
            }
            RuleComponent::Alternatives {
                components,
                weights,
            } => {
                if components.is_empty() {
                    return write!(f, "<VOID>");
                }
                for (i, child) in components.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    if let Some(w) = weights.as_ref().and_then(|w| w.get(i)) {
                        write!(f, "/{w}/ ")?;
                    }
                    write_grouped(f, child, matches!(child, RuleComponent::Alternatives { .. }))?;
                }
                Ok(())
            }
            RuleComponent::Count {
                component,
                min,
                max,
                ..
            } => {
                let unit = if needs_group(component) {
                    format!("({component})")
                } else {
                    component.to_string()
                };
                let mut parts = Vec::new();
                match max {
                    MaxRepeat::Indefinite => {
                        parts.extend((1..*min).map(|_| unit.clone()));
                        parts.push(if *min == 0 {
                            format!("{unit}*")
                        } else {
                            format!("{unit}+")
                        });
                    }
                    MaxRepeat::Finite(max) => {
                        parts.extend((0..*min).map(|_| unit.clone()));
                        parts.extend((*min..*max).map(|_| format!("[{component}]")));
                    }
                }
                if parts.is_empty() {
                    write!(f, "<NULL>")
                } else {
                    write!(f, "{}", parts.join(" "))
                }
            }
        }
    }
}

fn needs_group(component: &RuleComponent) -> bool {
    match component {
        RuleComponent::Sequence(items) => !items.is_empty(),
        RuleComponent::Alternatives { components, .. } => !components.is_empty(),
        RuleComponent::Count { .. } => true,
        RuleComponent::Token(text) => text.contains(' '),
        RuleComponent::Reference(_) | RuleComponent::Tag(_) => false,
    }
}

fn write_grouped(
    f: &mut fmt::Formatter<'_>,
    component: &RuleComponent,
    group: bool,
) -> fmt::Result {
    if group {
        write!(f, "({component})")
    } else {
        write!(f, "{component}")
    }
}

fn write_token(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    let bare = !text.is_empty()
        && text
            .chars()
            .all(|c| !c.is_whitespace() && !crate::parse::is_reserved_char(c));
    if bare {
        write!(f, "{text}")
    } else {
        write!(f, "\"")?;
        for c in text.chars() {
            match c {
                '"' => write!(f, "\\\"")?,
                '\\' => write!(f, "\\\\")?,
                c => write!(f, "{c}")?,
            }
        }
        write!(f, "\"")
    }
}

fn escape_tag(value: &str) -> String {
    value.replace('\\', "\\\\").replace('}', "\\}")
}

/// A literal token (`turn`, or the phrase `"turn on"`).
#[must_use]
pub fn token(text: impl Into<String>) -> RuleComponent {
    RuleComponent::Token(text.into())
}

/// A semantic tag.
#[must_use]
pub fn tag(value: impl Into<String>) -> RuleComponent {
    RuleComponent::Tag(value.into())
}

/// A reference to a rule of the same grammar.
#[must_use]
pub fn rule_ref(name: impl Into<String>) -> RuleComponent {
    RuleComponent::Reference(RuleReference::local(name))
}

/// A sequence of components.
#[must_use]
pub fn seq(components: impl IntoIterator<Item = RuleComponent>) -> RuleComponent {
    RuleComponent::Sequence(components.into_iter().collect())
}

/// Unweighted alternatives, tried in declaration order.
#[must_use]
pub fn alt(components: impl IntoIterator<Item = RuleComponent>) -> RuleComponent {
    RuleComponent::Alternatives {
        components: components.into_iter().collect(),
        weights: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_extends_existing_sequence() {
        let c = seq([token("turn"), token("on")]).tagged("ON");
        assert_eq!(c, seq([token("turn"), token("on"), tag("ON")]));
    }

    #[test]
    fn shape_rejects_inverted_bounds() {
        let c = token("a").repeat(3, MaxRepeat::Finite(2));
        assert!(c.check_shape().unwrap_err().contains("exceeds"));
    }

    #[test]
    fn shape_rejects_empty_tokens() {
        assert_eq!(token("").check_shape().unwrap_err(), "empty token");
        assert!(seq([token("ok"), token("  ")]).check_shape().is_err());
        assert!(token("ok").check_shape().is_ok());
    }

    #[test]
    fn shape_caps_repeat_bounds() {
        let huge = token("a").repeat(0, MaxRepeat::Finite(u32::MAX));
        assert!(huge.check_shape().unwrap_err().contains("limit"));
        let many = token("a").repeat(MAX_REPEAT_BOUND + 1, MaxRepeat::Indefinite);
        assert!(many.check_shape().is_err());
        let edge = token("a").repeat(0, MaxRepeat::Finite(MAX_REPEAT_BOUND));
        assert!(edge.check_shape().is_ok());
    }

    #[test]
    fn shape_rejects_weight_mismatch() {
        let c = RuleComponent::Alternatives {
            components: vec![token("a"), token("b")],
            weights: Some(vec![1.0]),
        };
        assert!(c.check_shape().is_err());
    }

    #[test]
    fn shape_rejects_negative_weight() {
        let c = RuleComponent::Alternatives {
            components: vec![token("a")],
            weights: Some(vec![-1.0]),
        };
        assert!(c.check_shape().is_err());
    }

    #[test]
    fn references_in_declaration_order() {
        let c = seq([rule_ref("a"), alt([rule_ref("b"), token("x")]), rule_ref("c").optional()]);
        let names: Vec<&str> = c.references().iter().map(|r| r.rule_name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn display_jsgf_notation() {
        let c = seq([
            alt([token("turn"), token("switch")]),
            token("on").optional(),
            rule_ref("device"),
            token("please").zero_or_more(),
            tag("ON"),
        ]);
        assert_eq!(c.to_string(), "(turn | switch) [on] <device> please* {ON}");
    }

    #[test]
    fn display_quotes_phrases_and_specials() {
        assert_eq!(token("turn on").to_string(), "\"turn on\"");
        assert_eq!(token("a|b").to_string(), "\"a|b\"");
    }

    #[test]
    fn display_bounded_repeat() {
        let c = token("again").repeat(2, MaxRepeat::Finite(3));
        assert_eq!(c.to_string(), "again again [again]");
    }

    #[test]
    fn display_weights_and_special_rules() {
        let c = RuleComponent::Alternatives {
            components: vec![token("yes"), seq([])],
            weights: Some(vec![2.0, 0.5]),
        };
        assert_eq!(c.to_string(), "/2/ yes | /0.5/ <NULL>");
        assert_eq!(alt([]).to_string(), "<VOID>");
    }

    #[test]
    fn qualified_reference_display() {
        let r = RuleReference::qualified("com.acme.colors", "color");
        assert_eq!(r.to_string(), "<com.acme.colors.color>");
        assert!(r.is_qualified());
    }
}
