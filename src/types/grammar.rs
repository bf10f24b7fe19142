use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use log::debug;

use super::error::{CommitError, GrammarError};
use super::graph::GrammarGraph;
use super::manager::Registry;
use super::match_config::MatchConfig;
use super::rule::{InternalRule, Rule};
use super::rule_parse::RuleParse;

/// One committed generation of a grammar's rules.
///
/// Snapshots are immutable. [`RuleGrammar::commit_changes()`] publishes a new one;
/// graph builds pin the snapshot they started with, so a build never observes a
/// half-applied commit.
#[derive(Debug, Clone, PartialEq)]
pub struct GrammarSnapshot {
    pub(crate) name: String,
    pub(crate) locale: Option<String>,
    pub(crate) rules: HashMap<String, InternalRule>,
    pub(crate) root: Option<String>,
    pub(crate) next_insertion_id: u64,
    pub(crate) generation: u64,
}

impl GrammarSnapshot {
    pub(crate) fn empty(name: &str, locale: Option<&str>) -> Self {
        Self {
            name: name.to_owned(),
            locale: locale.map(str::to_owned),
            rules: HashMap::new(),
            root: None,
            next_insertion_id: 0,
            generation: 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    /// Incremented by every commit that changed something.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn get_rule(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name).map(|r| &r.rule)
    }

    #[must_use]
    pub fn is_activatable(&self, name: &str) -> bool {
        self.rules.get(name).is_some_and(|r| r.activatable)
    }

    /// Rule names in insertion order.
    #[must_use]
    pub fn rule_names(&self) -> Vec<&str> {
        self.ordered().map(|r| r.rule.name.as_str()).collect()
    }

    /// The explicit root if one is set, otherwise the activatable public rule
    /// added first.
    #[must_use]
    pub fn root(&self) -> Option<&str> {
        if let Some(root) = &self.root {
            return Some(root.as_str());
        }
        self.rules
            .values()
            .filter(|r| r.rule.is_public() && r.activatable)
            .min_by_key(|r| r.insertion_id)
            .map(|r| r.rule.name.as_str())
    }

    /// Rules tried when a parse names no rule: the explicit root first if it is
    /// activatable, then every other activatable public rule in insertion order.
    pub(crate) fn candidates(&self) -> Vec<&str> {
        let root = self.root.as_deref().filter(|name| self.is_activatable(name));
        let mut out: Vec<&str> = root.into_iter().collect();
        for r in self.ordered() {
            let name = r.rule.name.as_str();
            if r.rule.is_public() && r.activatable && root != Some(name) {
                out.push(name);
            }
        }
        out
    }

    pub(crate) fn ordered(&self) -> impl Iterator<Item = &InternalRule> {
        let mut rules: Vec<&InternalRule> = self.rules.values().collect();
        rules.sort_by_key(|r| r.insertion_id);
        rules.into_iter()
    }

    fn apply(&mut self, change: PendingChange) -> Result<bool, GrammarError> {
        match change {
            PendingChange::Add(rule) => {
                if self.rules.contains_key(&rule.name) {
                    return Err(GrammarError::DuplicateRule { name: rule.name });
                }
                let insertion_id = self.next_insertion_id;
                self.next_insertion_id += 1;
                let activatable = rule.is_public();
                self.rules.insert(
                    rule.name.clone(),
                    InternalRule {
                        rule,
                        insertion_id,
                        activatable,
                    },
                );
                Ok(true)
            }
            PendingChange::Remove(name) => {
                if self.rules.remove(&name).is_none() {
                    return Err(GrammarError::UndefinedRule { name });
                }
                if self.root.as_deref() == Some(name.as_str()) {
                    self.root = None;
                }
                Ok(true)
            }
            PendingChange::SetActivatable { names, enabled } => {
                for name in &names {
                    match self.rules.get(name) {
                        None => return Err(GrammarError::UndefinedRule { name: name.clone() }),
                        Some(r) if !r.rule.is_public() => {
                            return Err(GrammarError::NotPublic {
                                name: name.clone(),
                                operation: "activated or deactivated",
                            })
                        }
                        Some(_) => {}
                    }
                }
                let mut changed = false;
                for name in &names {
                    if let Some(r) = self.rules.get_mut(name) {
                        changed |= r.activatable != enabled;
                        r.activatable = enabled;
                    }
                }
                Ok(changed)
            }
            PendingChange::SetRoot(None) => Ok(self.root.take().is_some()),
            PendingChange::SetRoot(Some(name)) => {
                match self.rules.get(&name) {
                    None => return Err(GrammarError::UndefinedRule { name }),
                    Some(r) if !r.rule.is_public() => {
                        return Err(GrammarError::NotPublic {
                            name,
                            operation: "the root rule",
                        })
                    }
                    Some(_) => {}
                }
                let changed = self.root.as_deref() != Some(name.as_str());
                self.root = Some(name);
                Ok(changed)
            }
        }
    }

    /// Render the grammar in JSGF notation, rules in insertion order.
    #[must_use]
    pub fn to_jsgf(&self) -> String {
        let mut out = match &self.locale {
            Some(locale) => format!("#JSGF V1.0 UTF-8 {locale};\n"),
            None => "#JSGF V1.0;\n".to_owned(),
        };
        out.push_str(&format!("grammar {};\n", self.name));
        for r in self.ordered() {
            out.push('\n');
            out.push_str(&r.rule.to_string());
        }
        out.push('\n');
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PendingChange {
    Add(Rule),
    Remove(String),
    SetRoot(Option<String>),
    SetActivatable { names: Vec<String>, enabled: bool },
}

/// A named, mutable set of rules with two-phase commit.
///
/// Changes are queued with [`add_rule()`](Self::add_rule),
/// [`remove_rule()`](Self::remove_rule), [`set_root()`](Self::set_root) and
/// [`set_activatable()`](Self::set_activatable) and take effect together at
/// [`commit_changes()`](Self::commit_changes). All reads and parses see only
/// committed state. The grammar is `Send + Sync` and is usually shared behind
/// an `Arc`.
///
/// # Example
///
/// ```
/// use rulegram::{Rule, RuleGrammar, seq, tag, token};
///
/// let grammar = RuleGrammar::new("greetings");
/// grammar
///     .add_rule(Rule::public("hello", seq([token("hello"), tag("GREETING")])))
///     .unwrap();
/// grammar.commit_changes().unwrap();
///
/// let parse = grammar.parse(&["Hello"], None).unwrap().unwrap();
/// assert_eq!(parse.rule_name(), "hello");
/// assert_eq!(parse.tags(), ["GREETING"]);
/// ```
#[derive(Debug)]
pub struct RuleGrammar {
    name: String,
    committed: RwLock<Arc<GrammarSnapshot>>,
    pending: Mutex<Vec<PendingChange>>,
    config: MatchConfig,
    registry: Option<Weak<Registry>>,
}

impl RuleGrammar {
    /// A standalone grammar. Qualified references to other grammars cannot be
    /// resolved; use a [`GrammarManager`](super::GrammarManager) for those.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self::with_config(name, None, MatchConfig::default())
    }

    #[must_use]
    pub fn with_config(name: &str, locale: Option<&str>, config: MatchConfig) -> Self {
        Self::from_snapshot(GrammarSnapshot::empty(name, locale), config, None)
    }

    pub(crate) fn from_snapshot(
        snapshot: GrammarSnapshot,
        config: MatchConfig,
        registry: Option<Weak<Registry>>,
    ) -> Self {
        Self {
            name: snapshot.name.clone(),
            committed: RwLock::new(Arc::new(snapshot)),
            pending: Mutex::new(Vec::new()),
            config,
            registry,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn locale(&self) -> Option<String> {
        self.snapshot().locale.clone()
    }

    #[must_use]
    pub fn match_config(&self) -> &MatchConfig {
        &self.config
    }

    /// The current committed generation.
    #[must_use]
    pub fn snapshot(&self) -> Arc<GrammarSnapshot> {
        Arc::clone(&self.committed.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Queue a rule for addition.
    ///
    /// # Errors
    ///
    /// Returns [`GrammarError::InvalidRule`] if the rule has an empty or
    /// malformed name, inverted repeat bounds, or weights that do not line up
    /// with their alternatives. Name clashes are reported at commit.
    pub fn add_rule(&self, rule: Rule) -> Result<(), GrammarError> {
        let malformed = rule
            .name
            .chars()
            .any(|c| c.is_whitespace() || "<>;=.".contains(c));
        if rule.name.is_empty() || malformed {
            return Err(GrammarError::InvalidRule {
                rule: rule.name,
                reason: "rule names must be non-empty and contain no whitespace or '<>;=.'"
                    .to_owned(),
            });
        }
        rule.component
            .check_shape()
            .map_err(|reason| GrammarError::InvalidRule {
                rule: rule.name.clone(),
                reason,
            })?;
        self.queue(PendingChange::Add(rule));
        Ok(())
    }

    /// Queue removal of a rule. If it is the explicit root, the root falls back
    /// to automatic selection.
    pub fn remove_rule(&self, name: &str) {
        self.queue(PendingChange::Remove(name.to_owned()));
    }

    /// Queue a root change; `None` requests automatic selection. Root changes
    /// run after every other queued change of the same commit.
    pub fn set_root(&self, name: Option<&str>) {
        self.queue(PendingChange::SetRoot(name.map(str::to_owned)));
    }

    /// Queue an activation change for public rules.
    pub fn set_activatable<S: AsRef<str>>(&self, names: &[S], enabled: bool) {
        self.queue(PendingChange::SetActivatable {
            names: names.iter().map(|n| n.as_ref().to_owned()).collect(),
            enabled,
        });
    }

    fn queue(&self, change: PendingChange) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(change);
    }

    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        !self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Apply every queued change and publish the result as a new snapshot.
    ///
    /// Changes run in queue order except root changes, which run last. Nothing
    /// is rolled back: a failing change is skipped and reported while the rest
    /// still apply.
    ///
    /// Returns `Ok(true)` if the committed state changed.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError`] listing each change that failed.
    pub fn commit_changes(&self) -> Result<bool, CommitError> {
        // Held for the whole commit so concurrent commits cannot lose updates.
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let changes = std::mem::take(&mut *pending);
        if changes.is_empty() {
            return Ok(false);
        }

        let (roots, others): (Vec<_>, Vec<_>) = changes
            .into_iter()
            .partition(|c| matches!(c, PendingChange::SetRoot(_)));

        let mut working = GrammarSnapshot::clone(&self.snapshot());
        let mut changed = false;
        let mut applied = 0;
        let mut failures = Vec::new();
        for change in others.into_iter().chain(roots) {
            match working.apply(change) {
                Ok(c) => {
                    applied += 1;
                    changed |= c;
                }
                Err(e) => {
                    debug!("grammar '{}': rejected change: {e}", self.name);
                    failures.push(e);
                }
            }
        }

        if changed {
            working.generation += 1;
            debug!(
                "grammar '{}': committed generation {} ({} rules, root {:?})",
                self.name,
                working.generation,
                working.rules.len(),
                working.root(),
            );
            *self.committed.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(working);
        }

        if failures.is_empty() {
            Ok(changed)
        } else {
            Err(CommitError { failures, applied })
        }
    }

    /// A copy of a committed rule.
    #[must_use]
    pub fn get_rule(&self, name: &str) -> Option<Rule> {
        self.snapshot().get_rule(name).cloned()
    }

    /// Committed rule names in insertion order.
    #[must_use]
    pub fn list_rule_names(&self) -> Vec<String> {
        self.snapshot()
            .rule_names()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    #[must_use]
    pub fn is_activatable(&self, name: &str) -> bool {
        self.snapshot().is_activatable(name)
    }

    /// The resolved root rule, if any.
    #[must_use]
    pub fn root(&self) -> Option<String> {
        self.snapshot().root().map(str::to_owned)
    }

    /// Compile a committed rule into a fresh graph.
    ///
    /// # Errors
    ///
    /// Returns [`GrammarError`] if the rule is missing or one of its references
    /// cannot be resolved or is cyclic.
    pub fn compile(&self, rule_name: &str) -> Result<GrammarGraph, GrammarError> {
        let registry = self.registry.as_ref().and_then(Weak::upgrade);
        crate::compile::compile(&self.snapshot(), registry.as_deref(), rule_name)
    }

    /// Match `tokens` against a rule.
    ///
    /// With `Some(rule)` only that rule is tried. With `None` the root is tried
    /// first if it is activatable, then every other activatable public rule in
    /// insertion order, and the first match is returned. Candidates that fail
    /// to compile are skipped. `Ok(None)` means nothing matched.
    ///
    /// # Errors
    ///
    /// Returns [`GrammarError::UndefinedRule`] for an unknown rule name,
    /// [`GrammarError::NoRootRule`] when no rule is named and none is eligible,
    /// and compile errors from [`compile()`](Self::compile) for a named rule or
    /// when no candidate compiles.
    pub fn parse<S: AsRef<str>>(
        &self,
        tokens: &[S],
        rule_name: Option<&str>,
    ) -> Result<Option<RuleParse>, GrammarError> {
        let snapshot = self.snapshot();
        if let Some(name) = rule_name {
            self.candidates(&snapshot, Some(name))?;
            return self.parse_rule(&snapshot, name, tokens);
        }
        let mut found = None;
        self.each_candidate(&snapshot, tokens, |parse| {
            found = Some(parse);
            false
        })?;
        Ok(found)
    }

    /// Like [`parse()`](Self::parse) with no rule name, but returns every
    /// eligible rule that matches, root first.
    ///
    /// # Errors
    ///
    /// Same as [`parse()`](Self::parse).
    pub fn parse_all<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Vec<RuleParse>, GrammarError> {
        let snapshot = self.snapshot();
        let mut out = Vec::new();
        self.each_candidate(&snapshot, tokens, |parse| {
            out.push(parse);
            true
        })?;
        Ok(out)
    }

    /// [`parse()`](Self::parse) over whitespace-separated text.
    ///
    /// # Errors
    ///
    /// Same as [`parse()`](Self::parse).
    pub fn parse_text(
        &self,
        text: &str,
        rule_name: Option<&str>,
    ) -> Result<Option<RuleParse>, GrammarError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        self.parse(&tokens, rule_name)
    }

    fn candidates(
        &self,
        snapshot: &GrammarSnapshot,
        rule_name: Option<&str>,
    ) -> Result<Vec<String>, GrammarError> {
        match rule_name {
            Some(name) => {
                if snapshot.rules.contains_key(name) {
                    Ok(vec![name.to_owned()])
                } else {
                    Err(GrammarError::UndefinedRule {
                        name: name.to_owned(),
                    })
                }
            }
            None => {
                let candidates = snapshot.candidates();
                if candidates.is_empty() {
                    Err(GrammarError::NoRootRule {
                        grammar: self.name.clone(),
                    })
                } else {
                    Ok(candidates.into_iter().map(str::to_owned).collect())
                }
            }
        }
    }

    /// Match every default candidate in order, handing each parse to
    /// `on_match` until it returns `false`. A candidate that does not compile
    /// is skipped; its error is returned only if no candidate compiled.
    fn each_candidate<S: AsRef<str>>(
        &self,
        snapshot: &Arc<GrammarSnapshot>,
        tokens: &[S],
        mut on_match: impl FnMut(RuleParse) -> bool,
    ) -> Result<(), GrammarError> {
        let mut first_error = None;
        let mut compiled = false;
        for name in self.candidates(snapshot, None)? {
            match self.parse_rule(snapshot, &name, tokens) {
                Ok(parse) => {
                    compiled = true;
                    if let Some(parse) = parse {
                        if !on_match(parse) {
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    debug!("grammar '{}': skipping <{name}>: {e}", self.name);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if !compiled => Err(e),
            _ => Ok(()),
        }
    }

    fn parse_rule<S: AsRef<str>>(
        &self,
        snapshot: &Arc<GrammarSnapshot>,
        rule_name: &str,
        tokens: &[S],
    ) -> Result<Option<RuleParse>, GrammarError> {
        let registry = self.registry.as_ref().and_then(Weak::upgrade);
        let graph = crate::compile::compile(snapshot, registry.as_deref(), rule_name)?;
        Ok(graph.match_tokens(tokens, &self.config))
    }

    /// Render the committed grammar in JSGF notation.
    #[must_use]
    pub fn to_jsgf(&self) -> String {
        self.snapshot().to_jsgf()
    }
}

#[cfg(feature = "binary-cache")]
impl GrammarSnapshot {
    /// Serialize this snapshot to a byte vector.
    ///
    /// The optional `source_text` is hashed (BLAKE3) and embedded in the
    /// payload metadata, see [`crate::serial::source_digest()`].
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) if encoding fails.
    pub fn to_bytes(
        &self,
        source_text: Option<&str>,
    ) -> Result<Vec<u8>, crate::serial::SerializeError> {
        crate::serial::encode(self, source_text)
    }

    /// Deserialize a snapshot from bytes produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// format, integrity, or validation failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::serial::DeserializeError> {
        crate::serial::decode(bytes)
    }
}

#[cfg(feature = "binary-cache")]
impl RuleGrammar {
    /// Serialize the committed rules. Pending changes are not included.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) if encoding fails.
    pub fn to_bytes(
        &self,
        source_text: Option<&str>,
    ) -> Result<Vec<u8>, crate::serial::SerializeError> {
        self.snapshot().to_bytes(source_text)
    }

    /// A standalone grammar restored from bytes produced by
    /// [`to_bytes`](Self::to_bytes). Use
    /// [`GrammarManager::load_bytes()`](super::GrammarManager::load_bytes) to
    /// register it with a manager instead.
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// format, integrity, or validation failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::serial::DeserializeError> {
        let snapshot = GrammarSnapshot::from_bytes(bytes)?;
        Ok(Self::from_snapshot(snapshot, MatchConfig::default(), None))
    }

    /// Serialize the committed rules and write them to a file.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) on
    /// encoding or I/O failure.
    pub fn to_binary_file(
        &self,
        path: impl AsRef<std::path::Path>,
        source_text: Option<&str>,
    ) -> Result<(), crate::serial::SerializeError> {
        let bytes = self.to_bytes(source_text)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Read a file and restore the grammar it contains.
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// I/O, format, integrity, or validation failure.
    pub fn from_binary_file(
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self, crate::serial::DeserializeError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for RuleGrammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        write!(
            f,
            "RuleGrammar({}, {} rules, root {})",
            self.name,
            snapshot.rules.len(),
            snapshot.root().unwrap_or("<none>"),
        )
    }
}
