use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;

use super::error::GrammarError;
use super::grammar::{GrammarSnapshot, RuleGrammar};
use super::match_config::MatchConfig;

/// Named grammars shared by a manager and the grammars it created. Grammars
/// hold only a weak handle back, so dropping the manager frees everything.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    grammars: RwLock<HashMap<String, Arc<RuleGrammar>>>,
}

impl Registry {
    pub(crate) fn get(&self, name: &str) -> Option<Arc<RuleGrammar>> {
        self.grammars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// The committed snapshot of a grammar, for resolving qualified references.
    pub(crate) fn snapshot(&self, name: &str) -> Option<Arc<GrammarSnapshot>> {
        self.get(name).map(|g| g.snapshot())
    }
}

/// Owns a set of named grammars and lets rules in one grammar reference public
/// rules of another (`<grammar.rule>`) by direct lookup.
///
/// ```
/// use rulegram::{GrammarManager, Rule, RuleComponent, RuleReference, token};
///
/// let manager = GrammarManager::new();
/// let colors = manager.create_grammar("colors", None, None).unwrap();
/// colors.add_rule(Rule::public("color", token("red"))).unwrap();
/// colors.commit_changes().unwrap();
///
/// let paint = manager.create_grammar("paint", None, Some("en-US")).unwrap();
/// paint
///     .add_rule(Rule::public(
///         "paint",
///         RuleComponent::Reference(RuleReference::qualified("colors", "color")),
///     ))
///     .unwrap();
/// paint.commit_changes().unwrap();
///
/// assert!(paint.parse(&["red"], None).unwrap().is_some());
/// ```
#[derive(Debug, Default)]
pub struct GrammarManager {
    registry: Arc<Registry>,
    config: MatchConfig,
}

impl GrammarManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager whose grammars all match with `config`.
    #[must_use]
    pub fn with_config(config: MatchConfig) -> Self {
        Self {
            registry: Arc::default(),
            config,
        }
    }

    /// Create and register an empty grammar.
    ///
    /// A `root` given here is queued like [`RuleGrammar::set_root()`], so it
    /// takes effect at the first commit, after the rules added with it.
    ///
    /// # Errors
    ///
    /// Returns [`GrammarError::DuplicateGrammar`] if the name is taken.
    pub fn create_grammar(
        &self,
        name: &str,
        root: Option<&str>,
        locale: Option<&str>,
    ) -> Result<Arc<RuleGrammar>, GrammarError> {
        let grammar = self.adopt(GrammarSnapshot::empty(name, locale))?;
        if root.is_some() {
            grammar.set_root(root);
        }
        Ok(grammar)
    }

    /// Register a grammar built from an existing snapshot.
    pub(crate) fn adopt(
        &self,
        snapshot: GrammarSnapshot,
    ) -> Result<Arc<RuleGrammar>, GrammarError> {
        let grammar = RuleGrammar::from_snapshot(
            snapshot,
            self.config,
            Some(Arc::downgrade(&self.registry)),
        );
        self.register(Arc::new(grammar))
    }

    fn register(&self, grammar: Arc<RuleGrammar>) -> Result<Arc<RuleGrammar>, GrammarError> {
        let mut grammars = self
            .registry
            .grammars
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if grammars.contains_key(grammar.name()) {
            return Err(GrammarError::DuplicateGrammar {
                name: grammar.name().to_owned(),
            });
        }
        debug!("registered grammar '{}'", grammar.name());
        grammars.insert(grammar.name().to_owned(), Arc::clone(&grammar));
        Ok(grammar)
    }

    #[must_use]
    pub fn get_grammar(&self, name: &str) -> Option<Arc<RuleGrammar>> {
        self.registry.get(name)
    }

    /// Unregister a grammar. References into it stop resolving; handles that
    /// callers still hold keep working on their own.
    ///
    /// # Errors
    ///
    /// Returns [`GrammarError::UnknownGrammar`] if no grammar has that name.
    pub fn delete_grammar(&self, name: &str) -> Result<Arc<RuleGrammar>, GrammarError> {
        self.registry
            .grammars
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| GrammarError::UnknownGrammar {
                grammar: name.to_owned(),
            })
    }

    /// Registered grammar names, sorted.
    #[must_use]
    pub fn list_grammars(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .grammars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }

    /// Parse JSGF text, register it as a new grammar and commit its rules.
    ///
    /// On any failure nothing stays registered.
    ///
    /// # Errors
    ///
    /// Returns [`RulegramError`](crate::RulegramError) on parse failure, a
    /// duplicate grammar name, or rules the grammar rejects.
    pub fn load_jsgf(&self, source: &str) -> Result<Arc<RuleGrammar>, crate::RulegramError> {
        let parsed = crate::parse::parse(source)?;
        let grammar = self.create_grammar(&parsed.name, None, parsed.locale.as_deref())?;
        let loaded = parsed
            .rules
            .into_iter()
            .try_for_each(|rule| grammar.add_rule(rule))
            .map_err(crate::RulegramError::from)
            .and_then(|()| {
                grammar
                    .commit_changes()
                    .map(|_| ())
                    .map_err(crate::RulegramError::from)
            });
        if let Err(e) = loaded {
            let _ = self.delete_grammar(grammar.name());
            return Err(e);
        }
        Ok(grammar)
    }

    /// Read a JSGF file and load it with [`load_jsgf()`](Self::load_jsgf).
    ///
    /// # Errors
    ///
    /// Returns [`RulegramError`](crate::RulegramError) on I/O failure or any
    /// error of [`load_jsgf()`](Self::load_jsgf).
    pub fn load_jsgf_file(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Arc<RuleGrammar>, crate::RulegramError> {
        let source = std::fs::read_to_string(path)?;
        self.load_jsgf(&source)
    }

    /// Register a grammar restored from a binary produced by
    /// [`RuleGrammar::to_bytes()`]. It matches with this manager's config.
    ///
    /// # Errors
    ///
    /// Returns [`RulegramError`](crate::RulegramError) if the bytes do not
    /// decode or the grammar name is taken.
    #[cfg(feature = "binary-cache")]
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<Arc<RuleGrammar>, crate::RulegramError> {
        let snapshot = GrammarSnapshot::from_bytes(bytes)?;
        Ok(self.adopt(snapshot)?)
    }
}
