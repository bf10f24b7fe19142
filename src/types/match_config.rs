/// Input token that matches any single grammar word.
pub const WILDCARD_TOKENS: [&str; 2] = ["%", "*"];

/// Default cap on how many graph nodes deep one match path may go.
pub const DEFAULT_MAX_DEPTH: usize = 1_000;

/// Tuning for the token matcher.
///
/// The defaults give exhaustive backtracking with no step cap, wildcard input
/// tokens enabled, and paths limited to [`DEFAULT_MAX_DEPTH`] nodes. The
/// matcher recurses once per node on the path, so the depth cap bounds its
/// stack use.
///
/// ```
/// use rulegram::MatchConfig;
///
/// let config = MatchConfig::new().max_steps(10_000).wildcards(false);
/// assert_eq!(config.step_limit(), Some(10_000));
/// assert_eq!(config.depth_limit(), rulegram::DEFAULT_MAX_DEPTH);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchConfig {
    max_steps: Option<u64>,
    max_depth: usize,
    wildcards: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_steps: None,
            max_depth: DEFAULT_MAX_DEPTH,
            wildcards: true,
        }
    }
}

impl MatchConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of graph nodes visited per match attempt. An attempt that
    /// runs out of steps reports no match.
    #[must_use]
    pub fn max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    /// Remove any step cap.
    #[must_use]
    pub fn unbounded(mut self) -> Self {
        self.max_steps = None;
        self
    }

    /// Cap the number of graph nodes on one match path. An attempt that needs
    /// a deeper path reports no match. Raising this needs a matching thread
    /// stack size.
    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Treat the input tokens `%` and `*` as matching any grammar word.
    #[must_use]
    pub fn wildcards(mut self, enabled: bool) -> Self {
        self.wildcards = enabled;
        self
    }

    #[must_use]
    pub fn step_limit(&self) -> Option<u64> {
        self.max_steps
    }

    #[must_use]
    pub fn depth_limit(&self) -> usize {
        self.max_depth
    }

    #[must_use]
    pub fn wildcards_enabled(&self) -> bool {
        self.wildcards
    }
}
