//! Line classification: ordered rule tables over one matching engine.
//!
//! Classification is total and first-match-wins. New rules are appended to
//! the end of a table so earlier classifications never change.

use std::sync::LazyLock;

use regex::Regex;

use crate::line::{LineType, LogFormat};

/// How a rule matches a line.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Case-sensitive substring match.
    Contains(&'static str),
    /// Match at the start of the line.
    Prefix(&'static str),
    /// Full regex match anywhere in the line.
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, line: &str) -> bool {
        match self {
            Self::Contains(needle) => line.contains(needle),
            Self::Prefix(prefix) => line.starts_with(prefix),
            Self::Pattern(re) => re.is_match(line),
        }
    }
}

/// One classification rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub line_type: LineType,
    pub matcher: Matcher,
}

impl Rule {
    pub const fn new(line_type: LineType, matcher: Matcher) -> Self {
        Self { line_type, matcher }
    }
}

/// An ordered rule list. First match wins; no match yields [`LineType::None`].
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub const fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Appends a rule. Existing rules keep priority over the new one.
    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Classifies a line. Total: never fails, unmatched lines are `None`.
    #[must_use]
    pub fn classify(&self, line: &str) -> LineType {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(line))
            .map_or(LineType::None, |rule| rule.line_type)
    }
}

fn pattern(source: &str) -> Matcher {
    // Rule patterns are compile-time constants; a failure here is a
    // programming error caught by the rule-table tests.
    Matcher::Pattern(Regex::new(source).unwrap_or_else(|e| panic!("bad rule pattern: {e}")))
}

static FAHCLIENT_RULES: LazyLock<RuleSet> = LazyLock::new(|| {
    RuleSet::new(vec![
        Rule::new(LineType::LogOpen, pattern(r"^\*+ Log Started ")),
        Rule::new(LineType::LogHeader, Matcher::Prefix("*")),
        Rule::new(
            LineType::WorkUnitWorking,
            pattern(r"WU\d+:FS\d+:Starting\b"),
        ),
        Rule::new(LineType::WorkUnitProject, Matcher::Contains("Project: ")),
        Rule::new(
            LineType::WorkUnitCoreVersion,
            pattern(r"WU\d+:FS\d+:0x[0-9a-fA-F]+:\s*Version:?\s"),
        ),
        Rule::new(
            LineType::WorkUnitFrame,
            pattern(r"Completed \d+ out of \d+ steps"),
        ),
        Rule::new(
            LineType::WorkUnitCoreReturn,
            Matcher::Contains("FahCore returned: "),
        ),
        Rule::new(
            LineType::ClientEuePause,
            Matcher::Contains("Pausing due to too many errors"),
        ),
        Rule::new(
            LineType::WorkUnitTooManyErrors,
            Matcher::Contains("Too many errors"),
        ),
        Rule::new(
            LineType::ClientVersion,
            pattern(r"^(?:\d{2}:\d{2}:\d{2}:)?\s*Version:\s+\d"),
        ),
        Rule::new(LineType::ClientArguments, Matcher::Contains("Arguments:")),
        Rule::new(LineType::Error, Matcher::Contains("ERROR:")),
    ])
});

static LEGACY_RULES: LazyLock<RuleSet> = LazyLock::new(|| {
    RuleSet::new(vec![
        Rule::new(LineType::LogOpen, Matcher::Prefix("--- Opening Log file")),
        Rule::new(LineType::LogHeader, Matcher::Prefix("#")),
        Rule::new(
            LineType::WorkUnitWorking,
            Matcher::Contains("Working on queue slot "),
        ),
        Rule::new(LineType::WorkUnitProject, Matcher::Contains("Project: ")),
        Rule::new(
            LineType::WorkUnitCoreVersion,
            pattern(r"\]\s+Version\s+\d"),
        ),
        Rule::new(
            LineType::WorkUnitFrame,
            pattern(r"Completed \d+ out of \d+ steps"),
        ),
        Rule::new(
            LineType::WorkUnitCoreReturn,
            Matcher::Contains("Folding@home Core Shutdown: "),
        ),
        Rule::new(
            LineType::ClientNumberOfUnitsCompleted,
            Matcher::Contains("Number of Units Completed: "),
        ),
        Rule::new(
            LineType::ClientEuePause,
            Matcher::Contains("Paused for 24 hours"),
        ),
        Rule::new(
            LineType::ClientArguments,
            Matcher::Contains("Arguments:"),
        ),
        Rule::new(LineType::Error, Matcher::Contains("ERROR")),
    ])
});

/// Returns the rule table for a log format.
#[must_use]
pub fn rules(format: LogFormat) -> &'static RuleSet {
    match format {
        LogFormat::FahClient => &FAHCLIENT_RULES,
        LogFormat::Legacy => &LEGACY_RULES,
    }
}

/// Classifies one raw line under a format's rule table.
#[must_use]
pub fn classify(format: LogFormat, line: &str) -> LineType {
    rules(format).classify(line)
}

static LEGACY_STAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\d{2}:\d{2}:\d{2}\]").unwrap());
static V7_STAMP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{2}:\d{2}:\d{2}:").unwrap());

/// Guesses the log format from the first recognizable lines.
///
/// Defaults to the client/server format when nothing is recognizable.
#[must_use]
pub fn detect_format(text: &str) -> LogFormat {
    for line in text.lines().filter(|l| !l.trim().is_empty()).take(25) {
        if line.starts_with("--- Opening Log file") || LEGACY_STAMP.is_match(line) {
            return LogFormat::Legacy;
        }
        if FAHCLIENT_RULES.classify(line) == LineType::LogOpen || V7_STAMP.is_match(line) {
            return LogFormat::FahClient;
        }
    }
    LogFormat::FahClient
}
