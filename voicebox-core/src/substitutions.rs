//! Pattern → replacement rules for misheard terms.
//!
//! ## Ordering
//!
//! Rules are applied in one left-to-right scan over the transcript. At each
//! word boundary the rules are tried in a deterministic priority order:
//! longer patterns first, ties broken by rule-list position. This makes
//! `"super base"` win over a hypothetical `"base"` rule, and it makes the
//! outcome of overlapping patterns independent of edit history.
//!
//! ## Non-recursion
//!
//! A replacement is emitted verbatim and never re-scanned, so rules cannot
//! cascade into each other within one `apply` call.
//!
//! ## Sharing
//!
//! `SubstitutionEngine` hands out `Arc<RuleSet>` snapshots. Edits build a new
//! set and swap the `Arc`; a session keeps whatever snapshot it captured at
//! session start, unaffected by concurrent edits.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One user-visible pattern → replacement pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SubstitutionRule {
    pub pattern: String,
    pub replacement: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SubstitutionRule {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
            enabled: true,
        }
    }
}

/// Pre-lowered pattern plus replacement, in priority order.
#[derive(Debug, Clone)]
struct CompiledRule {
    pattern_lc: Vec<char>,
    replacement: String,
}

/// Immutable, compiled rule snapshot. Pure and safe to share across sessions.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<SubstitutionRule>,
    compiled: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<SubstitutionRule>) -> Self {
        let mut indexed: Vec<(usize, &SubstitutionRule)> = rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.enabled && !r.pattern.trim().is_empty())
            .collect();
        // Longest pattern first; rule-list order breaks ties.
        indexed.sort_by(|(ia, a), (ib, b)| {
            b.pattern
                .chars()
                .count()
                .cmp(&a.pattern.chars().count())
                .then(ia.cmp(ib))
        });

        let compiled = indexed
            .into_iter()
            .map(|(_, r)| CompiledRule {
                pattern_lc: r.pattern.chars().map(fold_char).collect(),
                replacement: r.replacement.clone(),
            })
            .collect();

        Self { rules, compiled }
    }

    /// The rules as configured, in list order.
    pub fn rules(&self) -> &[SubstitutionRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    /// Apply every enabled rule once in a single non-recursive scan.
    ///
    /// Matching is case-insensitive with word boundaries on both sides, so
    /// `"get hub"` matches inside `"the get hub repo"` but `"hub"` would not
    /// match inside `"github"`.
    pub fn apply(&self, text: &str) -> String {
        if text.is_empty() || self.compiled.is_empty() {
            return text.to_string();
        }

        let chars: Vec<char> = text.chars().collect();
        let lower: Vec<char> = chars.iter().map(|c| fold_char(*c)).collect();

        let mut out = String::with_capacity(text.len());
        let mut i = 0usize;
        'scan: while i < chars.len() {
            let start_ok = i == 0 || !is_word_char(chars[i - 1]);
            if start_ok {
                for rule in &self.compiled {
                    let len = rule.pattern_lc.len();
                    if i + len > chars.len() || lower[i..i + len] != rule.pattern_lc[..] {
                        continue;
                    }
                    let end_ok = i + len == chars.len() || !is_word_char(chars[i + len]);
                    if end_ok {
                        out.push_str(&rule.replacement);
                        i += len;
                        continue 'scan;
                    }
                }
            }
            out.push(chars[i]);
            i += 1;
        }
        out
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\''
}

/// One-to-one case folding: the first char of the full lowercase mapping.
/// Keeps pattern and text positions aligned while covering accented letters.
fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn fold_eq(a: &str, b: &str) -> bool {
    a.chars().map(fold_char).eq(b.chars().map(fold_char))
}

/// Shared, editable rule store with snapshot-read semantics.
#[derive(Debug)]
pub struct SubstitutionEngine {
    current: RwLock<Arc<RuleSet>>,
}

impl SubstitutionEngine {
    pub fn new(rules: Vec<SubstitutionRule>) -> Self {
        Self {
            current: RwLock::new(Arc::new(RuleSet::new(rules))),
        }
    }

    /// Engine pre-loaded with the stock misheard-term table.
    pub fn with_defaults() -> Self {
        Self::new(default_rules())
    }

    /// Snapshot for one session. Cheap (`Arc` clone).
    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current.read())
    }

    /// Replace the entire rule list. Takes effect for future snapshots only.
    pub fn set_rules(&self, rules: Vec<SubstitutionRule>) {
        *self.current.write() = Arc::new(RuleSet::new(rules));
    }

    /// Append a rule, replacing any existing rule with the same pattern
    /// (case-insensitive).
    pub fn push_rule(&self, rule: SubstitutionRule) {
        let mut rules = self.snapshot().rules().to_vec();
        rules.retain(|r| !fold_eq(&r.pattern, &rule.pattern));
        rules.push(rule);
        self.set_rules(rules);
    }

    /// Remove a rule by pattern. Returns whether anything was removed.
    pub fn remove_rule(&self, pattern: &str) -> bool {
        let mut rules = self.snapshot().rules().to_vec();
        let before = rules.len();
        rules.retain(|r| !fold_eq(&r.pattern, pattern));
        let removed = rules.len() != before;
        if removed {
            self.set_rules(rules);
        }
        removed
    }
}

impl Default for SubstitutionEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Stock corrections for terms speech models commonly mishear.
pub fn default_rules() -> Vec<SubstitutionRule> {
    [
        ("superbase", "Supabase"),
        ("super base", "Supabase"),
        ("versel", "Vercel"),
        ("get hub", "GitHub"),
        ("get lab", "GitLab"),
        ("java script", "JavaScript"),
        ("type script", "TypeScript"),
        ("next js", "Next.js"),
        ("node js", "Node.js"),
        ("postgres", "PostgreSQL"),
        ("my sql", "MySQL"),
        ("mongo db", "MongoDB"),
        ("graph ql", "GraphQL"),
        ("elastic search", "Elasticsearch"),
        ("dev ops", "DevOps"),
        ("cube control", "kubectl"),
        ("coobernetes", "Kubernetes"),
        ("v s code", "VS Code"),
    ]
    .into_iter()
    .map(|(p, r)| SubstitutionRule::new(p, r))
    .collect()
}

/// Final transcript cleanup applied after substitution.
///
/// Normalizes whitespace and capitalizes the leading letter. Terminal
/// punctuation is left exactly as the backend produced it.
pub fn finalize_transcript(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    match chars.next() {
        Some(first) if first.is_lowercase() => {
            let mut out = String::with_capacity(collapsed.len());
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
            out
        }
        _ => collapsed,
    }
}
