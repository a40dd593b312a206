//! Ranked search across one or more kegs.
//!
//! Each alias is resolved and scanned on the rayon pool. Results from every
//! keg that loaded are merged into one ranked list. Aliases that fail are
//! reported next to the results instead of aborting the search.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use keg_config::ResolvedConfig;
use keg_storage::NodeId;
use rayon::prelude::*;
use serde::Serialize;

use crate::backend::{Backend, ResolveError};
use crate::error::KegError;
use crate::keg::Keg;
use crate::node::{Node, NodeMeta};

/// Convert Duration to milliseconds as f64.
fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Conjunctive node predicates. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    /// Whitespace-separated tokens, matched case-insensitively against title
    /// and body. A node matches if any token occurs.
    pub text: Option<String>,
    /// Tags the node must all carry.
    pub tags: Vec<String>,
    /// Inclusive lower bound on the node date.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the node date.
    pub until: Option<DateTime<Utc>>,
    /// Exact author.
    pub author: Option<String>,
    /// Reference instant for recency. Defaults to now.
    pub as_of: Option<DateTime<Utc>>,
}

impl SearchFilter {
    /// Filter matching `text`.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Require `tag`.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Require `author`.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Restrict node dates to `since..=until`.
    #[must_use]
    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    /// Measure recency against `as_of`.
    #[must_use]
    pub fn as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }
}

/// One matching node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Alias of the keg holding the node.
    pub keg_alias: String,
    /// Node id within the keg.
    pub node_id: NodeId,
    /// Node title.
    pub title: String,
    /// Node date.
    pub updated: DateTime<Utc>,
    /// Node tags, sorted.
    pub tags: Vec<String>,
    /// Node author.
    pub author: Option<String>,
    /// Relevance, higher first.
    pub rank: f64,
    /// Full node metadata.
    pub meta: NodeMeta,
}

/// An alias that could not be searched.
#[derive(Debug)]
pub struct AliasFailure {
    /// The alias.
    pub alias: String,
    /// Why it failed.
    pub error: ResolveError,
}

impl std::fmt::Display for AliasFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.alias, self.error)
    }
}

/// Merged results plus the aliases that failed.
#[derive(Debug, Default)]
pub struct SearchOutput {
    /// Ranked results.
    pub results: Vec<SearchResult>,
    /// Aliases that could not be searched.
    pub failures: Vec<AliasFailure>,
}

/// Search failed for every requested alias.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// No alias could be searched.
    #[error("search failed for every keg: {}", join_failures(.0))]
    AllFailed(Vec<AliasFailure>),
}

fn join_failures(failures: &[AliasFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Lowercased query, split once for every node.
struct Query {
    /// Lowercased words joined by single spaces.
    phrase: String,
    tokens: Vec<String>,
}

impl Query {
    fn parse(text: Option<&str>) -> Option<Self> {
        let lowered = text?.to_lowercase();
        let phrase = normalize_spaces(&lowered);
        let mut tokens: Vec<String> = Vec::new();
        for token in phrase.split(' ').filter(|t| !t.is_empty()) {
            if !tokens.iter().any(|t| t == token) {
                tokens.push(token.to_owned());
            }
        }
        if tokens.is_empty() {
            return None;
        }
        Some(Self { phrase, tokens })
    }

    /// `(tier, matched_tokens)`, or `None` if no token occurs.
    fn score(&self, node: &Node) -> Option<(u32, usize)> {
        let title = node.title().to_lowercase();
        let content = node.content().to_lowercase();

        let matched = self
            .tokens
            .iter()
            .filter(|token| title.contains(token.as_str()) || content.contains(token.as_str()))
            .count();
        if matched == 0 {
            return None;
        }

        let tier = if normalize_spaces(&title) == self.phrase {
            2
        } else if self.tokens.iter().any(|token| title.contains(token.as_str())) {
            1
        } else {
            0
        };
        Some((tier, matched))
    }
}

fn normalize_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Filter with parsed query and fixed reference time.
struct Matcher<'f> {
    filter: &'f SearchFilter,
    query: Option<Query>,
    as_of: DateTime<Utc>,
}

impl<'f> Matcher<'f> {
    fn new(filter: &'f SearchFilter) -> Self {
        Self {
            filter,
            query: Query::parse(filter.text.as_deref()),
            as_of: filter.as_of.unwrap_or_else(Utc::now),
        }
    }

    fn recency(&self, date: DateTime<Utc>) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let age_days = (self.as_of - date).num_seconds().max(0) as f64 / SECONDS_PER_DAY;
        1.0 / (1.0 + age_days)
    }

    /// Rank of `node`, or `None` if it fails a predicate.
    fn rank(&self, node: &Node) -> Option<f64> {
        let meta = node.meta();
        let filter = self.filter;

        if !filter.tags.iter().all(|tag| meta.tags.contains(tag)) {
            return None;
        }
        if filter.since.is_some_and(|since| meta.date < since)
            || filter.until.is_some_and(|until| meta.date > until)
        {
            return None;
        }
        if let Some(author) = &filter.author
            && meta.author.as_ref() != Some(author)
        {
            return None;
        }

        let recency = self.recency(meta.date);
        match &self.query {
            None => Some(recency),
            Some(query) => {
                let (tier, matched) = query.score(node)?;
                #[allow(clippy::cast_precision_loss)]
                let matched = matched as f64;
                Some(f64::from(tier) * 1000.0 + matched * 10.0 + recency)
            }
        }
    }
}

/// Searches the kegs a [`Backend`] can resolve.
#[derive(Debug, Clone, Copy)]
pub struct SearchEngine<'a> {
    backend: &'a Backend,
    config: &'a ResolvedConfig,
}

impl<'a> SearchEngine<'a> {
    /// Search engine resolving aliases through `backend` and `config`.
    #[must_use]
    pub fn new(backend: &'a Backend, config: &'a ResolvedConfig) -> Self {
        Self { backend, config }
    }

    /// Search the kegs named by `aliases`.
    ///
    /// Results are ordered by rank, then date (newest first), node id and
    /// alias. `limit` truncates the merged list.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::AllFailed`] if no alias could be searched.
    /// Partial failures are reported in [`SearchOutput::failures`].
    pub fn search<A>(
        &self,
        aliases: &[A],
        filter: &SearchFilter,
        limit: Option<usize>,
    ) -> Result<SearchOutput, SearchError>
    where
        A: AsRef<str> + Sync,
    {
        let start = Instant::now();
        let mut seen = BTreeSet::new();
        let aliases: Vec<&str> = aliases
            .iter()
            .map(AsRef::as_ref)
            .filter(|alias| seen.insert(*alias))
            .collect();
        let matcher = Matcher::new(filter);

        let scans: Vec<Result<Vec<SearchResult>, AliasFailure>> = aliases
            .par_iter()
            .map(|&alias| self.scan_alias(alias, &matcher))
            .collect();

        let mut output = SearchOutput::default();
        for scan in scans {
            match scan {
                Ok(results) => output.results.extend(results),
                Err(failure) => {
                    tracing::warn!(alias = %failure.alias, error = %failure.error, "Keg search failed");
                    output.failures.push(failure);
                }
            }
        }

        if !aliases.is_empty() && output.failures.len() == aliases.len() {
            return Err(SearchError::AllFailed(output.failures));
        }

        output.results.sort_by(compare_results);
        if let Some(limit) = limit {
            output.results.truncate(limit);
        }

        tracing::info!(
            kegs = aliases.len(),
            failed = output.failures.len(),
            results = output.results.len(),
            elapsed_ms = elapsed_ms(start),
            "Search completed"
        );
        Ok(output)
    }

    fn scan_alias(&self, alias: &str, matcher: &Matcher<'_>) -> Result<Vec<SearchResult>, AliasFailure> {
        let fail = |error: ResolveError| AliasFailure {
            alias: alias.to_owned(),
            error,
        };
        let keg = self.backend.load_keg(alias, self.config).map_err(fail)?;
        let nodes = keg
            .nodes()
            .map_err(|e| fail(ResolveError::Keg(e)))?;
        Ok(scan_nodes(alias, &keg, nodes, matcher))
    }
}

fn scan_nodes(
    alias: &str,
    keg: &Keg,
    nodes: impl Iterator<Item = Result<Node, KegError>>,
    matcher: &Matcher<'_>,
) -> Vec<SearchResult> {
    let start = Instant::now();
    let mut results = Vec::new();
    for node in nodes {
        let node = match node {
            Ok(node) => node,
            Err(e) => {
                tracing::warn!(alias, keg = %keg.keg_file().title, error = %e, "Skipping unreadable node");
                continue;
            }
        };
        if let Some(rank) = matcher.rank(&node) {
            results.push(to_result(alias, node, rank));
        }
    }
    tracing::debug!(
        alias,
        matches = results.len(),
        elapsed_ms = elapsed_ms(start),
        "Scanned keg"
    );
    results
}

fn to_result(alias: &str, node: Node, rank: f64) -> SearchResult {
    let meta = node.meta().clone();
    SearchResult {
        keg_alias: alias.to_owned(),
        node_id: node.id(),
        title: node.title().to_owned(),
        updated: meta.date,
        tags: meta.tags.iter().cloned().collect(),
        author: meta.author.clone(),
        rank,
        meta,
    }
}

fn compare_results(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.rank
        .total_cmp(&a.rank)
        .then_with(|| b.updated.cmp(&a.updated))
        .then_with(|| a.node_id.cmp(&b.node_id))
        .then_with(|| a.keg_alias.cmp(&b.keg_alias))
}
