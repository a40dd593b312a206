//! `keg search` command implementation.

use chrono::{DateTime, Utc};
use clap::Args;
use keg_core::{SearchEngine, SearchFilter, SearchResult};

use crate::commands::dates::{parse_since, parse_until};
use crate::context::Context;
use crate::error::CliError;
use crate::output::{Format, Output};

/// Arguments for the search command.
#[derive(Args)]
pub(crate) struct SearchArgs {
    /// Words to look for in titles and bodies (any word matches).
    query: Vec<String>,

    /// Keg alias to search (repeatable, default: the configured default keg).
    #[arg(short = 'k', long = "keg", value_name = "ALIAS")]
    kegs: Vec<String>,

    /// Only nodes carrying this tag (repeatable, all must match).
    #[arg(short, long = "tag", value_name = "TAG")]
    tags: Vec<String>,

    /// Only nodes by this author.
    #[arg(long)]
    author: Option<String>,

    /// Only nodes dated on or after DATE.
    #[arg(long, value_name = "DATE", value_parser = parse_since)]
    since: Option<DateTime<Utc>>,

    /// Only nodes dated on or before DATE.
    #[arg(long, value_name = "DATE", value_parser = parse_until)]
    until: Option<DateTime<Utc>>,

    /// Maximum number of results.
    #[arg(short = 'n', long, value_name = "LIMIT")]
    limit: Option<usize>,

    /// Output format.
    #[arg(long, value_enum, default_value_t)]
    format: Format,
}

impl SearchArgs {
    fn filter(&self) -> SearchFilter {
        let text = self.query.join(" ");
        SearchFilter {
            text: (!text.trim().is_empty()).then_some(text),
            tags: self.tags.clone(),
            since: self.since,
            until: self.until,
            author: self.author.clone(),
            as_of: None,
        }
    }

    /// Execute the search command.
    ///
    /// # Errors
    ///
    /// Returns an error if no keg could be searched.
    pub(crate) fn execute(self, ctx: &mut Context, output: &Output) -> Result<(), CliError> {
        let aliases = ctx.aliases(&self.kegs)?;
        let filter = self.filter();

        let found = SearchEngine::new(&ctx.backend, &ctx.config).search(
            aliases.as_slice(),
            &filter,
            self.limit,
        )?;

        for failure in &found.failures {
            output.warning(&format!("Warning: skipped keg {failure}"));
        }

        if let Some(document) = self.format.encode(&found.results)? {
            return output.document(&document);
        }
        if found.results.is_empty() {
            output.muted("No matching nodes.");
            return Ok(());
        }
        for result in &found.results {
            output.result(&result_line(result))?;
        }
        Ok(())
    }
}

fn result_line(result: &SearchResult) -> String {
    let mut line = format!(
        "{}/{}\t{}\t{}",
        result.keg_alias,
        result.node_id,
        result.updated.format("%Y-%m-%d"),
        result.title
    );
    if !result.tags.is_empty() {
        line.push_str("\t#");
        line.push_str(&result.tags.join(" #"));
    }
    line
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use clap::Parser;
    use keg_core::NodeMeta;
    use keg_storage::NodeId;
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: SearchArgs,
    }

    fn parse(argv: &[&str]) -> SearchArgs {
        Harness::parse_from(std::iter::once("search").chain(argv.iter().copied())).args
    }

    #[test]
    fn test_filter_from_args() {
        let args = parse(&["rust", "notes", "-t", "draft", "--tag", "lang", "--since", "2024-01-02"]);

        let filter = args.filter();

        assert_eq!(filter.text.as_deref(), Some("rust notes"));
        assert_eq!(filter.tags, vec!["draft", "lang"]);
        assert_eq!(filter.since, Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()));
        assert_eq!(filter.until, None);
    }

    #[test]
    fn test_no_query_means_no_text_predicate() {
        let args = parse(&["-k", "a", "-k", "b", "-n", "5", "--format", "json"]);

        assert_eq!(args.filter().text, None);
        assert_eq!(args.kegs, vec!["a", "b"]);
        assert_eq!(args.limit, Some(5));
        assert_eq!(args.format, Format::Json);
    }

    #[test]
    fn test_result_line() {
        let date = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let result = SearchResult {
            keg_alias: "notes".to_owned(),
            node_id: NodeId::new(12),
            title: "Ownership".to_owned(),
            updated: date,
            tags: vec!["lang".to_owned(), "rust".to_owned()],
            author: None,
            rank: 1.0,
            meta: NodeMeta::dated(date),
        };

        assert_eq!(result_line(&result), "notes/12\t2024-05-06\tOwnership\t#lang #rust");
    }
}
