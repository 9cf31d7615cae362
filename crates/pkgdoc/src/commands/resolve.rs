//! `pkgdoc resolve` command implementation.
//!
//! Runs a request path through the redirector, resolver and cache policy
//! using only the built-in tables and an empty module index, so no module is
//! ever known and the candidate list shows how the path would be looked up.

use std::sync::Arc;

use clap::Args;
use pkgdoc_resolve::{
    CacheClass, CacheTtls, PathResolver, Redirect, Redirector, RequestPath, Resolution,
    ResolveError, ShortcutTable, cache,
};
use pkgdoc_storage::MemoryDataSource;

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the resolve command.
#[derive(Args)]
pub(crate) struct ResolveArgs {
    /// Request path with optional query, e.g. `/http@go1.13` or
    /// `/github.com/a/b?tab=versions`.
    path: String,

    /// Treat the client as an automated agent.
    #[arg(long)]
    bot: bool,
}

/// What the server would do with a request.
#[derive(Debug)]
struct Report {
    outcome: Outcome,
    cache_class: CacheClass,
    cache_control: String,
}

#[derive(Debug)]
enum Outcome {
    Redirect(Redirect),
    Resolved(Resolution),
}

impl ResolveArgs {
    /// Execute the resolve command.
    ///
    /// # Errors
    ///
    /// Returns an error if the path has a malformed version or no plausible
    /// module path.
    pub(crate) fn execute(self, output: &Output) -> Result<(), CliError> {
        let report = inspect(&self.path, self.bot)?;

        match &report.outcome {
            Outcome::Redirect(redirect) => {
                output.field("Redirect", &redirect.status().to_string());
                output.field("Location", redirect.location());
            }
            Outcome::Resolved(resolution) => {
                output.field("Path", &resolution.full_path);
                output.field("Version", &resolution.version.to_string());
                let candidates: Vec<&str> =
                    resolution.candidates.iter().map(|c| c.path()).collect();
                output.field("Candidates", &candidates.join(", "));
            }
        }
        output.field("Cache class", &format!("{:?}", report.cache_class));
        output.field("Cache-Control", &report.cache_control);
        Ok(())
    }
}

fn inspect(raw: &str, automated_agent: bool) -> Result<Report, ResolveError> {
    let (path, query) = match raw.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (raw, None),
    };
    let path = format!("/{}", path.trim_start_matches('/'));

    let request = RequestPath::parse(&path, query);
    let cache_class = cache::decide(&request, automated_agent);
    let cache_control = CacheTtls::default().header_value(cache_class);

    let outcome = match Redirector::default().route(&path, query) {
        Some(redirect) => Outcome::Redirect(redirect),
        None => {
            let resolver = PathResolver::new(
                Arc::new(MemoryDataSource::new()),
                ShortcutTable::standard_library(),
            );
            Outcome::Resolved(resolver.resolve(&request)?)
        }
    };

    Ok(Report {
        outcome,
        cache_class,
        cache_control,
    })
}
