use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,reshelf=info";
const VERBOSE_FILTER: &str = "warn,reshelf=debug";

/// `RESHELF_LOG`, then `RUST_LOG`, then the default. `--verbose` wins.
fn filter_directive<F>(verbose: bool, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if verbose {
        return VERBOSE_FILTER.to_string();
    }
    lookup("RESHELF_LOG")
        .or_else(|| lookup("RUST_LOG"))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Logs go to stderr so stdout stays free for the review loop.
pub fn init(verbose: bool) {
    let directive = filter_directive(verbose, |key| std::env::var(key).ok());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("ignoring invalid log filter `{directive}`: {err}");
        EnvFilter::new(DEFAULT_FILTER)
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
