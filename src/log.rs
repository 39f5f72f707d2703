//! The implementation of the `VEXA_LOG_RA` environment variable.
//!
//! `VEXA_LOG_RA=-` dumps the pre-allocation IR and the final assignment map of every successful
//! run to stderr; `VEXA_LOG_RA=<path>` appends them to `<path>` (truncated once at startup).
//! When the variable is unset, logging is a no-op.

use std::{env, fs::File, io::Write, sync::LazyLock};

static LOG_RA: LazyLock<Option<String>> = LazyLock::new(|| {
    let path = env::var("VEXA_LOG_RA").ok()?;
    if path != "-" {
        // If there's an existing log file, truncate (i.e. empty it), so that later appends to
        // the log aren't appending to a previous log run.
        File::create(&path).ok();
    }
    Some(path)
});

/// Is assignment logging enabled? Callers should check this before building a log string.
pub(crate) fn should_log_ra() -> bool {
    LOG_RA.is_some()
}

/// Log `s` to wherever `VEXA_LOG_RA` directs.
pub(crate) fn log_ra(s: &str) {
    match LOG_RA.as_deref() {
        Some("-") => eprint!("{s}"),
        Some(p) => {
            File::options()
                .append(true)
                .open(p)
                .map(|mut f| f.write(s.as_bytes()))
                .ok();
        }
        None => (),
    }
}
