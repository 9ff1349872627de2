//! Default tracing subscriber setup.

use tracing_subscriber::fmt;

use crate::core::settings::Settings;

/// Install a compact formatting tracing subscriber at the configured level.
///
/// Returns false if a global subscriber was already installed, in which case
/// the existing subscriber is left in place.
pub fn init(settings: &Settings) -> bool {
    let format = fmt::format()
        .with_level(true)
        .with_line_number(true)
        .with_target(false)
        .without_time()
        .compact();
    tracing_subscriber::fmt()
        .with_max_level(settings.log_level)
        .event_format(format)
        .try_init()
        .is_ok()
}
