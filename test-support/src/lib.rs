pub mod fake_smtp;

use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode};
use std::sync::Once;

/// Routes `log` records (and `tracing` events, through its `log` feature) to the terminal.
///
/// Safe to call from every test; only the first call installs the logger.
pub fn setup_logging() {
    static LOGGING: Once = Once::new();
    LOGGING.call_once(|| {
        let _ = CombinedLogger::init(vec![TermLogger::new(
            LevelFilter::Debug,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )]);
    });
}
