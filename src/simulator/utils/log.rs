use log::LevelFilter;
use std::io::Write;

/// Install the global logger.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `warn` in quiet mode. Safe to call more than
/// once (tests do), later calls are ignored.
pub fn init_log(quiet: bool) {
  let default_level = if quiet { LevelFilter::Warn } else { LevelFilter::Info };
  let _ = env_logger::Builder::new()
    .filter_level(default_level)
    .parse_default_env()
    .format(|buf, record| writeln!(buf, "\x1b[34m[{}]\x1b[0m {}", record.level(), record.args()))
    .try_init();
}
