mod pretty_list;

use {
    anyhow::Result,
    flexi_logger::{DeferredNow, Logger, LoggerHandle, Record},
    regex::Regex,
    std::{fmt::Write as FmtWrite, sync::OnceLock},
    textwrap::{termwidth, Options},
};

pub use self::pretty_list::PrettyList;

/// Matches the prefix of the last line in a wrapped log entry.
static LAST_LINE_MATCHER: OnceLock<Regex> = OnceLock::new();

/// Setup console logging.
///
/// The level is read from RUST_LOG and defaults to info. Logging stops when
/// the returned handle is dropped.
pub fn setup() -> Result<LoggerHandle> {
    let handle = Logger::try_with_env_or_str("info")?
        .format(multiline_format)
        .start()?;

    log::info!(
        "Adjust the log level by setting RUST_LOG. By default RUST_LOG=info"
    );

    Ok(handle)
}

/// A multiline log format for flexi_logger.
///
/// Logs are automatically wrapped at terminal width and prefixed with unicode
/// so it's easy to tell where a big log statement begins and ends.
pub fn multiline_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    let size = termwidth().min(74);
    let wrap_options = Options::new(size)
        .initial_indent("┏ ")
        .subsequent_indent("┃ ");

    let mut full_line = String::new();
    writeln!(
        full_line,
        "{} [{}] [{}:{}]",
        record.level(),
        now.now().format("%H:%M:%S%.6f"),
        record.file().unwrap_or("<unnamed>"),
        record.line().unwrap_or(0),
    )
    .expect("unable to format first log line");

    write!(&mut full_line, "{}", &record.args())
        .expect("unable to format log!");

    let wrapped = textwrap::fill(&full_line, wrap_options);
    let matcher = LAST_LINE_MATCHER.get_or_init(|| {
        Regex::new(r"(┃)(.*)$").expect("the last line pattern is valid")
    });

    writeln!(w, "{}", matcher.replace(&wrapped, "┗$2"))
}
