use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "lineprobe",
    version,
    about = "Capture a snapshot at a source line of a running node --inspect process",
    after_help = "Examples:\n  lineprobe --inspector ws://127.0.0.1:9229/<id> server.js 42\n  lineprobe --config lineprobe.toml --timeout-ms 5000 app/routes.js 17"
)]
pub struct Cli {
    /// Inspector WebSocket url (overrides config and LINEPROBE_INSPECTOR_URL).
    #[arg(long)]
    pub inspector: Option<String>,
    /// TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Give up after this many milliseconds (0 waits forever).
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Maximum number of locals captured.
    #[arg(long)]
    pub max_locals: Option<usize>,
    /// Levels of nested objects expanded below each local (0 keeps them shallow).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=16))]
    pub max_reference_depth: Option<u8>,
    /// Partial path of the loaded script, matched as a url suffix.
    pub file: String,
    /// One-based line number.
    pub line: u32,
}
