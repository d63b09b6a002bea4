//! Purpose: `printbridge` CLI entry point for driving the print bridge from a shell.
//! Exports: Binary entry point (clap CLI), output envelopes, and error rendering.
//! Role: Thin front over `PrintBridge`; the C ABI and this CLI share one implementation.
//! Invariants: Successful output is JSON on stdout; errors go to stderr.
//! Invariants: Exit codes map from `ErrorKind` via `to_exit_code`.
//! Invariants: Non-TTY stderr errors are JSON objects with `error.kind` and `error.message`.
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::error::ErrorKind as ClapErrorKind;
use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use serde_json::{Map, Value, json};

mod command_dispatch;

use printbridge::api::{Error, ErrorKind, PreviewOutcome, to_exit_code};
use printbridge::config::BridgeConfig;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `printbridge --help` for usage."));
            }
        },
    };

    let config = resolve_config(&cli)?;
    printbridge::logging::init_tracing(&config.log_filter);
    command_dispatch::dispatch_command(cli.command, &config)
}

#[derive(Parser)]
#[command(
    name = "printbridge",
    version,
    about = "Drive print operations through the print bridge",
    long_about = None,
    after_help = r#"EXAMPLES
  $ printbridge printers
  $ printbridge print report.pdf --job-name "Q3 report" --pages 1-4
  $ printbridge probe --previews 2
  $ printbridge jobs

ENVIRONMENT
  PRINTBRIDGE_SPOOL_DIR   spool directory (default: ~/.printbridge/spool)
  PRINTBRIDGE_PRINTERS    comma-separated printer names (default: Spool)
  PRINTBRIDGE_PREVIEW     accept|dismiss, how previews and panels are answered
  PRINTBRIDGE_LOG         tracing filter (default: warn)"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        help = "Spool directory for job tickets (default: ~/.printbridge/spool)",
        value_hint = ValueHint::DirPath
    )]
    spool_dir: Option<PathBuf>,
    #[arg(
        long,
        value_delimiter = ',',
        help = "Printer names offered by the spool facility"
    )]
    printers: Option<Vec<String>>,
    #[arg(long, value_enum, help = "How previews and print panels are answered")]
    operator: Option<OperatorCli>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OperatorCli {
    Accept,
    Dismiss,
}

impl From<OperatorCli> for PreviewOutcome {
    fn from(value: OperatorCli) -> Self {
        match value {
            OperatorCli::Accept => PreviewOutcome::Accepted,
            OperatorCli::Dismiss => PreviewOutcome::Dismissed,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// List printers known to the facility
    Printers,
    /// List spooled job tickets
    Jobs,
    /// Print a rendered document (PDF) in one shot
    Print {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long, help = "Job title shown in the print queue")]
        job_name: Option<String>,
        #[arg(long, help = "Target printer (default: first configured printer)")]
        printer: Option<String>,
        #[arg(long, help = "Page or page range, e.g. 3 or 2-5")]
        pages: Option<String>,
        #[arg(long, help = "Show the print panel before spooling")]
        dialog: bool,
        #[arg(long, help = "Export to this PDF path instead of a printer", value_hint = ValueHint::FilePath)]
        pdf_out: Option<PathBuf>,
    },
    /// Drive one operation through create, preview, commit, dispose and report its states
    Probe {
        #[arg(long, default_value_t = 1, help = "Number of previews before committing")]
        previews: u32,
        #[arg(long, help = "Stop after previews; dispose without committing")]
        no_commit: bool,
        #[arg(long, help = "Job title for the committed job")]
        job_name: Option<String>,
    },
}

fn resolve_config(cli: &Cli) -> Result<BridgeConfig, Error> {
    let mut config = BridgeConfig::from_env()?;
    if let Some(dir) = &cli.spool_dir {
        config = config.with_spool_dir(dir);
    }
    if let Some(printers) = &cli.printers {
        let printers: Vec<String> = printers
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        if printers.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("--printers lists no names"));
        }
        config.printers = printers;
    }
    if let Some(operator) = cli.operator {
        config.operator = operator.into();
    }
    Ok(config)
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .next()
        .map(|line| line.trim_start_matches("error: ").trim().to_string())
        .filter(|line| !line.is_empty())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    err.message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", err.kind()))
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = std::error::Error::source(err);
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = cause.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(handle) = err.handle() {
        inner.insert("handle".to_string(), json!(handle));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    if let Some(handle) = err.handle() {
        lines.push(format!("handle: {handle}"));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{Cli, error_json, error_text};
    use clap::CommandFactory;
    use printbridge::api::{Error, ErrorKind};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn error_json_carries_kind_hint_and_handle() {
        let err = Error::new(ErrorKind::InvalidState)
            .with_message("cannot commit a committed operation")
            .with_hint("Dispose the handle.")
            .with_handle(4);
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "InvalidState");
        assert_eq!(value["error"]["hint"], "Dispose the handle.");
        assert_eq!(value["error"]["handle"], 4);
    }

    #[test]
    fn error_text_lists_causes() {
        let io = std::io::Error::other("disk full");
        let err = Error::new(ErrorKind::Io)
            .with_message("failed to write job ticket")
            .with_source(io);
        let text = error_text(&err);
        assert!(text.starts_with("error: failed to write job ticket"));
        assert!(text.contains("caused by: disk full"));
    }
}
