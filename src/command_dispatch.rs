//! Purpose: Hold top-level CLI command execution for `printbridge`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every command builds its bridge from the resolved `BridgeConfig`.
//! Invariants: `probe` always disposes its operation, including on error paths.

use super::*;

use printbridge::api::{
    ContextRef, PageRange, PrintBridge, PrintSettings, list_tickets,
};

pub(super) fn dispatch_command(command: Command, config: &BridgeConfig) -> Result<RunOutcome, Error> {
    match command {
        Command::Printers => {
            let bridge = PrintBridge::from_config(config);
            let printers = bridge.printer_names()?;
            emit_json(json!({ "facility": bridge.facility_name(), "printers": printers }));
            Ok(RunOutcome::ok())
        }
        Command::Jobs => {
            let tickets = list_tickets(&config.spool_dir)?;
            let jobs = serde_json::to_value(&tickets).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode job tickets")
                    .with_source(err)
            })?;
            emit_json(json!({
                "spool_dir": config.spool_dir.display().to_string(),
                "jobs": jobs,
            }));
            Ok(RunOutcome::ok())
        }
        Command::Print {
            file,
            job_name,
            printer,
            pages,
            dialog,
            pdf_out,
        } => {
            let document = std::fs::read(&file).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read document")
                    .with_path(&file)
                    .with_source(err)
            })?;
            let page_range = pages.as_deref().map(PageRange::parse).transpose()?;
            let settings = PrintSettings {
                page_range,
                show_print_panel: dialog,
                show_progress_panel: dialog,
                job_name: job_name.or_else(|| {
                    file.file_name()
                        .map(|name| name.to_string_lossy().to_string())
                }),
                printer_name: printer,
                pdf_path: pdf_out.map(|path| path.to_string_lossy().to_string()),
                ..PrintSettings::default()
            };
            let bridge = PrintBridge::from_config(config);
            match bridge.print_document(&document, &settings)? {
                Some(receipt) => {
                    emit_json(json!({
                        "printed": true,
                        "job": receipt.job_number,
                        "destination": receipt.destination,
                        "bytes": document.len(),
                    }));
                    Ok(RunOutcome::ok())
                }
                None => {
                    emit_json(json!({ "printed": false, "reason": "cancelled" }));
                    Ok(RunOutcome::with_code(1))
                }
            }
        }
        Command::Probe {
            previews,
            no_commit,
            job_name,
        } => probe(config, previews, !no_commit, job_name),
    }
}

fn probe(
    config: &BridgeConfig,
    previews: u32,
    commit: bool,
    job_name: Option<String>,
) -> Result<RunOutcome, Error> {
    let bridge = PrintBridge::from_config(config);
    let document = format!("printbridge probe {}", std::process::id());
    let mut operation = bridge.open(ContextRef::from_ref(&document))?;
    let handle = operation.id();
    let mut states = vec![operation.state()?.as_str()];

    operation.configure(PrintSettings {
        job_name: Some(job_name.unwrap_or_else(|| "printbridge probe".to_string())),
        show_print_panel: false,
        page_count: 1,
        ..PrintSettings::default()
    })?;

    let mut outcomes = Vec::new();
    for _ in 0..previews {
        let outcome = operation.begin_preview()?;
        outcomes.push(match outcome {
            PreviewOutcome::Accepted => "accepted",
            PreviewOutcome::Dismissed => "dismissed",
        });
        states.push(operation.state()?.as_str());
    }

    let receipt = if commit {
        let receipt = operation.commit()?;
        states.push(operation.state()?.as_str());
        Some(receipt)
    } else {
        None
    };

    operation.dispose()?;
    states.push(bridge.state(handle)?.as_str());

    emit_json(json!({
        "facility": bridge.facility_name(),
        "handle": handle.get(),
        "states": states,
        "previews": outcomes,
        "job": receipt.as_ref().map(|receipt| receipt.job_number),
        "live_operations": bridge.live_operations(),
    }));
    Ok(RunOutcome::ok())
}
