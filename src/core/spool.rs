//! Headless print facility that queues jobs as JSON tickets in a spool directory.
//!
//! Each committed job gets a ticket `job-NNNNNN.json`. Documents submitted in one
//! shot are stored next to their ticket as `job-NNNNNN.pdf`, or written to the
//! requested PDF export path. An operation committed with a PDF export path and no
//! document writes a PDF with one page per exported page at the configured paper
//! size. Operations created with a [`PageSource`] ask it for the page count and
//! have it draw each page in range at commit; the ticket lists the drawn pages.
//! Job numbers come from a `.seq` file updated under an exclusive lock, so several
//! processes can share one spool directory.
use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use lopdf::{Document, Object, dictionary};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::facility::{
    CommitReceipt, ContextRef, NativeOperation, PageSource, PageSurface, PreviewOutcome,
    PrintFacility,
};
use crate::core::settings::{Margins, Orientation, PageRange, PaperSize, PrintSettings};

const LOCK_FILE: &str = ".lock";
const SEQ_FILE: &str = ".seq";
const DESTINATION_SPOOL: &str = "spool";
const MAX_EXPORT_PAGES: usize = 10_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job: u64,
    pub job_name: String,
    pub printer: String,
    pub destination: String,
    pub time: String,
    pub previewed: bool,
    pub page_range: Option<PageRange>,
    pub page_count: u32,
    pub paper: PaperSize,
    pub margins: Margins,
    pub orientation: Orientation,
    pub document: Option<String>,
    pub document_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_pages: Option<Vec<u32>>,
}

#[derive(Clone, Debug)]
pub struct SpoolFacility {
    spool_dir: PathBuf,
    printers: Vec<String>,
    operator: PreviewOutcome,
    live: Arc<AtomicUsize>,
}

impl SpoolFacility {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            printers: vec!["Spool".to_string()],
            operator: PreviewOutcome::Accepted,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_printers(mut self, printers: Vec<String>) -> Self {
        self.printers = printers;
        self
    }

    /// How the simulated operator answers previews and print panels.
    pub fn with_operator(mut self, outcome: PreviewOutcome) -> Self {
        self.operator = outcome;
        self
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    /// Number of operations allocated and not yet released.
    pub fn live_operations(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn tickets(&self) -> Result<Vec<JobTicket>, Error> {
        list_tickets(&self.spool_dir)
    }

    fn resolve_printer(&self, requested: Option<&str>) -> Result<String, Error> {
        match requested.filter(|name| !name.trim().is_empty()) {
            Some(name) => self
                .printers
                .iter()
                .find(|printer| printer.as_str() == name)
                .cloned()
                .ok_or_else(|| {
                    Error::new(ErrorKind::Unavailable)
                        .with_message(format!("printer not found: {name}"))
                        .with_hint("Run `printbridge printers` to list available printers.")
                }),
            None => self.printers.first().cloned().ok_or_else(|| {
                Error::new(ErrorKind::Unavailable).with_message("no printers configured")
            }),
        }
    }

    fn ensure_dir(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.spool_dir).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to create spool directory")
                .with_path(&self.spool_dir)
                .with_source(err)
        })
    }

    fn next_job_number(&self) -> Result<u64, Error> {
        self.ensure_dir()?;
        let lock_path = self.spool_dir.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|err| io_error(err, "failed to open spool lock", &lock_path))?;
        let _lock = SpoolLock::acquire(&lock_file, &lock_path)?;

        let seq_path = self.spool_dir.join(SEQ_FILE);
        let mut seq_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&seq_path)
            .map_err(|err| io_error(err, "failed to open spool sequence", &seq_path))?;
        let mut raw = String::new();
        seq_file
            .read_to_string(&mut raw)
            .map_err(|err| io_error(err, "failed to read spool sequence", &seq_path))?;
        let last = if raw.trim().is_empty() {
            0
        } else {
            raw.trim().parse::<u64>().map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("spool sequence is not a number")
                    .with_path(&seq_path)
                    .with_source(err)
            })?
        };
        let next = last.checked_add(1).ok_or_else(|| {
            Error::new(ErrorKind::Internal)
                .with_message("spool sequence exhausted")
                .with_hint("Move the spool directory aside or reset its .seq file.")
                .with_path(&seq_path)
        })?;
        overwrite_seq(&mut seq_file, next)
            .map_err(|err| io_error(err, "failed to write spool sequence", &seq_path))?;
        Ok(next)
    }

    fn write_ticket(&self, ticket: &JobTicket) -> Result<PathBuf, Error> {
        let path = self.spool_dir.join(format!("job-{:06}.json", ticket.job));
        let bytes = serde_json::to_vec_pretty(ticket).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to serialize job ticket")
                .with_source(err)
        })?;
        fs::write(&path, bytes).map_err(|err| io_error(err, "failed to write job ticket", &path))?;
        Ok(path)
    }

    fn spool_job(
        &self,
        settings: &PrintSettings,
        previewed: bool,
        document: Option<&[u8]>,
        rendered_pages: Option<Vec<u32>>,
    ) -> Result<CommitReceipt, Error> {
        let printer = self.resolve_printer(settings.printer_name.as_deref())?;
        let exported = if settings.exports_pdf() {
            Some(match document {
                Some(bytes) => Cow::Borrowed(bytes),
                None => Cow::Owned(blank_pdf(
                    settings,
                    &export_pages(settings, rendered_pages.as_deref())?,
                )?),
            })
        } else {
            None
        };
        let job = self.next_job_number()?;

        let (destination, document_path, document_bytes) = match exported {
            Some(bytes) => {
                let target = PathBuf::from(settings.pdf_path.as_deref().unwrap_or_default());
                write_document(&target, &bytes)?;
                (
                    format!("pdf:{}", target.display()),
                    Some(target),
                    Some(bytes.len() as u64),
                )
            }
            None => {
                let stored = match document {
                    Some(bytes) => {
                        let target = self.spool_dir.join(format!("job-{job:06}.pdf"));
                        write_document(&target, bytes)?;
                        Some(target)
                    }
                    None => None,
                };
                (
                    DESTINATION_SPOOL.to_string(),
                    stored,
                    document.map(|bytes| bytes.len() as u64),
                )
            }
        };

        let ticket = JobTicket {
            job,
            job_name: settings.job_name().to_string(),
            printer,
            destination: destination.clone(),
            time: now_rfc3339()?,
            previewed,
            page_range: settings.effective_range(),
            page_count: settings.page_count,
            paper: settings.paper,
            margins: settings.margins,
            orientation: settings.orientation,
            document: document_path.map(|path| path.to_string_lossy().to_string()),
            document_bytes,
            rendered_pages,
        };
        let ticket_path = self.write_ticket(&ticket)?;
        info!(
            job,
            job_name = %ticket.job_name,
            printer = %ticket.printer,
            ticket = %ticket_path.display(),
            "print job spooled"
        );
        Ok(CommitReceipt {
            job_number: job,
            destination,
        })
    }
}

impl PrintFacility for SpoolFacility {
    fn name(&self) -> &str {
        "spool"
    }

    fn create_operation(
        &self,
        context: ContextRef,
        pages: Option<Box<dyn PageSource>>,
    ) -> Result<Box<dyn NativeOperation>, Error> {
        self.live.fetch_add(1, Ordering::SeqCst);
        debug!(context = ?context, pages = pages.is_some(), "spool operation allocated");
        Ok(Box::new(SpoolOperation {
            facility: self.clone(),
            settings: PrintSettings::default(),
            pages,
        }))
    }

    fn printer_names(&self) -> Result<Vec<String>, Error> {
        Ok(self.printers.clone())
    }

    fn print_document(
        &self,
        document: &[u8],
        settings: &PrintSettings,
    ) -> Result<Option<CommitReceipt>, Error> {
        if document.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("document is empty"));
        }
        settings.validate()?;
        if settings.show_print_panel && self.operator == PreviewOutcome::Dismissed {
            debug!("print panel dismissed; document not spooled");
            return Ok(None);
        }
        self.spool_job(settings, false, Some(document), None)
            .map(Some)
    }
}

struct SpoolOperation {
    facility: SpoolFacility,
    settings: PrintSettings,
    pages: Option<Box<dyn PageSource>>,
}

impl NativeOperation for SpoolOperation {
    fn configure(&mut self, settings: &PrintSettings) -> Result<(), Error> {
        self.settings = settings.clone();
        Ok(())
    }

    fn run_preview(&mut self) -> Result<PreviewOutcome, Error> {
        Ok(self.facility.operator)
    }

    fn run_print_panel(&mut self) -> Result<bool, Error> {
        if !self.settings.show_print_panel {
            return Ok(true);
        }
        Ok(self.facility.operator == PreviewOutcome::Accepted)
    }

    fn commit(&mut self, previewed: bool) -> Result<CommitReceipt, Error> {
        match self.pages.as_deref_mut() {
            Some(pages) => {
                let (settings, rendered) = render_pages(pages, &self.settings)?;
                self.facility
                    .spool_job(&settings, previewed, None, Some(rendered))
            }
            None => self.facility.spool_job(&self.settings, previewed, None, None),
        }
    }
}

/// Takes the page count from the source and has it draw every page the job covers.
/// Returns the settings with that page count and the 1-based pages drawn.
fn render_pages(
    pages: &mut dyn PageSource,
    settings: &PrintSettings,
) -> Result<(PrintSettings, Vec<u32>), Error> {
    let count = pages.page_count();
    let page_count = u32::try_from(count).map_err(|_| {
        Error::new(ErrorKind::Usage).with_message(format!("page count {count} is out of range"))
    })?;
    let settings = PrintSettings {
        page_count,
        ..settings.clone()
    };
    let Some(range) = settings.effective_range() else {
        return Ok((settings, Vec::new()));
    };
    let mut rendered = Vec::new();
    for page in (1..=page_count).filter(|page| range.contains(*page)) {
        let surface = PageSurface::for_page(&settings, u64::from(page - 1));
        if pages.render_page(&surface) {
            rendered.push(page);
        } else {
            warn!(page, "page source failed to draw page");
        }
    }
    debug!(page_count, rendered = rendered.len(), "pages drawn for commit");
    Ok((settings, rendered))
}

/// Pages an export without a document covers: the drawn pages when a page source
/// ran, else the effective range, else a single page.
fn export_pages(settings: &PrintSettings, rendered: Option<&[u32]>) -> Result<Vec<u32>, Error> {
    let pages: Vec<u32> = match (rendered, settings.effective_range()) {
        (Some(rendered), _) => rendered.to_vec(),
        (None, Some(range)) => {
            let span = (range.to - range.from) as usize + 1;
            if span > MAX_EXPORT_PAGES {
                return Err(too_many_pages(span));
            }
            (range.from..=range.to).collect()
        }
        (None, None) => vec![1],
    };
    if pages.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("no pages were drawn for PDF export")
            .with_hint("Check the page range against the document's page count."));
    }
    if pages.len() > MAX_EXPORT_PAGES {
        return Err(too_many_pages(pages.len()));
    }
    Ok(pages)
}

fn too_many_pages(count: usize) -> Error {
    Error::new(ErrorKind::Usage).with_message(format!(
        "PDF export of {count} pages exceeds the limit of {MAX_EXPORT_PAGES}"
    ))
}

/// A PDF with one empty page per exported page, titled with the job name.
fn blank_pdf(settings: &PrintSettings, pages: &[u32]) -> Result<Vec<u8>, Error> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let media_box: Vec<Object> = vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Integer(settings.paper.width.round() as i64),
        Object::Integer(settings.paper.height.round() as i64),
    ];
    let kids: Vec<Object> = pages
        .iter()
        .map(|_| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => media_box.clone(),
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => Object::Integer(kids.len() as i64),
            "Kids" => kids,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(settings.job_name()),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::Internal).with_message(format!("failed to encode PDF export: {err}"))
    })?;
    Ok(bytes)
}

impl Drop for SpoolOperation {
    fn drop(&mut self) {
        self.facility.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SpoolLock<'a> {
    file: &'a File,
}

impl<'a> SpoolLock<'a> {
    fn acquire(file: &'a File, path: &Path) -> Result<Self, Error> {
        file.lock_exclusive()
            .map_err(|err| io_error(err, "failed to lock spool directory", path))?;
        Ok(Self { file })
    }
}

impl Drop for SpoolLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

pub fn list_tickets(spool_dir: &Path) -> Result<Vec<JobTicket>, Error> {
    let entries = match fs::read_dir(spool_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_error(err, "failed to read spool directory", spool_dir)),
    };
    let mut tickets = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| io_error(err, "failed to read spool entry", spool_dir))?;
        let path = entry.path();
        let is_ticket = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("job-") && name.ends_with(".json"));
        if !is_ticket {
            continue;
        }
        let bytes = fs::read(&path).map_err(|err| io_error(err, "failed to read job ticket", &path))?;
        let ticket: JobTicket = serde_json::from_slice(&bytes).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("invalid job ticket")
                .with_path(&path)
                .with_source(err)
        })?;
        tickets.push(ticket);
    }
    tickets.sort_by_key(|ticket| ticket.job);
    Ok(tickets)
}

fn overwrite_seq(file: &mut File, value: u64) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(value.to_string().as_bytes())?;
    file.sync_all()
}

fn write_document(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| io_error(err, "failed to create document directory", parent))?;
    }
    fs::write(path, bytes).map_err(|err| io_error(err, "failed to write document", path))
}

fn now_rfc3339() -> Result<String, Error> {
    OffsetDateTime::now_utc().format(&Rfc3339).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("timestamp format failed")
            .with_source(err)
    })
}

fn io_error(err: io::Error, message: &str, path: &Path) -> Error {
    Error::new(io_error_kind(&err))
        .with_message(message)
        .with_path(path)
        .with_source(err)
}

fn io_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    ErrorKind::Io
}
