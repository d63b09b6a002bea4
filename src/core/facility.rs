//! Seam between the bridge and whatever actually prints.
//!
//! A [`PrintFacility`] allocates one [`NativeOperation`] per print request. The
//! bridge owns the returned box for the lifetime of the handle and drops it on
//! dispose, so releasing native resources belongs in the operation's `Drop`.
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use crate::core::error::Error;
use crate::core::settings::PrintSettings;

/// Caller-owned drawing/document context.
///
/// The bridge never dereferences, copies or frees the pointee. Only a facility
/// may interpret it, and only while the caller keeps it alive.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextRef(NonNull<c_void>);

// SAFETY: the bridge treats the pointer as an address only. Facilities that
// dereference it inherit the caller's guarantee about liveness and threading.
unsafe impl Send for ContextRef {}
unsafe impl Sync for ContextRef {}

impl ContextRef {
    /// Returns `None` for the null sentinel.
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(ContextRef)
    }

    /// Borrows any caller-owned value as a context.
    pub fn from_ref<T>(value: &T) -> Self {
        ContextRef(NonNull::from(value).cast())
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for ContextRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextRef({:#x})", self.addr())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PreviewOutcome {
    Accepted,
    Dismissed,
}

/// What the facility reports after handing a job to its spooler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitReceipt {
    pub job_number: u64,
    pub destination: String,
}

/// Page geometry handed to a [`PageSource`] for each page it draws, in points.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageSurface {
    pub width: f64,
    pub height: f64,
    pub margin_left: f64,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    /// Zero-based index of the page being drawn.
    pub page_index: u64,
}

impl PageSurface {
    pub fn for_page(settings: &PrintSettings, page_index: u64) -> Self {
        Self {
            width: settings.paper.width,
            height: settings.paper.height,
            margin_left: settings.margins.left,
            margin_top: settings.margins.top,
            margin_right: settings.margins.right,
            margin_bottom: settings.margins.bottom,
            page_index,
        }
    }
}

/// Caller-side document that knows its page count and draws pages on request.
pub trait PageSource: Send {
    fn page_count(&mut self) -> u64;

    /// `false` means the page could not be drawn.
    fn render_page(&mut self, surface: &PageSurface) -> bool;
}

pub trait NativeOperation: Send {
    fn configure(&mut self, settings: &PrintSettings) -> Result<(), Error>;

    /// Presents the preview and blocks until the operator is done with it.
    fn run_preview(&mut self) -> Result<PreviewOutcome, Error>;

    /// Shows the print panel. `false` means the operator cancelled.
    fn run_print_panel(&mut self) -> Result<bool, Error>;

    /// Hands the job to the spooler; returns once it is queued, not printed.
    fn commit(&mut self, previewed: bool) -> Result<CommitReceipt, Error>;
}

pub trait PrintFacility: Send + Sync {
    fn name(&self) -> &str;

    /// With `pages`, the operation pulls its page count and page drawing from the
    /// caller when it commits.
    fn create_operation(
        &self,
        context: ContextRef,
        pages: Option<Box<dyn PageSource>>,
    ) -> Result<Box<dyn NativeOperation>, Error>;

    fn printer_names(&self) -> Result<Vec<String>, Error>;

    /// One-shot submission of an already rendered document.
    fn print_document(
        &self,
        document: &[u8],
        settings: &PrintSettings,
    ) -> Result<Option<CommitReceipt>, Error>;
}
