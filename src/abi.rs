//! Purpose: C ABI bridge for managed callers (libprintbridge).
//! Exports: `PrintingTools_*` entry points, settings/callbacks/string-array structs, bridge installation.
//! Role: Stable ABI surface; every call resolves its handle through the process-wide registry.
//! Invariants: Handles are opaque tokens, never dereferenced; null means "no operation".
//! Invariants: A context is only ever passed back to the caller's own callbacks.
//! Invariants: Misuse (stale, foreign, double-disposed handles) is logged and ignored, never UB.
//! Invariants: No panic unwinds across the boundary.
//! Invariants: Strings crossing the boundary are UTF-16 pointer + length pairs.
#![allow(non_snake_case, non_camel_case_types)]

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::OnceLock;

use tracing::{error, warn};

use crate::api::PrintBridge;
use crate::config::BridgeConfig;
use crate::core::error::{Error, ErrorKind};
use crate::core::facility::{ContextRef, PageSource, PageSurface};
use crate::core::registry::HandleId;
use crate::core::settings::{Margins, Orientation, PageRange, PaperSize, PrintSettings};

static BRIDGE: OnceLock<Option<PrintBridge>> = OnceLock::new();

/// Installs the bridge every entry point uses. Must run before the first ABI call;
/// afterwards the process-wide bridge is fixed.
pub fn install_bridge(bridge: PrintBridge) -> Result<(), Error> {
    BRIDGE.set(Some(bridge)).map_err(|_| {
        Error::new(ErrorKind::InvalidState)
            .with_message("print bridge already initialised")
            .with_hint("Install the bridge before the first PrintingTools_* call.")
    })
}

/// The process-wide bridge, built from the environment on first use.
pub fn global_bridge() -> Option<&'static PrintBridge> {
    BRIDGE
        .get_or_init(|| match BridgeConfig::from_env() {
            Ok(config) => {
                crate::logging::init_tracing(&config.log_filter);
                Some(PrintBridge::from_config(&config))
            }
            Err(err) => {
                crate::logging::init_tracing("warn");
                error!(error = %err, "print bridge configuration invalid");
                None
            }
        })
        .as_ref()
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PrintingToolsSettings {
    pub paper_width: f64,
    pub paper_height: f64,
    pub margin_left: f64,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub has_page_range: i32,
    pub from_page: i32,
    pub to_page: i32,
    pub orientation: i32,
    pub show_print_panel: i32,
    pub show_progress_panel: i32,
    pub job_name: *const u16,
    pub job_name_length: i32,
    pub printer_name: *const u16,
    pub printer_name_length: i32,
    pub enable_pdf_export: i32,
    pub pdf_path: *const u16,
    pub pdf_path_length: i32,
    pub page_count: i32,
}

pub type PrintingToolsRenderPage =
    unsafe extern "C" fn(context: *mut c_void, surface: *mut c_void, page_index: u64) -> u64;
pub type PrintingToolsGetPageCount = unsafe extern "C" fn(context: *mut c_void) -> u64;

/// Caller document hooks. `surface` points at a `PageSurface` valid for the
/// duration of one `render_page` call.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PrintingToolsCallbacks {
    pub context: *mut c_void,
    pub render_page: Option<PrintingToolsRenderPage>,
    pub get_page_count: Option<PrintingToolsGetPageCount>,
}

struct CallbackPages {
    context: ContextRef,
    render_page: PrintingToolsRenderPage,
    get_page_count: PrintingToolsGetPageCount,
}

impl PageSource for CallbackPages {
    fn page_count(&mut self) -> u64 {
        // SAFETY: the caller registered this function for this context and keeps both
        // alive until the operation is disposed.
        unsafe { (self.get_page_count)(self.context.as_ptr()) }
    }

    fn render_page(&mut self, surface: &PageSurface) -> bool {
        let raw = ptr::from_ref(surface).cast_mut().cast::<c_void>();
        // SAFETY: as for `page_count`; `raw` outlives the call.
        unsafe { (self.render_page)(self.context.as_ptr(), raw, surface.page_index) != 0 }
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct PrintingToolsStringArray {
    pub items: *mut *mut u16,
    pub lengths: *mut i32,
    pub count: i32,
}

impl PrintingToolsStringArray {
    fn empty() -> Self {
        Self {
            items: ptr::null_mut(),
            lengths: ptr::null_mut(),
            count: 0,
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn PrintingTools_CreatePrintOperation(context: *mut c_void) -> *mut c_void {
    guard("create", ptr::null_mut(), || {
        let Some(context) = ContextRef::from_raw(context) else {
            warn!("create called with a null context");
            return ptr::null_mut();
        };
        let Some(bridge) = global_bridge() else {
            return ptr::null_mut();
        };
        match bridge.create(context) {
            Ok(id) => id.to_raw(),
            Err(err) => {
                report("create", &err);
                ptr::null_mut()
            }
        }
    })
}

/// Creates an operation whose commit asks the callbacks for the page count and
/// has them draw each page in range. Null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn PrintingTools_CreatePrintOperationWithCallbacks(
    callbacks: *const PrintingToolsCallbacks,
) -> *mut c_void {
    guard("create_with_callbacks", ptr::null_mut(), || {
        let pages = match parse_callbacks(callbacks) {
            Ok(pages) => pages,
            Err(err) => {
                report("create_with_callbacks", &err);
                return ptr::null_mut();
            }
        };
        with_bridge("create_with_callbacks", ptr::null_mut(), |bridge| {
            match bridge.create_with_pages(pages.context, Box::new(pages)) {
                Ok(id) => id.to_raw(),
                Err(err) => {
                    report("create_with_callbacks", &err);
                    ptr::null_mut()
                }
            }
        })
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn PrintingTools_DisposePrintOperation(operation: *mut c_void) {
    guard("dispose", (), || {
        let Some(id) = HandleId::from_raw(operation) else {
            return;
        };
        with_bridge("dispose", (), |bridge| {
            if let Err(err) = bridge.dispose(id) {
                report("dispose", &err);
            }
        })
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn PrintingTools_BeginPreview(operation: *mut c_void) {
    guard("begin_preview", (), || {
        with_handle("begin_preview", operation, (), |bridge, id| {
            if let Err(err) = bridge.begin_preview(id) {
                report("begin_preview", &err);
            }
        })
    })
}

/// Returns 1 when the job was handed to the spooler, 0 otherwise.
#[unsafe(no_mangle)]
pub extern "C" fn PrintingTools_CommitPrint(operation: *mut c_void) -> i32 {
    guard("commit", 0, || {
        with_handle("commit", operation, 0, |bridge, id| match bridge.commit(id) {
            Ok(_) => 1,
            Err(err) => {
                report("commit", &err);
                0
            }
        })
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn PrintingTools_ConfigurePrintOperation(
    operation: *mut c_void,
    settings: *const PrintingToolsSettings,
) {
    guard("configure", (), || {
        with_handle("configure", operation, (), |bridge, id| {
            let settings = match parse_settings(settings) {
                Ok(settings) => settings,
                Err(err) => return report("configure", &err.with_handle(id.get())),
            };
            if let Err(err) = bridge.configure(id, settings) {
                report("configure", &err);
            }
        })
    })
}

/// Shows the print panel and commits on confirmation. Returns 1 when printed.
#[unsafe(no_mangle)]
pub extern "C" fn PrintingTools_RunModalPrintOperation(operation: *mut c_void) -> i32 {
    guard("run_modal", 0, || {
        with_handle("run_modal", operation, 0, |bridge, id| {
            match bridge.run_modal(id) {
                Ok(Some(_)) => 1,
                Ok(None) => 0,
                Err(err) => {
                    report("run_modal", &err);
                    0
                }
            }
        })
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn PrintingTools_RunPdfPrintOperation(
    pdf_data: *const u8,
    length: i32,
    show_print_panel: i32,
) -> i32 {
    guard("run_pdf", 0, || {
        let document = match parse_bytes(pdf_data, length) {
            Ok(document) => document,
            Err(err) => {
                report("run_pdf", &err);
                return 0;
            }
        };
        let settings = PrintSettings {
            show_print_panel: show_print_panel != 0,
            show_progress_panel: show_print_panel != 0,
            ..PrintSettings::default()
        };
        with_bridge("run_pdf", 0, |bridge| {
            match bridge.print_document(document, &settings) {
                Ok(Some(_)) => 1,
                Ok(None) => 0,
                Err(err) => {
                    report("run_pdf", &err);
                    0
                }
            }
        })
    })
}

/// 0 created, 1 previewed, 2 committed, 3 disposed, -1 never issued.
#[unsafe(no_mangle)]
pub extern "C" fn PrintingTools_GetOperationState(operation: *mut c_void) -> i32 {
    guard("state", -1, || {
        let Some(id) = HandleId::from_raw(operation) else {
            return -1;
        };
        with_bridge("state", -1, |bridge| match bridge.state(id) {
            Ok(state) => state.code(),
            Err(_) => -1,
        })
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn PrintingTools_GetPrinterNames() -> PrintingToolsStringArray {
    guard("printers", PrintingToolsStringArray::empty(), || {
        with_bridge("printers", PrintingToolsStringArray::empty(), |bridge| {
            match bridge.printer_names().and_then(|names| string_array(&names)) {
                Ok(array) => array,
                Err(err) => {
                    report("printers", &err);
                    PrintingToolsStringArray::empty()
                }
            }
        })
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn PrintingTools_FreePrinterNames(array: PrintingToolsStringArray) {
    guard("free_printers", (), || free_string_array(array))
}

fn guard<T>(entry: &'static str, fallback: T, body: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(_) => {
            error!(entry, "panic caught at the C boundary");
            fallback
        }
    }
}

fn with_bridge<T>(entry: &'static str, fallback: T, body: impl FnOnce(&PrintBridge) -> T) -> T {
    match global_bridge() {
        Some(bridge) => body(bridge),
        None => {
            warn!(entry, "print bridge unavailable");
            fallback
        }
    }
}

fn with_handle<T>(
    entry: &'static str,
    operation: *mut c_void,
    fallback: T,
    body: impl FnOnce(&PrintBridge, HandleId) -> T,
) -> T {
    let Some(id) = HandleId::from_raw(operation) else {
        warn!(entry, "called with a null operation handle");
        return fallback;
    };
    with_bridge(entry, fallback, |bridge| body(bridge, id))
}

fn report(entry: &'static str, err: &Error) {
    match err.kind() {
        ErrorKind::InvalidHandle | ErrorKind::InvalidState | ErrorKind::Busy | ErrorKind::Usage => {
            warn!(entry, kind = ?err.kind(), handle = ?err.handle(), error = %err, "call rejected");
        }
        _ => {
            error!(entry, kind = ?err.kind(), handle = ?err.handle(), error = %err, "call failed");
        }
    }
}

fn parse_bytes<'a>(data: *const u8, length: i32) -> Result<&'a [u8], Error> {
    if data.is_null() {
        return Err(Error::new(ErrorKind::Usage).with_message("document pointer is null"));
    }
    let length = usize::try_from(length)
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("document length is negative"))?;
    Ok(unsafe { std::slice::from_raw_parts(data, length) })
}

fn parse_utf16(field: &str, data: *const u16, length: i32) -> Result<Option<String>, Error> {
    if data.is_null() || length <= 0 {
        return Ok(None);
    }
    let units = unsafe { std::slice::from_raw_parts(data, length as usize) };
    let value = String::from_utf16(units).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("{field} is not valid UTF-16"))
            .with_source(err)
    })?;
    Ok(Some(value).filter(|value| !value.trim().is_empty()))
}

fn parse_callbacks(raw: *const PrintingToolsCallbacks) -> Result<CallbackPages, Error> {
    if raw.is_null() {
        return Err(Error::new(ErrorKind::Usage).with_message("callbacks pointer is null"));
    }
    let raw = unsafe { *raw };
    let context = ContextRef::from_raw(raw.context)
        .ok_or_else(|| Error::new(ErrorKind::Usage).with_message("callback context is null"))?;
    let (Some(render_page), Some(get_page_count)) = (raw.render_page, raw.get_page_count) else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("render_page and get_page_count are both required"));
    };
    Ok(CallbackPages {
        context,
        render_page,
        get_page_count,
    })
}

fn ffi_length(field: &str, length: usize) -> Result<i32, Error> {
    i32::try_from(length).map_err(|_| {
        Error::new(ErrorKind::Internal)
            .with_message(format!("{field} length {length} does not fit in a C int"))
    })
}

fn page_number(field: &str, value: i32) -> Result<u32, Error> {
    u32::try_from(value)
        .map_err(|_| Error::new(ErrorKind::Usage).with_message(format!("{field} is negative")))
}

fn parse_settings(raw: *const PrintingToolsSettings) -> Result<PrintSettings, Error> {
    if raw.is_null() {
        return Err(Error::new(ErrorKind::Usage).with_message("settings pointer is null"));
    }
    let raw = unsafe { &*raw };
    let page_range = if raw.has_page_range != 0 {
        Some(PageRange::new(
            page_number("from_page", raw.from_page)?,
            page_number("to_page", raw.to_page)?,
        )?)
    } else {
        None
    };
    let pdf_path = parse_utf16("pdf_path", raw.pdf_path, raw.pdf_path_length)?;
    let settings = PrintSettings {
        paper: PaperSize {
            width: raw.paper_width,
            height: raw.paper_height,
        },
        margins: Margins {
            left: raw.margin_left,
            top: raw.margin_top,
            right: raw.margin_right,
            bottom: raw.margin_bottom,
        },
        page_range,
        orientation: Orientation::from_code(raw.orientation)?,
        show_print_panel: raw.show_print_panel != 0,
        show_progress_panel: raw.show_progress_panel != 0,
        job_name: parse_utf16("job_name", raw.job_name, raw.job_name_length)?,
        printer_name: parse_utf16("printer_name", raw.printer_name, raw.printer_name_length)?,
        pdf_path: if raw.enable_pdf_export != 0 { pdf_path } else { None },
        page_count: page_number("page_count", raw.page_count)?,
    };
    settings.validate()?;
    Ok(settings)
}

fn string_array(names: &[String]) -> Result<PrintingToolsStringArray, Error> {
    if names.is_empty() {
        return Ok(PrintingToolsStringArray::empty());
    }
    let count = ffi_length("printer list", names.len())?;
    let encoded: Vec<Box<[u16]>> = names.iter().map(|name| name.encode_utf16().collect()).collect();
    let lengths = encoded
        .iter()
        .map(|units| ffi_length("printer name", units.len()))
        .collect::<Result<Vec<i32>, Error>>()?;
    let items: Vec<*mut u16> = encoded
        .into_iter()
        .map(|units| Box::into_raw(units) as *mut u16)
        .collect();
    Ok(PrintingToolsStringArray {
        items: Box::into_raw(items.into_boxed_slice()) as *mut *mut u16,
        lengths: Box::into_raw(lengths.into_boxed_slice()) as *mut i32,
        count,
    })
}

fn free_string_array(array: PrintingToolsStringArray) {
    if array.count <= 0 || array.items.is_null() || array.lengths.is_null() {
        return;
    }
    let count = array.count as usize;
    unsafe {
        let lengths = Box::from_raw(ptr::slice_from_raw_parts_mut(array.lengths, count));
        let items = Box::from_raw(ptr::slice_from_raw_parts_mut(array.items, count));
        for (item, length) in items.iter().zip(lengths.iter()) {
            if !item.is_null() {
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                    *item,
                    *length as usize,
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PrintingToolsCallbacks, PrintingToolsSettings, ffi_length, free_string_array,
        parse_callbacks, parse_settings, string_array,
    };
    use std::ffi::c_void;
    use crate::core::error::ErrorKind;
    use crate::core::settings::{Orientation, PageRange};
    use std::ptr;

    fn raw_settings() -> PrintingToolsSettings {
        PrintingToolsSettings {
            paper_width: 612.0,
            paper_height: 792.0,
            margin_left: 36.0,
            margin_top: 36.0,
            margin_right: 36.0,
            margin_bottom: 36.0,
            has_page_range: 0,
            from_page: 1,
            to_page: 1,
            orientation: 0,
            show_print_panel: 1,
            show_progress_panel: 1,
            job_name: ptr::null(),
            job_name_length: 0,
            printer_name: ptr::null(),
            printer_name_length: 0,
            enable_pdf_export: 0,
            pdf_path: ptr::null(),
            pdf_path_length: 0,
            page_count: 3,
        }
    }

    #[test]
    fn settings_decode_utf16_strings_and_range() {
        let job: Vec<u16> = "Résumé".encode_utf16().collect();
        let path: Vec<u16> = "/tmp/out.pdf".encode_utf16().collect();
        let raw = PrintingToolsSettings {
            has_page_range: 1,
            from_page: 2,
            to_page: 3,
            orientation: 1,
            job_name: job.as_ptr(),
            job_name_length: job.len() as i32,
            enable_pdf_export: 1,
            pdf_path: path.as_ptr(),
            pdf_path_length: path.len() as i32,
            ..raw_settings()
        };
        let settings = parse_settings(&raw).unwrap();
        assert_eq!(settings.job_name.as_deref(), Some("Résumé"));
        assert_eq!(settings.page_range, Some(PageRange { from: 2, to: 3 }));
        assert_eq!(settings.orientation, Orientation::Landscape);
        assert_eq!(settings.pdf_path.as_deref(), Some("/tmp/out.pdf"));
        assert_eq!(settings.page_count, 3);
    }

    #[test]
    fn pdf_path_is_ignored_without_export_flag() {
        let path: Vec<u16> = "/tmp/out.pdf".encode_utf16().collect();
        let raw = PrintingToolsSettings {
            pdf_path: path.as_ptr(),
            pdf_path_length: path.len() as i32,
            ..raw_settings()
        };
        assert!(parse_settings(&raw).unwrap().pdf_path.is_none());
    }

    #[test]
    fn settings_reject_bad_input() {
        assert_eq!(
            parse_settings(ptr::null()).unwrap_err().kind(),
            ErrorKind::Usage
        );
        let inverted = PrintingToolsSettings {
            has_page_range: 1,
            from_page: 4,
            to_page: 2,
            ..raw_settings()
        };
        assert!(parse_settings(&inverted).is_err());
        let negative = PrintingToolsSettings {
            page_count: -1,
            ..raw_settings()
        };
        assert!(parse_settings(&negative).is_err());
        let unpaired = [0xD800u16];
        let bad_name = PrintingToolsSettings {
            job_name: unpaired.as_ptr(),
            job_name_length: 1,
            ..raw_settings()
        };
        assert!(parse_settings(&bad_name).is_err());
    }

    #[test]
    fn string_array_round_trips_through_free() {
        let names = vec!["Office".to_string(), "Étage 2".to_string()];
        let array = string_array(&names).unwrap();
        assert_eq!(array.count, 2);
        let decoded: Vec<String> = (0..array.count as usize)
            .map(|i| unsafe {
                let item = *array.items.add(i);
                let len = *array.lengths.add(i) as usize;
                String::from_utf16(std::slice::from_raw_parts(item, len)).unwrap()
            })
            .collect();
        assert_eq!(decoded, names);
        free_string_array(array);

        let empty = string_array(&[]).unwrap();
        assert!(empty.items.is_null());
        free_string_array(empty);
    }

    #[test]
    fn lengths_beyond_c_int_are_rejected() {
        assert_eq!(ffi_length("printer name", 12).unwrap(), 12);
        assert_eq!(ffi_length("printer name", i32::MAX as usize).unwrap(), i32::MAX);
        let err = ffi_length("printer name", i32::MAX as usize + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    unsafe extern "C" fn no_pages(_context: *mut c_void) -> u64 {
        0
    }

    unsafe extern "C" fn draw_nothing(
        _context: *mut c_void,
        _surface: *mut c_void,
        _page_index: u64,
    ) -> u64 {
        0
    }

    #[test]
    fn callbacks_need_context_and_both_functions() {
        let mut document = 0u8;
        let context = (&mut document as *mut u8).cast::<c_void>();
        assert_eq!(
            parse_callbacks(ptr::null()).err().unwrap().kind(),
            ErrorKind::Usage
        );
        let missing_context = PrintingToolsCallbacks {
            context: ptr::null_mut(),
            render_page: Some(draw_nothing),
            get_page_count: Some(no_pages),
        };
        assert!(parse_callbacks(&missing_context).is_err());
        let missing_count = PrintingToolsCallbacks {
            context,
            render_page: Some(draw_nothing),
            get_page_count: None,
        };
        assert!(parse_callbacks(&missing_count).is_err());
        let complete = PrintingToolsCallbacks {
            context,
            render_page: Some(draw_nothing),
            get_page_count: Some(no_pages),
        };
        assert!(parse_callbacks(&complete).is_ok());
    }
}
