//! Purpose: Safe Rust front for the print-operation lifecycle.
//! Exports: `PrintBridge`.
//! Role: Shared by the C ABI layer, the CLI, and Rust callers; owns registry + facility.
//! Invariants: Every state change goes through the registry before and after the facility call.
//! Invariants: No registry lock is held while the facility runs (previews may block for minutes).
//! Invariants: A failed facility call leaves the operation in its prior state.
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::operation::PrintOperation;
use crate::config::BridgeConfig;
use crate::core::error::Error;
use crate::core::facility::{
    CommitReceipt, ContextRef, PageSource, PreviewOutcome, PrintFacility,
};
use crate::core::registry::{HandleId, OperationRecord, Registry, Release};
use crate::core::settings::PrintSettings;
use crate::core::state::{OperationState, Transition};

pub type BridgeResult<T> = Result<T, Error>;

struct Inner {
    registry: Registry,
    facility: Box<dyn PrintFacility>,
}

/// Cheap to clone; clones share one registry and facility.
#[derive(Clone)]
pub struct PrintBridge {
    inner: Arc<Inner>,
}

impl fmt::Debug for PrintBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintBridge")
            .field("facility", &self.inner.facility.name())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl PrintBridge {
    pub fn new(facility: impl PrintFacility + 'static) -> Self {
        Self::with_facility(Box::new(facility))
    }

    pub fn with_facility(facility: Box<dyn PrintFacility>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Registry::new(),
                facility,
            }),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.spool_facility())
    }

    pub fn facility_name(&self) -> &str {
        self.inner.facility.name()
    }

    pub fn live_operations(&self) -> usize {
        self.inner.registry.live_count()
    }

    /// Allocates one operation bound to `context`. The caller must dispose the handle.
    pub fn create(&self, context: ContextRef) -> BridgeResult<HandleId> {
        self.allocate(context, None)
    }

    /// Like [`PrintBridge::create`], but the operation asks `pages` for its page
    /// count and has it draw every page in range when it commits.
    pub fn create_with_pages(
        &self,
        context: ContextRef,
        pages: Box<dyn PageSource>,
    ) -> BridgeResult<HandleId> {
        self.allocate(context, Some(pages))
    }

    fn allocate(
        &self,
        context: ContextRef,
        pages: Option<Box<dyn PageSource>>,
    ) -> BridgeResult<HandleId> {
        let rendered = pages.is_some();
        let native = self.inner.facility.create_operation(context, pages)?;
        let id = self.inner.registry.insert(context, native)?;
        debug!(handle = %id, context = ?context, rendered, "print operation created");
        Ok(id)
    }

    /// Scoped variant of [`PrintBridge::create`]: the handle is disposed when the guard drops.
    pub fn open(&self, context: ContextRef) -> BridgeResult<PrintOperation> {
        let id = self.create(context)?;
        Ok(PrintOperation::new(self.clone(), id))
    }

    /// Retires the handle. If another call is still running on it, the native
    /// operation is released as soon as that call returns.
    pub fn dispose(&self, id: HandleId) -> BridgeResult<()> {
        match self.inner.registry.remove(id)? {
            Release::Now(record, native) => {
                drop(native);
                debug!(handle = %id, state = record.state.as_str(), "print operation disposed");
            }
            Release::Deferred(record) => {
                debug!(
                    handle = %id,
                    state = record.state.as_str(),
                    "print operation disposed while in use; release deferred"
                );
            }
        }
        Ok(())
    }

    pub fn configure(&self, id: HandleId, settings: PrintSettings) -> BridgeResult<()> {
        settings.validate().map_err(|err| err.with_handle(id.get()))?;
        let mut checkout = self.inner.registry.checkout(id, Transition::Configure)?;
        checkout.native()?.configure(&settings)?;
        debug!(handle = %id, job_name = settings.job_name(), "print operation configured");
        checkout.finish(|record| record.settings = settings);
        Ok(())
    }

    /// Blocks until the facility's preview returns. A dismissed preview still
    /// counts as previewed; committing afterwards is the caller's decision.
    pub fn begin_preview(&self, id: HandleId) -> BridgeResult<PreviewOutcome> {
        let mut checkout = self.inner.registry.checkout(id, Transition::Preview)?;
        let outcome = checkout.native()?.run_preview()?;
        debug!(handle = %id, outcome = ?outcome, "print preview finished");
        checkout.finish(|record| {
            record.state = OperationState::Previewed;
            record.preview = Some(outcome);
        });
        Ok(outcome)
    }

    /// Submits the job. A committed operation rejects further commits, so a job
    /// is never submitted twice through one handle.
    pub fn commit(&self, id: HandleId) -> BridgeResult<CommitReceipt> {
        let mut checkout = self.inner.registry.checkout(id, Transition::Commit)?;
        let previewed = checkout.record().state == OperationState::Previewed;
        let receipt = checkout.native()?.commit(previewed)?;
        info!(
            handle = %id,
            job = receipt.job_number,
            destination = %receipt.destination,
            "print job committed"
        );
        checkout.finish(|record| record.state = OperationState::Committed);
        Ok(receipt)
    }

    /// Shows the print panel, then commits if the operator confirmed.
    /// `None` means the panel was dismissed and the operation is unchanged.
    pub fn run_modal(&self, id: HandleId) -> BridgeResult<Option<CommitReceipt>> {
        let mut checkout = self.inner.registry.checkout(id, Transition::Commit)?;
        if !checkout.native()?.run_print_panel()? {
            debug!(handle = %id, "print panel dismissed");
            return Ok(None);
        }
        let previewed = checkout.record().state == OperationState::Previewed;
        let receipt = checkout.native()?.commit(previewed)?;
        info!(handle = %id, job = receipt.job_number, "print job committed from panel");
        checkout.finish(|record| record.state = OperationState::Committed);
        Ok(Some(receipt))
    }

    pub fn state(&self, id: HandleId) -> BridgeResult<OperationState> {
        self.inner.registry.state(id)
    }

    pub fn record(&self, id: HandleId) -> BridgeResult<OperationRecord> {
        self.inner.registry.record(id)
    }

    pub fn printer_names(&self) -> BridgeResult<Vec<String>> {
        let names = self.inner.facility.printer_names()?;
        debug!(count = names.len(), "printers enumerated");
        Ok(names)
    }

    pub fn print_document(
        &self,
        document: &[u8],
        settings: &PrintSettings,
    ) -> BridgeResult<Option<CommitReceipt>> {
        let receipt = self.inner.facility.print_document(document, settings)?;
        if receipt.is_none() {
            warn!(bytes = document.len(), "document print cancelled at print panel");
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::PrintBridge;
    use crate::core::error::ErrorKind;
    use crate::core::facility::{ContextRef, PreviewOutcome};
    use crate::core::settings::{PageRange, PrintSettings};
    use crate::core::spool::SpoolFacility;
    use crate::core::state::OperationState;

    fn bridge(dir: &std::path::Path) -> (PrintBridge, SpoolFacility) {
        let facility = SpoolFacility::new(dir);
        (PrintBridge::new(facility.clone()), facility)
    }

    #[test]
    fn create_dispose_returns_to_baseline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (bridge, facility) = bridge(temp.path());
        let document = String::from("page one");
        let baseline = facility.live_operations();

        let id = bridge.create(ContextRef::from_ref(&document)).unwrap();
        assert_eq!(facility.live_operations(), baseline + 1);
        bridge.dispose(id).unwrap();
        assert_eq!(facility.live_operations(), baseline);
        assert_eq!(bridge.live_operations(), 0);
    }

    #[test]
    fn preview_then_commit_reaches_committed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (bridge, facility) = bridge(temp.path());
        let document = [1u8, 2, 3];
        let id = bridge.create(ContextRef::from_ref(&document)).unwrap();

        assert_eq!(bridge.begin_preview(id).unwrap(), PreviewOutcome::Accepted);
        assert_eq!(bridge.state(id).unwrap(), OperationState::Previewed);
        bridge.commit(id).unwrap();
        assert_eq!(bridge.state(id).unwrap(), OperationState::Committed);
        bridge.dispose(id).unwrap();

        let tickets = facility.tickets().unwrap();
        assert_eq!(tickets.len(), 1);
        assert!(tickets[0].previewed);
    }

    #[test]
    fn second_commit_is_rejected_without_resubmitting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (bridge, facility) = bridge(temp.path());
        let document = 0u64;
        let id = bridge.create(ContextRef::from_ref(&document)).unwrap();
        bridge.commit(id).unwrap();

        let err = bridge.commit(id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = bridge.begin_preview(id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(bridge.state(id).unwrap(), OperationState::Committed);
        bridge.dispose(id).unwrap();

        assert_eq!(facility.tickets().unwrap().len(), 1);
    }

    #[test]
    fn dismissed_preview_still_allows_commit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let facility = SpoolFacility::new(temp.path()).with_operator(PreviewOutcome::Dismissed);
        let bridge = PrintBridge::new(facility.clone());
        let document = 0u8;
        let id = bridge.create(ContextRef::from_ref(&document)).unwrap();

        assert_eq!(bridge.begin_preview(id).unwrap(), PreviewOutcome::Dismissed);
        assert_eq!(
            bridge.record(id).unwrap().preview,
            Some(PreviewOutcome::Dismissed)
        );
        bridge.commit(id).unwrap();
        bridge.dispose(id).unwrap();
        assert_eq!(facility.tickets().unwrap().len(), 1);
    }

    #[test]
    fn invalid_settings_keep_previous_ones() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (bridge, _facility) = bridge(temp.path());
        let document = 0u8;
        let id = bridge.create(ContextRef::from_ref(&document)).unwrap();

        let good = PrintSettings {
            job_name: Some("Invoice".to_string()),
            ..PrintSettings::default()
        };
        bridge.configure(id, good.clone()).unwrap();

        let bad = PrintSettings {
            page_range: Some(PageRange { from: 3, to: 1 }),
            ..PrintSettings::default()
        };
        let err = bridge.configure(id, bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(err.handle(), Some(id.get()));
        assert_eq!(bridge.record(id).unwrap().settings, good);
        bridge.dispose(id).unwrap();
    }

    #[test]
    fn failed_commit_leaves_operation_uncommitted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (bridge, facility) = bridge(temp.path());
        let document = 0u8;
        let id = bridge.create(ContextRef::from_ref(&document)).unwrap();
        bridge
            .configure(
                id,
                PrintSettings {
                    printer_name: Some("Nowhere".to_string()),
                    ..PrintSettings::default()
                },
            )
            .unwrap();

        let err = bridge.commit(id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(bridge.state(id).unwrap(), OperationState::Created);
        bridge.dispose(id).unwrap();
        assert_eq!(facility.live_operations(), 0);
    }

    #[test]
    fn dismissed_print_panel_leaves_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let facility = SpoolFacility::new(temp.path()).with_operator(PreviewOutcome::Dismissed);
        let bridge = PrintBridge::new(facility.clone());
        let document = 0u8;
        let id = bridge.create(ContextRef::from_ref(&document)).unwrap();

        assert!(bridge.run_modal(id).unwrap().is_none());
        assert_eq!(bridge.state(id).unwrap(), OperationState::Created);

        bridge
            .configure(
                id,
                PrintSettings {
                    show_print_panel: false,
                    ..PrintSettings::default()
                },
            )
            .unwrap();
        assert!(bridge.run_modal(id).unwrap().is_some());
        assert_eq!(bridge.state(id).unwrap(), OperationState::Committed);
        bridge.dispose(id).unwrap();
    }

    #[test]
    fn double_dispose_is_detected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (bridge, _facility) = bridge(temp.path());
        let document = 0u8;
        let id = bridge.create(ContextRef::from_ref(&document)).unwrap();
        bridge.dispose(id).unwrap();
        let err = bridge.dispose(id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
        assert_eq!(bridge.state(id).unwrap(), OperationState::Disposed);
    }

    #[test]
    fn printers_come_from_facility() {
        let temp = tempfile::tempdir().expect("tempdir");
        let facility =
            SpoolFacility::new(temp.path()).with_printers(vec!["Office".to_string()]);
        let bridge = PrintBridge::new(facility);
        assert_eq!(bridge.printer_names().unwrap(), vec!["Office".to_string()]);
        assert_eq!(bridge.facility_name(), "spool");
    }
}
