//! Purpose: Scoped owner for one print-operation handle.
//! Exports: `PrintOperation`.
//! Role: Caller-side RAII wrapper; release happens on every exit path.
//! Invariants: Not `Clone`/`Copy`; exactly one owner per handle.
//! Invariants: Preview completion is observed before any later commit (`&mut self` ordering).
use tracing::warn;

use super::bridge::{BridgeResult, PrintBridge};
use crate::core::error::{Error, ErrorKind};
use crate::core::facility::{CommitReceipt, PreviewOutcome};
use crate::core::registry::{HandleId, OperationRecord};
use crate::core::settings::PrintSettings;
use crate::core::state::OperationState;

#[derive(Debug)]
pub struct PrintOperation {
    bridge: PrintBridge,
    id: HandleId,
    released: bool,
}

impl PrintOperation {
    pub(super) fn new(bridge: PrintBridge, id: HandleId) -> Self {
        Self {
            bridge,
            id,
            released: false,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn state(&self) -> BridgeResult<OperationState> {
        self.bridge.state(self.id)
    }

    pub fn record(&self) -> BridgeResult<OperationRecord> {
        self.bridge.record(self.id)
    }

    pub fn configure(&mut self, settings: PrintSettings) -> BridgeResult<()> {
        self.bridge.configure(self.id, settings)
    }

    pub fn begin_preview(&mut self) -> BridgeResult<PreviewOutcome> {
        self.bridge.begin_preview(self.id)
    }

    /// Runs the preview on the blocking pool and suspends the calling task until
    /// the operator is done, instead of parking a runtime worker thread.
    ///
    /// Dropping the future does not stop the preview. Disposing the handle in the
    /// meantime retires it, and the operation is released when the preview returns.
    pub async fn begin_preview_async(&mut self) -> BridgeResult<PreviewOutcome> {
        let bridge = self.bridge.clone();
        let id = self.id;
        tokio::task::spawn_blocking(move || bridge.begin_preview(id))
            .await
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("preview task failed")
                    .with_handle(id.get())
                    .with_source(err)
            })?
    }

    pub fn commit(&mut self) -> BridgeResult<CommitReceipt> {
        self.bridge.commit(self.id)
    }

    pub fn run_modal(&mut self) -> BridgeResult<Option<CommitReceipt>> {
        self.bridge.run_modal(self.id)
    }

    /// Disposes now and reports the outcome; dropping the guard does the same silently.
    pub fn dispose(mut self) -> BridgeResult<()> {
        self.released = true;
        self.bridge.dispose(self.id)
    }
}

impl Drop for PrintOperation {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.bridge.dispose(self.id) {
            warn!(handle = %self.id, error = %err, "print operation release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::PrintBridge;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::facility::{
        CommitReceipt, ContextRef, NativeOperation, PageSource, PreviewOutcome, PrintFacility,
    };
    use crate::core::settings::PrintSettings;
    use crate::core::spool::SpoolFacility;
    use crate::core::state::OperationState;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Facility whose preview keeps the operator busy for a while.
    struct SlowPreview {
        live: Arc<AtomicUsize>,
    }

    struct SlowOperation {
        live: Arc<AtomicUsize>,
    }

    impl PrintFacility for SlowPreview {
        fn name(&self) -> &str {
            "slow"
        }

        fn create_operation(
            &self,
            _context: ContextRef,
            _pages: Option<Box<dyn PageSource>>,
        ) -> Result<Box<dyn NativeOperation>, Error> {
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SlowOperation {
                live: self.live.clone(),
            }))
        }

        fn printer_names(&self) -> Result<Vec<String>, Error> {
            Ok(Vec::new())
        }

        fn print_document(
            &self,
            _document: &[u8],
            _settings: &PrintSettings,
        ) -> Result<Option<CommitReceipt>, Error> {
            Ok(None)
        }
    }

    impl NativeOperation for SlowOperation {
        fn configure(&mut self, _settings: &PrintSettings) -> Result<(), Error> {
            Ok(())
        }

        fn run_preview(&mut self) -> Result<PreviewOutcome, Error> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(PreviewOutcome::Accepted)
        }

        fn run_print_panel(&mut self) -> Result<bool, Error> {
            Ok(true)
        }

        fn commit(&mut self, _previewed: bool) -> Result<CommitReceipt, Error> {
            Err(Error::new(ErrorKind::Unavailable))
        }
    }

    impl Drop for SlowOperation {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn failing_step() -> Result<(), Error> {
        Err(Error::new(ErrorKind::Usage).with_message("render failed"))
    }

    #[test]
    fn guard_disposes_on_error_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let facility = SpoolFacility::new(temp.path());
        let bridge = PrintBridge::new(facility.clone());
        let document = vec![0u8; 8];

        let attempt = || -> Result<(), Error> {
            let mut operation = bridge.open(ContextRef::from_ref(&document))?;
            operation.begin_preview()?;
            failing_step()?;
            operation.commit()?;
            Ok(())
        };
        assert!(attempt().is_err());
        assert_eq!(facility.live_operations(), 0);
        assert_eq!(bridge.live_operations(), 0);
        assert!(facility.tickets().unwrap().is_empty());
    }

    #[test]
    fn explicit_dispose_reports_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let bridge = PrintBridge::new(SpoolFacility::new(temp.path()));
        let document = 0u32;
        let mut operation = bridge.open(ContextRef::from_ref(&document)).unwrap();
        let id = operation.id();
        operation.commit().unwrap();
        assert_eq!(operation.state().unwrap(), OperationState::Committed);
        operation.dispose().unwrap();
        assert_eq!(bridge.state(id).unwrap(), OperationState::Disposed);
    }

    #[tokio::test]
    async fn async_preview_completes_before_commit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let facility = SpoolFacility::new(temp.path());
        let bridge = PrintBridge::new(facility.clone());
        let document = 0u32;
        let mut operation = bridge.open(ContextRef::from_ref(&document)).unwrap();

        let outcome = operation.begin_preview_async().await.unwrap();
        assert_eq!(outcome, PreviewOutcome::Accepted);
        assert_eq!(operation.state().unwrap(), OperationState::Previewed);
        operation.commit().unwrap();
        drop(operation);

        let tickets = facility.tickets().unwrap();
        assert_eq!(tickets.len(), 1);
        assert!(tickets[0].previewed);
        assert_eq!(facility.live_operations(), 0);
    }

    #[tokio::test]
    async fn cancelled_async_preview_still_releases() {
        let live = Arc::new(AtomicUsize::new(0));
        let bridge = PrintBridge::new(SlowPreview { live: live.clone() });
        let document = 0u32;
        let mut operation = bridge.open(ContextRef::from_ref(&document)).unwrap();
        let id = operation.id();

        let attempt =
            tokio::time::timeout(Duration::from_millis(20), operation.begin_preview_async()).await;
        assert!(attempt.is_err());
        drop(operation);
        assert_eq!(bridge.state(id).unwrap(), OperationState::Disposed);

        for _ in 0..200 {
            if bridge.live_operations() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bridge.live_operations(), 0);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
