//! Purpose: Define the public Rust API boundary for the print bridge.
//! Exports: Bridge, scoped operation guard, facility seam, and the value types they use.
//! Role: Additive-only surface shared by the C ABI, the CLI, and Rust embedders.
//! Invariants: Callers reach registry and facility behavior only through `PrintBridge`.

mod bridge;
mod operation;

pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use crate::core::facility::{
    CommitReceipt, ContextRef, NativeOperation, PageSource, PageSurface, PreviewOutcome,
    PrintFacility,
};
pub use crate::core::registry::{HandleId, OperationRecord};
pub use crate::core::settings::{
    Margins, Orientation, PageRange, PaperSize, PrintSettings,
};
pub use crate::core::spool::{JobTicket, SpoolFacility, list_tickets};
pub use crate::core::state::OperationState;
pub use bridge::{BridgeResult, PrintBridge};
pub use operation::PrintOperation;
