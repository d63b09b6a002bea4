// Core modules implementing handle bookkeeping, lifecycle states, settings, and the spool facility.
pub mod error;
pub mod facility;
pub mod registry;
pub mod settings;
pub mod spool;
pub mod state;
