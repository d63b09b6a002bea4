// Per-operation lifecycle states and the transitions between them.
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OperationState {
    Created,
    Previewed,
    Committed,
    Disposed,
}

/// Events that drive a live operation through its lifecycle.
///
/// `Dispose` is not listed: disposal removes the registry entry, and every
/// live state may be disposed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transition {
    Configure,
    Preview,
    Commit,
}

impl OperationState {
    /// Stable integer code used across the C boundary.
    pub fn code(self) -> i32 {
        match self {
            OperationState::Created => 0,
            OperationState::Previewed => 1,
            OperationState::Committed => 2,
            OperationState::Disposed => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationState::Created => "created",
            OperationState::Previewed => "previewed",
            OperationState::Committed => "committed",
            OperationState::Disposed => "disposed",
        }
    }

    pub fn is_live(self) -> bool {
        !matches!(self, OperationState::Disposed)
    }

    pub fn apply(self, transition: Transition) -> Result<OperationState, Error> {
        use OperationState::*;
        match (self, transition) {
            (Created | Previewed, Transition::Configure) => Ok(self),
            (Created | Previewed, Transition::Preview) => Ok(Previewed),
            (Created | Previewed, Transition::Commit) => Ok(Committed),
            (Committed, _) => Err(Error::new(ErrorKind::InvalidState)
                .with_message(format!("cannot {} a committed operation", verb(transition)))
                .with_hint("Dispose the handle; committed operations accept no further calls.")),
            (Disposed, _) => Err(Error::new(ErrorKind::InvalidHandle)
                .with_message(format!("cannot {} a disposed operation", verb(transition)))),
        }
    }
}

fn verb(transition: Transition) -> &'static str {
    match transition {
        Transition::Configure => "configure",
        Transition::Preview => "preview",
        Transition::Commit => "commit",
    }
}

#[cfg(test)]
mod tests {
    use super::{OperationState, Transition};
    use crate::core::error::ErrorKind;

    #[test]
    fn preview_is_optional_and_repeatable() {
        let direct = OperationState::Created.apply(Transition::Commit).unwrap();
        assert_eq!(direct, OperationState::Committed);

        let previewed = OperationState::Created
            .apply(Transition::Preview)
            .and_then(|state| state.apply(Transition::Preview))
            .unwrap();
        assert_eq!(previewed, OperationState::Previewed);
        assert_eq!(
            previewed.apply(Transition::Commit).unwrap(),
            OperationState::Committed
        );
    }

    #[test]
    fn configure_keeps_state() {
        for state in [OperationState::Created, OperationState::Previewed] {
            assert_eq!(state.apply(Transition::Configure).unwrap(), state);
        }
    }

    #[test]
    fn committed_rejects_everything() {
        for transition in [Transition::Configure, Transition::Preview, Transition::Commit] {
            let err = OperationState::Committed.apply(transition).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState);
        }
    }

    #[test]
    fn disposed_reports_invalid_handle() {
        let err = OperationState::Disposed
            .apply(Transition::Preview)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    }

    #[test]
    fn state_codes_are_stable() {
        assert_eq!(OperationState::Created.code(), 0);
        assert_eq!(OperationState::Previewed.code(), 1);
        assert_eq!(OperationState::Committed.code(), 2);
        assert_eq!(OperationState::Disposed.code(), 3);
    }
}
