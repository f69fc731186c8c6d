//! Registration handles.

use crate::core::BusState;
use crate::registry::RegistrationId;
use bus_types::MessageKind;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

/// Handle returned by every `subscribe*` / `handle_*` call.
///
/// Owns the capability to remove exactly one registration. Dropping the
/// handle leaves the registration in place.
pub struct Registration {
    id: RegistrationId,
    kind: MessageKind,
    payload_type: String,
    state: Weak<Mutex<BusState>>,
    active: AtomicBool,
}

impl Registration {
    pub(crate) fn new(
        id: RegistrationId,
        kind: MessageKind,
        payload_type: impl Into<String>,
        state: Weak<Mutex<BusState>>,
    ) -> Self {
        Self {
            id,
            kind,
            payload_type: payload_type.into(),
            state,
            active: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    #[must_use]
    pub fn payload_type(&self) -> &str {
        &self.payload_type
    }

    /// Whether this handle has not yet been used to unregister.
    ///
    /// A registration removed by other means (deallocation cleanup, the
    /// id-based unregister) still reports active here.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the registration. Returns `true` only for the call that
    /// actually removed it; later calls are no-ops.
    pub fn unregister(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        match self.state.upgrade() {
            Some(state) => state.lock().registry.unregister(self.id),
            None => false,
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("payload_type", &self.payload_type)
            .field("active", &self.is_active())
            .finish()
    }
}
