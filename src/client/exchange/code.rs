//! The four-bit completion code.
//!
//! Each half of an exchange owns two bits: one which records that the half
//! completed, and one which records that it completed successfully. A failed
//! completion sets only the first bit, so "both halves completed" is a single
//! mask test regardless of outcome.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

pub(super) const REQUEST_COMPLETED: u8 = 0b0001;
pub(super) const REQUEST_SUCCEEDED: u8 = 0b0010;
pub(super) const RESPONSE_COMPLETED: u8 = 0b0100;
pub(super) const RESPONSE_SUCCEEDED: u8 = 0b1000;

const COMPLETED: u8 = REQUEST_COMPLETED | RESPONSE_COMPLETED;
const SUCCEEDED: u8 = REQUEST_SUCCEEDED | RESPONSE_SUCCEEDED;

/// One side of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Half {
    Request,
    Response,
}

impl Half {
    /// The bits this half sets when it completes.
    pub(super) fn bits(self, succeeded: bool) -> u8 {
        match (self, succeeded) {
            (Half::Request, true) => REQUEST_COMPLETED | REQUEST_SUCCEEDED,
            (Half::Request, false) => REQUEST_COMPLETED,
            (Half::Response, true) => RESPONSE_COMPLETED | RESPONSE_SUCCEEDED,
            (Half::Response, false) => RESPONSE_COMPLETED,
        }
    }
}

impl fmt::Display for Half {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Half::Request => f.write_str("request"),
            Half::Response => f.write_str("response"),
        }
    }
}

/// A snapshot of the completion code.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(super) struct Status(u8);

impl Status {
    pub(super) fn is_complete(self) -> bool {
        self.0 & COMPLETED == COMPLETED
    }

    pub(super) fn is_succeeded(self) -> bool {
        self.0 & SUCCEEDED == SUCCEEDED
    }

    pub(super) fn intersects(self, bits: u8) -> bool {
        self.0 & bits != 0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04b}", self.0)
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({self})")
    }
}

/// The atomically updated completion code of an exchange.
#[derive(Default)]
pub(super) struct Code(AtomicU8);

impl Code {
    pub(super) fn load(&self) -> Status {
        Status(self.0.load(Ordering::Acquire))
    }

    /// Set `bits` if none of them are set yet.
    ///
    /// Returns the new status when this call changed the code, or `None`
    /// when any of the bits were already present.
    pub(super) fn set(&self, bits: u8) -> Option<Status> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current & bits != 0 {
                return None;
            }

            let candidate = current | bits;
            match self.0.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(Status(candidate)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Clear `half`, but only if it completed exactly as `succeeded` says and the
    /// other half has not completed yet.
    pub(super) fn clear(&self, half: Half, succeeded: bool) -> bool {
        let mask = half.bits(true);
        let bits = half.bits(succeeded);
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current & COMPLETED == COMPLETED || current & mask != bits {
                return false;
            }

            match self.0.compare_exchange_weak(
                current,
                current & !mask,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Code").field(&self.load()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_first_wins() {
        let code = Code::default();

        let status = code.set(Half::Request.bits(false)).unwrap();
        assert_eq!(status.to_string(), "0001");
        assert!(!status.is_complete());

        assert!(code.set(Half::Request.bits(true)).is_none());
        assert!(code.set(Half::Request.bits(false)).is_none());

        let status = code.set(Half::Response.bits(true)).unwrap();
        assert_eq!(status.to_string(), "1101");
        assert!(status.is_complete());
        assert!(!status.is_succeeded());
    }

    #[test]
    fn success_bits() {
        let code = Code::default();
        code.set(Half::Request.bits(true)).unwrap();
        let status = code.set(Half::Response.bits(true)).unwrap();
        assert_eq!(status.to_string(), "1111");
        assert!(status.is_succeeded());
        assert!(status.intersects(RESPONSE_COMPLETED));
    }

    #[test]
    fn clear_requires_matching_bits() {
        let code = Code::default();
        code.set(Half::Response.bits(false)).unwrap();

        assert!(!code.clear(Half::Response, true));
        assert!(code.clear(Half::Response, false));
        assert_eq!(code.load().to_string(), "0000");
        assert!(code.set(Half::Response.bits(true)).is_some());

        assert!(!code.clear(Half::Response, false));
        assert_eq!(code.load().to_string(), "1100");
        assert!(code.clear(Half::Response, true));
        assert_eq!(code.load().to_string(), "0000");
    }

    #[test]
    fn clear_refuses_once_complete() {
        let code = Code::default();
        code.set(Half::Response.bits(true)).unwrap();
        code.set(Half::Request.bits(true)).unwrap();

        assert!(!code.clear(Half::Response, true));
        assert_eq!(code.load().to_string(), "1111");
    }

    #[test]
    fn racing_halves_complete_once() {
        for _ in 0..64 {
            let code = Code::default();
            let transitions = std::sync::atomic::AtomicUsize::new(0);

            std::thread::scope(|scope| {
                for half in [Half::Request, Half::Response] {
                    let code = &code;
                    let transitions = &transitions;
                    scope.spawn(move || {
                        if let Some(status) = code.set(half.bits(true)) {
                            if status.is_complete() {
                                transitions.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    });
                }
            });

            assert_eq!(transitions.load(Ordering::SeqCst), 1);
            assert!(code.load().is_succeeded());
        }
    }
}
