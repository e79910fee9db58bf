//! Sticky validation state for headers and records.

/// Records whether a block was validated and with what outcome.
///
/// Once an error is set it sticks until explicitly reset, so that a section
/// invalidated by a surrounding event (e.g. missing shadow data) keeps
/// reporting its reason even though its bytes are internally consistent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    validated: bool,
    error: Option<String>,
}

impl Validation {
    #[inline]
    pub fn was_validated(&self) -> bool {
        self.validated
    }

    pub fn set_ok(&mut self) {
        if self.error.is_none() {
            self.validated = true;
        }
    }

    pub fn set_error(&mut self, reason: impl Into<String>) {
        self.validated = true;
        self.error = Some(reason.into());
    }

    #[inline]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn reset(&mut self) {
        self.validated = false;
        self.error = None;
    }
}
