//! Export target resolution.
//!
//! An export may be requested before the session's metadata has settled, so
//! the requested fingerprint is resolved best-effort: each [`Resolution`]
//! strategy is tried in [`Resolution::ORDER`] and the first match wins. The
//! strategy that matched is reported so callers can log a fallback.

use std::sync::Arc;

use crate::engine::{Fingerprint, SessionHandle};
use crate::session::Session;

/// Something an export can be resolved to.
pub trait Candidate {
    /// Content fingerprint.
    fn key(&self) -> Fingerprint;

    /// Whether the file list is known.
    fn lists_files(&self) -> bool;
}

impl Candidate for Session {
    fn key(&self) -> Fingerprint {
        self.fingerprint.clone()
    }

    fn lists_files(&self) -> bool {
        self.has_files()
    }
}

impl<H: SessionHandle> Candidate for Arc<H> {
    fn key(&self) -> Fingerprint {
        self.fingerprint()
    }

    fn lists_files(&self) -> bool {
        !self.files().is_empty()
    }
}

/// One way of matching a requested fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Same fingerprint
    Exact,
    /// Same fingerprint ignoring ASCII case
    CaseInsensitive,
    /// Any session whose file list is known
    AnyWithFiles,
    /// The first registered session
    FirstRegistered,
}

impl Resolution {
    /// Order strategies are tried in.
    pub const ORDER: [Self; 4] = [
        Self::Exact,
        Self::CaseInsensitive,
        Self::AnyWithFiles,
        Self::FirstRegistered,
    ];

    /// Apply this strategy alone.
    pub fn resolve<'a, C: Candidate>(
        self,
        target: &Fingerprint,
        candidates: &'a [C],
    ) -> Option<&'a C> {
        match self {
            Self::Exact => candidates.iter().find(|c| &c.key() == target),
            Self::CaseInsensitive => candidates.iter().find(|c| c.key().eq_ignore_case(target)),
            Self::AnyWithFiles => candidates.iter().find(|c| c.lists_files()),
            Self::FirstRegistered => candidates.first(),
        }
    }

    /// Whether this strategy only matches the requested content.
    #[must_use]
    pub const fn is_exact_content(self) -> bool {
        matches!(self, Self::Exact | Self::CaseInsensitive)
    }
}

/// Try `strategies` in order and return the first match with its strategy.
pub fn resolve_with<'a, C: Candidate>(
    strategies: &[Resolution],
    target: &Fingerprint,
    candidates: &'a [C],
) -> Option<(Resolution, &'a C)> {
    strategies
        .iter()
        .find_map(|strategy| strategy.resolve(target, candidates).map(|c| (*strategy, c)))
}

/// Resolve `target` using every strategy in [`Resolution::ORDER`].
pub fn resolve<'a, C: Candidate>(
    target: &Fingerprint,
    candidates: &'a [C],
) -> Option<(Resolution, &'a C)> {
    resolve_with(&Resolution::ORDER, target, candidates)
}
