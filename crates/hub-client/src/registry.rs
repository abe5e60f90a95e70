//! Ordered set of selectors this client has published.

use std::sync::Arc;

use hubmesh_protocol::{MatchPredicate, Selector};

use crate::error::ClientError;

/// Selectors this client currently claims to have published, in publish order.
///
/// No two entries match each other under the registry's predicate. The
/// order is the order used to re-announce selectors after a reconnect.
pub struct SelectorRegistry {
    entries: Vec<Selector>,
    matcher: Arc<dyn MatchPredicate>,
}

impl SelectorRegistry {
    pub fn new(matcher: Arc<dyn MatchPredicate>) -> Self {
        Self {
            entries: Vec::new(),
            matcher,
        }
    }

    /// Fails with [`ClientError::DuplicateSelector`] if any entry matches
    /// `selector`.
    pub fn check_unique(&self, selector: &Selector) -> Result<(), ClientError> {
        if self.entries.iter().any(|e| self.matcher.matches(e, selector)) {
            return Err(ClientError::DuplicateSelector(selector.clone()));
        }
        Ok(())
    }

    /// Appends `selector` unless it duplicates an existing entry.
    pub fn add(&mut self, selector: Selector) -> Result<(), ClientError> {
        self.check_unique(&selector)?;
        self.entries.push(selector);
        Ok(())
    }

    /// Returns the entries matching `selector`, in registry order.
    pub fn matching(&self, selector: &Selector) -> Vec<Selector> {
        self.entries
            .iter()
            .filter(|e| self.matcher.matches(e, selector))
            .cloned()
            .collect()
    }

    /// Removes every entry matching `selector` and returns them in order.
    pub fn remove_matching(&mut self, selector: &Selector) -> Vec<Selector> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| self.matcher.matches(e, selector));
        self.entries = kept;
        removed
    }

    /// Removes the first entry structurally equal to `selector`.
    pub fn remove_exact(&mut self, selector: &Selector) -> bool {
        match self.entries.iter().position(|e| e == selector) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn entries(&self) -> &[Selector] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for SelectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorRegistry")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}
