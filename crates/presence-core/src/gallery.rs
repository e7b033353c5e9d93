//! In-memory gallery of enrolled face templates.
//!
//! Loaded once per session from the store and replaced wholesale on an
//! explicit reload. Never mutated during a recognition pass.

use crate::types::Embedding;

/// One enrolled template: an embedding and the employee code it belongs to.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub embedding: Embedding,
    pub identity: String,
}

/// Ordered collection of gallery entries.
///
/// Order is load order (template insertion order) and is significant: when
/// several entries fall within tolerance of a probe, the first one wins.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Strategy for resolving a probe embedding to a gallery identity.
pub trait Matcher {
    /// Returns the matched identity, or `None` when nothing is within
    /// tolerance.
    fn resolve<'g>(&self, probe: &Embedding, gallery: &'g Gallery) -> Option<&'g str>;
}

/// First-within-tolerance matcher.
///
/// Selects the FIRST entry in gallery load order whose distance is within
/// tolerance, not the minimum-distance entry. Enrolled lookalikes can
/// therefore shadow each other depending on load order; switching to
/// nearest-match would change recognition outcomes and is deliberately not
/// done here.
#[derive(Debug, Clone, Copy)]
pub struct FirstWithinTolerance {
    pub tolerance: f32,
}

impl FirstWithinTolerance {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

impl Matcher for FirstWithinTolerance {
    fn resolve<'g>(&self, probe: &Embedding, gallery: &'g Gallery) -> Option<&'g str> {
        gallery
            .entries()
            .iter()
            .find(|entry| probe.distance(&entry.embedding) <= self.tolerance)
            .map(|entry| entry.identity.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(identity: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            embedding: Embedding::new(values),
            identity: identity.to_string(),
        }
    }

    #[test]
    fn resolves_single_entry_within_tolerance() {
        let gallery = Gallery::new(vec![
            entry("E001", vec![1.0, 0.0]),
            entry("E002", vec![0.0, 1.0]),
        ]);
        let probe = Embedding::new(vec![0.05, 0.98]);
        let matcher = FirstWithinTolerance::new(0.5);
        assert_eq!(matcher.resolve(&probe, &gallery), Some("E002"));
    }

    #[test]
    fn first_in_load_order_wins_over_nearer_entry() {
        // Probe is much closer to E002, but E001 is still within tolerance
        // and loads first.
        let gallery = Gallery::new(vec![
            entry("E001", vec![0.4, 0.0]),
            entry("E002", vec![0.0, 0.0]),
        ]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let matcher = FirstWithinTolerance::new(0.5);
        assert_eq!(matcher.resolve(&probe, &gallery), Some("E001"));
    }

    #[test]
    fn distance_exactly_at_tolerance_matches() {
        let gallery = Gallery::new(vec![entry("E001", vec![0.5, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let matcher = FirstWithinTolerance::new(0.5);
        assert_eq!(matcher.resolve(&probe, &gallery), Some("E001"));
    }

    #[test]
    fn nothing_within_tolerance_is_unknown() {
        let gallery = Gallery::new(vec![entry("E001", vec![2.0, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let matcher = FirstWithinTolerance::new(0.5);
        assert_eq!(matcher.resolve(&probe, &gallery), None);
    }

    #[test]
    fn empty_gallery_never_matches() {
        let matcher = FirstWithinTolerance::new(0.5);
        let probe = Embedding::new(vec![0.0]);
        assert_eq!(matcher.resolve(&probe, &Gallery::default()), None);
    }
}
