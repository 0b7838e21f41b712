//! Annotation set difference with expiry-change pairing.
//!
//! # Purpose
//! Computes which annotations must be inserted and deleted to move from the stored set to
//! the desired one, and which insert/delete pairs are really a single "expiry changed"
//! modification that should be audited once instead of twice.
//!
//! # Key invariants
//! - Diffing a set against itself is empty in every mode.
//! - Pairing is quadratic, so it is switched off once both inputs together reach
//!   [`MODIFICATION_DETECTION_LIMIT`] items.
//! - Candidates are visited in canonical annotation order so results do not depend on the
//!   order of the input collections.
use crate::model::Annotation;
use std::collections::BTreeSet;

/// Combined input size at which expiry-change pairing is disabled.
pub const MODIFICATION_DETECTION_LIMIT: usize = 20;

/// How an annotation reconciliation treats stored annotations that are not desired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationMode {
    /// Only insert what is missing; nothing stored is removed.
    Add,
    /// Converge to exactly the desired set, pairing expiry changes.
    Cut,
}

/// An annotation to insert or delete, and whether it deserves its own audit entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logged {
    pub annotation: Annotation,
    pub log: bool,
}

impl Logged {
    fn logged(annotation: Annotation) -> Self {
        Self {
            annotation,
            log: true,
        }
    }

    fn silent(annotation: Annotation) -> Self {
        Self {
            annotation,
            log: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationChange {
    pub before: Annotation,
    pub after: Annotation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationDiff {
    pub add: Vec<Logged>,
    pub remove: Vec<Logged>,
    pub change: Vec<AnnotationChange>,
}

impl AnnotationDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.change.is_empty()
    }
}

/// Compares `current` with `desired`.
///
/// With `detect_modifications`, a removed and an added annotation that differ only in
/// `expires` are emitted with `log: false` and reported once in `change`.
pub fn diff_annotations(
    current: &[Annotation],
    desired: &[Annotation],
    detect_modifications: bool,
) -> AnnotationDiff {
    let mut detect_modifications = detect_modifications;
    if current.len() + desired.len() >= MODIFICATION_DETECTION_LIMIT {
        tracing::warn!(
            current = current.len(),
            desired = desired.len(),
            limit = MODIFICATION_DETECTION_LIMIT,
            "annotation modification detection disabled for performance reasons"
        );
        detect_modifications = false;
    }

    let current: BTreeSet<&Annotation> = current.iter().collect();
    let desired: BTreeSet<&Annotation> = desired.iter().collect();
    let to_remove: Vec<&Annotation> = current.difference(&desired).copied().collect();
    let mut to_add: Vec<Option<&Annotation>> =
        desired.difference(&current).copied().map(Some).collect();

    let mut diff = AnnotationDiff::default();
    for before in to_remove {
        let partner = if detect_modifications {
            to_add.iter_mut().find(|candidate| {
                candidate.is_some_and(|after| before.same_except_expiry(after))
            })
        } else {
            None
        };
        match partner.and_then(Option::take) {
            Some(after) => {
                diff.remove.push(Logged::silent(before.clone()));
                diff.add.push(Logged::silent(after.clone()));
                diff.change.push(AnnotationChange {
                    before: before.clone(),
                    after: after.clone(),
                });
            }
            None => diff.remove.push(Logged::logged(before.clone())),
        }
    }
    diff.add
        .extend(to_add.into_iter().flatten().cloned().map(Logged::logged));
    diff
}

/// Diff for one reconciliation step in the given mode.
///
/// Add mode never removes and never pairs, so every insert is audited.
pub fn diff_for_mode(
    current: &[Annotation],
    desired: &[Annotation],
    mode: AnnotationMode,
) -> AnnotationDiff {
    match mode {
        AnnotationMode::Cut => diff_annotations(current, desired, true),
        AnnotationMode::Add => AnnotationDiff {
            add: diff_annotations(current, desired, false).add,
            remove: Vec::new(),
            change: Vec::new(),
        },
    }
}
