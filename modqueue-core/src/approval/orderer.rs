//! Batch approval ordering.
//!
//! Approving all of one author's queued changes must happen in a safe
//! order: uploads first, so files exist before the pages that reference
//! them; moves last, so a page is not edited under its old name only to be
//! renamed out from under that edit onto a freshly created redirect.
//! Within a class, submission order (row id) breaks ties explicitly, so
//! the result never depends on a storage engine's natural ordering.

use crate::change::{ChangeId, ChangeKind, PendingChange};

fn class_rank(kind: &ChangeKind) -> u8 {
    match kind {
        ChangeKind::Upload { .. } => 0,
        ChangeKind::Edit => 1,
        ChangeKind::Move { .. } => 2,
    }
}

/// Deterministic safe order for a single author's pending rows.
///
/// Pure function of the row set: no side effects, and any permutation of
/// the input yields the same output.
pub fn batch_order(changes: &[PendingChange]) -> Vec<ChangeId> {
    let mut ordered: Vec<(u8, ChangeId)> = changes
        .iter()
        .map(|change| (class_rank(&change.kind), change.id))
        .collect();
    ordered.sort();
    ordered.into_iter().map(|(_, id)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    use crate::change::{
        AuthorIdentity, ChangeFlags, ModerationState, PageRef, Provenance, StashKey, UserRef,
    };

    fn change_of_kind(id: i64, kind: ChangeKind) -> PendingChange {
        PendingChange {
            id: ChangeId(id),
            kind,
            author: UserRef::registered(7, "User7"),
            identity: AuthorIdentity::Registered(7),
            target: PageRef::new(0, format!("Page{}", id)),
            base_revision: None,
            content: String::new(),
            old_len: 0,
            new_len: 0,
            summary: String::new(),
            flags: ChangeFlags::default(),
            provenance: Provenance::default(),
            state: ModerationState::pending(),
            preloadable: false,
            received_at: Utc::now(),
        }
    }

    fn edit(id: i64) -> PendingChange {
        change_of_kind(id, ChangeKind::Edit)
    }

    fn a_move(id: i64) -> PendingChange {
        change_of_kind(
            id,
            ChangeKind::Move {
                destination: PageRef::new(0, format!("Moved{}", id)),
            },
        )
    }

    fn upload(id: i64) -> PendingChange {
        change_of_kind(
            id,
            ChangeKind::Upload {
                stash_key: StashKey(format!("stash-{}", id)),
            },
        )
    }

    #[test]
    fn test_uploads_then_edits_then_moves() {
        let changes = vec![a_move(1), edit(2), upload(3), edit(4), a_move(5)];
        let order = batch_order(&changes);
        assert_eq!(
            order,
            vec![ChangeId(3), ChangeId(2), ChangeId(4), ChangeId(1), ChangeId(5)]
        );
    }

    #[test]
    fn test_ties_break_by_submission_order() {
        let changes = vec![edit(9), edit(3), edit(6)];
        let order = batch_order(&changes);
        assert_eq!(order, vec![ChangeId(3), ChangeId(6), ChangeId(9)]);
    }

    #[test]
    fn test_empty_set() {
        assert!(batch_order(&[]).is_empty());
    }

    /// A set of changes with distinct ids, in arbitrary order.
    fn arb_changes() -> impl Strategy<Value = Vec<PendingChange>> {
        proptest::collection::vec(0u8..3, 0..30)
            .prop_map(|kinds| {
                kinds
                    .into_iter()
                    .enumerate()
                    .map(|(i, kind)| {
                        let id = i as i64 + 1;
                        match kind {
                            0 => upload(id),
                            1 => edit(id),
                            _ => a_move(id),
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .prop_shuffle()
    }

    proptest! {
        /// All moves after all non-moves, all uploads before all edits,
        /// regardless of input order.
        #[test]
        fn moves_last_uploads_first(changes in arb_changes()) {
            let order = batch_order(&changes);
            let rank_of = |id: &ChangeId| {
                changes
                    .iter()
                    .find(|c| c.id == *id)
                    .map(|c| class_rank(&c.kind))
                    .expect("ordered id came from the input")
            };
            for pair in order.windows(2) {
                prop_assert!(rank_of(&pair[0]) <= rank_of(&pair[1]));
            }
            prop_assert_eq!(order.len(), changes.len());
        }

        /// Pure function of the set: shuffling the input changes nothing.
        #[test]
        fn permutation_invariant(changes in arb_changes()) {
            let mut reversed = changes.clone();
            reversed.reverse();
            prop_assert_eq!(batch_order(&changes), batch_order(&reversed));
        }

        /// Ties within a class keep submission order.
        #[test]
        fn within_class_ids_ascend(changes in arb_changes()) {
            let order = batch_order(&changes);
            let lookup = |id: &ChangeId| {
                changes.iter().find(|c| c.id == *id).expect("known id")
            };
            for pair in order.windows(2) {
                let (a, b) = (lookup(&pair[0]), lookup(&pair[1]));
                if class_rank(&a.kind) == class_rank(&b.kind) {
                    prop_assert!(a.id <= b.id);
                }
            }
        }
    }
}
