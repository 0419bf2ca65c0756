//! Operational transformation engine.
//!
//! The single entry point is [`transform`]: given two operations `a` and
//! `b` composed against the same document state, it rewrites `a` into the
//! form that applies *after* `b`, such that both application orders
//! converge (transform property TP1):
//!
//! ```text
//! apply(apply(s, a), transform(b, a, false))
//!   == apply(apply(s, b), transform(a, b, true))
//! ```
//!
//! The result has length 1 for every case except an insert splitting a
//! concurrent delete, which yields two delete fragments. Fragments of one
//! result are expressed against the same document state and must be
//! applied in descending position order.
//!
//! # Primacy
//!
//! When two operations are truly concurrent at the same position, one of
//! them must win position precedence, and every observer must elect the
//! same winner. [`wins_precedence`] fixes a total order: vector clock
//! comparison first, then lexicographic client id, then the timestamp
//! hint. Callers pass the election result as `a_is_primary`; if one
//! caller passes `true` for `(a, b)`, every other observer must pass
//! `false` for `(b, a)`.

use crate::clock::Causality;
use crate::op::{char_len, OpKind, Operation};
use crate::error::Result;

/// Elect the primary operation of a concurrent pair.
///
/// Returns `true` when `a` wins position precedence over `b`. The
/// election depends only on operation identity (clock, client id,
/// timestamp), never on arrival order, so the outcome is invariant to
/// which side is currently rebasing.
pub fn wins_precedence(a: &Operation, b: &Operation) -> bool {
    match a.vector_clock.compare(&b.vector_clock) {
        Causality::Before => true,
        Causality::After => false,
        Causality::Equal | Causality::Concurrent => match a.client_id.cmp(&b.client_id) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => a.timestamp <= b.timestamp,
        },
    }
}

/// Rewrite `a` to apply after `b`.
///
/// Both operations must be composed against the same document state.
/// Returns the transformed form of `a`; see the module docs for the
/// two-fragment split case. Malformed operations are rejected with
/// `InvalidOperation`; the engine itself never panics on in-range
/// positions and has no side effects.
pub fn transform(a: &Operation, b: &Operation, a_is_primary: bool) -> Result<Vec<Operation>> {
    a.validate()?;
    b.validate()?;

    let transformed = match (&a.kind, &b.kind) {
        // Nothing repositions against a retain.
        (_, OpKind::Retain { .. }) => vec![a.kind.clone()],

        (OpKind::Insert { position: p, content }, OpKind::Insert { position: q, content: other }) => {
            let w = char_len(other);
            let position = if *p < *q {
                *p
            } else if *p > *q {
                *p + w
            } else if a_is_primary {
                *p
            } else {
                *p + w
            };
            vec![OpKind::Insert {
                position,
                content: content.clone(),
            }]
        }

        (OpKind::Insert { position: p, content }, OpKind::Delete { position: q, length }) => {
            let position = if *p <= *q {
                *p
            } else if *p >= *q + *length {
                *p - *length
            } else {
                // The insert landed inside the deleted range.
                *q
            };
            vec![OpKind::Insert {
                position,
                content: content.clone(),
            }]
        }

        (OpKind::Delete { position: p, length: m }, OpKind::Insert { position: q, content }) => {
            let w = char_len(content);
            if *p + *m <= *q {
                vec![OpKind::Delete {
                    position: *p,
                    length: *m,
                }]
            } else if *p >= *q {
                vec![OpKind::Delete {
                    position: *p + w,
                    length: *m,
                }]
            } else {
                // The insert split the deleted range; clip around it so the
                // inserted content survives.
                vec![
                    OpKind::Delete {
                        position: *p,
                        length: *q - *p,
                    },
                    OpKind::Delete {
                        position: *q + w,
                        length: *m - (*q - *p),
                    },
                ]
            }
        }

        (OpKind::Delete { position: p, length: m }, OpKind::Delete { position: q, length: l }) => {
            if *p + *m <= *q {
                // Entirely before b.
                vec![OpKind::Delete {
                    position: *p,
                    length: *m,
                }]
            } else if *p >= *q + *l {
                // Entirely after b.
                vec![OpKind::Delete {
                    position: *p - *l,
                    length: *m,
                }]
            } else if *q <= *p && *p + *m <= *q + *l {
                // Fully covered (identical ranges included): the other side
                // already deleted it.
                vec![OpKind::Retain {
                    position: *q,
                    length: 0,
                }]
            } else if *p < *q {
                if *p + *m <= *q + *l {
                    // Overlap on a's tail: keep the prefix.
                    vec![OpKind::Delete {
                        position: *p,
                        length: *q - *p,
                    }]
                } else {
                    // a strictly contains b: surviving prefix and suffix are
                    // contiguous once b's range is gone.
                    vec![OpKind::Delete {
                        position: *p,
                        length: *m - *l,
                    }]
                }
            } else {
                // Overlap on a's head: keep the suffix, shifted left.
                vec![OpKind::Delete {
                    position: *q,
                    length: *p + *m - (*q + *l),
                }]
            }
        }

        (OpKind::Retain { position: p, length }, OpKind::Insert { position: q, content }) => {
            let position = if *q <= *p {
                *p + char_len(content)
            } else {
                *p
            };
            vec![OpKind::Retain {
                position,
                length: *length,
            }]
        }

        (OpKind::Retain { position: p, length }, OpKind::Delete { position: q, length: l }) => {
            let position = if *p >= *q + *l {
                *p - *l
            } else if *p > *q {
                *q
            } else {
                *p
            };
            vec![OpKind::Retain {
                position,
                length: *length,
            }]
        }
    };

    Ok(transformed.into_iter().map(|kind| a.with_kind(kind)).collect())
}

/// Fold `a` over a sequence of already-committed operations.
///
/// Fragments produced along the way are each transformed against the
/// remaining operations; fully annihilated fragments drop out. The
/// returned vector is empty when the operation collapsed entirely.
pub fn transform_against_all(a: &Operation, committed: &[Operation]) -> Result<Vec<Operation>> {
    a.validate()?;
    let mut fragments: Vec<Operation> = [a.clone()]
        .into_iter()
        .filter(|op| op.kind.has_effect())
        .collect();
    for b in committed {
        let mut next = Vec::with_capacity(fragments.len());
        for fragment in &fragments {
            let primary = wins_precedence(fragment, b);
            for out in transform(fragment, b, primary)? {
                if !out.kind.has_effect() {
                    continue;
                }
                next.push(out);
            }
        }
        fragments = next;
        if fragments.is_empty() {
            break;
        }
    }
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VectorClock;

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        entries.iter().map(|(c, n)| (c.to_string(), *n)).collect()
    }

    fn insert(client: &str, pos: usize, content: &str) -> Operation {
        Operation::insert(client, 0, clock(&[(client, 1)]), pos, content)
    }

    fn delete(client: &str, pos: usize, len: usize) -> Operation {
        Operation::delete(client, 0, clock(&[(client, 1)]), pos, len)
    }

    /// Apply one edit to a string, char-indexed. Fragments of a single
    /// transform result share a base state, so multi-op results are
    /// applied in descending position order.
    fn apply(content: &str, ops: &[Operation]) -> String {
        let mut ordered: Vec<&Operation> = ops.iter().collect();
        ordered.sort_by(|x, y| y.position().cmp(&x.position()));
        let mut text = content.to_string();
        for op in ordered {
            match &op.kind {
                OpKind::Insert { position, content } => {
                    let byte = text
                        .char_indices()
                        .nth(*position)
                        .map(|(b, _)| b)
                        .unwrap_or(text.len());
                    text.insert_str(byte, content);
                }
                OpKind::Delete { position, length } => {
                    let chars: Vec<char> = text.chars().collect();
                    let mut out: String = chars[..*position].iter().collect();
                    out.extend(&chars[*position + *length..]);
                    text = out;
                }
                OpKind::Retain { .. } => {}
            }
        }
        text
    }

    fn converge(state: &str, a: &Operation, b: &Operation) -> (String, String) {
        let a_primary = wins_precedence(a, b);
        assert_eq!(
            a_primary,
            !wins_precedence(b, a),
            "precedence must be symmetric"
        );
        let a_after_b = transform(a, b, a_primary).unwrap();
        let b_after_a = transform(b, a, !a_primary).unwrap();

        let via_a = apply(&apply(state, &[a.clone()]), &b_after_a);
        let via_b = apply(&apply(state, &[b.clone()]), &a_after_b);
        (via_a, via_b)
    }

    #[test]
    fn test_insert_insert_disjoint() {
        let a = insert("c1", 2, "AA");
        let b = insert("c2", 6, "B");

        let out = transform(&a, &b, true).unwrap();
        assert_eq!(out[0].kind, OpKind::Insert { position: 2, content: "AA".into() });

        let out = transform(&b, &a, false).unwrap();
        assert_eq!(out[0].kind, OpKind::Insert { position: 8, content: "B".into() });
    }

    #[test]
    fn test_insert_insert_same_position_primary_wins() {
        // Both insert at 5 of "xxxxxyyyyy"; c1 is primary by
        // lexicographic client id, so its content lands first.
        let a = insert("c1", 5, "hello");
        let b = insert("c2", 5, "world");

        let (via_a, via_b) = converge("xxxxxyyyyy", &a, &b);
        assert_eq!(via_a, "xxxxxhelloworldyyyyy");
        assert_eq!(via_a, via_b);
    }

    #[test]
    fn test_precedence_clock_order_beats_client_id() {
        // b causally precedes a, so b is primary despite the larger id.
        let mut a = insert("c1", 5, "hello");
        a.vector_clock = clock(&[("c1", 1), ("c2", 1)]);
        let mut b = insert("c2", 5, "world");
        b.vector_clock = clock(&[("c2", 1)]);

        assert!(!wins_precedence(&a, &b));
        assert!(wins_precedence(&b, &a));
    }

    #[test]
    fn test_precedence_timestamp_last_resort() {
        let mut a = insert("c1", 0, "x");
        let mut b = insert("c1", 0, "y");
        b.timestamp = a.timestamp + chrono::Duration::milliseconds(5);
        assert!(wins_precedence(&a, &b));
        assert!(!wins_precedence(&b, &a));
        // Same clocks, same client, later timestamp loses.
        a.vector_clock = clock(&[("c1", 1)]);
        b.vector_clock = clock(&[("c1", 1)]);
        assert!(wins_precedence(&a, &b));
    }

    #[test]
    fn test_insert_against_delete_before_and_after() {
        let b = delete("c2", 3, 4);

        // At or before the deletion start: untouched.
        let a = insert("c1", 3, "z");
        let out = transform(&a, &b, true).unwrap();
        assert_eq!(out[0].kind, OpKind::Insert { position: 3, content: "z".into() });

        // Past the deleted range: shifted left.
        let a = insert("c1", 9, "z");
        let out = transform(&a, &b, true).unwrap();
        assert_eq!(out[0].kind, OpKind::Insert { position: 5, content: "z".into() });

        // Inside the deleted range: clamped to its start.
        let a = insert("c1", 5, "z");
        let out = transform(&a, &b, true).unwrap();
        assert_eq!(out[0].kind, OpKind::Insert { position: 3, content: "z".into() });
    }

    #[test]
    fn test_delete_shifts_right_of_insert() {
        let a = delete("c1", 4, 3);
        let b = insert("c2", 2, "XY");
        let out = transform(&a, &b, true).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, OpKind::Delete { position: 6, length: 3 });
    }

    #[test]
    fn test_insert_splits_delete() {
        // Delete(2,6) from c1 and Insert(5,"XY") from c2, both against
        // "0123456789". The delete is clipped around the insert.
        let state = "0123456789";
        let del = delete("c1", 2, 6);
        let ins = insert("c2", 5, "XY");

        let split = transform(&del, &ins, wins_precedence(&del, &ins)).unwrap();
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].kind, OpKind::Delete { position: 2, length: 3 });
        assert_eq!(split[1].kind, OpKind::Delete { position: 7, length: 3 });

        // Commit order insert-then-delete, as in the scenario.
        let after_insert = apply(state, &[ins.clone()]);
        assert_eq!(after_insert, "01234XY56789");
        let final_text = apply(&after_insert, &split);
        assert_eq!(final_text, "01XY89");

        // And the other order converges to the same content.
        let (via_a, via_b) = converge(state, &del, &ins);
        assert_eq!(via_a, "01XY89");
        assert_eq!(via_a, via_b);
    }

    #[test]
    fn test_non_overlapping_deletes() {
        // Delete(5,3) and Delete(15,2) on 20 chars never touch.
        let state = "abcdefghijklmnopqrst";
        let a = delete("c1", 5, 3);
        let b = delete("c2", 15, 2);

        let out = transform(&b, &a, wins_precedence(&b, &a)).unwrap();
        assert_eq!(out[0].kind, OpKind::Delete { position: 12, length: 2 });

        let (via_a, via_b) = converge(state, &a, &b);
        assert_eq!(via_a.chars().count(), 15);
        assert_eq!(via_a, via_b);
    }

    #[test]
    fn test_adjacent_deletes_do_not_overlap() {
        let a = delete("c1", 2, 3); // [2,5)
        let b = delete("c2", 5, 2); // [5,7)
        let out = transform(&a, &b, true).unwrap();
        assert_eq!(out[0].kind, OpKind::Delete { position: 2, length: 3 });
        let out = transform(&b, &a, false).unwrap();
        assert_eq!(out[0].kind, OpKind::Delete { position: 2, length: 2 });
    }

    #[test]
    fn test_identical_deletes_annihilate() {
        let a = delete("c1", 3, 4);
        let b = delete("c2", 3, 4);
        for primary in [true, false] {
            let out = transform(&a, &b, primary).unwrap();
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].kind, OpKind::Retain { position: 3, length: 0 });
        }
        let (via_a, via_b) = converge("0123456789", &a, &b);
        assert_eq!(via_a, "012789");
        assert_eq!(via_a, via_b);
    }

    #[test]
    fn test_covered_delete_annihilates() {
        let a = delete("c1", 4, 2); // inside [2,8)
        let b = delete("c2", 2, 6);
        let out = transform(&a, &b, wins_precedence(&a, &b)).unwrap();
        assert_eq!(out[0].kind, OpKind::Retain { position: 2, length: 0 });

        let (via_a, via_b) = converge("0123456789", &a, &b);
        assert_eq!(via_a, via_b);
    }

    #[test]
    fn test_partial_overlap_clips() {
        // a = [2,6), b = [4,8): a keeps its prefix [2,4).
        let a = delete("c1", 2, 4);
        let b = delete("c2", 4, 4);
        let out = transform(&a, &b, true).unwrap();
        assert_eq!(out[0].kind, OpKind::Delete { position: 2, length: 2 });

        // The mirror clips to the suffix.
        let out = transform(&b, &a, false).unwrap();
        assert_eq!(out[0].kind, OpKind::Delete { position: 2, length: 2 });

        let (via_a, via_b) = converge("0123456789", &a, &b);
        assert_eq!(via_a, "0189");
        assert_eq!(via_a, via_b);
    }

    #[test]
    fn test_containing_delete_shrinks() {
        // a = [1,9) strictly contains b = [3,5).
        let a = delete("c1", 1, 8);
        let b = delete("c2", 3, 2);
        let out = transform(&a, &b, true).unwrap();
        assert_eq!(out[0].kind, OpKind::Delete { position: 1, length: 6 });

        let (via_a, via_b) = converge("0123456789", &a, &b);
        assert_eq!(via_a, "09");
        assert_eq!(via_a, via_b);
    }

    #[test]
    fn test_retain_repositions() {
        let a = Operation::retain("c1", 0, clock(&[("c1", 1)]), 5, 0);

        let out = transform(&a, &insert("c2", 3, "XY"), false).unwrap();
        assert_eq!(out[0].kind, OpKind::Retain { position: 7, length: 0 });

        let out = transform(&a, &delete("c2", 1, 2), false).unwrap();
        assert_eq!(out[0].kind, OpKind::Retain { position: 3, length: 0 });

        let out = transform(&a, &delete("c2", 4, 4), false).unwrap();
        assert_eq!(out[0].kind, OpKind::Retain { position: 4, length: 0 });
    }

    #[test]
    fn test_transform_rejects_malformed() {
        let bad = Operation::insert("c1", 0, VectorClock::new(), 0, "");
        let ok = insert("c2", 0, "x");
        assert!(transform(&bad, &ok, true).is_err());
        assert!(transform(&ok, &bad, true).is_err());
    }

    #[test]
    fn test_transform_against_all_folds_and_drops_noops() {
        let committed = vec![delete("c2", 0, 4)];
        let a = delete("c1", 1, 2);
        let out = transform_against_all(&a, &committed).unwrap();
        assert!(out.is_empty(), "fully covered delete must collapse");

        let a = insert("c1", 6, "z");
        let out = transform_against_all(&a, &committed).unwrap();
        assert_eq!(out[0].kind, OpKind::Insert { position: 2, content: "z".into() });

        // A bare retain has no effect to rebase.
        let a = Operation::retain("c1", 0, clock(&[("c1", 1)]), 3, 0);
        assert!(transform_against_all(&a, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_tp1_exhaustive_small_space() {
        // Every insert/delete pair over a short document, both identities.
        let state = "0123456789";
        let len = state.chars().count();

        let mut ops_c1 = Vec::new();
        let mut ops_c2 = Vec::new();
        for pos in 0..=len {
            ops_c1.push(insert("c1", pos, "ab"));
            ops_c2.push(insert("c2", pos, "Z"));
        }
        for pos in 0..len {
            for l in 1..=(len - pos) {
                ops_c1.push(delete("c1", pos, l));
                ops_c2.push(delete("c2", pos, l));
            }
        }

        for a in &ops_c1 {
            for b in &ops_c2 {
                let (via_a, via_b) = converge(state, a, b);
                assert_eq!(via_a, via_b, "diverged for {:?} / {:?}", a.kind, b.kind);
            }
        }
    }
}
