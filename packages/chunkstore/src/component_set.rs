//! Merge-based algebra over sorted sets.
//!
//! Every function here expects its inputs sorted ascending and free of
//! duplicates, and walks them in a single forward pass. None of them fail:
//! disjoint or empty inputs simply produce `false` or an empty result.

use std::cmp::Ordering;

use crate::component::ComponentTypeID;

/// Collect the intersection of `a` and `b` into `out`.
///
/// `out` is cleared first. Returns the number of matches.
pub fn intersect<T: Ord + Copy>(a: &[T], b: &[T], out: &mut Vec<T>) -> usize {
    out.clear();

    let mut i = 0;
    let mut j = 0;
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }

    out.len()
}

/// Returns true if every element of `want` appears in `have`.
pub fn is_superset<T: Ord>(have: &[T], want: &[T]) -> bool {
    if want.len() > have.len() {
        return false;
    }

    let mut have = have.iter();
    'outer: for wanted in want {
        for candidate in have.by_ref() {
            match candidate.cmp(wanted) {
                Ordering::Less => continue,
                Ordering::Equal => continue 'outer,
                // Sorted, so `wanted` cannot show up any later.
                Ordering::Greater => return false,
            }
        }

        return false;
    }

    true
}

/// Returns true if `a` and `b` share at least one element.
pub fn has_any<T: Ord>(a: &[T], b: &[T]) -> bool {
    let mut i = 0;
    let mut j = 0;
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => return true,
        }
    }

    false
}

/// Returns true if the slice is strictly ascending.
pub fn is_sorted_unique<T: Ord>(items: &[T]) -> bool {
    items.windows(2).all(|w| w[0] < w[1])
}

/// Return the first value which occurs more than once in a sorted slice.
pub fn first_duplicate<T: Ord + Copy>(sorted: &[T]) -> Option<T> {
    sorted.windows(2).find(|w| w[0] == w[1]).map(|w| w[0])
}

/// Merge `b` into `a`, keeping the result sorted and unique.
pub fn union_with<T: Ord + Copy>(a: &[T], b: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(a.len() + b.len());

    let mut i = 0;
    let mut j = 0;
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }

    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Return the elements of `a` which are not in `b`.
pub fn difference_with<T: Ord + Copy>(a: &[T], b: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(a.len());

    let mut j = 0;
    for item in a.iter().copied() {
        while j < b.len() && b[j] < item {
            j += 1;
        }

        if j >= b.len() || b[j] != item {
            out.push(item);
        }
    }

    out
}

/// Sort `ids` in place and fold them into a single order-independent hash.
pub fn canonical_id(ids: &mut [ComponentTypeID]) -> u32 {
    ids.sort_unstable();

    ids.iter().fold(0x811C_9DC5u32, |hash, id| {
        (hash.rotate_left(5) ^ id.id()).wrapping_mul(0x9E37_79B9)
    })
}
