//! Overlapping page batches for native-document generation.
//!
//! A document-native model call has a hard page ceiling, so pages are sent
//! in windows of `size`. Consecutive windows share `overlap` pages so the
//! model re-sees the tail of the previous window and does not miss or
//! regenerate a concept that straddles the boundary.
//!
//! ```text
//! pages 0..=23, size 10, overlap 1
//! [0 ─────── 9]
//!           [9 ─────── 18]
//!                     [18 ── 23]
//! ```

/// Partition `items` into overlapping batches.
///
/// * every item lands in at least one batch, order preserved;
/// * consecutive batches share exactly `overlap` items, except when a
///   degenerate tail (no more than `overlap` items) is merged into the
///   previous batch;
/// * no batch exceeds `size` items;
/// * `items.len() <= size` yields a single batch, empty input yields none.
///
/// `overlap` is clamped below `size`; callers validate this through
/// [`crate::config::ForgeConfigBuilder::build`].
pub fn create_batches<T: Clone + PartialEq>(items: &[T], size: usize, overlap: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let size = size.max(1);
    if items.len() <= size {
        return vec![items.to_vec()];
    }
    let overlap = overlap.min(size - 1);
    let stride = size - overlap;

    let mut batches: Vec<Vec<T>> = Vec::new();
    let mut start = 0;
    while start < items.len() {
        let end = (start + size).min(items.len());
        let window = &items[start..end];

        match batches.last_mut() {
            Some(last) if window.len() <= overlap => {
                for item in window {
                    if !last.contains(item) {
                        last.push(item.clone());
                    }
                }
            }
            _ => batches.push(window.to_vec()),
        }

        if end == items.len() {
            break;
        }
        start += stride;
    }
    batches
}

/// Split a batch into pages seen for the first time and pages carried over
/// as context, updating `seen`.
pub fn classify_pages(
    batch: &[usize],
    seen: &mut std::collections::BTreeSet<usize>,
) -> (Vec<usize>, Vec<usize>) {
    let (context, new): (Vec<usize>, Vec<usize>) = batch.iter().partition(|p| seen.contains(*p));
    seen.extend(new.iter().copied());
    (new, context)
}
