//! Page-diff segmentation for update records.
//!
//! An update record stores the parts of a page that changed, as
//! `(start, size, old bytes, new bytes)` segments.  Runs of identical
//! bytes are skipped; short identical runs (4 bytes or fewer) between
//! changed regions are folded into the surrounding segment so a page
//! with scattered small edits does not fragment into many tiny
//! segments.  The exact segment boundaries are an encoding choice
//! only; applying the segments is correct for any boundary.

use bytes::Bytes;

/// One changed region of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSegment {
    /// Starting byte index within the page.
    pub start: u16,
    /// The pre-image of the region.
    pub old: Bytes,
    /// The post-image of the region.
    pub new: Bytes,
}

/// Length of the identical run at `start` in both slices.
#[must_use]
pub fn identical_range_len(a: &[u8], b: &[u8], start: usize) -> usize {
    a[start..]
        .iter()
        .zip(&b[start..])
        .take_while(|(x, y)| x == y)
        .count()
}

/// Length of the differing run at `start` in both slices.
#[must_use]
pub fn differing_range_len(a: &[u8], b: &[u8], start: usize) -> usize {
    a[start..]
        .iter()
        .zip(&b[start..])
        .take_while(|(x, y)| x != y)
        .count()
}

/// Computes the changed segments between two page images.
#[must_use]
pub fn diff_segments(old: &[u8], new: &[u8]) -> Vec<ChangeSegment> {
    debug_assert_eq!(old.len(), new.len());
    let page_size = old.len();
    let mut segments = Vec::new();

    let mut index = 0;
    while index < page_size {
        index += identical_range_len(old, new, index);
        if index == page_size {
            break;
        }

        let mut size = 0;
        loop {
            size += differing_range_len(old, new, index + size);
            if index + size == page_size {
                break;
            }

            // Fold in a short identical run unless it reaches the end
            // of the page.
            let same = identical_range_len(old, new, index + size);
            if same > 4 || index + size + same == page_size {
                break;
            }
            size += same;
        }

        segments.push(ChangeSegment {
            start: index as u16,
            old: Bytes::copy_from_slice(&old[index..index + size]),
            new: Bytes::copy_from_slice(&new[index..index + size]),
        });
        index += size;
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_scans() {
        let a = [1, 1, 1, 2, 3, 4, 4];
        let b = [1, 1, 1, 9, 9, 4, 4];
        assert_eq!(identical_range_len(&a, &b, 0), 3);
        assert_eq!(differing_range_len(&a, &b, 0), 0);
        assert_eq!(differing_range_len(&a, &b, 3), 2);
        assert_eq!(identical_range_len(&a, &b, 5), 2);
    }

    #[test]
    fn test_identical_pages_have_no_segments() {
        let page = vec![7u8; 128];
        assert!(diff_segments(&page, &page).is_empty());
    }

    #[test]
    fn test_single_change() {
        let old = vec![0u8; 64];
        let mut new = old.clone();
        new[10] = 1;
        new[11] = 2;

        let segments = diff_segments(&old, &new);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start, 10);
        assert_eq!(&segments[0].old[..], &[0, 0]);
        assert_eq!(&segments[0].new[..], &[1, 2]);
    }

    #[test]
    fn test_short_gap_coalesces() {
        let old = vec![0u8; 64];
        let mut new = old.clone();
        new[10] = 1;
        // 4 identical bytes between the changes: one segment.
        new[15] = 1;

        let segments = diff_segments(&old, &new);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start, 10);
        assert_eq!(segments[0].old.len(), 6);
    }

    #[test]
    fn test_long_gap_splits() {
        let old = vec![0u8; 64];
        let mut new = old.clone();
        new[10] = 1;
        // 5 identical bytes between the changes: two segments.
        new[16] = 1;

        let segments = diff_segments(&old, &new);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start, 10);
        assert_eq!(segments[0].old.len(), 1);
        assert_eq!(segments[1].start, 16);
    }

    #[test]
    fn test_change_at_page_edges() {
        let old = vec![5u8; 32];
        let mut new = old.clone();
        new[0] = 6;
        new[31] = 6;

        let segments = diff_segments(&old, &new);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments[1].start, 31);
    }

    #[test]
    fn test_segments_reconstruct_new_image() {
        let old: Vec<u8> = (0..=255).collect();
        let mut new = old.clone();
        for i in [0usize, 3, 4, 5, 100, 103, 200, 255] {
            new[i] ^= 0xFF;
        }

        let mut rebuilt = old.clone();
        for seg in diff_segments(&old, &new) {
            let start = seg.start as usize;
            rebuilt[start..start + seg.new.len()].copy_from_slice(&seg.new);
        }
        assert_eq!(rebuilt, new);
    }
}
