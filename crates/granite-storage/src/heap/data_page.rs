//! Slotted data page operations.
//!
//! These functions operate on a pinned data page of a heap file.  See
//! the module docs of [`crate::heap`] for the page layout.

use granite_common::{DbError, DbResult};

use super::SlotId;
use crate::page::DbPage;

/// Slot value marking an empty slot.
pub const EMPTY_SLOT: u16 = 0;

/// `free_next` value marking a page that is not on the free list.
/// Distinct from 0, which means "on the list, no successor".
pub const INVALID_PGNO: u16 = 0xFFFF;

#[inline]
fn offset_num_slots(page: &DbPage) -> usize {
    page.page_size() - 4
}

#[inline]
fn offset_free_next(page: &DbPage) -> usize {
    page.page_size() - 2
}

/// Initializes a freshly allocated data page: no slots, no tuples, not
/// on the free list.
pub fn init_new_page(page: &DbPage) {
    let zeros = vec![0u8; page.page_size()];
    page.write_bytes(0, &zeros);
    set_num_slots(page, 0);
    set_free_next(page, INVALID_PGNO);
}

/// Returns the number of entries in the slot array.
pub fn num_slots(page: &DbPage) -> u16 {
    page.read_u16(offset_num_slots(page))
}

/// Sets the number of entries in the slot array.
pub fn set_num_slots(page: &DbPage, count: u16) {
    page.write_u16(offset_num_slots(page), count);
}

/// Byte offset of a slot's entry in the slot array.
#[inline]
pub fn slot_entry_offset(slot: SlotId) -> usize {
    2 * slot as usize
}

/// Reads a slot's value: the page offset of its tuple, or
/// [`EMPTY_SLOT`].
pub fn slot_value(page: &DbPage, slot: SlotId) -> u16 {
    debug_assert!(slot < num_slots(page), "slot {} out of range", slot);
    page.read_u16(slot_entry_offset(slot))
}

/// Writes a slot's value.
pub fn set_slot_value(page: &DbPage, slot: SlotId, value: u16) {
    debug_assert!(slot < num_slots(page), "slot {} out of range", slot);
    page.write_u16(slot_entry_offset(slot), value);
}

/// Offset just past the slot array.
pub fn slot_array_end(page: &DbPage) -> usize {
    2 * num_slots(page) as usize
}

/// Offset just past the tuple-data region (tuples grow downward from
/// here).
pub fn tuple_data_end(page: &DbPage) -> usize {
    offset_num_slots(page)
}

/// Offset of the lowest-addressed tuple byte, or the end of the
/// tuple-data region when the page holds no tuples.
pub fn tuple_data_start(page: &DbPage) -> usize {
    let end = tuple_data_end(page);
    let mut start = end;
    for slot in 0..num_slots(page) {
        let value = slot_value(page, slot) as usize;
        if value != EMPTY_SLOT as usize && value < start {
            start = value;
        }
    }
    start
}

/// Free bytes between the slot array and the tuple data.
pub fn free_space(page: &DbPage) -> usize {
    tuple_data_start(page) - slot_array_end(page)
}

/// Returns the next free page in the free-page list: 0 at the end of
/// the list, [`INVALID_PGNO`] when this page is not on the list.
pub fn free_next(page: &DbPage) -> u16 {
    page.read_u16(offset_free_next(page))
}

/// Sets this page's free-list successor.
pub fn set_free_next(page: &DbPage, page_no: u16) {
    page.write_u16(offset_free_next(page), page_no);
}

/// Length in bytes of the tuple stored in `slot`.
///
/// Tuples are stored contiguously, so a tuple extends from its own
/// offset to the smallest live slot offset greater than it (or the end
/// of the tuple-data region).
pub fn tuple_length(page: &DbPage, slot: SlotId) -> usize {
    let offset = slot_value(page, slot) as usize;
    debug_assert_ne!(offset, EMPTY_SLOT as usize);

    let mut next = tuple_data_end(page);
    for other in 0..num_slots(page) {
        let value = slot_value(page, other) as usize;
        if value != EMPTY_SLOT as usize && value > offset && value < next {
            next = value;
        }
    }
    next - offset
}

/// Allocates space for a new tuple of `len` bytes, reusing an empty
/// slot when one exists.  Returns the slot index; the tuple's offset is
/// readable through the slot.
///
/// The caller must have verified that the page has room.
pub fn alloc_new_tuple(page: &DbPage, len: usize) -> DbResult<SlotId> {
    let count = num_slots(page);

    let slot = (0..count).find(|&s| slot_value(page, s) == EMPTY_SLOT);
    let needed = if slot.is_some() { len } else { len + 2 };
    if free_space(page) < needed {
        return Err(DbError::illegal_state(format!(
            "page {} has no room for a {}-byte tuple",
            page.page_no(),
            len
        )));
    }

    let new_offset = tuple_data_start(page) - len;
    let slot = match slot {
        Some(slot) => slot,
        None => {
            set_num_slots(page, count + 1);
            count
        }
    };
    set_slot_value(page, slot, new_offset as u16);
    Ok(slot)
}

/// Deletes the tuple in `slot`: reclaims its bytes, empties the slot,
/// and trims trailing empty slots off the slot array.
pub fn delete_tuple(page: &DbPage, slot: SlotId) -> DbResult<()> {
    if slot >= num_slots(page) {
        return Err(DbError::illegal_state(format!(
            "slot {} out of range on page {}",
            slot,
            page.page_no()
        )));
    }
    let offset = slot_value(page, slot) as usize;
    if offset == EMPTY_SLOT as usize {
        return Err(DbError::illegal_state(format!(
            "slot {} on page {} is already empty",
            slot,
            page.page_no()
        )));
    }

    let len = tuple_length(page, slot);
    delete_tuple_data_range(page, offset, len);
    set_slot_value(page, slot, EMPTY_SLOT);

    // An entry is reclaimable iff no later slot is valid.
    let mut count = num_slots(page);
    while count > 0 && slot_value(page, count - 1) == EMPTY_SLOT {
        count -= 1;
    }
    set_num_slots(page, count);
    Ok(())
}

/// Removes `len` bytes at `offset` from the tuple-data region, sliding
/// all preceding tuple bytes toward the end of the page and adjusting
/// the slots that point into the moved range.
pub fn delete_tuple_data_range(page: &DbPage, offset: usize, len: usize) {
    let start = tuple_data_start(page);
    debug_assert!(offset >= start && offset + len <= tuple_data_end(page));

    page.copy_within(start..offset, start + len);

    for slot in 0..num_slots(page) {
        let value = slot_value(page, slot) as usize;
        if value != EMPTY_SLOT as usize && value < offset {
            set_slot_value(page, slot, (value + len) as u16);
        }
    }
}

/// Opens a gap of `len` bytes ending at `offset` in the tuple-data
/// region, sliding all preceding tuple bytes away from the end of the
/// page and adjusting the slots that point into the moved range.  The
/// gap occupies `[offset - len, offset)` afterward.
pub fn insert_tuple_data_range(page: &DbPage, offset: usize, len: usize) {
    let start = tuple_data_start(page);
    debug_assert!(offset >= start && offset <= tuple_data_end(page));
    debug_assert!(free_space(page) >= len);

    page.copy_within(start..offset, start - len);

    for slot in 0..num_slots(page) {
        let value = slot_value(page, slot) as usize;
        if value != EMPTY_SLOT as usize && value < offset {
            set_slot_value(page, slot, (value - len) as u16);
        }
    }
}

/// Validates the page's slot/tuple structure in debug builds.
pub fn sanity_check(page: &DbPage) {
    #[cfg(debug_assertions)]
    {
        let count = num_slots(page);
        let data_start = tuple_data_start(page);
        let data_end = tuple_data_end(page);
        assert!(slot_array_end(page) <= data_start);

        let mut extents: Vec<(usize, usize)> = Vec::new();
        for slot in 0..count {
            let value = slot_value(page, slot) as usize;
            if value == EMPTY_SLOT as usize {
                continue;
            }
            assert!(
                value >= data_start && value < data_end,
                "slot {} points outside the tuple-data region",
                slot
            );
            extents.push((value, value + tuple_length(page, slot)));
        }
        extents.sort_unstable();
        for pair in extents.windows(2) {
            assert!(
                pair[0].1 <= pair[1].0,
                "overlapping tuples at {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
        if count > 0 {
            assert_ne!(
                slot_value(page, count - 1),
                EMPTY_SLOT,
                "trailing empty slot was not reclaimed"
            );
        }
    }
    let _ = page;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{DbFileType, FileManager};
    use std::sync::Arc;
    use tempfile::TempDir;

    const PAGE_SIZE: usize = 512;

    fn test_page() -> (TempDir, DbPage) {
        let tmp = TempDir::new().unwrap();
        let fm = FileManager::new(tmp.path()).unwrap();
        let file = fm
            .create_file("d.tbl", DbFileType::HeapTupleFile, PAGE_SIZE)
            .unwrap();
        let page = DbPage::new(file, 1, vec![0u8; PAGE_SIZE].into_boxed_slice());
        init_new_page(&page);
        (tmp, page)
    }

    fn add_tuple(page: &DbPage, bytes: &[u8]) -> SlotId {
        let slot = alloc_new_tuple(page, bytes.len()).unwrap();
        let offset = slot_value(page, slot) as usize;
        page.write_bytes(offset, bytes);
        slot
    }

    fn tuple_bytes(page: &DbPage, slot: SlotId) -> Vec<u8> {
        let offset = slot_value(page, slot) as usize;
        let mut buf = vec![0u8; tuple_length(page, slot)];
        page.read_bytes(offset, &mut buf);
        buf
    }

    #[test]
    fn test_new_page_layout() {
        let (_tmp, page) = test_page();
        assert_eq!(num_slots(&page), 0);
        assert_eq!(free_next(&page), INVALID_PGNO);
        assert_eq!(tuple_data_start(&page), PAGE_SIZE - 4);
        assert_eq!(free_space(&page), PAGE_SIZE - 4);
    }

    #[test]
    fn test_alloc_grows_downward() {
        let (_tmp, page) = test_page();

        let s0 = add_tuple(&page, b"aaaa");
        let s1 = add_tuple(&page, b"bbbbbb");
        assert_eq!(s0, 0);
        assert_eq!(s1, 1);

        let end = tuple_data_end(&page);
        assert_eq!(slot_value(&page, s0) as usize, end - 4);
        assert_eq!(slot_value(&page, s1) as usize, end - 10);
        assert_eq!(tuple_length(&page, s0), 4);
        assert_eq!(tuple_length(&page, s1), 6);
        sanity_check(&page);
    }

    #[test]
    fn test_delete_compacts_and_preserves_others() {
        let (_tmp, page) = test_page();

        let s0 = add_tuple(&page, b"first");
        let s1 = add_tuple(&page, b"second");
        let s2 = add_tuple(&page, b"third");

        delete_tuple(&page, s1).unwrap();
        sanity_check(&page);

        // Surviving tuples keep their contents.
        assert_eq!(tuple_bytes(&page, s0), b"first");
        assert_eq!(tuple_bytes(&page, s2), b"third");
        // The reclaimed bytes rejoin the free space.
        assert_eq!(
            free_space(&page),
            PAGE_SIZE - 4 - "first".len() - "third".len() - 3 * 2
        );
    }

    #[test]
    fn test_trailing_empty_slots_reclaimed() {
        let (_tmp, page) = test_page();

        let s0 = add_tuple(&page, b"a");
        let s1 = add_tuple(&page, b"b");
        let s2 = add_tuple(&page, b"c");
        assert_eq!(num_slots(&page), 3);

        // Deleting the last slot trims it immediately.
        delete_tuple(&page, s2).unwrap();
        assert_eq!(num_slots(&page), 2);

        // Deleting an interior slot leaves it, since slot 1 follows...
        delete_tuple(&page, s0).unwrap();
        assert_eq!(num_slots(&page), 2);

        // ...but once the last live slot goes, the whole tail is trimmed.
        delete_tuple(&page, s1).unwrap();
        assert_eq!(num_slots(&page), 0);
    }

    #[test]
    fn test_empty_slot_reuse() {
        let (_tmp, page) = test_page();

        let s0 = add_tuple(&page, b"one");
        let _s1 = add_tuple(&page, b"two");
        delete_tuple(&page, s0).unwrap();

        let s_new = add_tuple(&page, b"three");
        assert_eq!(s_new, s0);
        assert_eq!(num_slots(&page), 2);
        assert_eq!(tuple_bytes(&page, s_new), b"three");
        sanity_check(&page);
    }

    #[test]
    fn test_insert_data_range_shifts_preceding() {
        let (_tmp, page) = test_page();

        let s0 = add_tuple(&page, b"XXXX");
        let s1 = add_tuple(&page, b"YYYY");
        let old_s0 = slot_value(&page, s0);
        let old_s1 = slot_value(&page, s1);

        // Open a 2-byte gap at the end of tuple 1's bytes.
        let gap_at = old_s1 as usize + 4;
        insert_tuple_data_range(&page, gap_at, 2);

        assert_eq!(slot_value(&page, s0), old_s0);
        assert_eq!(slot_value(&page, s1), old_s1 - 2);
        assert_eq!(tuple_bytes(&page, s1)[..4], *b"YYYY");
    }

    #[test]
    fn test_free_next_round_trip() {
        let (_tmp, page) = test_page();
        set_free_next(&page, 0);
        assert_eq!(free_next(&page), 0);
        set_free_next(&page, 7);
        assert_eq!(free_next(&page), 7);
        set_free_next(&page, INVALID_PGNO);
        assert_eq!(free_next(&page), INVALID_PGNO);
    }
}
