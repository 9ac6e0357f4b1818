use crate::common::config::PageId;
use std::fmt;

/// Record identifier: the physical address of a tuple, expressed as the page
/// it lives on and its slot number within that page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rid {
    page_id: PageId,
    slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }

    pub fn get_page_id(&self) -> PageId {
        self.page_id
    }

    pub fn get_slot_num(&self) -> u32 {
        self.slot_num
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_accessors() {
        let rid = Rid::new(7, 3);
        assert_eq!(rid.get_page_id(), 7);
        assert_eq!(rid.get_slot_num(), 3);
        assert_eq!(format!("{rid}"), "(7, 3)");
    }

    #[test]
    fn test_rid_equality() {
        assert_eq!(Rid::new(1, 2), Rid::new(1, 2));
        assert_ne!(Rid::new(1, 2), Rid::new(1, 3));
        assert_ne!(Rid::new(1, 2), Rid::new(2, 2));
    }
}
