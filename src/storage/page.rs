//! Page state byte shared by every kind of page.

/// Offset of the state byte within a page
pub const PAGE_STATE_OFFSET: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageState {
    Normal = 0,
    Dirty = 1,
}

impl PageState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PageState::Dirty,
            _ => PageState::Normal,
        }
    }
}

pub fn page_state(page: &[u8]) -> PageState {
    PageState::from_u8(page[PAGE_STATE_OFFSET])
}

pub fn set_page_state(page: &mut [u8], state: PageState) {
    page[PAGE_STATE_OFFSET] = state as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_byte() {
        let mut page = [0u8; 16];
        assert_eq!(page_state(&page), PageState::Normal);
        set_page_state(&mut page, PageState::Dirty);
        assert_eq!(page[PAGE_STATE_OFFSET], 1);
        assert_eq!(page_state(&page), PageState::Dirty);
    }
}
