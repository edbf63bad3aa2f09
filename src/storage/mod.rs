mod file_desc;
pub mod page;

pub use file_desc::FileDescCache;
pub use page::{page_state, set_page_state, PageState};
