mod store;

pub use store::{LibraryError, LibraryEvent, LibraryStore, StatusUpdate};
