pub(crate) mod email;
pub(crate) mod entity_store;
pub(crate) mod grader;
pub(crate) mod spreadsheet;
pub(crate) mod storage;
