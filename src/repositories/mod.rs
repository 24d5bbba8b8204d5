pub(crate) mod assignments;
pub(crate) mod lab_credentials;
