pub(crate) mod executor;
pub(crate) mod jobs;
pub(crate) mod marks;
pub(crate) mod model;
pub(crate) mod paths;
pub(crate) mod reports;
pub(crate) mod test_result;
pub(crate) mod trigger;
