pub(crate) mod credentials;
pub(crate) mod errors;
pub(crate) mod guards;
pub(crate) mod handlers;
pub(crate) mod orchestrations;
pub(crate) mod router;
