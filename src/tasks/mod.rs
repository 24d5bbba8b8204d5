pub(crate) mod activities;
pub(crate) mod orchestrations;
pub(crate) mod scheduler;
