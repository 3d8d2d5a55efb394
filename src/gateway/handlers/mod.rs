pub(crate) mod health;
pub(crate) mod notify;
pub(crate) mod test;
pub(crate) mod webhook;
