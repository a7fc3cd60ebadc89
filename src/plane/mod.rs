pub(crate) mod aligned;
pub(crate) mod frame;
pub(crate) mod view;
