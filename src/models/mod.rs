pub mod delivery;
pub mod event;
pub mod status_update;
