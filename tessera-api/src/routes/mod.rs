pub mod sessions;
pub mod verify;
