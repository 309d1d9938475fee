pub mod analysis;
pub mod chat;
pub mod color;
pub mod events;
pub mod review;
