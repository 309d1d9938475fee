mod classification;
mod message;

pub use classification::{AccuracyProfile, Classification};
pub use message::{Conversation, Message, Side};
