pub mod category;
pub mod content;
pub mod uploads;
pub mod vote;
