pub mod analysis;
pub mod dedup;
pub mod line_event;
pub mod notion;
pub mod service;
pub mod verify;
pub mod vocabulary;
