pub mod chat_service;
pub mod exchange;
pub mod segment_service;
