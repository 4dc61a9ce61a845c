pub mod chat;
pub mod health;
pub mod identity;
pub mod threads;
