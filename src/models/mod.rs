pub mod email;
pub mod health;
pub mod message;
pub mod notification;
pub mod retry;
pub mod task;
pub mod validation;
