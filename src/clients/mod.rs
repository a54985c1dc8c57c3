pub mod broker;
pub mod email;
pub mod health;
pub mod rbmq;
pub mod task_api;
