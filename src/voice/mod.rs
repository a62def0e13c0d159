pub mod cooldown;
pub mod dispatch;
pub mod engine;
pub mod platform;
pub mod transition;
