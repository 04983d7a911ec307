pub mod health_handlers;
pub mod ui_handlers;
