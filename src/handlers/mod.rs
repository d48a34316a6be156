pub mod public;
pub mod v1;
pub mod webhooks;
