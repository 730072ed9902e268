pub mod preprocessing;
pub mod settings;
