pub mod history;
pub mod render;
