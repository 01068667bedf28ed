mod app;
pub mod session;

// for main.rs
pub use app::run;
