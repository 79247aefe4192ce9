pub mod daemon;
pub mod history;
pub mod repo;
pub mod status;
pub mod toggle;
