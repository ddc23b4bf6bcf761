pub mod accounts;
pub mod executor;
pub mod playlist;
pub mod refresh;
