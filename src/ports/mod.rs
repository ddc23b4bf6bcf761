pub mod apple;
pub mod http;
