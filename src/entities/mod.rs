pub mod linked_account;
pub mod oauth_state;
