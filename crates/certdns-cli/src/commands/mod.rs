pub mod args;
pub mod cleanup;
pub mod issue;
pub mod login;

pub use cleanup::CleanupCommand;
pub use issue::IssueCommand;
pub use login::LoginCommand;
