mod git;
mod traits;

pub use git::GitRepositories;
pub use traits::CommitHistoryAdapter;
