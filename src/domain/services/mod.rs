mod server_directory;

pub use server_directory::{DirectorySnapshot, MergeSummary, ServerDirectory};
