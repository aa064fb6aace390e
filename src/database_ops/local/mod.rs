pub mod provider;

pub use provider::LocalFolderProvider;
