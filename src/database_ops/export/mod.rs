pub mod provider;

pub use provider::ExportFileProvider;
