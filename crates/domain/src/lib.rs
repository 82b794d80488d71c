//! Core domain model for the download dispatcher: clients, tasks,
//! documents and their repository abstractions. Nothing in this crate
//! talks to the network or holds connections.

pub mod classification;
pub mod entities;
pub mod repositories;
pub mod search_params;

pub use classification::{classify, Classification};
pub use entities::{
    ClassificationSource, ClientStatus, Document, DocumentProgress, DownloadClient, DownloadTask,
    ProgressStatus, TaskStatus,
};
pub use search_params::SearchParams;
