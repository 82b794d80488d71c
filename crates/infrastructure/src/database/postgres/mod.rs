pub mod client_repository;
pub mod document_repository;
pub mod progress_repository;
pub mod task_repository;

pub use client_repository::PostgresClientRepository;
pub use document_repository::PostgresDocumentRepository;
pub use progress_repository::PostgresProgressRepository;
pub use task_repository::PostgresTaskRepository;
