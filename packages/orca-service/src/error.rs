pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Rebuild task {task_id} is already active.")]
	DuplicateTask { task_id: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Repository error: {message}")]
	Repository { message: String },
	#[error("Index error: {message}")]
	Index { message: String },
	#[error("Search error: {message}")]
	Search { message: String },
}
