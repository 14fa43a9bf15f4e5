use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error(transparent)]
    Store(#[from] praxis_store::StoreError),
    #[error(transparent)]
    Vector(#[from] praxis_store::VectorError),
}
