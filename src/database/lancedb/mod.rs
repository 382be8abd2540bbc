// LanceDB vector database module
// Document storage and cosine similarity search

pub mod vector_store;

pub use vector_store::LanceDocumentStore;
