pub mod crypto;
pub mod embeddings;
pub mod similarity;

pub use crypto::CredentialCipher;
pub use embeddings::OpenAiEmbeddings;
pub use similarity::cosine_similarity;
