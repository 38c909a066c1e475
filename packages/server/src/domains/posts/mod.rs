pub mod models;
pub mod store;

pub use models::{
    ClaimAction, ClaimOutcome, LifecycleError, NewPost, NewRevision, Post, PostError,
    PostErrorCode, PostRevision, PostStatus, PostedEmbedding, PublishRecord, StatusChange,
};
pub use store::PostStore;
