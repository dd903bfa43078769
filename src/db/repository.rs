//! The ownable-collection seam shared by tags, ingredients and recipes.
//!
//! Every operation takes the owner's id explicitly and applies the
//! `user_id = owner` predicate in SQL, so a row owned by someone else is
//! indistinguishable from a missing one.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use super::{DbPool, StoreError};

#[async_trait]
pub trait OwnedRepository: Send + Sync + 'static {
    /// Singular resource name used in logs and not-found messages
    const RESOURCE: &'static str;

    /// Representation returned by list, create and update
    type Summary: Serialize + Send;
    /// Representation returned by retrieve
    type Detail: Serialize + Send;
    /// Body accepted by create and full update
    type Create: DeserializeOwned + Send;
    /// Body accepted by partial update
    type Patch: DeserializeOwned + From<Self::Create> + Send;
    /// Query string accepted by list
    type Filter: DeserializeOwned + Send + Sync;

    /// Check the fields a full write requires, without touching the store
    fn validate_create(input: &Self::Create) -> Result<(), StoreError>;

    async fn list_for_owner(
        db: &DbPool,
        owner_id: i64,
        filter: &Self::Filter,
    ) -> Result<Vec<Self::Summary>, StoreError>;

    async fn get_for_owner(
        db: &DbPool,
        owner_id: i64,
        id: i64,
    ) -> Result<Option<Self::Detail>, StoreError>;

    async fn create(
        db: &DbPool,
        owner_id: i64,
        input: Self::Create,
    ) -> Result<Self::Summary, StoreError>;

    /// Returns None when no row with this id belongs to the owner
    async fn update(
        db: &DbPool,
        owner_id: i64,
        id: i64,
        patch: Self::Patch,
    ) -> Result<Option<Self::Summary>, StoreError>;

    /// Returns false when no row with this id belongs to the owner
    async fn delete(db: &DbPool, owner_id: i64, id: i64) -> Result<bool, StoreError>;
}
