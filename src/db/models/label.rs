//! Tags and ingredients: owned, named labels attached to recipes.
//!
//! Both collections share one table layout, so the queries are written
//! once against [`LabelKind`] and exposed through the [`Tags`] and
//! [`Ingredients`] repositories.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::BTreeSet;

use crate::db::{OwnedRepository, StoreError, ValidationErrors};

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Tag,
    Ingredient,
}

impl LabelKind {
    pub fn table(self) -> &'static str {
        match self {
            LabelKind::Tag => "tags",
            LabelKind::Ingredient => "ingredients",
        }
    }

    /// Join table linking recipes to this kind
    pub fn link_table(self) -> &'static str {
        match self {
            LabelKind::Tag => "recipe_tags",
            LabelKind::Ingredient => "recipe_ingredients",
        }
    }

    /// Column in the join table referencing this kind
    pub fn link_column(self) -> &'static str {
        match self {
            LabelKind::Tag => "tag_id",
            LabelKind::Ingredient => "ingredient_id",
        }
    }

    /// Field name used for this kind in recipe bodies
    pub fn field(self) -> &'static str {
        self.table()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Label {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelInput {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabelPatch {
    pub name: Option<String>,
}

impl From<LabelInput> for LabelPatch {
    fn from(input: LabelInput) -> Self {
        Self {
            name: Some(input.name),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabelFilter {
    pub assigned_only: Option<String>,
}

impl LabelFilter {
    /// `assigned_only` is on for any non-zero integer or `true`
    pub fn assigned_only(&self) -> bool {
        match self.assigned_only.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(v) => match v.parse::<i64>() {
                Ok(n) => n != 0,
                Err(_) => v.eq_ignore_ascii_case("true"),
            },
        }
    }
}

fn validate_name(name: &str, errors: &mut ValidationErrors) {
    if name.trim().is_empty() {
        errors.add("name", "This field may not be blank.");
    } else if name.trim().chars().count() > MAX_NAME_LEN {
        errors.add("name", "Ensure this field has no more than 255 characters.");
    }
}

async fn list(
    db: &SqlitePool,
    kind: LabelKind,
    owner_id: i64,
    filter: &LabelFilter,
) -> Result<Vec<Label>, StoreError> {
    let assigned_only = filter.assigned_only();
    let sql = if assigned_only {
        format!(
            r#"
            SELECT DISTINCT l.id, l.name
            FROM {table} l
            JOIN {link} rl ON rl.{column} = l.id
            JOIN recipes r ON r.id = rl.recipe_id
            WHERE l.user_id = ? AND r.user_id = ?
            ORDER BY l.name DESC, l.id DESC
            "#,
            table = kind.table(),
            link = kind.link_table(),
            column = kind.link_column(),
        )
    } else {
        format!(
            "SELECT id, name FROM {} WHERE user_id = ? ORDER BY name DESC, id DESC",
            kind.table()
        )
    };

    let mut query = sqlx::query_as::<_, Label>(&sql).bind(owner_id);
    if assigned_only {
        query = query.bind(owner_id);
    }
    Ok(query.fetch_all(db).await?)
}

async fn get(
    db: &SqlitePool,
    kind: LabelKind,
    owner_id: i64,
    id: i64,
) -> Result<Option<Label>, StoreError> {
    let sql = format!(
        "SELECT id, name FROM {} WHERE id = ? AND user_id = ?",
        kind.table()
    );
    let label = sqlx::query_as::<_, Label>(&sql)
        .bind(id)
        .bind(owner_id)
        .fetch_optional(db)
        .await?;
    Ok(label)
}

async fn create(
    db: &SqlitePool,
    kind: LabelKind,
    owner_id: i64,
    input: LabelInput,
) -> Result<Label, StoreError> {
    let mut errors = ValidationErrors::new();
    validate_name(&input.name, &mut errors);
    errors.finish()?;

    let sql = format!(
        "INSERT INTO {} (user_id, name) VALUES (?, ?) RETURNING id, name",
        kind.table()
    );
    let label = sqlx::query_as::<_, Label>(&sql)
        .bind(owner_id)
        .bind(input.name.trim())
        .fetch_one(db)
        .await?;

    tracing::info!(kind = kind.table(), id = label.id, owner_id, "Label created");
    Ok(label)
}

async fn update(
    db: &SqlitePool,
    kind: LabelKind,
    owner_id: i64,
    id: i64,
    patch: LabelPatch,
) -> Result<Option<Label>, StoreError> {
    if get(db, kind, owner_id, id).await?.is_none() {
        return Ok(None);
    }

    let mut errors = ValidationErrors::new();
    if let Some(ref name) = patch.name {
        validate_name(name, &mut errors);
    }
    errors.finish()?;

    let sql = format!(
        "UPDATE {} SET name = COALESCE(?, name) WHERE id = ? AND user_id = ? RETURNING id, name",
        kind.table()
    );
    let label = sqlx::query_as::<_, Label>(&sql)
        .bind(patch.name.as_deref().map(str::trim))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(db)
        .await?;
    Ok(label)
}

async fn delete(
    db: &SqlitePool,
    kind: LabelKind,
    owner_id: i64,
    id: i64,
) -> Result<bool, StoreError> {
    let sql = format!("DELETE FROM {} WHERE id = ? AND user_id = ?", kind.table());
    let result = sqlx::query(&sql)
        .bind(id)
        .bind(owner_id)
        .execute(db)
        .await?;

    if result.rows_affected() > 0 {
        tracing::info!(kind = kind.table(), id, owner_id, "Label deleted");
    }
    Ok(result.rows_affected() > 0)
}

/// Return the ids in `ids` that do not name a label of this kind owned by `owner_id`.
///
/// Runs on a connection so recipe writes can check inside their transaction.
pub async fn missing_ids(
    conn: &mut SqliteConnection,
    kind: LabelKind,
    owner_id: i64,
    ids: &BTreeSet<i64>,
) -> Result<Vec<i64>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT id FROM {} WHERE user_id = ",
        kind.table()
    ));
    query.push_bind(owner_id);
    query.push(" AND id IN (");
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    let found: BTreeSet<i64> = query
        .build_query_scalar::<i64>()
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .collect();

    Ok(ids.difference(&found).copied().collect())
}

/// Labels of one kind linked to a recipe, ordered by id
pub async fn for_recipe(
    db: &SqlitePool,
    kind: LabelKind,
    recipe_id: i64,
) -> Result<Vec<Label>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT l.id, l.name
        FROM {table} l
        JOIN {link} rl ON rl.{column} = l.id
        WHERE rl.recipe_id = ?
        ORDER BY l.id
        "#,
        table = kind.table(),
        link = kind.link_table(),
        column = kind.link_column(),
    );
    sqlx::query_as(&sql).bind(recipe_id).fetch_all(db).await
}

/// Tag repository
pub struct Tags;

/// Ingredient repository
pub struct Ingredients;

macro_rules! label_repository {
    ($repo:ty, $kind:expr, $resource:literal) => {
        #[async_trait]
        impl OwnedRepository for $repo {
            const RESOURCE: &'static str = $resource;

            type Summary = Label;
            type Detail = Label;
            type Create = LabelInput;
            type Patch = LabelPatch;
            type Filter = LabelFilter;

            fn validate_create(input: &LabelInput) -> Result<(), StoreError> {
                let mut errors = ValidationErrors::new();
                validate_name(&input.name, &mut errors);
                errors.finish()
            }

            async fn list_for_owner(
                db: &SqlitePool,
                owner_id: i64,
                filter: &LabelFilter,
            ) -> Result<Vec<Label>, StoreError> {
                list(db, $kind, owner_id, filter).await
            }

            async fn get_for_owner(
                db: &SqlitePool,
                owner_id: i64,
                id: i64,
            ) -> Result<Option<Label>, StoreError> {
                get(db, $kind, owner_id, id).await
            }

            async fn create(
                db: &SqlitePool,
                owner_id: i64,
                input: LabelInput,
            ) -> Result<Label, StoreError> {
                create(db, $kind, owner_id, input).await
            }

            async fn update(
                db: &SqlitePool,
                owner_id: i64,
                id: i64,
                patch: LabelPatch,
            ) -> Result<Option<Label>, StoreError> {
                update(db, $kind, owner_id, id, patch).await
            }

            async fn delete(db: &SqlitePool, owner_id: i64, id: i64) -> Result<bool, StoreError> {
                delete(db, $kind, owner_id, id).await
            }
        }
    };
}

label_repository!(Tags, LabelKind::Tag, "tag");
label_repository!(Ingredients, LabelKind::Ingredient, "ingredient");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_in_memory, NewUser, User};

    async fn setup() -> (SqlitePool, i64, i64) {
        let db = init_in_memory().await.unwrap();
        let mut ids = Vec::new();
        for email in ["one@example.com", "two@example.com"] {
            let user = User::create(
                &db,
                &NewUser {
                    email: email.to_string(),
                    password_hash: "x".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
            ids.push(user.id);
        }
        (db, ids[0], ids[1])
    }

    fn input(name: &str) -> LabelInput {
        LabelInput {
            name: name.to_string(),
        }
    }

    #[test]
    fn test_assigned_only_parsing() {
        let filter = |v: Option<&str>| LabelFilter {
            assigned_only: v.map(str::to_string),
        };
        assert!(!filter(None).assigned_only());
        assert!(!filter(Some("")).assigned_only());
        assert!(!filter(Some("0")).assigned_only());
        assert!(!filter(Some("false")).assigned_only());
        assert!(filter(Some("1")).assigned_only());
        assert!(filter(Some("2")).assigned_only());
        assert!(filter(Some("true")).assigned_only());
    }

    #[test]
    fn test_validate_create_rejects_blank_name() {
        assert!(Tags::validate_create(&input("  ")).is_err());
        assert!(Tags::validate_create(&input(&"x".repeat(256))).is_err());
        assert!(Tags::validate_create(&input("Vegan")).is_ok());
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_ordered_by_name_desc() {
        let (db, alice, bob) = setup().await;
        Tags::create(&db, alice, input("Breakfast")).await.unwrap();
        Tags::create(&db, alice, input("Vegan")).await.unwrap();
        Tags::create(&db, alice, input("Dessert")).await.unwrap();
        Tags::create(&db, bob, input("Fruity")).await.unwrap();

        let names: Vec<String> = Tags::list_for_owner(&db, alice, &LabelFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["Vegan", "Dessert", "Breakfast"]);

        let bob_tags = Tags::list_for_owner(&db, bob, &LabelFilter::default())
            .await
            .unwrap();
        assert_eq!(bob_tags.len(), 1);
    }

    #[tokio::test]
    async fn test_tags_and_ingredients_are_separate_collections() {
        let (db, alice, _) = setup().await;
        Tags::create(&db, alice, input("Vegan")).await.unwrap();
        Ingredients::create(&db, alice, input("Kale")).await.unwrap();

        let tags = Tags::list_for_owner(&db, alice, &LabelFilter::default()).await.unwrap();
        let ingredients = Ingredients::list_for_owner(&db, alice, &LabelFilter::default())
            .await
            .unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "Vegan");
        assert_eq!(ingredients.len(), 1);
        assert_eq!(ingredients[0].name, "Kale");
    }

    #[tokio::test]
    async fn test_other_owner_cannot_read_update_or_delete() {
        let (db, alice, bob) = setup().await;
        let tag = Tags::create(&db, alice, input("Vegan")).await.unwrap();

        assert!(Tags::get_for_owner(&db, bob, tag.id).await.unwrap().is_none());
        assert!(Tags::update(&db, bob, tag.id, LabelPatch { name: Some("Mine".into()) })
            .await
            .unwrap()
            .is_none());
        assert!(!Tags::delete(&db, bob, tag.id).await.unwrap());

        let still_there = Tags::get_for_owner(&db, alice, tag.id).await.unwrap().unwrap();
        assert_eq!(still_there.name, "Vegan");
        assert!(Tags::delete(&db, alice, tag.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_trims_and_validates() {
        let (db, alice, _) = setup().await;
        let tag = Tags::create(&db, alice, input(" Vegan ")).await.unwrap();
        assert_eq!(tag.name, "Vegan");

        let err = Tags::update(&db, alice, tag.id, LabelPatch { name: Some("".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let unchanged = Tags::update(&db, alice, tag.id, LabelPatch::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unchanged.name, "Vegan");
    }

    #[tokio::test]
    async fn test_missing_ids_only_counts_owned_rows() {
        let (db, alice, bob) = setup().await;
        let mine = Tags::create(&db, alice, input("Vegan")).await.unwrap();
        let theirs = Tags::create(&db, bob, input("Spicy")).await.unwrap();

        let mut conn = db.acquire().await.unwrap();
        let wanted: BTreeSet<i64> = [mine.id, theirs.id, 9999].into_iter().collect();
        let missing = missing_ids(&mut conn, LabelKind::Tag, alice, &wanted).await.unwrap();

        assert_eq!(missing, vec![theirs.id, 9999]);
    }
}
