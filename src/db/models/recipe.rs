//! Recipe models and the recipe repository.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap};

use super::label::{self, Label, LabelKind};
use crate::db::{OwnedRepository, StoreError, ValidationErrors};

/// Recipe writes check references before writing, so they take the write
/// lock when the transaction opens.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

const MAX_TITLE_LEN: usize = 255;
const MAX_LINK_LEN: usize = 255;
const MAX_PRICE: f64 = 1000.0;

#[derive(Debug, Clone, FromRow)]
struct RecipeRow {
    id: i64,
    title: String,
    time_minutes: i64,
    price: f64,
    link: String,
    image: Option<String>,
}

/// Recipe with tag and ingredient ids, returned by list/create/update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: i64,
    pub title: String,
    pub time_minutes: i64,
    pub price: f64,
    pub link: String,
    pub tags: Vec<i64>,
    pub ingredients: Vec<i64>,
    pub image: Option<String>,
}

/// Recipe with nested tags and ingredients, returned by retrieve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDetail {
    pub id: i64,
    pub title: String,
    pub time_minutes: i64,
    pub price: f64,
    pub link: String,
    pub tags: Vec<Label>,
    pub ingredients: Vec<Label>,
    pub image: Option<String>,
}

/// Image attached to a recipe, as stored and as returned by upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RecipeImage {
    pub id: i64,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipeInput {
    #[serde(default)]
    pub title: String,
    pub time_minutes: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_price")]
    pub price: Option<f64>,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub tags: Vec<i64>,
    #[serde(default)]
    pub ingredients: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipePatch {
    pub title: Option<String>,
    pub time_minutes: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_price")]
    pub price: Option<f64>,
    pub link: Option<String>,
    pub tags: Option<Vec<i64>>,
    pub ingredients: Option<Vec<i64>>,
}

impl From<RecipeInput> for RecipePatch {
    fn from(input: RecipeInput) -> Self {
        Self {
            title: Some(input.title),
            time_minutes: input.time_minutes,
            price: input.price,
            link: Some(input.link),
            tags: Some(input.tags),
            ingredients: Some(input.ingredients),
        }
    }
}

/// Prices arrive either as JSON numbers or as decimal strings like "5.50"
fn deserialize_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserializer.deserialize_any(PriceVisitor)
}

struct PriceVisitor;

impl<'de> serde::de::Visitor<'de> for PriceVisitor {
    type Value = Option<f64>;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a number")
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| E::custom("A valid number is required."))
    }
}

/// List filters: comma-separated tag or ingredient ids
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipeFilter {
    pub tags: Option<String>,
    pub ingredients: Option<String>,
}

fn parse_id_list(field: &str, raw: Option<&str>) -> Result<Option<BTreeSet<i64>>, StoreError> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(raw) => raw,
    };

    raw.split(',')
        .map(|part| {
            part.trim().parse::<i64>().map_err(|_| {
                StoreError::field(field, format!("\"{}\" is not a valid id.", part.trim()))
            })
        })
        .collect::<Result<BTreeSet<_>, _>>()
        .map(Some)
}

fn validate_title(title: &str, errors: &mut ValidationErrors) {
    if title.trim().is_empty() {
        errors.add("title", "This field may not be blank.");
    } else if title.trim().chars().count() > MAX_TITLE_LEN {
        errors.add("title", "Ensure this field has no more than 255 characters.");
    }
}

fn validate_time_minutes(time_minutes: i64, errors: &mut ValidationErrors) {
    if time_minutes < 0 {
        errors.add("time_minutes", "Ensure this value is greater than or equal to 0.");
    }
}

fn validate_price(price: f64, errors: &mut ValidationErrors) {
    if !price.is_finite() || price < 0.0 {
        errors.add("price", "Ensure this value is greater than or equal to 0.");
    } else if price >= MAX_PRICE {
        errors.add("price", "Ensure that there are no more than 5 digits in total.");
    } else if ((price * 100.0).round() - price * 100.0).abs() > 1e-6 {
        errors.add("price", "Ensure that there are no more than 2 decimal places.");
    }
}

fn validate_link(link: &str, errors: &mut ValidationErrors) {
    if link.chars().count() > MAX_LINK_LEN {
        errors.add("link", "Ensure this field has no more than 255 characters.");
    }
}

fn validate_patch(patch: &RecipePatch) -> Result<(), StoreError> {
    let mut errors = ValidationErrors::new();
    if let Some(ref title) = patch.title {
        validate_title(title, &mut errors);
    }
    if let Some(time_minutes) = patch.time_minutes {
        validate_time_minutes(time_minutes, &mut errors);
    }
    if let Some(price) = patch.price {
        validate_price(price, &mut errors);
    }
    if let Some(ref link) = patch.link {
        validate_link(link, &mut errors);
    }
    errors.finish()
}

fn round_price(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}

/// Reject references to labels the owner does not have
async fn check_references(
    conn: &mut SqliteConnection,
    owner_id: i64,
    tags: Option<&BTreeSet<i64>>,
    ingredients: Option<&BTreeSet<i64>>,
) -> Result<(), StoreError> {
    let mut errors = ValidationErrors::new();
    for (kind, ids) in [(LabelKind::Tag, tags), (LabelKind::Ingredient, ingredients)] {
        let Some(ids) = ids else { continue };
        for id in label::missing_ids(&mut *conn, kind, owner_id, ids).await? {
            errors.add(
                kind.field(),
                format!("Invalid pk \"{}\" - object does not exist.", id),
            );
        }
    }
    errors.finish()
}

async fn replace_links(
    conn: &mut SqliteConnection,
    kind: LabelKind,
    recipe_id: i64,
    ids: &BTreeSet<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!("DELETE FROM {} WHERE recipe_id = ?", kind.link_table()))
        .bind(recipe_id)
        .execute(&mut *conn)
        .await?;

    if ids.is_empty() {
        return Ok(());
    }

    let mut insert: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "INSERT INTO {} (recipe_id, {}) ",
        kind.link_table(),
        kind.link_column()
    ));
    insert.push_values(ids, |mut row, id| {
        row.push_bind(recipe_id).push_bind(*id);
    });
    insert.build().execute(&mut *conn).await?;
    Ok(())
}

/// Linked label ids of one kind for every recipe the owner has
async fn link_map(
    db: &SqlitePool,
    kind: LabelKind,
    owner_id: i64,
) -> Result<HashMap<i64, Vec<i64>>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT rl.recipe_id, rl.{column}
        FROM {link} rl
        JOIN recipes r ON r.id = rl.recipe_id
        WHERE r.user_id = ?
        ORDER BY rl.{column}
        "#,
        link = kind.link_table(),
        column = kind.link_column(),
    );
    let pairs: Vec<(i64, i64)> = sqlx::query_as(&sql).bind(owner_id).fetch_all(db).await?;

    let mut map: HashMap<i64, Vec<i64>> = HashMap::new();
    for (recipe_id, label_id) in pairs {
        map.entry(recipe_id).or_default().push(label_id);
    }
    Ok(map)
}

async fn linked_ids(
    db: &SqlitePool,
    kind: LabelKind,
    recipe_id: i64,
) -> Result<Vec<i64>, sqlx::Error> {
    let sql = format!(
        "SELECT {column} FROM {link} WHERE recipe_id = ? ORDER BY {column}",
        link = kind.link_table(),
        column = kind.link_column(),
    );
    sqlx::query_scalar(&sql).bind(recipe_id).fetch_all(db).await
}

async fn fetch_row(
    db: &SqlitePool,
    owner_id: i64,
    id: i64,
) -> Result<Option<RecipeRow>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, title, time_minutes, price, link, image FROM recipes WHERE id = ? AND user_id = ?",
    )
    .bind(id)
    .bind(owner_id)
    .fetch_optional(db)
    .await
}

impl Recipe {
    fn from_row(row: RecipeRow, tags: Vec<i64>, ingredients: Vec<i64>) -> Self {
        Self {
            id: row.id,
            title: row.title,
            time_minutes: row.time_minutes,
            price: row.price,
            link: row.link,
            tags,
            ingredients,
            image: row.image,
        }
    }
}

/// Recipe repository
pub struct Recipes;

impl Recipes {
    /// Summary view of a single owned recipe
    pub async fn summary(
        db: &SqlitePool,
        owner_id: i64,
        id: i64,
    ) -> Result<Option<Recipe>, StoreError> {
        let Some(row) = fetch_row(db, owner_id, id).await? else {
            return Ok(None);
        };
        let tags = linked_ids(db, LabelKind::Tag, id).await?;
        let ingredients = linked_ids(db, LabelKind::Ingredient, id).await?;
        Ok(Some(Recipe::from_row(row, tags, ingredients)))
    }

    pub async fn find_image(
        db: &SqlitePool,
        owner_id: i64,
        id: i64,
    ) -> Result<Option<RecipeImage>, StoreError> {
        let image = sqlx::query_as("SELECT id, image FROM recipes WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(db)
            .await?;
        Ok(image)
    }

    /// Point an owned recipe at a new image path
    pub async fn set_image(
        db: &SqlitePool,
        owner_id: i64,
        id: i64,
        image: &str,
    ) -> Result<Option<RecipeImage>, StoreError> {
        let updated = sqlx::query_as(
            r#"
            UPDATE recipes SET image = ?, updated_at = datetime('now')
            WHERE id = ? AND user_id = ?
            RETURNING id, image
            "#,
        )
        .bind(image)
        .bind(id)
        .bind(owner_id)
        .fetch_optional(db)
        .await?;
        Ok(updated)
    }
}

#[async_trait]
impl OwnedRepository for Recipes {
    const RESOURCE: &'static str = "recipe";

    type Summary = Recipe;
    type Detail = RecipeDetail;
    type Create = RecipeInput;
    type Patch = RecipePatch;
    type Filter = RecipeFilter;

    fn validate_create(input: &RecipeInput) -> Result<(), StoreError> {
        let mut errors = ValidationErrors::new();
        validate_title(&input.title, &mut errors);
        match input.time_minutes {
            Some(time_minutes) => validate_time_minutes(time_minutes, &mut errors),
            None => {
                errors.add("time_minutes", "This field is required.");
            }
        }
        match input.price {
            Some(price) => validate_price(price, &mut errors),
            None => {
                errors.add("price", "This field is required.");
            }
        }
        validate_link(&input.link, &mut errors);
        errors.finish()
    }

    async fn list_for_owner(
        db: &SqlitePool,
        owner_id: i64,
        filter: &RecipeFilter,
    ) -> Result<Vec<Recipe>, StoreError> {
        let tag_ids = parse_id_list("tags", filter.tags.as_deref())?;
        let ingredient_ids = parse_id_list("ingredients", filter.ingredients.as_deref())?;

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, title, time_minutes, price, link, image FROM recipes WHERE user_id = ",
        );
        query.push_bind(owner_id);

        for (kind, ids) in [
            (LabelKind::Tag, tag_ids),
            (LabelKind::Ingredient, ingredient_ids),
        ] {
            let Some(ids) = ids else { continue };
            query.push(format!(
                " AND id IN (SELECT recipe_id FROM {} WHERE {} IN (",
                kind.link_table(),
                kind.link_column()
            ));
            let mut separated = query.separated(", ");
            for id in ids {
                separated.push_bind(id);
            }
            separated.push_unseparated("))");
        }
        query.push(" ORDER BY title DESC, id DESC");

        let rows: Vec<RecipeRow> = query.build_query_as().fetch_all(db).await?;
        let mut tags = link_map(db, LabelKind::Tag, owner_id).await?;
        let mut ingredients = link_map(db, LabelKind::Ingredient, owner_id).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let tag_ids = tags.remove(&row.id).unwrap_or_default();
                let ingredient_ids = ingredients.remove(&row.id).unwrap_or_default();
                Recipe::from_row(row, tag_ids, ingredient_ids)
            })
            .collect())
    }

    async fn get_for_owner(
        db: &SqlitePool,
        owner_id: i64,
        id: i64,
    ) -> Result<Option<RecipeDetail>, StoreError> {
        let Some(row) = fetch_row(db, owner_id, id).await? else {
            return Ok(None);
        };
        let tags = label::for_recipe(db, LabelKind::Tag, id).await?;
        let ingredients = label::for_recipe(db, LabelKind::Ingredient, id).await?;

        Ok(Some(RecipeDetail {
            id: row.id,
            title: row.title,
            time_minutes: row.time_minutes,
            price: row.price,
            link: row.link,
            tags,
            ingredients,
            image: row.image,
        }))
    }

    async fn create(
        db: &SqlitePool,
        owner_id: i64,
        input: RecipeInput,
    ) -> Result<Recipe, StoreError> {
        Self::validate_create(&input)?;
        let tags: BTreeSet<i64> = input.tags.iter().copied().collect();
        let ingredients: BTreeSet<i64> = input.ingredients.iter().copied().collect();

        let mut tx = db.begin_with(BEGIN_WRITE).await?;
        check_references(&mut tx, owner_id, Some(&tags), Some(&ingredients)).await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO recipes (user_id, title, time_minutes, price, link)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(owner_id)
        .bind(input.title.trim())
        .bind(input.time_minutes.unwrap_or_default())
        .bind(round_price(input.price.unwrap_or_default()))
        .bind(input.link.trim())
        .fetch_one(&mut *tx)
        .await?;

        replace_links(&mut tx, LabelKind::Tag, id, &tags).await?;
        replace_links(&mut tx, LabelKind::Ingredient, id, &ingredients).await?;
        tx.commit().await?;

        tracing::info!(recipe_id = id, owner_id, "Recipe created");

        Self::summary(db, owner_id, id)
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    async fn update(
        db: &SqlitePool,
        owner_id: i64,
        id: i64,
        patch: RecipePatch,
    ) -> Result<Option<Recipe>, StoreError> {
        let mut tx = db.begin_with(BEGIN_WRITE).await?;

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM recipes WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(owner_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Ok(None);
        }

        validate_patch(&patch)?;
        let tags: Option<BTreeSet<i64>> = patch.tags.map(|ids| ids.into_iter().collect());
        let ingredients: Option<BTreeSet<i64>> =
            patch.ingredients.map(|ids| ids.into_iter().collect());
        check_references(&mut tx, owner_id, tags.as_ref(), ingredients.as_ref()).await?;

        sqlx::query(
            r#"
            UPDATE recipes SET
                title = COALESCE(?, title),
                time_minutes = COALESCE(?, time_minutes),
                price = COALESCE(?, price),
                link = COALESCE(?, link),
                updated_at = datetime('now')
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(patch.title.as_deref().map(str::trim))
        .bind(patch.time_minutes)
        .bind(patch.price.map(round_price))
        .bind(patch.link.as_deref().map(str::trim))
        .bind(id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

        if let Some(ref tags) = tags {
            replace_links(&mut tx, LabelKind::Tag, id, tags).await?;
        }
        if let Some(ref ingredients) = ingredients {
            replace_links(&mut tx, LabelKind::Ingredient, id, ingredients).await?;
        }
        tx.commit().await?;

        tracing::info!(recipe_id = id, owner_id, "Recipe updated");
        Self::summary(db, owner_id, id).await
    }

    async fn delete(db: &SqlitePool, owner_id: i64, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM recipes WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(db)
            .await?;

        if result.rows_affected() > 0 {
            tracing::info!(recipe_id = id, owner_id, "Recipe deleted");
        }
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_in_memory, Ingredients, LabelFilter, LabelInput, NewUser, Tags, User};

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

    async fn tag(db: &SqlitePool, owner: i64, name: &str) -> i64 {
        Tags::create(db, owner, LabelInput { name: name.to_string() })
            .await
            .unwrap()
            .id
    }

    async fn ingredient(db: &SqlitePool, owner: i64, name: &str) -> i64 {
        Ingredients::create(db, owner, LabelInput { name: name.to_string() })
            .await
            .unwrap()
            .id
    }

    fn recipe(title: &str) -> RecipeInput {
        RecipeInput {
            title: title.to_string(),
            time_minutes: Some(10),
            price: Some(5.0),
            ..Default::default()
        }
    }

    async fn recipe_count(db: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM recipes")
            .fetch_one(db)
            .await
            .unwrap()
    }

    #[test]
    fn test_validate_create_requires_fields() {
        let err = Recipes::validate_create(&RecipeInput::default()).unwrap_err();
        match err {
            StoreError::Validation(fields) => {
                assert!(fields.contains_key("title"));
                assert!(fields.contains_key("time_minutes"));
                assert!(fields.contains_key("price"));
            }
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_price_validation() {
        let check = |price: f64| {
            let mut errors = ValidationErrors::new();
            validate_price(price, &mut errors);
            errors.is_empty()
        };
        assert!(check(0.0));
        assert!(check(5.5));
        assert!(check(999.99));
        assert!(!check(-1.0));
        assert!(!check(1000.0));
        assert!(!check(1.234));
        assert!(!check(f64::NAN));
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("tags", None).unwrap(), None);
        assert_eq!(parse_id_list("tags", Some("")).unwrap(), None);
        assert_eq!(
            parse_id_list("tags", Some("3, 1,3")).unwrap(),
            Some([1, 3].into_iter().collect())
        );
        assert!(parse_id_list("tags", Some("1,abc")).is_err());
    }

    #[tokio::test]
    async fn test_create_with_tags_and_ingredients() {
        let (db, alice, _) = setup().await;
        let vegan = tag(&db, alice, "Vegan").await;
        let kale = ingredient(&db, alice, "Kale").await;

        let created = Recipes::create(
            &db,
            alice,
            RecipeInput {
                tags: vec![vegan, vegan],
                ingredients: vec![kale],
                ..recipe("Kale salad")
            },
        )
        .await
        .unwrap();

        assert_eq!(created.title, "Kale salad");
        assert_eq!(created.tags, vec![vegan]);
        assert_eq!(created.ingredients, vec![kale]);
        assert_eq!(created.image, None);

        let detail = Recipes::get_for_owner(&db, alice, created.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(detail.tags, vec![Label { id: vegan, name: "Vegan".into() }]);
        assert_eq!(detail.ingredients[0].name, "Kale");
    }

    #[tokio::test]
    async fn test_unknown_reference_persists_nothing() {
        let (db, alice, _) = setup().await;
        let vegan = tag(&db, alice, "Vegan").await;

        let err = Recipes::create(
            &db,
            alice,
            RecipeInput {
                tags: vec![vegan, 4242],
                ingredients: vec![77],
                ..recipe("Ghost soup")
            },
        )
        .await
        .unwrap_err();

        match err {
            StoreError::Validation(fields) => {
                assert_eq!(fields["tags"], vec!["Invalid pk \"4242\" - object does not exist."]);
                assert!(fields.contains_key("ingredients"));
            }
            other => panic!("Expected validation error, got {:?}", other),
        }
        assert_eq!(recipe_count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_other_users_tag_is_not_referenceable() {
        let (db, alice, bob) = setup().await;
        let bobs_tag = tag(&db, bob, "Spicy").await;

        let err = Recipes::create(
            &db,
            alice,
            RecipeInput {
                tags: vec![bobs_tag],
                ..recipe("Chili")
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(recipe_count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_update_replaces_supplied_links_only() {
        let (db, alice, _) = setup().await;
        let vegan = tag(&db, alice, "Vegan").await;
        let quick = tag(&db, alice, "Quick").await;
        let kale = ingredient(&db, alice, "Kale").await;

        let created = Recipes::create(
            &db,
            alice,
            RecipeInput {
                tags: vec![vegan],
                ingredients: vec![kale],
                ..recipe("Kale salad")
            },
        )
        .await
        .unwrap();

        let updated = Recipes::update(
            &db,
            alice,
            created.id,
            RecipePatch {
                title: Some("Quick kale".into()),
                tags: Some(vec![quick]),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(updated.title, "Quick kale");
        assert_eq!(updated.tags, vec![quick]);
        assert_eq!(updated.ingredients, vec![kale]);
        assert_eq!(updated.time_minutes, 10);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_recipe_untouched() {
        let (db, alice, _) = setup().await;
        let vegan = tag(&db, alice, "Vegan").await;
        let created = Recipes::create(
            &db,
            alice,
            RecipeInput {
                tags: vec![vegan],
                ..recipe("Kale salad")
            },
        )
        .await
        .unwrap();

        let err = Recipes::update(
            &db,
            alice,
            created.id,
            RecipePatch {
                title: Some("Renamed".into()),
                tags: Some(vec![999]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let after = Recipes::summary(&db, alice, created.id).await.unwrap().unwrap();
        assert_eq!(after, created);
    }

    #[tokio::test]
    async fn test_update_of_foreign_recipe_is_none() {
        let (db, alice, bob) = setup().await;
        let created = Recipes::create(&db, alice, recipe("Toast")).await.unwrap();

        let result = Recipes::update(&db, bob, created.id, RecipePatch::default())
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(!Recipes::delete(&db, bob, created.id).await.unwrap());
        assert!(Recipes::get_for_owner(&db, bob, created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_order_and_filters() {
        let (db, alice, bob) = setup().await;
        let vegan = tag(&db, alice, "Vegan").await;
        let egg = ingredient(&db, alice, "Egg").await;

        let apple = Recipes::create(
            &db,
            alice,
            RecipeInput { tags: vec![vegan], ..recipe("Apple pie") },
        )
        .await
        .unwrap();
        let omelette = Recipes::create(
            &db,
            alice,
            RecipeInput { ingredients: vec![egg], ..recipe("Omelette") },
        )
        .await
        .unwrap();
        Recipes::create(&db, alice, recipe("Bread")).await.unwrap();
        Recipes::create(&db, bob, recipe("Zucchini")).await.unwrap();

        let titles: Vec<String> = Recipes::list_for_owner(&db, alice, &RecipeFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["Omelette", "Bread", "Apple pie"]);

        let by_tag = Recipes::list_for_owner(
            &db,
            alice,
            &RecipeFilter { tags: Some(vegan.to_string()), ingredients: None },
        )
        .await
        .unwrap();
        assert_eq!(by_tag, vec![apple]);

        let by_ingredient = Recipes::list_for_owner(
            &db,
            alice,
            &RecipeFilter { tags: None, ingredients: Some(format!("{},999", egg)) },
        )
        .await
        .unwrap();
        assert_eq!(by_ingredient, vec![omelette]);
    }

    #[tokio::test]
    async fn test_assigned_only_is_distinct() {
        let (db, alice, _) = setup().await;
        let breakfast = tag(&db, alice, "Breakfast").await;
        tag(&db, alice, "Lunch").await;

        for title in ["Pancakes", "Porridge"] {
            Recipes::create(
                &db,
                alice,
                RecipeInput { tags: vec![breakfast], ..recipe(title) },
            )
            .await
            .unwrap();
        }

        let assigned = Tags::list_for_owner(
            &db,
            alice,
            &LabelFilter { assigned_only: Some("1".into()) },
        )
        .await
        .unwrap();
        assert_eq!(assigned, vec![Label { id: breakfast, name: "Breakfast".into() }]);
    }

    #[tokio::test]
    async fn test_deleting_a_tag_unlinks_it() {
        let (db, alice, _) = setup().await;
        let vegan = tag(&db, alice, "Vegan").await;
        let created = Recipes::create(
            &db,
            alice,
            RecipeInput { tags: vec![vegan], ..recipe("Salad") },
        )
        .await
        .unwrap();

        assert!(Tags::delete(&db, alice, vegan).await.unwrap());
        let after = Recipes::summary(&db, alice, created.id).await.unwrap().unwrap();
        assert!(after.tags.is_empty());
    }

    #[tokio::test]
    async fn test_deleting_user_cascades() {
        let (db, alice, bob) = setup().await;
        let vegan = tag(&db, alice, "Vegan").await;
        ingredient(&db, alice, "Kale").await;
        Recipes::create(&db, alice, RecipeInput { tags: vec![vegan], ..recipe("Salad") })
            .await
            .unwrap();
        Recipes::create(&db, bob, recipe("Toast")).await.unwrap();

        assert!(User::delete(&db, alice).await.unwrap());

        let count = |table: &'static str| {
            let db = db.clone();
            async move {
                sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
                    .fetch_one(&db)
                    .await
                    .unwrap()
            }
        };
        assert_eq!(count("tags").await, 0);
        assert_eq!(count("ingredients").await, 0);
        assert_eq!(count("recipe_tags").await, 0);
        assert_eq!(count("recipes").await, 1);
    }

    #[tokio::test]
    async fn test_image_is_scoped_to_owner() {
        let (db, alice, bob) = setup().await;
        let created = Recipes::create(&db, alice, recipe("Toast")).await.unwrap();

        assert!(Recipes::set_image(&db, bob, created.id, "/media/x.png").await.unwrap().is_none());
        let set = Recipes::set_image(&db, alice, created.id, "/media/x.png")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(set.image.as_deref(), Some("/media/x.png"));

        let found = Recipes::find_image(&db, alice, created.id).await.unwrap().unwrap();
        assert_eq!(found, set);
        assert!(Recipes::find_image(&db, bob, created.id).await.unwrap().is_none());
    }

    #[test]
    fn test_price_accepts_numbers_and_decimal_strings() {
        let parse = |body: &str| serde_json::from_str::<RecipePatch>(body).map(|p| p.price);

        assert_eq!(parse(r#"{"price": 5}"#).unwrap(), Some(5.0));
        assert_eq!(parse(r#"{"price": 2.5}"#).unwrap(), Some(2.5));
        assert_eq!(parse(r#"{"price": " 5.50 "}"#).unwrap(), Some(5.5));
        assert_eq!(parse(r#"{"price": null}"#).unwrap(), None);
        assert_eq!(parse("{}").unwrap(), None);

        let err = parse(r#"{"price": true}"#).unwrap_err().to_string();
        assert!(err.contains("expected a number"), "{}", err);
        assert!(parse(r#"{"price": "cheap"}"#).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_on_file_pool_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let db = crate::db::init(dir.path()).await.unwrap();
        let owner = User::create(
            &db,
            &NewUser {
                email: "busy@example.com".to_string(),
                password_hash: "x".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .id;
        let tag_id = tag(&db, owner, "Weeknight").await;

        let mut tasks = tokio::task::JoinSet::new();
        for n in 0..100 {
            let db = db.clone();
            tasks.spawn(async move {
                let mut input = recipe(&format!("Recipe {}", n));
                input.tags = vec![tag_id];
                Recipes::create(&db, owner, input).await
            });
        }

        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }
        assert_eq!(recipe_count(&db).await, 100);
    }
}
