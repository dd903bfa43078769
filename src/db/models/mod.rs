//! Database models split into domain-specific modules.

pub mod label;
pub mod recipe;
pub mod user;

pub use label::{Ingredients, Label, LabelFilter, LabelInput, LabelKind, LabelPatch, Tags};
pub use recipe::{
    Recipe, RecipeDetail, RecipeFilter, RecipeImage, RecipeInput, RecipePatch, Recipes,
};
pub use user::*;
