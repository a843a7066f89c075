//! Structural rules a recipe or catalog entry has to satisfy before it is
//! written. Existence checks take the set of known ids, which callers load
//! from storage first.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    error::{Error, HtmlError},
    form::IngredientAmount,
    schema::Id,
    AMOUNT_MAX, AMOUNT_MIN, COOKING_TIME_MAX, COOKING_TIME_MIN, NAME_MAX_LENGTH,
};

static HEX_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#([A-Fa-f0-9]{6}|[A-Fa-f0-9]{3})$").expect("valid regex"));
static SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-a-zA-Z0-9_]+$").expect("valid regex"));
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));
static USERNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w.@+-]+$").expect("valid regex"));

fn invalid(field: &str, message: &str) -> Error {
    HtmlError::ValidationFailed.new(&format!("{field}: {message}"))
}

fn has_duplicates<T: std::hash::Hash + Eq>(items: impl IntoIterator<Item = T>) -> bool {
    let mut seen = HashSet::new();
    items.into_iter().any(|item| !seen.insert(item))
}

/// Existence is checked before duplicates. A duplicated unknown id reports
/// the unknown tag, a duplicated known id reports the repetition.
pub fn validate_tags(tags: &[Id], known: &HashSet<Id>) -> Result<(), Error> {
    if tags.is_empty() {
        return Err(invalid("tags", "Choose at least one tag."));
    }
    if let Some(id) = tags.iter().find(|id| !known.contains(id)) {
        return Err(invalid("tags", &format!("Tag {id} does not exist.")));
    }
    if has_duplicates(tags.iter()) {
        return Err(invalid("tags", "Tags must not repeat."));
    }

    Ok(())
}

pub fn validate_ingredients(
    ingredients: &[IngredientAmount],
    known: &HashSet<Id>,
) -> Result<(), Error> {
    if ingredients.is_empty() {
        return Err(invalid("ingredients", "Choose at least one ingredient."));
    }
    if ingredients.iter().any(|line| !known.contains(&line.id)) {
        return Err(invalid(
            "ingredients",
            "Choose an ingredient from the available ones.",
        ));
    }
    if has_duplicates(ingredients.iter().map(|line| line.id)) {
        return Err(invalid("ingredients", "Ingredients must not repeat."));
    }
    for line in ingredients {
        validate_amount(line.amount)?;
    }

    Ok(())
}

pub fn validate_amount(amount: i64) -> Result<i32, Error> {
    if amount < AMOUNT_MIN {
        return Err(invalid("amount", "Amount must be greater than 0."));
    }
    if amount > AMOUNT_MAX {
        return Err(invalid(
            "amount",
            &format!("Amount must be less than {AMOUNT_MAX}."),
        ));
    }

    Ok(amount as i32)
}

pub fn validate_cooking_time(minutes: i64) -> Result<i32, Error> {
    if minutes < COOKING_TIME_MIN {
        return Err(invalid(
            "cooking_time",
            &format!("Minimum cooking time is {COOKING_TIME_MIN} min."),
        ));
    }
    if minutes > COOKING_TIME_MAX {
        return Err(invalid(
            "cooking_time",
            &format!("Maximum cooking time is {COOKING_TIME_MAX} min."),
        ));
    }

    Ok(minutes as i32)
}

pub fn validate_name(field: &str, name: &str, max_length: usize) -> Result<String, Error> {
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid(field, "This field may not be blank."));
    }
    if name.chars().count() > max_length {
        return Err(invalid(
            field,
            &format!("Ensure this field has no more than {max_length} characters."),
        ));
    }

    Ok(name.to_string())
}

pub fn validate_text(field: &str, text: &str) -> Result<String, Error> {
    if text.trim().is_empty() {
        return Err(invalid(field, "This field may not be blank."));
    }

    Ok(text.to_string())
}

pub fn validate_recipe_name(name: &str) -> Result<String, Error> {
    validate_name("name", name, NAME_MAX_LENGTH)
}

/// Returns the color upper-cased, the form it is stored in.
pub fn normalize_color(color: &str) -> Result<String, Error> {
    if !HEX_COLOR.is_match(color) {
        return Err(invalid("color", "Enter the color in HEX format."));
    }

    Ok(color.to_uppercase())
}

pub fn validate_slug(slug: &str) -> Result<String, Error> {
    if !SLUG.is_match(slug) {
        return Err(invalid(
            "slug",
            "Enter a valid slug consisting of letters, numbers, underscores or hyphens.",
        ));
    }
    validate_name("slug", slug, NAME_MAX_LENGTH)
}

pub fn validate_email(email: &str, max_length: usize) -> Result<String, Error> {
    let email = validate_name("email", email, max_length)?;
    if !EMAIL.is_match(&email) {
        return Err(invalid("email", "Enter a valid email address."));
    }

    Ok(email.to_lowercase())
}

pub fn validate_username(username: &str, max_length: usize) -> Result<String, Error> {
    let username = validate_name("username", username, max_length)?;
    if !USERNAME.is_match(&username) || username == "me" {
        return Err(invalid("username", "Enter a valid username."));
    }

    Ok(username)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(ids: &[Id]) -> HashSet<Id> {
        ids.iter().copied().collect()
    }

    fn line(id: Id, amount: i64) -> IngredientAmount {
        IngredientAmount { id, amount }
    }

    #[test]
    fn tags_cannot_be_empty() {
        let err = validate_tags(&[], &known(&[1])).unwrap_err();
        assert_eq!(err.kind, HtmlError::ValidationFailed);
        assert_eq!(err.message(), "tags: Choose at least one tag.");
    }

    #[test]
    fn duplicate_tags_fail_even_when_the_tag_exists() {
        let err = validate_tags(&[1, 1], &known(&[1])).unwrap_err();
        assert_eq!(err.message(), "tags: Tags must not repeat.");
    }

    #[test]
    fn unknown_tag_is_reported_before_duplicates() {
        let err = validate_tags(&[5, 5], &known(&[1])).unwrap_err();
        assert_eq!(err.message(), "tags: Tag 5 does not exist.");
    }

    #[test]
    fn valid_tags_pass() {
        assert!(validate_tags(&[1, 2], &known(&[1, 2, 3])).is_ok());
    }

    #[test]
    fn ingredients_rules() {
        let catalog = known(&[1, 2]);

        let err = validate_ingredients(&[], &catalog).unwrap_err();
        assert_eq!(err.message(), "ingredients: Choose at least one ingredient.");

        let err = validate_ingredients(&[line(9, 1)], &catalog).unwrap_err();
        assert_eq!(
            err.message(),
            "ingredients: Choose an ingredient from the available ones."
        );

        let err = validate_ingredients(&[line(1, 1), line(1, 2)], &catalog).unwrap_err();
        assert_eq!(err.message(), "ingredients: Ingredients must not repeat.");

        let err = validate_ingredients(&[line(1, 0)], &catalog).unwrap_err();
        assert_eq!(err.message(), "amount: Amount must be greater than 0.");

        assert!(validate_ingredients(&[line(1, 1), line(2, AMOUNT_MAX)], &catalog).is_ok());
    }

    #[test]
    fn amount_bounds() {
        assert_eq!(validate_amount(1).unwrap(), 1);
        assert_eq!(validate_amount(10000).unwrap(), 10000);
        assert_eq!(
            validate_amount(10001).unwrap_err().message(),
            "amount: Amount must be less than 10000."
        );
    }

    #[test]
    fn cooking_time_bounds_name_the_violated_bound() {
        let err = validate_cooking_time(0).unwrap_err();
        assert_eq!(err.kind, HtmlError::ValidationFailed);
        assert!(err.message().contains("Minimum"));

        let err = validate_cooking_time(501).unwrap_err();
        assert!(err.message().contains("Maximum"));

        assert_eq!(validate_cooking_time(1).unwrap(), 1);
        assert_eq!(validate_cooking_time(500).unwrap(), 500);
    }

    #[test]
    fn colors_are_upper_cased() {
        assert_eq!(normalize_color("#ff00aa").unwrap(), "#FF00AA");
        assert_eq!(normalize_color("#abc").unwrap(), "#ABC");
        assert!(normalize_color("ff00aa").is_err());
        assert!(normalize_color("#ff00a").is_err());
        assert!(normalize_color("#gggggg").is_err());
    }

    #[test]
    fn slugs_and_names() {
        assert_eq!(validate_slug("breakfast_1").unwrap(), "breakfast_1");
        assert!(validate_slug("not a slug").is_err());
        assert!(validate_recipe_name("   ").is_err());
        assert!(validate_recipe_name(&"x".repeat(201)).is_err());
        assert_eq!(validate_recipe_name(" Borscht ").unwrap(), "Borscht");
        assert!(validate_text("text", "\n ").is_err());
        assert_eq!(validate_text("text", "Boil.\n").unwrap(), "Boil.\n");
    }

    #[test]
    fn user_identity_fields() {
        assert_eq!(
            validate_email("Cook@Example.com", 254).unwrap(),
            "cook@example.com"
        );
        assert!(validate_email("cook.example.com", 254).is_err());
        assert!(validate_username("chef.anna", 150).is_ok());
        assert!(validate_username("me", 150).is_err());
        assert!(validate_username("chef anna", 150).is_err());
    }
}
