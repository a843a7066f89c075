use std::{collections::HashMap, str::FromStr};

use serde_json::Value;

use super::{error::TypeError, schema::Id};

pub type FormData = HashMap<String, Value>;
pub type QueryData = Vec<(String, String)>;

/// A JSON object body. Keys that are missing or `null` count as absent,
/// which is what partial updates rely on.
pub struct Form {
    inner: HashMap<String, Value>,
}

impl Form {
    pub fn from_data(data: FormData) -> Self {
        Self { inner: data }
    }

    fn present(&self, key: &str) -> Option<&Value> {
        self.inner.get(key).filter(|value| !value.is_null())
    }

    fn required(&self, key: &str) -> Result<&Value, TypeError> {
        self.present(key)
            .ok_or_else(|| TypeError::new(&format!("{key}: This field is required.")))
    }

    pub fn get_str(&self, key: &str) -> Result<String, TypeError> {
        value_to_str(key, self.required(key)?)
    }

    pub fn get_optional_str(&self, key: &str) -> Result<Option<String>, TypeError> {
        self.present(key)
            .map(|value| value_to_str(key, value))
            .transpose()
    }

    pub fn get_integer(&self, key: &str) -> Result<i64, TypeError> {
        value_to_integer(key, self.required(key)?)
    }

    pub fn get_optional_integer(&self, key: &str) -> Result<Option<i64>, TypeError> {
        self.present(key)
            .map(|value| value_to_integer(key, value))
            .transpose()
    }

    pub fn get_list(&self, key: &str) -> Result<Vec<Value>, TypeError> {
        value_to_list(key, self.required(key)?)
    }

    pub fn get_optional_list(&self, key: &str) -> Result<Option<Vec<Value>>, TypeError> {
        self.present(key)
            .map(|value| value_to_list(key, value))
            .transpose()
    }
}

fn value_to_str(key: &str, value: &Value) -> Result<String, TypeError> {
    match value.as_str() {
        Some(v) => Ok(v.to_string()),
        None => Err(TypeError::new(&format!("{key}: Not a valid string."))),
    }
}

fn value_to_integer(key: &str, value: &Value) -> Result<i64, TypeError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| TypeError::new(&format!("{key}: A valid integer is required.")))
}

fn value_to_list(key: &str, value: &Value) -> Result<Vec<Value>, TypeError> {
    match value.as_array() {
        Some(list) => Ok(list.to_owned()),
        None => Err(TypeError::new(&format!(
            "{key}: Expected a list of items but got type \"{}\".",
            value_kind(value)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn value_to_id(key: &str, value: &Value) -> Result<Id, TypeError> {
    value_to_integer(key, value)
        .ok()
        .and_then(|id| Id::try_from(id).ok())
        .ok_or_else(|| {
            TypeError::new(&format!(
                "{key}: Incorrect type. Expected pk value, received {}.",
                value_kind(value)
            ))
        })
}

/// A query string, keeping repeated keys (`?tags=a&tags=b`).
pub struct QueryForm {
    inner: QueryData,
}

impl QueryForm {
    pub fn from_data(data: QueryData) -> Self {
        Self { inner: data }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.inner
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn get_number<T>(&self, key: &str) -> Result<Option<T>, TypeError>
    where
        T: FromStr,
    {
        match self.get_str(key).filter(|v| !v.is_empty()) {
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_e| TypeError::new(&format!("{key}: A valid integer is required."))),
            None => Ok(None),
        }
    }

    pub fn get_flag(&self, key: &str) -> Result<bool, TypeError> {
        match self.get_str(key) {
            None => Ok(false),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "" | "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(TypeError::new(&format!("{key}: Expected a boolean flag."))),
            },
        }
    }
}

/// Filters of the recipe listing. The flags only mean something for an
/// authenticated viewer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeFilter {
    pub author: Option<Id>,
    pub tags: Vec<String>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
}

impl RecipeFilter {
    pub fn needs_viewer(&self) -> bool {
        self.is_favorited || self.is_in_shopping_cart
    }
}

impl TryFrom<&QueryForm> for RecipeFilter {
    type Error = TypeError;

    fn try_from(query: &QueryForm) -> Result<Self, Self::Error> {
        Ok(Self {
            author: query.get_number::<Id>("author")?,
            tags: query
                .get_all("tags")
                .into_iter()
                .filter(|slug| !slug.is_empty())
                .map(str::to_string)
                .collect(),
            is_favorited: query.get_flag("is_favorited")?,
            is_in_shopping_cart: query.get_flag("is_in_shopping_cart")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngredientAmount {
    pub id: Id,
    pub amount: i64,
}

impl IngredientAmount {
    fn try_from_value(value: &Value) -> Result<Self, TypeError> {
        let object = value
            .as_object()
            .ok_or_else(|| TypeError::new("ingredients: Expected {\"id\", \"amount\"} objects."))?;

        let id = object
            .get("id")
            .ok_or_else(|| TypeError::new("ingredients: id is required."))
            .and_then(|v| value_to_id("ingredients", v))?;
        let amount = object
            .get("amount")
            .ok_or_else(|| TypeError::new("ingredients: amount is required."))
            .and_then(|v| value_to_integer("amount", v))?;

        Ok(Self { id, amount })
    }
}

fn parse_tag_ids(values: &[Value]) -> Result<Vec<Id>, TypeError> {
    values.iter().map(|v| value_to_id("tags", v)).collect()
}

fn parse_ingredients(values: &[Value]) -> Result<Vec<IngredientAmount>, TypeError> {
    values.iter().map(IngredientAmount::try_from_value).collect()
}

/// Write model for recipe creation. `image` is still the encoded payload.
#[derive(Debug, Clone)]
pub struct RecipeInput {
    pub tags: Vec<Id>,
    pub ingredients: Vec<IngredientAmount>,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i64,
}

impl TryFrom<Form> for RecipeInput {
    type Error = TypeError;

    fn try_from(form: Form) -> Result<Self, Self::Error> {
        Ok(Self {
            tags: parse_tag_ids(&form.get_list("tags")?)?,
            ingredients: parse_ingredients(&form.get_list("ingredients")?)?,
            name: form.get_str("name")?,
            image: form.get_str("image")?,
            text: form.get_str("text")?,
            cooking_time: form.get_integer("cooking_time")?,
        })
    }
}

/// Write model for a partial recipe update. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct RecipePatch {
    pub tags: Option<Vec<Id>>,
    pub ingredients: Option<Vec<IngredientAmount>>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub text: Option<String>,
    pub cooking_time: Option<i64>,
}

impl TryFrom<Form> for RecipePatch {
    type Error = TypeError;

    fn try_from(form: Form) -> Result<Self, Self::Error> {
        Ok(Self {
            tags: form
                .get_optional_list("tags")?
                .map(|tags| parse_tag_ids(&tags))
                .transpose()?,
            ingredients: form
                .get_optional_list("ingredients")?
                .map(|lines| parse_ingredients(&lines))
                .transpose()?,
            name: form.get_optional_str("name")?,
            image: form.get_optional_str("image")?,
            text: form.get_optional_str("text")?,
            cooking_time: form.get_optional_integer("cooking_time")?,
        })
    }
}

impl From<RecipeInput> for RecipePatch {
    fn from(input: RecipeInput) -> Self {
        Self {
            tags: Some(input.tags),
            ingredients: Some(input.ingredients),
            name: Some(input.name),
            image: Some(input.image),
            text: Some(input.text),
            cooking_time: Some(input.cooking_time),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TagInput {
    pub name: String,
    pub color: String,
    pub slug: String,
}

impl TryFrom<Form> for TagInput {
    type Error = TypeError;

    fn try_from(form: Form) -> Result<Self, Self::Error> {
        Ok(Self {
            name: form.get_str("name")?,
            color: form.get_str("color")?,
            slug: form.get_str("slug")?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TagPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub slug: Option<String>,
}

impl TryFrom<Form> for TagPatch {
    type Error = TypeError;

    fn try_from(form: Form) -> Result<Self, Self::Error> {
        Ok(Self {
            name: form.get_optional_str("name")?,
            color: form.get_optional_str("color")?,
            slug: form.get_optional_str("slug")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IngredientInput {
    pub name: String,
    pub measurement_unit: String,
}

impl TryFrom<Form> for IngredientInput {
    type Error = TypeError;

    fn try_from(form: Form) -> Result<Self, Self::Error> {
        Ok(Self {
            name: form.get_str("name")?,
            measurement_unit: form.get_str("measurement_unit")?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngredientPatch {
    pub name: Option<String>,
    pub measurement_unit: Option<String>,
}

impl TryFrom<Form> for IngredientPatch {
    type Error = TypeError;

    fn try_from(form: Form) -> Result<Self, Self::Error> {
        Ok(Self {
            name: form.get_optional_str("name")?,
            measurement_unit: form.get_optional_str("measurement_unit")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

impl TryFrom<Form> for RegisterInput {
    type Error = TypeError;

    fn try_from(form: Form) -> Result<Self, Self::Error> {
        Ok(Self {
            email: form.get_str("email")?,
            username: form.get_str("username")?,
            first_name: form.get_str("first_name")?,
            last_name: form.get_str("last_name")?,
            password: form.get_str("password")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl TryFrom<Form> for LoginInput {
    type Error = TypeError;

    fn try_from(form: Form) -> Result<Self, Self::Error> {
        Ok(Self {
            email: form.get_str("email")?,
            password: form.get_str("password")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SetPasswordInput {
    pub new_password: String,
    pub current_password: String,
}

impl TryFrom<Form> for SetPasswordInput {
    type Error = TypeError;

    fn try_from(form: Form) -> Result<Self, Self::Error> {
        Ok(Self {
            new_password: form.get_str("new_password")?,
            current_password: form.get_str("current_password")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn form(value: Value) -> Form {
        let data: FormData = serde_json::from_value(value).unwrap();
        Form::from_data(data)
    }

    #[test]
    fn recipe_input_requires_every_field() {
        let err = RecipeInput::try_from(form(json!({
            "tags": [1],
            "ingredients": [{"id": 1, "amount": 10}],
            "name": "Soup",
            "text": "Boil",
            "cooking_time": 5
        })))
        .unwrap_err();

        assert_eq!(err.to_string(), "(image: This field is required.)");
    }

    #[test]
    fn recipe_input_accepts_numeric_strings() {
        let input = RecipeInput::try_from(form(json!({
            "tags": [1, "2"],
            "ingredients": [{"id": "3", "amount": "15"}],
            "name": "Soup",
            "image": "data:image/png;base64,AA==",
            "text": "Boil",
            "cooking_time": "25"
        })))
        .unwrap();

        assert_eq!(input.tags, vec![1, 2]);
        assert_eq!(input.ingredients, vec![IngredientAmount { id: 3, amount: 15 }]);
        assert_eq!(input.cooking_time, 25);
    }

    #[test]
    fn patch_keeps_absent_fields_and_empty_lists() {
        let patch = RecipePatch::try_from(form(json!({
            "name": "Renamed",
            "tags": [],
            "text": null
        })))
        .unwrap();

        assert_eq!(patch.name.as_deref(), Some("Renamed"));
        assert_eq!(patch.tags, Some(vec![]));
        assert!(patch.ingredients.is_none());
        assert!(patch.text.is_none());
        assert!(patch.cooking_time.is_none());
    }

    #[test]
    fn tags_must_be_primary_keys() {
        let err = RecipePatch::try_from(form(json!({ "tags": ["breakfast"] }))).unwrap_err();
        assert!(err.to_string().contains("Expected pk value"));
    }

    #[test]
    fn query_form_reads_repeated_keys_and_flags() {
        let query = QueryForm::from_data(vec![
            ("tags".into(), "breakfast".into()),
            ("tags".into(), "dinner".into()),
            ("is_favorited".into(), "1".into()),
            ("is_in_shopping_cart".into(), "0".into()),
            ("author".into(), "7".into()),
        ]);

        assert_eq!(query.get_all("tags"), vec!["breakfast", "dinner"]);
        assert!(query.get_flag("is_favorited").unwrap());
        assert!(!query.get_flag("is_in_shopping_cart").unwrap());
        assert!(!query.get_flag("missing").unwrap());
        assert_eq!(query.get_number::<i32>("author").unwrap(), Some(7));
        assert!(query.get_flag("tags").is_err());
    }

    #[test]
    fn recipe_filter_from_query() {
        let query = QueryForm::from_data(vec![
            ("author".into(), "3".into()),
            ("tags".into(), "lunch".into()),
            ("tags".into(), "".into()),
            ("is_in_shopping_cart".into(), "true".into()),
        ]);
        let filter = RecipeFilter::try_from(&query).unwrap();

        assert_eq!(filter.author, Some(3));
        assert_eq!(filter.tags, vec!["lunch".to_string()]);
        assert!(!filter.is_favorited);
        assert!(filter.needs_viewer());

        let query = QueryForm::from_data(vec![("author".into(), "me".into())]);
        assert!(RecipeFilter::try_from(&query).is_err());
    }
}
