pub const RECIPE_COUNT_PER_PAGE: i64 = 6;
pub const USER_COUNT_PER_PAGE: i64 = 6;
pub const MAX_PAGE_SIZE: i64 = 100;

pub const COOKING_TIME_MIN: i64 = 1;
pub const COOKING_TIME_MAX: i64 = 500;

// The storage CHECK constraint uses the same range.
pub const AMOUNT_MIN: i64 = 1;
pub const AMOUNT_MAX: i64 = 10000;

pub const NAME_MAX_LENGTH: usize = 200;
pub const EMAIL_MAX_LENGTH: usize = 254;
pub const USERNAME_MAX_LENGTH: usize = 150;
pub const PERSON_NAME_MAX_LENGTH: usize = 150;

pub const SHOPPING_LIST_HEADER: &str = "Список покупок:";
pub const SHOPPING_LIST_FILENAME: &str = "shopping_list.txt";

pub const RECIPE_IMAGE_DIR: &str = "recipes/images";
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

pub const CATALOG_CACHE_KEY: &str = "catalog-cache-key";

pub const MAX_BODY_SIZE: u64 = 1024 * 1024 * 16;
