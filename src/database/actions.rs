pub mod ingredients;
pub mod recipes;
pub mod relations;
pub mod shopping_list;
pub mod tags;
pub mod users;

pub use ingredients::*;
pub use recipes::*;
pub use relations::*;
pub use shopping_list::*;
pub use tags::*;
pub use users::*;

#[cfg(test)]
mod fixtures;
