use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::{schema::CartLine, SHOPPING_LIST_HEADER};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShoppingListItem {
    pub name: String,
    pub measurement_unit: String,
    pub amount: i64,
}

/// Total quantities needed for everything in one user's cart.
///
/// Lines are grouped by `(name, measurement_unit)`, so two catalog rows with
/// the same name and unit end up in the same item. Items are ordered by name,
/// then unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShoppingList {
    pub date: NaiveDate,
    pub items: Vec<ShoppingListItem>,
}

impl ShoppingList {
    pub fn aggregate<I>(date: NaiveDate, lines: I) -> Self
    where
        I: IntoIterator<Item = CartLine>,
    {
        let mut groups: BTreeMap<(String, String), i64> = BTreeMap::new();
        for line in lines {
            *groups
                .entry((line.name, line.measurement_unit))
                .or_insert(0) += i64::from(line.amount);
        }

        let items = groups
            .into_iter()
            .map(|((name, measurement_unit), amount)| ShoppingListItem {
                name,
                measurement_unit,
                amount,
            })
            .collect();

        Self { date, items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<&ShoppingList> for String {
    // 2024-01-31
    // Список покупок:
    //
    // Flour (kg) - 1
    // Sugar (g) - 5
    fn from(list: &ShoppingList) -> String {
        let mut s = format!("{}\n{}\n", list.date.format("%Y-%m-%d"), SHOPPING_LIST_HEADER);

        list.items.iter().for_each(|item| {
            s += &format!(
                "\n{} ({}) - {}",
                item.name, item.measurement_unit, item.amount
            );
        });

        s
    }
}
