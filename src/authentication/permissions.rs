use crate::{jwt::SessionData, schema::UserRole};

const ACTION_TABLE: &[(UserRole, &[ActionType])] = &[
    (
        UserRole::User,
        &[
            ActionType::ManageOwnRelations,
            ActionType::CreateRecipes,
            ActionType::ManageOwnRecipes,
        ],
    ),
    (
        UserRole::Admin,
        &[
            ActionType::ManageOwnRelations,
            ActionType::CreateRecipes,
            ActionType::ManageOwnRecipes,
            ActionType::ManageAllRecipes,
            ActionType::ManageCatalog,
        ],
    ),
];

#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum ActionType {
    CreateRecipes,

    /// Favorites, shopping cart and subscriptions.
    ManageOwnRelations,
    ManageOwnRecipes,

    ManageAllRecipes,
    /// Tags and ingredients.
    ManageCatalog,
}

impl ActionType {
    pub fn authenticate(self, session: &SessionData) -> bool {
        ACTION_TABLE
            .iter()
            .find(|(role, _)| *role == session.role)
            .map(|(_, actions)| actions.contains(&self))
            .unwrap_or(false)
    }
}
