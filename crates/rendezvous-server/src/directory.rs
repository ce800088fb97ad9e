//! User directory collaborator: display names to user ids.

use std::collections::HashMap;

use crate::store::BoxFuture;

/// Resolves people's display names to user ids.
pub trait UserDirectory: Send + Sync {
    /// Returns the id of the user called `name`, if known.
    fn resolve(&self, name: &str) -> BoxFuture<'_, Option<String>>;
}

/// Fixed name table, matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    ids_by_name: HashMap<String, String>,
}

impl StaticUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, name: impl AsRef<str>, id: impl Into<String>) -> Self {
        self.insert(name, id);
        self
    }

    pub fn insert(&mut self, name: impl AsRef<str>, id: impl Into<String>) {
        self.ids_by_name.insert(normalize(name.as_ref()), id.into());
    }

    pub fn len(&self) -> usize {
        self.ids_by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids_by_name.is_empty()
    }
}

impl<N: AsRef<str>, I: Into<String>> FromIterator<(N, I)> for StaticUserDirectory {
    fn from_iter<T: IntoIterator<Item = (N, I)>>(iter: T) -> Self {
        let mut directory = Self::new();
        for (name, id) in iter {
            directory.insert(name, id);
        }
        directory
    }
}

impl UserDirectory for StaticUserDirectory {
    fn resolve(&self, name: &str) -> BoxFuture<'_, Option<String>> {
        let id = self.ids_by_name.get(&normalize(name)).cloned();
        Box::pin(async move { id })
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
