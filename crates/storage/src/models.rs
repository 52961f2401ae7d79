use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One tracked filesystem entry.
///
/// `category` is always set once `needs_categorization` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub path: String,
    pub size: i64,
    pub mtime: i64,
    pub category: Option<String>,
    pub needs_categorization: bool,
    pub is_new: bool,
    pub excluded_from_move: bool,
    pub active: bool,
}

impl FileRecord {
    /// A freshly discovered, not yet classified file.
    pub fn discovered(
        id: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
        size: i64,
        mtime: i64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            size,
            mtime,
            category: None,
            needs_categorization: true,
            is_new: true,
            excluded_from_move: false,
            active: true,
        }
    }

    pub fn set_category(&mut self, category: impl Into<String>) {
        self.category = Some(category.into());
        self.needs_categorization = false;
    }
}
