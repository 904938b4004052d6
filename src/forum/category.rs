use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Topic tags a post can carry. Each variant owns a flag column in `post_categories`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Go,
    Html,
    Css,
    Php,
    Python,
    C,
    Cpp,
    CSharp,
    Js,
    Assembly,
    React,
    Flutter,
    Rust,
}

impl Category {
    pub const COUNT: usize = 13;

    pub const ALL: [Category; Category::COUNT] = [
        Category::Go,
        Category::Html,
        Category::Css,
        Category::Php,
        Category::Python,
        Category::C,
        Category::Cpp,
        Category::CSharp,
        Category::Js,
        Category::Assembly,
        Category::React,
        Category::Flutter,
        Category::Rust,
    ];

    /// Form key and column name.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Go => "go",
            Category::Html => "html",
            Category::Css => "css",
            Category::Php => "php",
            Category::Python => "python",
            Category::C => "c",
            Category::Cpp => "cpp",
            Category::CSharp => "csharp",
            Category::Js => "js",
            Category::Assembly => "assembly",
            Category::React => "react",
            Category::Flutter => "flutter",
            Category::Rust => "rust",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Go => "Go",
            Category::Html => "HTML",
            Category::Css => "CSS",
            Category::Php => "PHP",
            Category::Python => "Python",
            Category::C => "C",
            Category::Cpp => "C++",
            Category::CSharp => "C#",
            Category::Js => "JavaScript",
            Category::Assembly => "Assembly",
            Category::React => "React",
            Category::Flutter => "Flutter",
            Category::Rust => "Rust",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == key)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown category: {}", s.trim())))
    }
}

/// Fixed-size flag set, one slot per [`Category`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategorySet([bool; Category::COUNT]);

impl CategorySet {
    pub fn insert(&mut self, category: Category) {
        self.0[category.index()] = true;
    }

    pub fn contains(&self, category: Category) -> bool {
        self.0[category.index()]
    }

    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|&set| set)
    }

    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        Category::ALL.into_iter().filter(|c| self.contains(*c))
    }

    /// Apply a submitted form field. Only the literal value `true` (or a
    /// checkbox `on`) sets a flag; unknown names are ignored.
    pub fn apply_form_field(&mut self, name: &str, value: &str) {
        if let Ok(category) = name.parse::<Category>() {
            if matches!(value, "true" | "on") {
                self.insert(category);
            }
        }
    }

    pub fn column_list() -> String {
        Category::ALL
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn flags(&self) -> [bool; Category::COUNT] {
        self.0
    }

    pub fn from_flags(flags: [bool; Category::COUNT]) -> Self {
        Self(flags)
    }
}

impl FromIterator<Category> for CategorySet {
    fn from_iter<I: IntoIterator<Item = Category>>(iter: I) -> Self {
        let mut set = CategorySet::default();
        for category in iter {
            set.insert(category);
        }
        set
    }
}
