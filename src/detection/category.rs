use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Object categories recognized by the PPE detectors.
///
/// The set is closed. Discriminants follow the class order of the training
/// dataset, which is also the index space adapters report in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Helmet = 0,
    Glasses = 1,
    Person = 2,
    Vest = 3,
    Boots = 4,
}

impl Category {
    pub const COUNT: usize = 5;

    /// All categories in class-index order.
    pub const ALL: [Category; Category::COUNT] = [
        Category::Helmet,
        Category::Glasses,
        Category::Person,
        Category::Vest,
        Category::Boots,
    ];

    /// Safety equipment categories, i.e. everything but `Person`.
    pub const EQUIPMENT: [Category; 4] = [
        Category::Helmet,
        Category::Vest,
        Category::Glasses,
        Category::Boots,
    ];

    /// Map an adapter class index to a category.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Helmet => "helmet",
            Category::Glasses => "glasses",
            Category::Person => "person",
            Category::Vest => "vest",
            Category::Boots => "boots",
        }
    }

    pub fn is_equipment(self) -> bool {
        self != Category::Person
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Per-category counts, indexed by [`Category`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts([u32; Category::COUNT]);

impl CategoryCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count categories over an iterator of detected categories.
    pub fn tally<I: IntoIterator<Item = Category>>(categories: I) -> Self {
        let mut counts = Self::default();
        for category in categories {
            counts[category] += 1;
        }
        counts
    }

    pub fn get(&self, category: Category) -> u32 {
        self.0[category.index()]
    }

    pub fn persons(&self) -> u32 {
        self.get(Category::Person)
    }

    /// Largest count among equipment categories.
    pub fn max_equipment(&self) -> u32 {
        Category::EQUIPMENT
            .iter()
            .map(|&c| self.get(c))
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&n| n == 0)
    }

    /// Iterate `(category, count)` pairs in class-index order.
    pub fn iter(&self) -> impl Iterator<Item = (Category, u32)> + '_ {
        Category::ALL.iter().map(|&c| (c, self.get(c)))
    }
}

impl Index<Category> for CategoryCounts {
    type Output = u32;

    fn index(&self, category: Category) -> &u32 {
        &self.0[category.index()]
    }
}

impl IndexMut<Category> for CategoryCounts {
    fn index_mut(&mut self, category: Category) -> &mut u32 {
        &mut self.0[category.index()]
    }
}
