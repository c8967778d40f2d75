//! Metric tags.

use std::fmt;

/// A metric tag.
///
/// Tags are a category/value pair. Bare tags (e.g. `production`) are represented with an empty value.
///
/// Tags order by category first, and then by value, which is the order used when building a [`TagList`].
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Tag {
    category: String,
    value: String,
}

impl Tag {
    /// Creates a new tag from the given category and value.
    pub fn new<C, V>(category: C, value: V) -> Self
    where
        C: Into<String>,
        V: Into<String>,
    {
        Self {
            category: category.into(),
            value: value.into(),
        }
    }

    /// Parses a tag from its raw `category:value` form.
    ///
    /// Only the first `:` separates the category from the value, so values may contain colons (e.g.
    /// `image:registry:5000/app`). A raw tag without any `:` is treated as a bare category with an empty value.
    pub fn parse(raw: &str) -> Self {
        match memchr::memchr(b':', raw.as_bytes()) {
            Some(idx) => Self::new(&raw[..idx], &raw[idx + 1..]),
            None => Self::new(raw, ""),
        }
    }

    /// Returns the category of the tag.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Returns the value of the tag.
    ///
    /// Bare tags have an empty value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the combined length of the category and value, in bytes.
    pub fn len(&self) -> usize {
        self.category.len() + self.value.len()
    }

    /// Returns `true` if both the category and the value are empty.
    pub fn is_empty(&self) -> bool {
        self.category.is_empty() && self.value.is_empty()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.value)
    }
}

impl From<&str> for Tag {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl<C, V> From<(C, V)> for Tag
where
    C: Into<String>,
    V: Into<String>,
{
    fn from((category, value): (C, V)) -> Self {
        Self::new(category, value)
    }
}

/// An ordered list of tags.
///
/// Tags are always kept sorted and free of exact duplicates. This matters because the encoded tag list is part of the
/// tagged name, and the tagged name is the key used to deduplicate samples within a batch: the same set of tags must
/// always encode to the same string, no matter what order they were gathered in.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TagList(Vec<Tag>);

impl TagList {
    /// Creates an empty tag list.
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a tag list by merging multiple sets of raw tags.
    ///
    /// Each raw tag is parsed with [`Tag::parse`]. Empty raw tags are ignored.
    pub fn from_sets<I, S, T>(sets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut tags = Vec::new();
        for set in sets {
            for raw in set {
                let raw = raw.as_ref();
                if !raw.is_empty() {
                    tags.push(Tag::parse(raw));
                }
            }
        }

        Self::from_tags(tags)
    }

    /// Creates a tag list from a comma-separated string of raw tags, such as `cluster:prod,region:us-east-1`.
    ///
    /// Whitespace around each tag is trimmed.
    pub fn from_delimited(raw: &str) -> Self {
        Self::from_sets([raw.split(',').map(str::trim)])
    }

    /// Creates a tag list from already-parsed tags.
    pub fn from_tags<I>(tags: I) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        let mut tags = tags.into_iter().collect::<Vec<_>>();
        tags.sort_unstable();
        tags.dedup();
        Self(tags)
    }

    /// Inserts a tag, keeping the list sorted.
    ///
    /// If the tag is already present, this does nothing.
    pub fn insert<T>(&mut self, tag: T)
    where
        T: Into<Tag>,
    {
        let tag = tag.into();
        if let Err(idx) = self.0.binary_search(&tag) {
            self.0.insert(idx, tag);
        }
    }

    /// Returns a new tag list containing the tags of both `self` and `other`.
    pub fn merged(&self, other: &TagList) -> TagList {
        Self::from_tags(self.0.iter().chain(other.0.iter()).cloned())
    }

    /// Returns the number of tags in the list.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the list contains no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over the tags in the list.
    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a TagList {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Tag> for TagList {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Self::from_tags(iter)
    }
}
