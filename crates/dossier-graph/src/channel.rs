//! State channels and merge rules
//!
//! Every field of a pipeline state is a channel with a statically declared
//! [`MergeStrategy`]:
//! - [`Replace`]: last write wins
//! - [`AppendList`]: ordered, duplicates kept
//! - [`AppendSet`]: ordered, duplicates dropped (first insertion position kept)
//!
//! Stages never mutate state. They return partial updates which the engine
//! merges through [`GraphState::apply`].

use crate::stage::StageError;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::ops::Deref;

/// Merge rule declared for a state field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// New value replaces the old one
    Replace,
    /// New items are appended in order
    AppendList,
    /// New items are appended unless already present
    AppendSet,
}

/// A state field with a merge rule
pub trait Channel {
    /// Partial update accepted by this channel
    type Update: Default;

    /// Declared merge rule
    const STRATEGY: MergeStrategy;

    /// Merge an update into the channel
    fn merge(&mut self, update: Self::Update);
}

/// Last-write-wins field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Replace<T>(T);

impl<T> Replace<T> {
    /// Channel holding an initial value
    #[inline]
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Current value
    #[inline]
    pub fn get(&self) -> &T {
        &self.0
    }

    /// Consume into the current value
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Channel for Replace<T> {
    type Update = Option<T>;
    const STRATEGY: MergeStrategy = MergeStrategy::Replace;

    fn merge(&mut self, update: Option<T>) {
        if let Some(value) = update {
            self.0 = value;
        }
    }
}

impl<T> Deref for Replace<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Append-only ordered list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppendList<T>(Vec<T>);

impl<T> Default for AppendList<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> AppendList<T> {
    /// Items in merge order
    #[inline]
    pub fn items(&self) -> &[T] {
        &self.0
    }
}

impl<T> Channel for AppendList<T> {
    type Update = Vec<T>;
    const STRATEGY: MergeStrategy = MergeStrategy::AppendList;

    fn merge(&mut self, update: Vec<T>) {
        self.0.extend(update);
    }
}

impl<T> Deref for AppendList<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> FromIterator<T> for AppendList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Append-only ordered set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppendSet<T: Hash + Eq>(IndexSet<T>);

impl<T: Hash + Eq> Default for AppendSet<T> {
    fn default() -> Self {
        Self(IndexSet::new())
    }
}

impl<T: Hash + Eq> AppendSet<T> {
    /// Items in first-insertion order
    #[inline]
    pub fn items(&self) -> &IndexSet<T> {
        &self.0
    }
}

impl<T: Hash + Eq> Channel for AppendSet<T> {
    type Update = Vec<T>;
    const STRATEGY: MergeStrategy = MergeStrategy::AppendSet;

    fn merge(&mut self, update: Vec<T>) {
        self.0.extend(update);
    }
}

impl<T: Hash + Eq> Deref for AppendSet<T> {
    type Target = IndexSet<T>;

    fn deref(&self) -> &IndexSet<T> {
        &self.0
    }
}

impl<T: Hash + Eq> FromIterator<T> for AppendSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// State driven through a stage graph
///
/// Implementations merge each field of `Update` through that field's
/// [`Channel`]. The error list only grows.
pub trait GraphState: Clone + Send + Sync + 'static {
    /// Partial update returned by stages
    type Update: Default + Send + 'static;

    /// Merge a partial update
    fn apply(&mut self, update: Self::Update);

    /// Append a stage error to the state's error list
    fn record_error(&mut self, error: StageError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_ignores_none() {
        let mut c = Replace::new(1);
        c.merge(None);
        assert_eq!(*c, 1);
        c.merge(Some(5));
        assert_eq!(*c.get(), 5);
        assert_eq!(Replace::<u8>::STRATEGY, MergeStrategy::Replace);
    }

    #[test]
    fn append_list_keeps_duplicates() {
        let mut c = AppendList::default();
        c.merge(vec!["a", "b"]);
        c.merge(vec!["a"]);
        assert_eq!(c.items(), &["a", "b", "a"]);
    }

    #[test]
    fn append_set_keeps_first_position() {
        let mut c = AppendSet::default();
        c.merge(vec!["b", "a"]);
        c.merge(vec!["a", "c"]);
        let items: Vec<_> = c.iter().copied().collect();
        assert_eq!(items, vec!["b", "a", "c"]);
    }

    #[test]
    fn channels_serialize_transparently() {
        let list: AppendList<u8> = [1, 2].into_iter().collect();
        assert_eq!(serde_json::to_string(&list).expect("json"), "[1,2]");
        let set: AppendSet<u8> = [3, 3, 4].into_iter().collect();
        assert_eq!(serde_json::to_string(&set).expect("json"), "[3,4]");
        assert_eq!(serde_json::to_string(&Replace::new("x")).expect("json"), "\"x\"");
    }
}
