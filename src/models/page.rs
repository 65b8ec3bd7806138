//! Optional skip/limit paging shared by listing and search.

use serde::Deserialize;

/// Absent fields mean "no paging": the full result set is returned.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Page {
    pub skip: Option<usize>,
    #[serde(alias = "batchSize")]
    pub limit: Option<usize>,
}

impl Page {
    pub fn new(skip: Option<usize>, limit: Option<usize>) -> Self {
        Self { skip, limit }
    }

    /// Apply paging to an already ordered sequence.
    #[cfg(test)]
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.skip.unwrap_or(0));
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}
