//! Result trees and their assembly
//!
//! A reply is a tree: leaves are values, internal nodes are ordered
//! sequences with a declared child count learned from their array header.
//! The assembler folds the decoded frame stream into one complete tree at
//! a time.

use std::fmt;

use crate::errors::{Error, Result};
use crate::value::{Hash, KeyValue, ScoredValue, Value};

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Value(Value),
    Set(ResultSet),
}

/// Tree-shaped reply of one command: values and nested result sets.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    items: Vec<Item>,
    expected: usize,
}

impl ResultSet {
    fn new() -> ResultSet {
        // A scalar reply completes a fresh root immediately; array headers
        // overwrite the expectation.
        ResultSet {
            items: Vec::new(),
            expected: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn all_received(&self) -> bool {
        self.items.len() >= self.expected
    }

    fn item(&self, index: usize) -> Result<&Item> {
        self.items.get(index).ok_or(Error::IllegalItemIndex {
            index,
            len: self.items.len(),
        })
    }

    /// The value at `index`; nested sets are rejected.
    pub fn value_at(&self, index: usize) -> Result<&Value> {
        match self.item(index)? {
            Item::Value(value) => Ok(value),
            Item::Set(_) => Err(Error::IllegalItemType {
                index,
                expected: "value",
            }),
        }
    }

    /// The nested result set at `index`; values are rejected.
    pub fn set_at(&self, index: usize) -> Result<&ResultSet> {
        match self.item(index)? {
            Item::Set(set) => Ok(set),
            Item::Value(_) => Err(Error::IllegalItemType {
                index,
                expected: "result set",
            }),
        }
    }

    pub fn string_at(&self, index: usize) -> Result<String> {
        Ok(self.value_at(index)?.to_text())
    }

    pub fn bool_at(&self, index: usize) -> Result<bool> {
        self.value_at(index)?.to_bool()
    }

    pub fn int_at(&self, index: usize) -> Result<i64> {
        self.value_at(index)?.to_i64()
    }

    /// Flattens the tree into its leaves, in order.
    pub fn values(&self) -> Vec<Value> {
        let mut values = Vec::with_capacity(self.items.len());
        self.collect_values(&mut values);
        values
    }

    fn collect_values(&self, out: &mut Vec<Value>) {
        for item in &self.items {
            match item {
                Item::Value(value) => out.push(value.clone()),
                Item::Set(set) => set.collect_values(out),
            }
        }
    }

    /// Flattens the tree into the text forms of its leaves.
    pub fn strings(&self) -> Vec<String> {
        self.values().iter().map(Value::to_text).collect()
    }

    /// Reads the items pairwise as key and value; nested sets are rejected.
    pub fn key_values(&self) -> Result<Vec<KeyValue>> {
        let mut kvs = Vec::with_capacity(self.items.len() / 2);
        let mut key = String::new();
        for (index, item) in self.items.iter().enumerate() {
            let Item::Value(value) = item else {
                return Err(Error::IllegalItemType {
                    index,
                    expected: "value",
                });
            };
            if index % 2 == 0 {
                key = value.to_text();
            } else {
                kvs.push(KeyValue {
                    key: std::mem::take(&mut key),
                    value: value.clone(),
                });
            }
        }
        Ok(kvs)
    }

    /// Materializes the pairwise reading as a hash; later duplicates win.
    pub fn hash(&self) -> Result<Hash> {
        let mut hash = Hash::new();
        for kv in self.key_values()? {
            hash.set(kv.key, kv.value);
        }
        Ok(hash)
    }

    /// With scores, consecutive leaves pair up as member and score;
    /// without, every leaf gets score 0.
    pub fn scored_values(&self, with_scores: bool) -> Result<Vec<ScoredValue>> {
        let values = self.values();
        if !with_scores {
            return Ok(values
                .into_iter()
                .map(|value| ScoredValue { value, score: 0.0 })
                .collect());
        }
        if values.len() % 2 != 0 {
            return Err(Error::InvalidResponse(
                "odd number of leaves for scored values".to_string(),
            ));
        }
        let mut scored = Vec::with_capacity(values.len() / 2);
        let mut iter = values.into_iter();
        while let (Some(value), Some(score)) = (iter.next(), iter.next()) {
            scored.push(ScoredValue {
                score: score.to_f64()?,
                value,
            });
        }
        Ok(scored)
    }

    /// Decomposes an iterating command's reply into cursor and inner set.
    pub fn scanned(&self) -> Result<(u64, ResultSet)> {
        let cursor = self.value_at(0)?.to_u64()?;
        Ok((cursor, self.set_at(1)?.clone()))
    }
}

impl fmt::Display for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RESULT SET (")?;
        for (index, item) in self.items.iter().enumerate() {
            if index > 0 {
                write!(f, " / ")?;
            }
            match item {
                Item::Value(value) => write!(f, "{}", value)?,
                Item::Set(set) => write!(f, "{}", set)?,
            }
        }
        write!(f, ")")
    }
}

/// Folds the decoded frame stream into complete result trees.
///
/// The node stack is the spine from the root to the current node: leaves
/// append at the top, array headers push a new node, and completed nodes
/// pop into their parent. Delivering the root resets the assembler.
#[derive(Debug)]
pub(crate) struct ResultAssembler {
    stack: Vec<ResultSet>,
    started: bool,
}

impl ResultAssembler {
    pub fn new() -> ResultAssembler {
        ResultAssembler {
            stack: vec![ResultSet::new()],
            started: false,
        }
    }

    /// Appends a leaf at the current node; returns the tree when the root
    /// completes.
    pub fn push_value(&mut self, value: Value) -> Option<ResultSet> {
        self.started = true;
        if let Some(current) = self.stack.last_mut() {
            current.items.push(Item::Value(value));
        }
        self.ascend()
    }

    /// Handles an array header: the first header sizes the root, later
    /// ones open a nested set the cursor descends into.
    pub fn push_array(&mut self, len: usize) -> Option<ResultSet> {
        if !self.started {
            self.started = true;
            if let Some(root) = self.stack.first_mut() {
                root.expected = len;
            }
            return self.ascend();
        }
        let mut child = ResultSet::new();
        child.expected = len;
        if len == 0 {
            if let Some(current) = self.stack.last_mut() {
                current.items.push(Item::Set(child));
            }
            return self.ascend();
        }
        self.stack.push(child);
        None
    }

    fn ascend(&mut self) -> Option<ResultSet> {
        loop {
            let complete = self.stack.last().map(ResultSet::all_received)?;
            if !complete {
                return None;
            }
            if self.stack.len() == 1 {
                break;
            }
            let done = self.stack.pop()?;
            self.stack.last_mut()?.items.push(Item::Set(done));
        }
        let root = self.stack.pop()?;
        self.stack.push(ResultSet::new());
        self.started = false;
        Some(root)
    }
}
