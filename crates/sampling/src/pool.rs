//! Candidate pools for random-draw samplers

use crate::RandomStream;
use parking_lot::RwLock;
use std::sync::Arc;
use train_core::{Error, Result};

/// A non-empty, immutable list of candidates
#[derive(Debug)]
pub struct Pool<T> {
    name: String,
    items: Vec<T>,
}

impl<T> Pool<T> {
    /// Build a pool; an empty list is a precondition violation
    pub fn new(name: impl Into<String>, items: Vec<T>) -> Result<Self> {
        let name = name.into();
        if items.is_empty() {
            return Err(Error::EmptyPool { pool: name });
        }
        Ok(Self { name, items })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Draw one candidate uniformly
    pub fn draw(&self, random: &mut RandomStream) -> &T {
        &self.items[random.below(self.items.len())]
    }
}

/// Candidates shared between a sampler and the iterators it handed out
///
/// `update()` swaps the candidates in place; iterators see them on their next
/// draw.
#[derive(Debug)]
pub struct SharedPool<P> {
    inner: Arc<RwLock<Option<Arc<P>>>>,
}

impl<P> Clone for SharedPool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> Default for SharedPool<P> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }
}

impl<P> SharedPool<P> {
    pub fn replace(&self, pool: P) {
        *self.inner.write() = Some(Arc::new(pool));
    }

    pub fn is_ready(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Current candidates, if they were built
    pub fn current(&self) -> Option<Arc<P>> {
        self.inner.read().clone()
    }
}
