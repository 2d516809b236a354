//! Serializable iterators
//!
//! Three ways of making an infinite stream resumable:
//! - **Random draw**: every item is produced from a [`RandomStream`]; the
//!   stream snapshot is the whole state.
//! - **Skip ahead**: items come from a re-iterable source; on restore a fresh
//!   pass is advanced past the items already produced.
//! - **Switchable**: a list of iterators and the index of the one currently
//!   serving `next()`.

use crate::RandomStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error};
use train_core::{Error, IteratorState, Result};

/// An iterator whose position can be captured and restored
pub trait SerializableIterator: Iterator + Send {
    /// Capture the cursor of the iterator
    fn state(&self) -> IteratorState;

    /// Move to a previously captured cursor
    fn restore(&mut self, state: &IteratorState) -> Result<()>;
}

/// Boxed serializable iterator
pub type BoxedIterator<T> = Box<dyn SerializableIterator<Item = T>>;

impl<I: SerializableIterator + ?Sized> SerializableIterator for Box<I> {
    fn state(&self) -> IteratorState {
        (**self).state()
    }

    fn restore(&mut self, state: &IteratorState) -> Result<()> {
        (**self).restore(state)
    }
}

type Generator<T> = Box<dyn FnMut(&mut RandomStream) -> Option<T> + Send>;

/// Iterator whose items are drawn with a random stream
pub struct RandomSerializableIterator<T> {
    random: RandomStream,
    generator: Generator<T>,
}

impl<T> RandomSerializableIterator<T> {
    pub fn new(
        random: RandomStream,
        generator: impl FnMut(&mut RandomStream) -> Option<T> + Send + 'static,
    ) -> Self {
        Self {
            random,
            generator: Box::new(generator),
        }
    }
}

impl<T> Iterator for RandomSerializableIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        (self.generator)(&mut self.random)
    }
}

impl<T> SerializableIterator for RandomSerializableIterator<T> {
    fn state(&self) -> IteratorState {
        IteratorState::random(self.random.snapshot())
    }

    fn restore(&mut self, state: &IteratorState) -> Result<()> {
        let random = state.random.as_ref().ok_or_else(|| Error::Internal {
            message: "random iterator state has no random snapshot".to_string(),
        })?;
        self.random.restore(random);
        Ok(())
    }
}

/// Opens a fresh pass over a source
pub type SourceFactory<T> =
    Box<dyn Fn() -> Result<Box<dyn Iterator<Item = T> + Send>> + Send + Sync>;

/// Iterator over a re-iterable source, resumed by skipping ahead
///
/// When a pass ends a new one starts, so the stream is infinite as long as the
/// source is not empty. `position` counts items produced across passes.
pub struct SkippingIterator<T> {
    name: String,
    factory: SourceFactory<T>,
    iter: Option<Box<dyn Iterator<Item = T> + Send>>,
    position: u64,
    produced_in_pass: u64,
}

impl<T> SkippingIterator<T> {
    pub fn new(
        name: impl Into<String>,
        factory: impl Fn() -> Result<Box<dyn Iterator<Item = T> + Send>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            factory: Box::new(factory),
            iter: None,
            position: 0,
            produced_in_pass: 0,
        }
    }

    /// Number of items produced since creation
    pub fn position(&self) -> u64 {
        self.position
    }

    fn open(&mut self) -> Result<()> {
        self.iter = Some((self.factory)()?);
        self.produced_in_pass = 0;
        Ok(())
    }

    /// Pull the next item from the current pass, reopening the source at the
    /// end of a non-empty pass
    fn pull(&mut self) -> Result<T> {
        loop {
            if self.iter.is_none() {
                self.open()?;
            }
            let item = self.iter.as_mut().and_then(|iter| iter.next());
            match item {
                Some(item) => {
                    self.produced_in_pass += 1;
                    return Ok(item);
                }
                None if self.produced_in_pass == 0 => {
                    self.iter = None;
                    return Err(Error::SamplerExhausted {
                        sampler: self.name.clone(),
                    });
                }
                None => {
                    debug!(
                        source = %self.name,
                        pass_length = self.produced_in_pass,
                        "Source exhausted, starting a new pass"
                    );
                    self.iter = None;
                }
            }
        }
    }
}

impl<T> Iterator for SkippingIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.pull() {
            Ok(item) => {
                self.position += 1;
                Some(item)
            }
            Err(e) => {
                error!(source = %self.name, error = %e, "Cannot read from source");
                None
            }
        }
    }
}

impl<T> SerializableIterator for SkippingIterator<T> {
    fn state(&self) -> IteratorState {
        IteratorState::position(self.position)
    }

    fn restore(&mut self, state: &IteratorState) -> Result<()> {
        let position = state.position.ok_or_else(|| Error::Internal {
            message: format!("state of {} has no position", self.name),
        })?;

        self.open()?;
        let mut remaining = position;
        while remaining > 0 {
            let item = self.iter.as_mut().and_then(|iter| iter.next());
            match item {
                Some(_) => {
                    self.produced_in_pass += 1;
                    remaining -= 1;
                }
                None if self.produced_in_pass == 0 => {
                    return Err(Error::SamplerExhausted {
                        sampler: self.name.clone(),
                    });
                }
                None => {
                    // Whole passes need not be replayed
                    remaining %= self.produced_in_pass;
                    self.open()?;
                }
            }
        }

        self.position = position;
        debug!(source = %self.name, position, "Skipped ahead");
        Ok(())
    }
}

/// Shared index of the iterator currently serving a switchable stream
///
/// Only the orchestration thread changes it.
#[derive(Debug, Clone, Default)]
pub struct SwitchHandle(Arc<AtomicUsize>);

impl SwitchHandle {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, index: usize) {
        self.0.store(index, Ordering::Relaxed);
    }
}

/// Ordered list of iterators, one of which serves `next()`
pub struct SwitchableIterator<T> {
    iterators: Vec<BoxedIterator<T>>,
    current: SwitchHandle,
}

impl<T> SwitchableIterator<T> {
    pub fn new(iterators: Vec<BoxedIterator<T>>, current: SwitchHandle) -> Self {
        Self { iterators, current }
    }

    pub fn current(&self) -> usize {
        self.current.get()
    }

    pub fn set_current(&mut self, index: usize) -> Result<()> {
        if index >= self.iterators.len() {
            return Err(Error::InvalidSamplerIndex {
                index,
                count: self.iterators.len(),
            });
        }
        self.current.set(index);
        Ok(())
    }
}

impl<T> Iterator for SwitchableIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let current = self.current.get();
        self.iterators.get_mut(current)?.next()
    }
}

impl<T> SerializableIterator for SwitchableIterator<T> {
    fn state(&self) -> IteratorState {
        IteratorState::switchable(
            self.current.get(),
            self.iterators.iter().map(|iter| iter.state()).collect(),
        )
    }

    fn restore(&mut self, state: &IteratorState) -> Result<()> {
        if state.children.len() != self.iterators.len() {
            return Err(Error::Internal {
                message: format!(
                    "switchable state has {} children, expected {}",
                    state.children.len(),
                    self.iterators.len()
                ),
            });
        }
        for (iter, child) in self.iterators.iter_mut().zip(&state.children) {
            iter.restore(child)?;
        }
        self.set_current(state.current.unwrap_or(0))
    }
}

/// Transforms the items of an inner iterator, delegating its state
pub struct SerializableIteratorAdapter<I, U> {
    inner: I,
    transform: Box<dyn FnMut(&mut I) -> Option<U> + Send>,
}

impl<I: SerializableIterator, U> SerializableIteratorAdapter<I, U> {
    pub fn new(inner: I, transform: impl FnMut(&mut I) -> Option<U> + Send + 'static) -> Self {
        Self {
            inner,
            transform: Box::new(transform),
        }
    }
}

impl<I: SerializableIterator, U> Iterator for SerializableIteratorAdapter<I, U> {
    type Item = U;

    fn next(&mut self) -> Option<U> {
        (self.transform)(&mut self.inner)
    }
}

impl<I: SerializableIterator, U> SerializableIterator for SerializableIteratorAdapter<I, U> {
    fn state(&self) -> IteratorState {
        self.inner.state()
    }

    fn restore(&mut self, state: &IteratorState) -> Result<()> {
        self.inner.restore(state)
    }
}
