//! The lazy child list (component H, §4.8): a child collection that never
//! queries on creation. Its first size read or element read triggers a
//! single materialization; afterwards it behaves as a plain in-memory list.

use std::cell::RefCell;

use crate::error::Result;
use crate::mapping::ObjectBox;

enum State {
    Pending(Option<Box<dyn FnOnce() -> Result<Vec<ObjectBox>>>>),
    Ready(Vec<ObjectBox>),
}

/// Not `Send`/`Sync`: it typically closes over a `Rc<RefCell<..>>` storage
/// handle, matching the single-threaded handle model of `storage.rs`.
pub struct LazyChildList {
    /// Sized via the parent row's `_cc_<table>` column (§6 "Child-count
    /// column"), when that column was read. A size query can be answered
    /// from this without materializing (§4.8 invariant 2).
    known_size: Option<usize>,
    state: RefCell<State>,
}

impl LazyChildList {
    /// Creation never queries (Invariant: "creation never queries" per the
    /// component's own design note); `materializer` runs at most once, on
    /// first demand.
    pub fn pending(materializer: impl FnOnce() -> Result<Vec<ObjectBox>> + 'static) -> Self {
        LazyChildList {
            known_size: None,
            state: RefCell::new(State::Pending(Some(Box::new(materializer)))),
        }
    }

    /// Like `pending`, but carries a child-count column's already-known size
    /// so `len`/`is_empty` never need to materialize (§4.4, §4.8).
    pub fn pending_with_size(size: usize, materializer: impl FnOnce() -> Result<Vec<ObjectBox>> + 'static) -> Self {
        LazyChildList {
            known_size: Some(size),
            state: RefCell::new(State::Pending(Some(Box::new(materializer)))),
        }
    }

    /// A list that is already materialized, e.g. a freshly `store`d object
    /// whose children were just written and are already in hand.
    pub fn ready(items: Vec<ObjectBox>) -> Self {
        LazyChildList {
            known_size: Some(items.len()),
            state: RefCell::new(State::Ready(items)),
        }
    }

    pub fn is_materialized(&self) -> bool {
        matches!(*self.state.borrow(), State::Ready(_))
    }

    fn ensure_materialized(&self) -> Result<()> {
        let needs_materializing = matches!(*self.state.borrow(), State::Pending(_));
        if !needs_materializing {
            return Ok(());
        }
        let materializer = match &mut *self.state.borrow_mut() {
            State::Pending(slot) => slot.take().expect("materializer consumed twice"),
            State::Ready(_) => unreachable!(),
        };
        let items = materializer()?;
        *self.state.borrow_mut() = State::Ready(items);
        Ok(())
    }

    /// Answers from the known child-count column without materializing, if
    /// one was given at construction; otherwise triggers materialization
    /// (§4.8 invariant 2, §4.4 "lazy children").
    pub fn len(&self) -> Result<usize> {
        if let Some(size) = self.known_size {
            if !self.is_materialized() {
                return Ok(size);
            }
        }
        self.ensure_materialized()?;
        match &*self.state.borrow() {
            State::Ready(items) => Ok(items.len()),
            State::Pending(_) => unreachable!(),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Triggers materialization, then hands the caller read access to the
    /// items. Type-erased elements can't be returned by reference out of the
    /// `RefCell` borrow, so reads are scoped through a closure.
    pub fn with_items<R>(&self, f: impl FnOnce(&[ObjectBox]) -> R) -> Result<R> {
        self.ensure_materialized()?;
        match &*self.state.borrow() {
            State::Ready(items) => Ok(f(items)),
            State::Pending(_) => unreachable!(),
        }
    }

    pub fn with_items_mut<R>(&self, f: impl FnOnce(&mut Vec<ObjectBox>) -> R) -> Result<R> {
        self.ensure_materialized()?;
        match &mut *self.state.borrow_mut() {
            State::Ready(items) => Ok(f(items)),
            State::Pending(_) => unreachable!(),
        }
    }

    /// Appends without forcing a re-query of the existing elements; once
    /// materialized, this is an ordinary `Vec::push`.
    pub fn push(&self, item: ObjectBox) -> Result<()> {
        self.with_items_mut(|items| items.push(item))
    }

    pub fn remove(&self, index: usize) -> Result<Option<ObjectBox>> {
        self.with_items_mut(|items| {
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        })
    }

    /// Materializes (if needed) and consumes self, returning the items
    /// directly. Used by `ObjectMapping::install_lazy_children`'s default
    /// eager fallback.
    pub fn into_items(self) -> Result<Vec<ObjectBox>> {
        self.ensure_materialized()?;
        match self.state.into_inner() {
            State::Ready(items) => Ok(items),
            State::Pending(_) => unreachable!(),
        }
    }
}
