use crate::product::{Product, ProductType};
use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Capacity-limited FIFO of products with suspending put/get.
///
/// Every buffer belongs to exactly one device; all hand-offs are pop-then-push.
#[derive(Debug)]
pub struct BoundedBuffer {
    name: String,
    capacity: usize,
    items: Mutex<VecDeque<Product>>,
    space_freed: Notify,
    item_added: Notify,
}

impl BoundedBuffer {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            space_freed: Notify::new(),
            item_added: Notify::new(),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<Product>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items().len() >= self.capacity
    }

    pub fn try_push(&self, item: Product) -> Result<(), Product> {
        {
            let mut items = self.items();
            if items.len() >= self.capacity {
                return Err(item);
            }
            items.push_back(item);
        }
        self.item_added.notify_waiters();
        Ok(())
    }

    /// Suspends until there is room, then appends.
    pub async fn push(&self, mut item: Product) {
        loop {
            let mut freed = pin!(self.space_freed.notified());
            freed.as_mut().enable();
            match self.try_push(item) {
                Ok(()) => return,
                Err(back) => item = back,
            }
            freed.await;
        }
    }

    pub fn try_pop(&self) -> Option<Product> {
        let item = self.items().pop_front();
        if item.is_some() {
            self.space_freed.notify_waiters();
        }
        item
    }

    /// Suspends until an item is available, then removes the head.
    pub async fn pop(&self) -> Product {
        loop {
            let mut added = pin!(self.item_added.notified());
            added.as_mut().enable();
            if let Some(item) = self.try_pop() {
                return item;
            }
            added.await;
        }
    }

    /// Removes a specific item wherever it sits in the queue.
    pub fn remove(&self, item_id: &str) -> Option<Product> {
        let item = {
            let mut items = self.items();
            let index = items.iter().position(|p| p.id == item_id)?;
            items.remove(index)
        };
        if item.is_some() {
            self.space_freed.notify_waiters();
        }
        item
    }

    /// Puts an item that was just taken out back at the head, bypassing the capacity check.
    pub fn restore_front(&self, item: Product) {
        self.items().push_front(item);
        self.item_added.notify_waiters();
    }

    pub fn front(&self) -> Option<(String, ProductType)> {
        self.items().front().map(|p| (p.id.clone(), p.product_type))
    }

    pub fn item_ids(&self) -> Vec<String> {
        self.items().iter().map(|p| p.id.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<Product> {
        self.items().iter().cloned().collect()
    }

    /// Resolves once the buffer has at least one free slot.
    pub async fn space_available(&self) {
        loop {
            let mut freed = pin!(self.space_freed.notified());
            freed.as_mut().enable();
            if !self.is_full() {
                return;
            }
            freed.await;
        }
    }

    /// Resolves once the buffer holds at least one item.
    pub async fn item_available(&self) {
        loop {
            let mut added = pin!(self.item_added.notified());
            added.as_mut().enable();
            if !self.is_empty() {
                return;
            }
            added.await;
        }
    }
}
