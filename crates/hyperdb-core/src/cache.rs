//! Bounded LRU of decoded items keyed by `(class, id)`.

use std::collections::{HashMap, VecDeque};

use crate::{item::Item, types::ItemId};

type Key = (String, ItemId);

#[derive(Debug)]
pub struct ItemCache {
  items:    HashMap<Key, Item>,
  /// Front is least recently used.
  order:    VecDeque<Key>,
  capacity: usize,
}

impl ItemCache {
  pub fn new(capacity: usize) -> Self {
    ItemCache {
      items: HashMap::with_capacity(capacity),
      order: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  pub fn len(&self) -> usize { self.items.len() }

  pub fn is_empty(&self) -> bool { self.items.is_empty() }

  fn touch(&mut self, key: &Key) {
    if let Some(pos) = self.order.iter().position(|k| k == key) {
      self.order.remove(pos);
    }
    self.order.push_back(key.clone());
  }

  pub fn get(&mut self, class: &str, id: ItemId) -> Option<Item> {
    let key = (class.to_owned(), id);
    let item = self.items.get(&key).cloned()?;
    self.touch(&key);
    Some(item)
  }

  pub fn insert(&mut self, class: &str, item: Item) {
    if self.capacity == 0 {
      return;
    }
    let key = (class.to_owned(), item.id);
    self.touch(&key);
    self.items.insert(key, item);
    while self.items.len() > self.capacity {
      let Some(oldest) = self.order.pop_front() else { break };
      self.items.remove(&oldest);
    }
  }

  pub fn invalidate(&mut self, class: &str, id: ItemId) {
    let key = (class.to_owned(), id);
    self.items.remove(&key);
    if let Some(pos) = self.order.iter().position(|k| *k == key) {
      self.order.remove(pos);
    }
  }

  pub fn clear(&mut self) {
    self.items.clear();
    self.order.clear();
  }
}
