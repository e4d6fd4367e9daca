//! Generational arena holding in-flight transfers.

use crate::transfer::TransferId;

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Free { generation: u32, next_free: Option<u32> },
}

/// Fixed-capacity slot arena addressed by [`TransferId`].
///
/// Removing an entry bumps its slot's generation, so a handle is resolved at
/// most once.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
    capacity: usize,
}

impl<T> Arena<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
            capacity,
        }
    }

    /// Store a value, or hand it back when the arena is full.
    pub fn insert(&mut self, value: T) -> Result<TransferId, T> {
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (generation, next_free) = match slot {
                Slot::Free {
                    generation,
                    next_free,
                } => (*generation, *next_free),
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            *slot = Slot::Occupied { generation, value };
            self.free_head = next_free;
            self.len += 1;
            return Ok(TransferId::from_parts(index, generation));
        }

        if self.slots.len() >= self.capacity {
            return Err(value);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        self.len += 1;
        Ok(TransferId::from_parts(index, 0))
    }

    /// Resolve a handle and release its slot.
    pub fn remove(&mut self, id: TransferId) -> Option<T> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation() => {}
            _ => return None,
        }

        let next = Slot::Free {
            generation: id.generation().wrapping_add(1),
            next_free: self.free_head,
        };
        match std::mem::replace(slot, next) {
            Slot::Occupied { value, .. } => {
                self.free_head = Some(id.index());
                self.len -= 1;
                Some(value)
            }
            Slot::Free { .. } => None,
        }
    }

    pub fn get(&self, id: TransferId) -> Option<&T> {
        match self.slots.get(id.index() as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation() => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, id: TransferId) -> bool {
        self.get(id).is_some()
    }

    /// Release every entry, returning them with their handles.
    pub fn drain(&mut self) -> Vec<(TransferId, T)> {
        let ids: Vec<TransferId> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, .. } => {
                    Some(TransferId::from_parts(index as u32, *generation))
                }
                Slot::Free { .. } => None,
            })
            .collect();

        ids.into_iter()
            .filter_map(|id| self.remove(id).map(|value| (id, value)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
