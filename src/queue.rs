use itertools::Itertools;

/// Fixed-capacity array of request slots.
///
/// Entries keep their slot until explicitly taken, so indices stay
/// stable while a request is in flight.
#[derive(Debug, Clone)]
pub struct SlotQueue<T> {
    slots: Box<[Option<T>]>,
}

impl<T> SlotQueue<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Place `value` in the first free slot, returning its index.
    pub fn insert(&mut self, value: T) -> Option<usize> {
        let idx = self.slots.iter().position(Option::is_none)?;
        self.slots[idx] = Some(value);
        Some(idx)
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots[idx].as_ref()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots[idx].as_mut()
    }

    pub fn take(&mut self, idx: usize) -> Option<T> {
        self.slots[idx].take()
    }

    /// Occupied slots with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|entry| (idx, entry)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_mut().map(|entry| (idx, entry)))
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.slots.iter_mut().filter_map(Option::take)
    }
}

impl<T> std::fmt::Display for SlotQueue<T>
where
    T: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:>2}/{:<2})[{}]",
            self.occupancy(),
            self.capacity(),
            self.iter().map(|(_, entry)| entry).format(", ")
        )
    }
}
