/// Slot storage for per-session handles.
///
/// A handle is `generation << 16 | (slot + 1)`: never zero, and a slot reused after
/// a remove gets a new generation, so a stale handle stops resolving.
#[derive(Debug)]
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u16,
    value: Option<T>,
}

const MAX_SLOTS: usize = u16::MAX as usize;

impl<T> Arena<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Stores `value`, or gives it back when every slot is taken.
    pub(crate) fn insert(&mut self, value: T) -> Result<u32, T> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.slots.len() < MAX_SLOTS => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                self.slots.len() - 1
            }
            None => return Err(value),
        };

        let slot = &mut self.slots[index];
        slot.value = Some(value);
        Ok(handle(index, slot.generation))
    }

    pub(crate) fn get(&self, handle: u32) -> Option<&T> {
        let index = self.resolve(handle)?;
        self.slots[index].value.as_ref()
    }

    pub(crate) fn get_mut(&mut self, handle: u32) -> Option<&mut T> {
        let index = self.resolve(handle)?;
        self.slots[index].value.as_mut()
    }

    pub(crate) fn remove(&mut self, handle: u32) -> Option<T> {
        let index = self.resolve(handle)?;
        let slot = &mut self.slots[index];
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        Some(value)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn resolve(&self, handle: u32) -> Option<usize> {
        let index = (handle & 0xffff).checked_sub(1)? as usize;
        let generation = (handle >> 16) as u16;
        let slot = self.slots.get(index)?;
        (slot.generation == generation && slot.value.is_some()).then_some(index)
    }
}

fn handle(index: usize, generation: u16) -> u32 {
    (u32::from(generation) << 16) | (index as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_never_zero() {
        let mut arena = Arena::new();
        let a = arena.insert("a").unwrap();
        let b = arena.insert("b").unwrap();
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.get(0), None);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn stale_handle_does_not_resolve() {
        let mut arena = Arena::new();
        let old = arena.insert(1).unwrap();
        assert_eq!(arena.remove(old), Some(1));
        assert_eq!(arena.remove(old), None);

        let new = arena.insert(2).unwrap();
        assert_ne!(old, new);
        assert_eq!(old & 0xffff, new & 0xffff);
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.get_mut(new), Some(&mut 2));
        assert_eq!(arena.len(), 1);
    }
}
