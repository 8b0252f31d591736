use std::{
    fmt::{Debug, Formatter},
    hash::{Hash, Hasher},
    marker::PhantomData,
};

/// 指向 [`HandleAllocator`] 中某个 slot 的类型化句柄
///
/// 句柄由 (index, generation) 组成：slot 被 free 之后 generation 会自增，
/// 因此旧的句柄即使 index 被复用，也不会再通过有效性检查。
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[inline]
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// slot 的原始下标，free 之后会被复用
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}
impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl<T> Debug for Handle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let type_name = std::any::type_name::<T>().rsplit("::").next().unwrap_or("?");
        write!(f, "Handle<{}>({}v{})", type_name, self.index, self.generation)
    }
}

struct Slot<T> {
    value: Option<T>,
    generation: u32,
    live: bool,
}

/// 通用的 slot arena
///
/// - alloc 优先复用最近一次 free 的 slot（栈序），否则追加新的 slot
/// - free 不会清除 slot 中的数据，只是让句柄失效
/// - alloc / free / get 都是均摊 O(1)
pub struct HandleAllocator<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    live_count: usize,
}

impl<T> Default for HandleAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<T> HandleAllocator<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live_count: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            live_count: 0,
        }
    }
}

// getters
impl<T> HandleAllocator<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.live_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// 曾经分配过的 slot 数量，包含已经 free 的
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_valid(&self, handle: Handle<T>) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|slot| slot.live && slot.generation == handle.generation)
    }

    #[track_caller]
    pub fn get(&self, handle: Handle<T>) -> &T {
        self.check(handle);
        self.slots[handle.index as usize].value.as_ref().unwrap()
    }

    #[track_caller]
    pub fn get_mut(&mut self, handle: Handle<T>) -> &mut T {
        self.check(handle);
        self.slots[handle.index as usize].value.as_mut().unwrap()
    }

    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        if self.is_valid(handle) { self.slots[handle.index as usize].value.as_ref() } else { None }
    }

    /// 所有有效的句柄，按 index 升序
    pub fn valid_handles(&self) -> Vec<Handle<T>> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.live)
            .map(|(index, slot)| Handle::new(index as u32, slot.generation))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().enumerate().filter(|(_, slot)| slot.live).filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| (Handle::new(index as u32, slot.generation), value))
        })
    }
}

// tools
impl<T> HandleAllocator<T> {
    pub fn alloc(&mut self, value: T) -> Handle<T> {
        self.live_count += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(!slot.live);
            slot.value = Some(value);
            slot.live = true;
            return Handle::new(index, slot.generation);
        }

        let index = u32::try_from(self.slots.len()).expect("HandleAllocator: slot index overflow");
        self.slots.push(Slot {
            value: Some(value),
            generation: 0,
            live: true,
        });
        Handle::new(index, 0)
    }

    /// 让句柄失效，slot 中的数据保留到下一次 alloc 覆盖
    #[track_caller]
    pub fn free(&mut self, handle: Handle<T>) {
        self.release(handle);
    }

    /// 让句柄失效，并将 slot 中的数据取出
    #[track_caller]
    pub fn take(&mut self, handle: Handle<T>) -> T {
        self.release(handle);
        self.slots[handle.index as usize].value.take().unwrap()
    }

    #[track_caller]
    fn release(&mut self, handle: Handle<T>) {
        self.check(handle);
        let slot = &mut self.slots[handle.index as usize];
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        self.live_count -= 1;
    }

    #[track_caller]
    fn check(&self, handle: Handle<T>) {
        if !self.is_valid(handle) {
            log::error!("invalid handle: {:?}", handle);
            panic!("invalid handle: {:?}", handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_get_round_trip() {
        let mut allocator = HandleAllocator::new();
        let handles = (0..8).map(|i| allocator.alloc(i * 10)).collect::<Vec<_>>();

        for (i, handle) in handles.iter().enumerate() {
            assert!(allocator.is_valid(*handle));
            assert_eq!(*allocator.get(*handle), i * 10);
        }
        assert_eq!(allocator.len(), 8);
        assert_eq!(allocator.valid_handles(), handles);
    }

    #[test]
    fn test_free_invalidates() {
        let mut allocator = HandleAllocator::new();
        let a = allocator.alloc("a");
        let b = allocator.alloc("b");

        allocator.free(a);
        assert!(!allocator.is_valid(a));
        assert!(allocator.is_valid(b));
        assert_eq!(allocator.valid_handles(), vec![b]);
        assert!(allocator.try_get(a).is_none());
    }

    #[test]
    fn test_reuse_is_stack_ordered() {
        let mut allocator = HandleAllocator::new();
        let handles = (0..5).map(|i| allocator.alloc(i)).collect::<Vec<_>>();

        allocator.free(handles[1]);
        allocator.free(handles[3]);
        allocator.free(handles[0]);

        // 最近一次 free 的 slot 最先被复用
        assert_eq!(allocator.alloc(100).index(), handles[0].index());
        assert_eq!(allocator.alloc(101).index(), handles[3].index());
        assert_eq!(allocator.alloc(102).index(), handles[1].index());
        // free list 耗尽之后追加新的 slot
        assert_eq!(allocator.alloc(103).index(), 5);
        assert_eq!(allocator.slot_count(), 6);
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut allocator = HandleAllocator::new();
        let old = allocator.alloc(1);
        allocator.free(old);
        let new = allocator.alloc(2);

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(!allocator.is_valid(old));
        assert_eq!(*allocator.get(new), 2);
    }

    #[test]
    fn test_mixed_sequence() {
        let mut allocator = HandleAllocator::new();
        let mut live: Vec<(Handle<u32>, u32)> = Vec::new();
        let mut dead: Vec<Handle<u32>> = Vec::new();

        for step in 0..200u32 {
            if step % 3 == 2 && !live.is_empty() {
                let (handle, _) = live.remove((step as usize * 7) % live.len());
                allocator.free(handle);
                dead.push(handle);
            } else {
                live.push((allocator.alloc(step), step));
            }

            for (handle, value) in &live {
                assert_eq!(allocator.get(*handle), value);
            }
            for handle in &dead {
                assert!(!allocator.is_valid(*handle));
            }
        }
        assert_eq!(allocator.len(), live.len());
    }

    #[test]
    fn test_take_returns_value() {
        let mut allocator = HandleAllocator::new();
        let handle = allocator.alloc(String::from("image"));
        assert_eq!(allocator.take(handle), "image");
        assert!(allocator.is_empty());
    }

    #[test]
    #[should_panic(expected = "invalid handle")]
    fn test_get_freed_panics() {
        let mut allocator = HandleAllocator::new();
        let handle = allocator.alloc(0u8);
        allocator.free(handle);
        allocator.get(handle);
    }

    #[test]
    #[should_panic(expected = "invalid handle")]
    fn test_double_free_panics() {
        let mut allocator = HandleAllocator::new();
        let handle = allocator.alloc(0u8);
        allocator.free(handle);
        allocator.free(handle);
    }
}
