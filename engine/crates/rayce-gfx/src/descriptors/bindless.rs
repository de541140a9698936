use slotmap::SlotMap;

use crate::error::{GpuError, GpuResult};

slotmap::new_key_type! {
    pub struct BindlessKey;
}

/// bindless 数组的下标分配器
///
/// 每个资源占用一个 shader 可见的数组下标，移除后下标会被回收复用。
/// 下标范围为 `[0, capacity)`，超出时返回 `DescriptorCapacityExceeded`。
pub struct BindlessArena<T> {
    entries: SlotMap<BindlessKey, (u32, T)>,
    free_indices: Vec<u32>,
    /// 曾经分配过的最大下标 + 1，也就是 descriptor 数组需要的长度
    high_water: u32,

    capacity: u32,
    /// 对应的 descriptor binding，只用于错误信息
    binding: u32,
}

impl<T> BindlessArena<T> {
    pub fn new(binding: u32, capacity: u32) -> Self {
        Self {
            entries: SlotMap::with_key(),
            free_indices: Vec::new(),
            high_water: 0,
            capacity,
            binding,
        }
    }

    /// 注册一个资源，返回它的 key 以及 shader 中使用的下标
    pub fn insert(&mut self, value: T) -> GpuResult<(BindlessKey, u32)> {
        let index = match self.free_indices.pop() {
            Some(index) => index,
            None if self.high_water < self.capacity => {
                self.high_water += 1;
                self.high_water - 1
            }
            None => {
                return Err(GpuError::DescriptorCapacityExceeded {
                    binding: self.binding,
                    requested: self.capacity + 1,
                    capacity: self.capacity,
                });
            }
        };
        let key = self.entries.insert((index, value));
        Ok((key, index))
    }

    pub fn remove(&mut self, key: BindlessKey) -> Option<T> {
        let (index, value) = self.entries.remove(key)?;
        self.free_indices.push(index);
        Some(value)
    }

    #[inline]
    pub fn get(&self, key: BindlessKey) -> Option<&T> {
        self.entries.get(key).map(|(_, v)| v)
    }

    #[inline]
    pub fn index_of(&self, key: BindlessKey) -> Option<u32> {
        self.entries.get(key).map(|(idx, _)| *idx)
    }

    /// descriptor 数组需要覆盖的长度，用作 variable descriptor count
    #[inline]
    pub fn variable_count(&self) -> u32 {
        self.high_water
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// 按下标升序遍历
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        let mut items: Vec<_> = self.entries.values().map(|(idx, v)| (*idx, v)).collect();
        items.sort_by_key(|(idx, _)| *idx);
        items.into_iter()
    }

    /// 长度为 `variable_count()` 的数组视图，空洞为 `None`
    pub fn dense(&self) -> Vec<Option<T>>
    where
        T: Clone,
    {
        let mut slots = vec![None; self.high_water as usize];
        for (idx, v) in self.entries.values() {
            slots[*idx as usize] = Some(v.clone());
        }
        slots
    }

    /// 取出全部资源，清空下标分配
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.free_indices.clear();
        self.high_water = 0;
        self.entries.drain().map(|(_, (_, v))| v)
    }
}

/// 把带空洞的数组切分为连续的段，返回每段的起始下标和内容
///
/// 每一段对应一次 `dst_array_element = 起始下标` 的 descriptor 写入
pub fn contiguous_runs<T: Clone>(slots: &[Option<T>]) -> Vec<(u32, Vec<T>)> {
    let mut runs: Vec<(u32, Vec<T>)> = Vec::new();
    let mut prev_filled = false;
    for (idx, slot) in slots.iter().enumerate() {
        match slot {
            Some(v) if prev_filled => {
                if let Some((_, run)) = runs.last_mut() {
                    run.push(v.clone());
                }
            }
            Some(v) => runs.push((idx as u32, vec![v.clone()])),
            None => {}
        }
        prev_filled = slot.is_some();
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_dense() {
        let mut arena = BindlessArena::new(0, 4);
        let (_, a) = arena.insert("a").unwrap();
        let (_, b) = arena.insert("b").unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(arena.variable_count(), 2);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut arena = BindlessArena::new(3, 2);
        arena.insert(1).unwrap();
        arena.insert(2).unwrap();
        match arena.insert(3) {
            Err(GpuError::DescriptorCapacityExceeded {
                binding,
                requested,
                capacity,
            }) => assert_eq!((binding, requested, capacity), (3, 3, 2)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_index_recycled_after_remove() {
        let mut arena = BindlessArena::new(0, 2);
        let (k0, _) = arena.insert(10).unwrap();
        let (_k1, _) = arena.insert(11).unwrap();
        assert_eq!(arena.remove(k0), Some(10));
        assert_eq!(arena.get(k0), None);
        assert_eq!(arena.index_of(k0), None);

        // 满容量时依然可以复用被释放的下标
        let (k2, idx) = arena.insert(12).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(arena.index_of(k2), Some(0));
        assert_eq!(arena.variable_count(), 2);
        assert!(arena.insert(13).is_err());
    }

    #[test]
    fn test_iter_sorted_by_index() {
        let mut arena = BindlessArena::new(0, 8);
        let keys: Vec<_> = (0..4).map(|i| arena.insert(i * 10).unwrap().0).collect();
        arena.remove(keys[1]);
        arena.insert(99).unwrap();
        let items: Vec<_> = arena.iter().map(|(idx, v)| (idx, *v)).collect();
        assert_eq!(items, vec![(0, 0), (1, 99), (2, 20), (3, 30)]);
    }

    #[test]
    fn test_dense_keeps_holes() {
        let mut arena = BindlessArena::new(0, 8);
        let (_, a) = arena.insert("a").unwrap();
        let (kb, _) = arena.insert("b").unwrap();
        let (_, c) = arena.insert("c").unwrap();
        arena.remove(kb);

        let dense = arena.dense();
        assert_eq!(dense.len() as u32, arena.variable_count());
        assert_eq!(dense, vec![Some("a"), None, Some("c")]);
        assert_eq!(dense[a as usize], Some("a"));
        assert_eq!(dense[c as usize], Some("c"));
    }

    #[test]
    fn test_contiguous_runs() {
        let slots = [Some(1), Some(2), None, None, Some(5), None, Some(7), Some(8)];
        assert_eq!(contiguous_runs(&slots), vec![(0, vec![1, 2]), (4, vec![5]), (6, vec![7, 8])]);
        assert!(contiguous_runs::<u32>(&[None, None]).is_empty());
        assert!(contiguous_runs::<u32>(&[]).is_empty());
    }

    #[test]
    fn test_drain_resets() {
        let mut arena = BindlessArena::new(0, 2);
        arena.insert(1).unwrap();
        arena.insert(2).unwrap();
        let mut drained: Vec<_> = arena.drain().collect();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(arena.is_empty());
        assert_eq!(arena.variable_count(), 0);
        assert_eq!(arena.insert(3).unwrap().1, 0);
    }
}
