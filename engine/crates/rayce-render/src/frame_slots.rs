use std::{fmt::Display, ops::Deref};

/// 帧标签
///
/// 表示当前处于 frames in flight 的哪一帧，通过 `Deref` 转换为下标。
/// 显示为 A / B / C ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameLabel(usize);

impl FrameLabel {
    #[inline]
    pub const fn from_usize(idx: usize) -> Self {
        Self(idx)
    }
}

impl Deref for FrameLabel {
    type Target = usize;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for FrameLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match u8::try_from(self.0).ok().filter(|idx| *idx < 26) {
            Some(idx) => write!(f, "{}", (b'A' + idx) as char),
            None => write!(f, "#{}", self.0),
        }
    }
}

pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    fif_count: usize,
}

// new & init
impl FrameCounter {
    pub fn new(init_frame_id: u64, fif_count: usize) -> Self {
        assert!(fif_count > 0, "frames in flight must be at least 1");
        Self {
            frame_id: init_frame_id,
            fif_count,
        }
    }
}

// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}

// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn fif_count(&self) -> usize {
        self.fif_count
    }

    #[inline]
    pub fn frame_labels(&self) -> impl Iterator<Item = FrameLabel> {
        (0..self.fif_count).map(FrameLabel::from_usize)
    }

    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_usize((self.frame_id % self.fif_count as u64) as usize)
    }

    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

/// 每个 frame in flight 一份的资源
///
/// CPU 每帧都会改写的资源（uniform buffer、descriptor set 等）都需要 N 份，
/// 由调用方的 fence 保证同一份资源不会同时被两帧使用。
pub struct FrameResources<T> {
    slots: Vec<T>,
}

impl<T> FrameResources<T> {
    /// 依次为每一帧创建资源，任何一个失败时已创建的资源交给 `cleanup` 回收
    pub fn try_new<E>(
        count: usize,
        mut create: impl FnMut(FrameLabel) -> Result<T, E>,
        mut cleanup: impl FnMut(T),
    ) -> Result<Self, E> {
        assert!(count > 0, "frames in flight must be at least 1");
        let mut slots = Vec::with_capacity(count);
        for idx in 0..count {
            match create(FrameLabel::from_usize(idx)) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    slots.into_iter().for_each(&mut cleanup);
                    return Err(e);
                }
            }
        }
        Ok(Self { slots })
    }

    pub fn new(count: usize, mut create: impl FnMut(FrameLabel) -> T) -> Self {
        assert!(count > 0, "frames in flight must be at least 1");
        Self {
            slots: (0..count).map(|idx| create(FrameLabel::from_usize(idx))).collect(),
        }
    }

    #[inline]
    pub fn slot(&self, label: FrameLabel) -> &T {
        &self.slots[*label]
    }

    #[inline]
    pub fn slot_mut(&mut self, label: FrameLabel) -> &mut T {
        &mut self.slots[*label]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FrameLabel, &T)> {
        self.slots.iter().enumerate().map(|(idx, slot)| (FrameLabel::from_usize(idx), slot))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (FrameLabel, &mut T)> {
        self.slots.iter_mut().enumerate().map(|(idx, slot)| (FrameLabel::from_usize(idx), slot))
    }

    /// 按帧顺序取出所有资源，用于销毁
    pub fn into_slots(self) -> impl Iterator<Item = T> {
        self.slots.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_label_cycles() {
        let mut counter = FrameCounter::new(0, 3);
        let labels: Vec<usize> = (0..7)
            .map(|_| {
                let label = *counter.frame_label();
                counter.next_frame();
                label
            })
            .collect();
        assert_eq!(labels, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(counter.frame_id(), 7);
    }

    #[test]
    fn test_frame_name() {
        let counter = FrameCounter::new(4, 3);
        assert_eq!(counter.frame_name(), "[F4B]");
        assert_eq!(counter.frame_labels().map(|l| l.to_string()).collect::<Vec<_>>(), vec!["A", "B", "C"]);
        assert_eq!(FrameLabel::from_usize(30).to_string(), "#30");
    }

    #[test]
    fn test_wrapping_frame_id() {
        let mut counter = FrameCounter::new(u64::MAX, 2);
        counter.next_frame();
        assert_eq!(counter.frame_id(), 0);
        assert_eq!(*counter.frame_label(), 0);
    }

    #[test]
    fn test_slots_are_independent() {
        let mut slots = FrameResources::new(3, |label| vec![*label as u32]);
        slots.slot_mut(FrameLabel::from_usize(1)).push(42);
        assert_eq!(slots.slot(FrameLabel::from_usize(0)), &vec![0]);
        assert_eq!(slots.slot(FrameLabel::from_usize(1)), &vec![1, 42]);
        assert_eq!(slots.slot(FrameLabel::from_usize(2)), &vec![2]);

        for (_, slot) in slots.iter_mut() {
            slot.push(7);
        }
        assert!(slots.iter().all(|(label, slot)| slot == &vec![*label as u32, 7] || *label == 1));
        assert_eq!(slots.len(), 3);
    }

    #[test]
    fn test_try_new_cleans_up_on_failure() {
        let mut cleaned = Vec::new();
        let result = FrameResources::try_new(
            3,
            |label| if *label == 2 { Err("boom") } else { Ok(*label) },
            |slot| cleaned.push(slot),
        );
        assert!(result.is_err());
        assert_eq!(cleaned, vec![0, 1]);
    }
}
