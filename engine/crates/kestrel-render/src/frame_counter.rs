use std::{fmt::Display, ops::Deref};

/// 帧标签（A/B/C/...）
///
/// 表示当前处于 Frames in Flight 的哪一帧。
/// 通过 `Deref` 转换为 frame slot 的索引。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameLabel(usize);

impl FrameLabel {
    pub const A: Self = Self(0);
    pub const B: Self = Self(1);
    pub const C: Self = Self(2);

    #[inline]
    pub fn from_usize(idx: usize) -> Self {
        assert!(idx < 26, "Invalid frame index: {idx}");
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
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", (b'A' + self.0 as u8) as char)
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
    pub fn frame_labels(&self) -> Vec<FrameLabel> {
        (0..self.fif_count).map(FrameLabel::from_usize).collect()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_cycle() {
        let mut counter = FrameCounter::new(0, 3);
        let labels = (0..7)
            .map(|_| {
                let label = counter.frame_label();
                counter.next_frame();
                label
            })
            .collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec![
                FrameLabel::A,
                FrameLabel::B,
                FrameLabel::C,
                FrameLabel::A,
                FrameLabel::B,
                FrameLabel::C,
                FrameLabel::A
            ]
        );
        assert_eq!(counter.frame_name(), "[F7B]");
    }

    #[test]
    fn test_label_display_and_index() {
        assert_eq!(FrameLabel::C.to_string(), "C");
        assert_eq!(*FrameLabel::from_usize(4), 4);
        assert_eq!(FrameLabel::from_usize(4).to_string(), "E");
        assert_eq!(FrameCounter::new(0, 2).frame_labels(), vec![FrameLabel::A, FrameLabel::B]);
    }
}
