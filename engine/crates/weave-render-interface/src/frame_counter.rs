pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    /// frames in flight
    fif_count: u64,
}
impl Default for FrameCounter {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_FIF_COUNT)
    }
}
// new & init
impl FrameCounter {
    pub const DEFAULT_FIF_COUNT: u64 = 3;

    pub fn new(init_frame_id: u64, fif_count: u64) -> Self {
        Self {
            frame_id: init_frame_id,
            fif_count: fif_count.max(1),
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
    pub fn fif_count(&self) -> u64 {
        self.fif_count
    }
    /// 当前帧在 frames in flight 中的槽位
    #[inline]
    pub fn frame_slot(&self) -> u64 {
        self.frame_id % self.fif_count
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}#{}]", self.frame_id, self.frame_slot())
    }
    /// 与当前帧共用同一个槽位的上一帧；还不存在时返回 None
    #[inline]
    pub fn retiring_frame(&self) -> Option<u64> {
        self.frame_id.checked_sub(self.fif_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cycle_through_fif() {
        let mut counter = FrameCounter::new(0, 3);
        let mut slots = vec![];
        for _ in 0..5 {
            slots.push(counter.frame_slot());
            counter.next_frame();
        }
        assert_eq!(slots, vec![0, 1, 2, 0, 1]);
        assert_eq!(counter.frame_id(), 5);
        assert_eq!(counter.retiring_frame(), Some(2));
        assert_eq!(FrameCounter::new(1, 3).retiring_frame(), None);
        assert_eq!(counter.frame_name(), "[F5#2]");
    }
}
