use crate::frame_settings::FrameLabel;

/// 帧计数器
///
/// `frame_id` 一直累加；Frames in Flight 的数量在构造时确定，之后不可修改。
#[derive(Clone, Debug)]
pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    fif_count: usize,
}
// new & init
impl FrameCounter {
    pub const DEFAULT_FIF_COUNT: usize = 3;

    pub fn new(init_frame_id: u64, fif_count: usize) -> Self {
        assert!(
            (1..=FrameLabel::MAX_COUNT).contains(&fif_count),
            "Frames in flight must be in 1..={}, got {fif_count}",
            FrameLabel::MAX_COUNT
        );
        Self {
            frame_id: init_frame_id,
            fif_count,
        }
    }
}
impl Default for FrameCounter {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_FIF_COUNT)
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
    /// 在 `frame_id` 提交的工作，是否已经可以确定被 GPU 执行完成
    ///
    /// 当前帧开始录制前，会先等待同一个 FIF slot 的上一帧，
    /// 因此 `fif_count` 帧之前提交的工作一定已经完成。
    #[inline]
    pub fn is_retired(&self, frame_id: u64) -> bool {
        frame_id + self.fif_count as u64 <= self.frame_id
    }
}
