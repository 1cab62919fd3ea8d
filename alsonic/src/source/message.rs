/// Work posted by API threads while a source is mid-transition.
///
/// Posted under the source's render gate and applied in post-render, in the order
/// posted, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMessage {
    Stop,
    Pause,
    Resume,
    Play,
    Rewind,
    /// Replace the queue with the first `staged` entries of the temp queue
    SetBuffer { staged: usize },
    /// Drop this many processed entries from the front of the queue
    ClearBuffers(usize),
    /// Move this many entries from the temp queue to the end of the active queue
    AddBuffers(usize),
    Retrigger,
    SetFramePosition(u64),
    DeconstructionStop,
}
