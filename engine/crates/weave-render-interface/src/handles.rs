use slotmap::new_key_type;

new_key_type! {
    /// pipeline base 在 `RenderContext` arena 中的句柄
    pub struct PipelineBaseHandle;
}
