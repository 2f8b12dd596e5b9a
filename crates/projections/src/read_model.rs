/// Query side of a view, for status reporting.
///
/// Views are fed by projections or integration handlers and never back a
/// write decision.
pub trait ReadModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Entries currently held.
    fn count(&self) -> usize;
}
