pub(crate) const DEFAULT_TICK_MS: u64 = 5 * 1000;
pub(crate) const DEFAULT_PAYLOAD: &str = "hello";
