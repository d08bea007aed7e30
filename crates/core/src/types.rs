/// Tracker primary keys (scans, jobs, HMMs, databases) are 64-bit integers.
pub type DbId = i64;

/// A progress reading reported by the engine, in percent (`0..=100`).
pub type Percent = u8;
