// Frame delivery statistics.

pub mod stats;
