//! Run-time options for retar
//!
//! One immutable value built in `main` from the command line and passed by
//! reference through every component. Nothing here is mutated after startup.

/// Options threaded through every operation
#[derive(Debug, Clone)]
pub struct Options {
    /// Verbosity level from the command line
    pub verbose: u8,

    /// Preserve scratch directories instead of removing them on exit
    pub keep_scratch: bool,

    /// Enable the expensive compressor searches (pbzip2 block-size sweep)
    pub try_harder: bool,

    /// Branch holding stored deltas
    pub branch: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verbose: 0,
            keep_scratch: false,
            try_harder: false,
            branch: "retar".to_string(),
        }
    }
}
