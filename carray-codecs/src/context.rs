use std::sync::OnceLock;
use std::thread::ThreadId;

use crate::params::ThreadMode;

/// Explicit lifecycle object for the codec's threading policy.
///
/// The backing compressors (`lz4_flex`, `zstd`, `flate2`) carry no process-
/// wide init state of their own, but the library-wide "use threads" switch
/// described in spec §5 still needs somewhere to live: it must be
/// constructed once and either passed around explicitly or reached through
/// [`CodecContext::global`] — never assumed to exist implicitly.
pub struct CodecContext {
    main_thread: ThreadId,
}

impl CodecContext {
    /// Capture the calling thread as "main" for the adaptive policy.
    ///
    /// Call this once, as early as possible, from whichever thread the host
    /// considers authoritative (usually the process's actual main thread).
    pub fn new() -> Self {
        CodecContext {
            main_thread: std::thread::current().id(),
        }
    }

    /// A process-wide context, lazily created on first access.
    ///
    /// Convenience for hosts that don't want to thread an explicit context
    /// through every call site. Whichever thread calls this first becomes
    /// "main" for the lifetime of the process.
    pub fn global() -> &'static CodecContext {
        static GLOBAL: OnceLock<CodecContext> = OnceLock::new();
        GLOBAL.get_or_init(CodecContext::new)
    }

    /// Resolve whether block-level work may use `rayon` under `mode`.
    pub fn threads_allowed(&self, mode: ThreadMode) -> bool {
        match mode {
            ThreadMode::AlwaysOn => true,
            ThreadMode::AlwaysOff => false,
            ThreadMode::Adaptive => std::thread::current().id() == self.main_thread,
        }
    }
}

impl Default for CodecContext {
    fn default() -> Self {
        Self::new()
    }
}
